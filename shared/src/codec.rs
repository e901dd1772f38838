//! Text command codec for the gate controller firmware
//!
//! Outbound commands are `#`-delimited directives prefixed with the device
//! password and terminated by a trailing `#`:
//! ```text
//! <password>#OPEN#
//! <oldPassword>#PWD#<newPassword>#
//! <password>#<timezoneCode>#
//! <password>#RSSI?#
//! <password>#CIA?#   (also R1A?, R2A?, SUA?)
//! <password>#ID1?#   (also ID2?)
//! ```
//!
//! Replies are free text. Each query kind has one capture pattern that is
//! searched for anywhere in the reply, so firmware boilerplate around the
//! phrase is ignored.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::command::{CommandKind, CommandParams, ExtractedValue, OutputChannel, SlotFeature};
use crate::limits::DELIMITER;

const OPEN_DIRECTIVE: &str = "OPEN";
const PASSWORD_DIRECTIVE: &str = "PWD";
const RSSI_DIRECTIVE: &str = "RSSI?";

// Patterns are literals; compilation cannot fail at runtime.
static RSSI_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"RSSI is (\d+)").expect("RSSI pattern"));

static LOCATION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Location is (\d{3})\b").expect("location pattern"));

static OUTPUT_NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Output name is ([^\r\n]+)").expect("output name pattern"));

/// Errors raised while building an outbound command
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("No command template for {kind} with the given parameters")]
    UnsupportedKind { kind: CommandKind },

    #[error("Invalid {field}: {reason}")]
    InvalidParameter { field: &'static str, reason: String },
}

/// Errors raised while extracting a value from a device reply
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Reply did not match the {kind} pattern")]
    NoMatch { kind: CommandKind },

    #[error("Captured value {value:?} for {kind} is not a valid integer")]
    MalformedValue { kind: CommandKind, value: String },

    #[error("{0} does not expect a reply")]
    NoReplyExpected(CommandKind),
}

/// Shape of the outbound command string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    /// `<password>#<directive>#`
    Directive(&'static str),
    /// `<old>#PWD#<new>#`
    PasswordChange,
    /// `<password>#<timezone>#`
    Timezone,
}

/// How a reply is turned into a value
#[derive(Debug, Clone, Copy)]
pub enum ReplyPattern {
    /// No reply is expected
    None,
    /// First capture group parsed as an unsigned integer
    Integer(&'static LazyLock<Regex>),
    /// First capture group taken as trimmed text
    Text(&'static LazyLock<Regex>),
}

/// Immutable description of one command kind
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    pub kind: CommandKind,
    pub template: Template,
    pub reply: ReplyPattern,
}

impl CommandSpec {
    /// Look up the template and reply pattern for a command kind
    pub fn for_kind(kind: CommandKind) -> Self {
        let (template, reply) = match kind {
            CommandKind::OpenGate => (Template::Directive(OPEN_DIRECTIVE), ReplyPattern::None),
            CommandKind::ChangePassword => (Template::PasswordChange, ReplyPattern::None),
            CommandKind::SetTimezone => (Template::Timezone, ReplyPattern::None),
            CommandKind::ReadSignalStrength => (
                Template::Directive(RSSI_DIRECTIVE),
                ReplyPattern::Integer(&RSSI_PATTERN),
            ),
            CommandKind::FindFreeSlot(feature) => (
                Template::Directive(feature.directive()),
                ReplyPattern::Text(&LOCATION_PATTERN),
            ),
            CommandKind::ReadOutputName(output) => (
                Template::Directive(output.directive()),
                ReplyPattern::Text(&OUTPUT_NAME_PATTERN),
            ),
        };

        Self {
            kind,
            template,
            reply,
        }
    }
}

fn check_field(field: &'static str, value: &str) -> Result<(), EncodeError> {
    if value.is_empty() {
        return Err(EncodeError::InvalidParameter {
            field,
            reason: "must not be empty".into(),
        });
    }
    if value.contains(DELIMITER) {
        return Err(EncodeError::InvalidParameter {
            field,
            reason: format!("must not contain '{DELIMITER}'"),
        });
    }
    Ok(())
}

/// Whether a bare field would be read by the firmware as a command word
fn is_directive(value: &str) -> bool {
    [OPEN_DIRECTIVE, PASSWORD_DIRECTIVE, RSSI_DIRECTIVE]
        .into_iter()
        .chain(SlotFeature::ALL.map(|f| f.directive()))
        .chain(OutputChannel::ALL.map(|o| o.directive()))
        .any(|directive| directive.eq_ignore_ascii_case(value))
}

/// Build the literal command string for a command kind
pub fn encode(kind: CommandKind, params: &CommandParams) -> Result<String, EncodeError> {
    let spec = CommandSpec::for_kind(kind);

    match (spec.template, params) {
        (Template::Directive(directive), CommandParams::Password(password)) => {
            check_field("password", password)?;
            Ok(format!("{password}{DELIMITER}{directive}{DELIMITER}"))
        }
        (Template::PasswordChange, CommandParams::PasswordChange { old, new }) => {
            check_field("old password", old)?;
            check_field("new password", new)?;
            Ok(format!(
                "{old}{DELIMITER}{PASSWORD_DIRECTIVE}{DELIMITER}{new}{DELIMITER}"
            ))
        }
        (Template::Timezone, CommandParams::Timezone { password, code }) => {
            check_field("password", password)?;
            check_field("timezone", code)?;
            // `<password>#OPEN#` and friends share this shape
            if is_directive(code) {
                return Err(EncodeError::InvalidParameter {
                    field: "timezone",
                    reason: format!("{code:?} is a command word"),
                });
            }
            Ok(format!("{password}{DELIMITER}{code}{DELIMITER}"))
        }
        _ => Err(EncodeError::UnsupportedKind { kind }),
    }
}

/// Extract the typed value for a command kind from a raw reply
///
/// Returns:
/// - `Ok(value)` if the kind's pattern occurs anywhere in the reply
/// - `Err(NoMatch)` if it does not (a reply arrived but was not understood)
/// - `Err(MalformedValue)` if a numeric capture does not fit an integer
pub fn decode(kind: CommandKind, raw: &str) -> Result<ExtractedValue, DecodeError> {
    match CommandSpec::for_kind(kind).reply {
        ReplyPattern::None => Err(DecodeError::NoReplyExpected(kind)),
        ReplyPattern::Integer(pattern) => {
            let captures = pattern.captures(raw).ok_or(DecodeError::NoMatch { kind })?;
            let digits = &captures[1];
            digits
                .parse::<u32>()
                .map(ExtractedValue::Integer)
                .map_err(|_| DecodeError::MalformedValue {
                    kind,
                    value: digits.to_string(),
                })
        }
        ReplyPattern::Text(pattern) => {
            let captures = pattern.captures(raw).ok_or(DecodeError::NoMatch { kind })?;
            let text = captures[1].trim();
            if text.is_empty() {
                return Err(DecodeError::NoMatch { kind });
            }
            Ok(ExtractedValue::Text(text.to_string()))
        }
    }
}
