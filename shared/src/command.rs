//! Command kinds understood by the gate controller firmware.
//!
//! A [`CommandKind`] names the semantic operation ("read signal strength"),
//! independent of the numeric [`RequestCode`](crate::RequestCode) used to
//! correlate one particular send.

use std::fmt;

/// Features that keep a numbered list of slots on the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotFeature {
    /// Caller-ID whitelist (`CIA?`)
    CallerId,
    /// Relay 1 access codes (`R1A?`)
    Relay1Code,
    /// Relay 2 access codes (`R2A?`)
    Relay2Code,
    /// Single-use / delivery codes (`SUA?`)
    DeliveryCode,
}

impl SlotFeature {
    /// All slot features, in firmware menu order.
    pub const ALL: [SlotFeature; 4] = [
        SlotFeature::CallerId,
        SlotFeature::Relay1Code,
        SlotFeature::Relay2Code,
        SlotFeature::DeliveryCode,
    ];

    /// Query directive asking for the next free slot.
    pub fn directive(&self) -> &'static str {
        match self {
            SlotFeature::CallerId => "CIA?",
            SlotFeature::Relay1Code => "R1A?",
            SlotFeature::Relay2Code => "R2A?",
            SlotFeature::DeliveryCode => "SUA?",
        }
    }

    /// Parse a slot feature from its query directive.
    pub fn from_directive(s: &str) -> Option<SlotFeature> {
        SlotFeature::ALL.into_iter().find(|f| f.directive() == s)
    }
}

/// Switchable outputs on the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputChannel {
    One,
    Two,
}

impl OutputChannel {
    pub const ALL: [OutputChannel; 2] = [OutputChannel::One, OutputChannel::Two];

    /// Query directive asking for the output's configured name.
    pub fn directive(&self) -> &'static str {
        match self {
            OutputChannel::One => "ID1?",
            OutputChannel::Two => "ID2?",
        }
    }

    pub fn from_directive(s: &str) -> Option<OutputChannel> {
        OutputChannel::ALL.into_iter().find(|o| o.directive() == s)
    }
}

/// Semantic operation performed by one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Pulse the gate relay (`<pwd>#OPEN#`)
    OpenGate,
    /// Replace the device password (`<old>#PWD#<new>#`)
    ChangePassword,
    /// Set the device timezone (`<pwd>#<tz>#`)
    SetTimezone,
    /// Read GSM signal strength (`<pwd>#RSSI?#`)
    ReadSignalStrength,
    /// Find the next free slot for a feature (`<pwd>#CIA?#` etc.)
    FindFreeSlot(SlotFeature),
    /// Read an output's configured name (`<pwd>#ID1?#` etc.)
    ReadOutputName(OutputChannel),
}

impl CommandKind {
    /// Whether the device answers this command with a text reply.
    ///
    /// Action commands complete once the transport reports the message sent.
    // Actions stay out of the FIFO reply queue so a stray text cannot resolve them
    pub fn expects_reply(&self) -> bool {
        matches!(
            self,
            CommandKind::ReadSignalStrength
                | CommandKind::FindFreeSlot(_)
                | CommandKind::ReadOutputName(_)
        )
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandKind::OpenGate => write!(f, "open-gate"),
            CommandKind::ChangePassword => write!(f, "change-password"),
            CommandKind::SetTimezone => write!(f, "set-timezone"),
            CommandKind::ReadSignalStrength => write!(f, "read-rssi"),
            CommandKind::FindFreeSlot(feature) => write!(f, "free-slot[{}]", feature.directive()),
            CommandKind::ReadOutputName(output) => write!(f, "output-name[{}]", output.directive()),
        }
    }
}

/// Per-call parameters filled into a command template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandParams {
    /// Commands that only need the device password
    Password(String),
    /// Password change
    PasswordChange { old: String, new: String },
    /// Timezone update
    Timezone { password: String, code: String },
}

impl CommandParams {
    pub fn password(password: impl Into<String>) -> Self {
        CommandParams::Password(password.into())
    }
}

/// Typed value extracted from a device reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractedValue {
    /// Command completed without a reply value
    Unit,
    /// Numeric capture (signal strength)
    Integer(u32),
    /// Text capture (slot number, output name)
    Text(String),
}

impl ExtractedValue {
    pub fn as_integer(&self) -> Option<u32> {
        match self {
            ExtractedValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ExtractedValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_text(self) -> Option<String> {
        match self {
            ExtractedValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ExtractedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractedValue::Unit => write!(f, "ok"),
            ExtractedValue::Integer(n) => write!(f, "{}", n),
            ExtractedValue::Text(s) => write!(f, "{}", s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_directive_lookup() {
        for feature in SlotFeature::ALL {
            assert_eq!(SlotFeature::from_directive(feature.directive()), Some(feature));
        }
        assert_eq!(SlotFeature::from_directive("RSSI?"), None);
    }

    #[test]
    fn test_output_directive_lookup() {
        assert_eq!(OutputChannel::from_directive("ID2?"), Some(OutputChannel::Two));
        assert_eq!(OutputChannel::from_directive("ID3?"), None);
    }

    #[test]
    fn test_expects_reply() {
        assert!(!CommandKind::OpenGate.expects_reply());
        assert!(!CommandKind::ChangePassword.expects_reply());
        assert!(!CommandKind::SetTimezone.expects_reply());
        assert!(CommandKind::ReadSignalStrength.expects_reply());
        assert!(CommandKind::FindFreeSlot(SlotFeature::CallerId).expects_reply());
        assert!(CommandKind::ReadOutputName(OutputChannel::One).expects_reply());
    }

    #[test]
    fn test_extracted_value_accessors() {
        assert_eq!(ExtractedValue::Integer(4).as_integer(), Some(4));
        assert_eq!(ExtractedValue::Integer(4).as_text(), None);
        assert_eq!(ExtractedValue::Text("073".into()).as_text(), Some("073"));
        assert_eq!(ExtractedValue::Unit.into_text(), None);
    }
}
