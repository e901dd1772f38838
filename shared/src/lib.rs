//! GateLink Shared Protocol Types
//!
//! This crate provides the pure, I/O-free pieces of the gate controller text
//! protocol: request codes, command kinds and their parameters, the command
//! codec, and the per-exchange state machine.

pub mod codec;
pub mod command;
pub mod state_machine;

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

pub use codec::{decode, encode, CommandSpec, DecodeError, EncodeError, ReplyPattern};
pub use command::{CommandKind, CommandParams, ExtractedValue, OutputChannel, SlotFeature};
pub use state_machine::{
    DeviceReply, ExchangeEvent, ExchangeMachine, ExchangeState, Outcome, TransitionError,
    TransitionResult, TransportErrorKind,
};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Numeric correlation key attached to an outbound send.
///
/// Transport sent/delivered notifications echo it back; the device's reply
/// text does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestCode(pub u32);

impl RequestCode {
    pub fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for RequestCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u32> for RequestCode {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Protocol limits for the gate controller firmware
pub mod limits {
    /// Field delimiter and command terminator
    pub const DELIMITER: char = '#';

    /// Lowest request code handed out by the allocator
    pub const REQUEST_CODE_MIN: u32 = 1;

    /// Highest request code handed out by the allocator
    pub const REQUEST_CODE_MAX: u32 = 999;

    /// Default time to wait for a device reply before giving up
    pub const DEFAULT_REPLY_TIMEOUT_MS: u64 = 60_000;
}
