//! Errors surfaced to callers of the exchange engine

use gatelink_shared::{DecodeError, EncodeError, RequestCode, TransportErrorKind};
use thiserror::Error;

/// Outcome of a failed exchange
///
/// No variant is fatal: the engine stays usable for the next call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Command could not be built; nothing was sent
    #[error("failed to encode command: {0}")]
    EncodeFailed(#[from] EncodeError),

    #[error("transport failed: {0}")]
    TransportFailed(TransportErrorKind),

    #[error("exchange cancelled")]
    Cancelled,

    /// A reply arrived but did not match the expected pattern
    #[error("reply did not match the expected pattern")]
    NoReplyMatch,

    #[error("reply carried a malformed value: {0:?}")]
    MalformedReply(String),

    #[error("request code {0} is already in flight")]
    DuplicateRequestCode(RequestCode),

    #[error("no free request code")]
    RequestCodesExhausted,

    #[error("timed out waiting for the device")]
    TimedOut,
}

impl EngineError {
    /// Cancellation is not something a UI needs to display
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled)
    }

    /// Reply received but not understood ("feature unknown/absent")
    pub fn is_no_match(&self) -> bool {
        matches!(self, EngineError::NoReplyMatch)
    }
}

impl From<DecodeError> for EngineError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::MalformedValue { value, .. } => EngineError::MalformedReply(value),
            DecodeError::NoMatch { .. } | DecodeError::NoReplyExpected(_) => {
                EngineError::NoReplyMatch
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatelink_shared::CommandKind;

    #[test]
    fn test_decode_error_mapping() {
        let kind = CommandKind::ReadSignalStrength;
        assert_eq!(
            EngineError::from(DecodeError::NoMatch { kind }),
            EngineError::NoReplyMatch
        );
        assert_eq!(
            EngineError::from(DecodeError::MalformedValue {
                kind,
                value: "999999999999".into()
            }),
            EngineError::MalformedReply("999999999999".into())
        );
    }

    #[test]
    fn test_error_predicates() {
        assert!(EngineError::Cancelled.is_cancelled());
        assert!(!EngineError::TimedOut.is_cancelled());
        assert!(EngineError::NoReplyMatch.is_no_match());
    }
}
