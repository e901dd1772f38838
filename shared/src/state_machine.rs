//! Exchange State Machine
//!
//! One exchange starts `Unresolved` and moves to exactly one terminal outcome.
//! Events arriving after that are rejected so the caller can log and drop them.

use std::fmt;

use thiserror::Error;

/// Failure reported by the transport's sent notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    GenericFailure,
    NoService,
    NullPdu,
    RadioOff,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportErrorKind::GenericFailure => write!(f, "generic failure"),
            TransportErrorKind::NoService => write!(f, "no service"),
            TransportErrorKind::NullPdu => write!(f, "null PDU"),
            TransportErrorKind::RadioOff => write!(f, "radio off"),
        }
    }
}

/// Inbound text plus the address it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceReply {
    pub sender: String,
    pub body: String,
}

impl DeviceReply {
    pub fn new(sender: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            body: body.into(),
        }
    }
}

/// Events that can move an exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeEvent {
    /// An inbound text was assigned to this exchange
    ReplyReceived(DeviceReply),
    /// Transport reported the command as sent
    SendConfirmed,
    /// Transport reported a send failure
    TransportFailed(TransportErrorKind),
    /// Caller gave up on the exchange
    Cancelled,
}

/// Terminal outcome of an exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Device replied with this text
    Reply(DeviceReply),
    /// Sent, and no reply is expected for this command
    Acknowledged,
    /// Transport could not send the command
    Failed(TransportErrorKind),
    Cancelled,
}

/// Current state of an exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeState {
    Unresolved,
    Resolved(Outcome),
}

/// Result of processing an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// The exchange reached this terminal outcome
    Terminated(Outcome),
    /// Event accepted, exchange still waiting (send confirmed, reply pending)
    Unchanged,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("exchange already resolved")]
    AlreadyTerminal,

    #[error("exchange does not expect a reply")]
    UnexpectedReply,
}

/// State machine for a single exchange
#[derive(Debug, Clone)]
pub struct ExchangeMachine {
    expects_reply: bool,
    state: ExchangeState,
}

impl ExchangeMachine {
    /// Create a machine in the `Unresolved` state
    pub fn new(expects_reply: bool) -> Self {
        Self {
            expects_reply,
            state: ExchangeState::Unresolved,
        }
    }

    pub fn state(&self) -> &ExchangeState {
        &self.state
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, ExchangeState::Resolved(_))
    }

    /// Process an event and return the transition result
    pub fn process_event(
        &mut self,
        event: ExchangeEvent,
    ) -> Result<TransitionResult, TransitionError> {
        if self.is_terminal() {
            return Err(TransitionError::AlreadyTerminal);
        }

        let outcome = match event {
            ExchangeEvent::ReplyReceived(reply) => {
                if !self.expects_reply {
                    return Err(TransitionError::UnexpectedReply);
                }
                Outcome::Reply(reply)
            }
            // A query stays open until its reply arrives
            ExchangeEvent::SendConfirmed if self.expects_reply => {
                return Ok(TransitionResult::Unchanged);
            }
            ExchangeEvent::SendConfirmed => Outcome::Acknowledged,
            ExchangeEvent::TransportFailed(kind) => Outcome::Failed(kind),
            ExchangeEvent::Cancelled => Outcome::Cancelled,
        };

        self.state = ExchangeState::Resolved(outcome.clone());
        Ok(TransitionResult::Terminated(outcome))
    }
}
