//! Transport trait abstraction for pluggable text-message backends

use std::sync::Arc;

use async_trait::async_trait;
use gatelink_shared::{DeviceReply, RequestCode, TransportErrorKind};
use thiserror::Error;
use tokio::sync::oneshot;

/// Callback invoked for every inbound text
pub type InboundListener = Arc<dyn Fn(DeviceReply) + Send + Sync>;

/// Registration id returned by [`TextTransport::subscribe_inbound`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Value fired once by the sent notifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentStatus {
    Sent,
    Failed(TransportErrorKind),
}

/// Value fired once by the delivered notifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Delivered,
    Cancelled,
}

/// Send refused before anything left the device (no radio, bad address, ...)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("send refused ({kind}): {message}")]
pub struct SendError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl SendError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Notifiers handed back by a successful send
#[derive(Debug)]
pub struct SendReceipt {
    pub code: RequestCode,
    pub sent: oneshot::Receiver<SentStatus>,
    pub delivered: oneshot::Receiver<DeliveryStatus>,
}

/// Transport side of a [`SendReceipt`]
#[derive(Debug)]
pub struct SendNotifiers {
    pub code: RequestCode,
    pub sent: oneshot::Sender<SentStatus>,
    pub delivered: oneshot::Sender<DeliveryStatus>,
}

impl SendReceipt {
    /// Create a connected notifier/receipt pair for one send
    pub fn channel(code: RequestCode) -> (SendNotifiers, SendReceipt) {
        let (sent_tx, sent_rx) = oneshot::channel();
        let (delivered_tx, delivered_rx) = oneshot::channel();
        (
            SendNotifiers {
                code,
                sent: sent_tx,
                delivered: delivered_tx,
            },
            SendReceipt {
                code,
                sent: sent_rx,
                delivered: delivered_rx,
            },
        )
    }
}

/// A fire-and-notify text message channel
///
/// Implementations must not hold internal locks while invoking inbound
/// listeners: a listener may call back into `unsubscribe_inbound`.
#[async_trait]
pub trait TextTransport: Send + Sync {
    /// Hand a text to the carrier, tagged with its request code
    ///
    /// An `Err` means nothing was sent and no notifier will fire.
    async fn send_text(
        &self,
        address: &str,
        body: &str,
        code: RequestCode,
    ) -> Result<SendReceipt, SendError>;

    /// Register a process-wide inbound text listener
    fn subscribe_inbound(&self, listener: InboundListener) -> ListenerId;

    /// Remove a listener; returns false if it was not registered
    fn unsubscribe_inbound(&self, id: ListenerId) -> bool;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}
