//! Exchange orchestrator: one command out, one outcome back

use std::sync::Arc;
use std::time::Duration;

use futures::future::{FusedFuture, FutureExt};
use gatelink_shared::{codec, CommandKind, CommandParams, ExtractedValue, Outcome, RequestCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::correlator::{Correlator, CorrelatorError};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::transport::{DeliveryStatus, SentStatus, TextTransport};

/// One command to run against one device
#[derive(Debug, Clone)]
pub struct ExchangeRequest {
    pub address: String,
    pub kind: CommandKind,
    pub params: CommandParams,
    /// Explicit request code; `None` lets the correlator pick a free one
    pub code: Option<RequestCode>,
}

impl ExchangeRequest {
    pub fn new(address: impl Into<String>, kind: CommandKind, params: CommandParams) -> Self {
        Self {
            address: address.into(),
            kind,
            params,
            code: None,
        }
    }

    pub fn with_code(mut self, code: RequestCode) -> Self {
        self.code = Some(code);
        self
    }
}

impl From<CorrelatorError> for EngineError {
    fn from(err: CorrelatorError) -> Self {
        match err {
            CorrelatorError::DuplicateRequestCode(code) => EngineError::DuplicateRequestCode(code),
            CorrelatorError::CodesExhausted { .. } => EngineError::RequestCodesExhausted,
        }
    }
}

/// Runs exchanges over a transport
///
/// Build one per transport and share it; the transport's inbound listener
/// registry is process-wide, so a second orchestrator on the same transport
/// would compete for replies.
pub struct Orchestrator {
    transport: Arc<dyn TextTransport>,
    correlator: Arc<Correlator>,
    config: EngineConfig,
}

impl Orchestrator {
    /// Create an orchestrator and its correlator
    pub fn new(transport: Arc<dyn TextTransport>, config: EngineConfig) -> Self {
        let correlator = Correlator::new(transport.clone(), config.request_codes.clone());
        Self {
            transport,
            correlator,
            config,
        }
    }

    pub fn correlator(&self) -> &Arc<Correlator> {
        &self.correlator
    }

    /// Run one exchange with the configured timeout
    pub async fn invoke(
        &self,
        address: &str,
        kind: CommandKind,
        params: CommandParams,
    ) -> Result<ExtractedValue, EngineError> {
        let request = ExchangeRequest::new(address, kind, params);
        let cancel = CancellationToken::new();
        match self.config.reply_timeout {
            Some(limit) => self.exchange_with_timeout(request, &cancel, limit).await,
            None => self.exchange(request, &cancel).await,
        }
    }

    /// Run one exchange, giving up after `limit`
    ///
    /// On expiry the exchange is cancelled and its request code released.
    pub async fn exchange_with_timeout(
        &self,
        request: ExchangeRequest,
        cancel: &CancellationToken,
        limit: Duration,
    ) -> Result<ExtractedValue, EngineError> {
        let kind = request.kind;
        match tokio::time::timeout(limit, self.exchange(request, cancel)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("{} got no answer within {:?}", kind, limit);
                Err(EngineError::TimedOut)
            }
        }
    }

    /// Run one exchange until it resolves or `cancel` fires
    pub async fn exchange(
        &self,
        request: ExchangeRequest,
        cancel: &CancellationToken,
    ) -> Result<ExtractedValue, EngineError> {
        let ExchangeRequest {
            address,
            kind,
            params,
            code,
        } = request;

        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let text = codec::encode(kind, &params)?;

        let mut handle = match code {
            Some(code) => self.correlator.register(code, kind, &address)?,
            None => self.correlator.register_next(kind, &address)?,
        };
        let code = handle.code();

        // Last point before the transport is touched
        if cancel.is_cancelled() {
            handle.cancel();
            return Self::finish(kind, handle.wait().await);
        }

        debug!(">>> Sending {} to {} via {} ({})", kind, address, self.transport.name(), code);

        let receipt = match self.transport.send_text(&address, &text, code).await {
            Ok(receipt) => receipt,
            Err(e) => {
                warn!("Send of {} refused: {}", code, e);
                self.correlator.fail_transport(code, e.kind);
                return Self::finish(kind, handle.wait().await);
            }
        };

        let mut sent = receipt.sent.fuse();
        let mut delivered = receipt.delivered.fuse();

        let outcome = loop {
            tokio::select! {
                biased;

                outcome = handle.wait() => break outcome,

                _ = cancel.cancelled() => {
                    debug!("Cancelling exchange {}", code);
                    self.correlator.cancel(code);
                }

                status = &mut sent, if !sent.is_terminated() => match status {
                    Ok(SentStatus::Sent) => {
                        self.correlator.confirm_sent(code);
                    }
                    Ok(SentStatus::Failed(kind)) => {
                        self.correlator.fail_transport(code, kind);
                    }
                    Err(_) => debug!("Sent notifier for {} dropped", code),
                },

                status = &mut delivered, if !delivered.is_terminated() => match status {
                    Ok(DeliveryStatus::Delivered) => debug!("{} delivered", code),
                    Ok(DeliveryStatus::Cancelled) => info!("Delivery report for {} cancelled", code),
                    Err(_) => debug!("Delivery notifier for {} dropped", code),
                },
            }
        };

        Self::finish(kind, outcome)
    }

    fn finish(kind: CommandKind, outcome: Outcome) -> Result<ExtractedValue, EngineError> {
        match outcome {
            Outcome::Reply(reply) => {
                let value = codec::decode(kind, &reply.body);
                if let Err(e) = &value {
                    info!("<<< {} reply not understood: {}", kind, e);
                }
                Ok(value?)
            }
            Outcome::Acknowledged => Ok(ExtractedValue::Unit),
            Outcome::Failed(kind) => Err(EngineError::TransportFailed(kind)),
            Outcome::Cancelled => Err(EngineError::Cancelled),
        }
    }
}
