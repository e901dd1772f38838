//! Request correlator: owns every in-flight exchange

use std::collections::{HashMap, VecDeque};
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use gatelink_shared::{
    now_ms, CommandKind, DeviceReply, ExchangeEvent, ExchangeMachine, Outcome, RequestCode,
    TransitionResult, TransportErrorKind,
};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::transport::{ListenerId, TextTransport};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CorrelatorError {
    #[error("request code {0} is already pending")]
    DuplicateRequestCode(RequestCode),

    #[error("every request code in {start}..={end} is in flight")]
    CodesExhausted { start: u32, end: u32 },
}

/// An exchange awaiting its terminal outcome
#[derive(Debug)]
struct PendingExchange {
    kind: CommandKind,
    address: String,
    created_at: u64,
    machine: ExchangeMachine,
    resolver: Option<oneshot::Sender<Outcome>>,
}

#[derive(Debug, Default)]
struct CorrelatorState {
    pending: HashMap<RequestCode, PendingExchange>,
    /// Reply-awaiting exchanges, oldest first
    reply_queue: VecDeque<RequestCode>,
    next_code: u32,
    listener: Option<ListenerId>,
}

/// Matches transport feedback and inbound texts to pending exchanges
///
/// All exchange state sits behind one mutex that is never held across an
/// await, so transport callbacks can resolve exchanges from any thread.
/// Lock order is correlator first, then transport.
pub struct Correlator {
    transport: Arc<dyn TextTransport>,
    codes: RangeInclusive<u32>,
    state: Mutex<CorrelatorState>,
    this: Weak<Correlator>,
}

impl Correlator {
    /// Create a correlator allocating request codes from `codes`
    pub fn new(transport: Arc<dyn TextTransport>, codes: RangeInclusive<u32>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            transport,
            state: Mutex::new(CorrelatorState {
                next_code: *codes.start(),
                ..Default::default()
            }),
            codes,
            this: this.clone(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, CorrelatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a pending exchange under a caller-chosen code
    pub fn register(
        &self,
        code: RequestCode,
        kind: CommandKind,
        address: &str,
    ) -> Result<ExchangeHandle, CorrelatorError> {
        let mut state = self.lock();
        if state.pending.contains_key(&code) {
            return Err(CorrelatorError::DuplicateRequestCode(code));
        }
        Ok(self.insert(&mut state, code, kind, address))
    }

    /// Register a pending exchange under the next free code
    pub fn register_next(
        &self,
        kind: CommandKind,
        address: &str,
    ) -> Result<ExchangeHandle, CorrelatorError> {
        let mut state = self.lock();
        let (start, end) = (*self.codes.start(), *self.codes.end());
        if start > end {
            return Err(CorrelatorError::CodesExhausted { start, end });
        }

        let span = u64::from(end - start) + 1;
        let mut candidate = state.next_code.clamp(start, end);
        for _ in 0..span {
            if !state.pending.contains_key(&RequestCode(candidate)) {
                state.next_code = if candidate == end { start } else { candidate + 1 };
                return Ok(self.insert(&mut state, RequestCode(candidate), kind, address));
            }
            candidate = if candidate == end { start } else { candidate + 1 };
        }

        Err(CorrelatorError::CodesExhausted { start, end })
    }

    fn insert(
        &self,
        state: &mut CorrelatorState,
        code: RequestCode,
        kind: CommandKind,
        address: &str,
    ) -> ExchangeHandle {
        let (tx, rx) = oneshot::channel();
        let expects_reply = kind.expects_reply();

        if expects_reply {
            state.reply_queue.push_back(code);
            self.ensure_listener(state);
        }

        state.pending.insert(
            code,
            PendingExchange {
                kind,
                address: address.to_string(),
                created_at: now_ms(),
                machine: ExchangeMachine::new(expects_reply),
                resolver: Some(tx),
            },
        );

        debug!(
            "Registered exchange {} ({}) for {} ({} pending)",
            code,
            kind,
            address,
            state.pending.len()
        );

        ExchangeHandle {
            code,
            rx,
            correlator: self.this.clone(),
            outcome: None,
        }
    }

    fn ensure_listener(&self, state: &mut CorrelatorState) {
        if state.listener.is_some() {
            return;
        }
        let correlator = self.this.clone();
        let id = self.transport.subscribe_inbound(Arc::new(move |reply| {
            if let Some(correlator) = correlator.upgrade() {
                correlator.resolve_with_reply(None, reply);
            }
        }));
        debug!("Subscribed inbound listener {:?} on {}", id, self.transport.name());
        state.listener = Some(id);
    }

    fn release_listener_if_idle(&self, state: &mut CorrelatorState) {
        if !state.reply_queue.is_empty() {
            return;
        }
        if let Some(id) = state.listener.take() {
            if !self.transport.unsubscribe_inbound(id) {
                warn!("Inbound listener {:?} was already gone", id);
            }
            debug!("Unsubscribed inbound listener {:?}", id);
        }
    }

    /// Feed an event to one exchange; returns true if it reached a terminal state
    fn apply(&self, state: &mut CorrelatorState, code: RequestCode, event: ExchangeEvent) -> bool {
        let Some(entry) = state.pending.get_mut(&code) else {
            debug!("No pending exchange {}, discarding {:?}", code, event);
            return false;
        };

        let outcome = match entry.machine.process_event(event) {
            Ok(TransitionResult::Terminated(outcome)) => outcome,
            Ok(TransitionResult::Unchanged) => return false,
            Err(e) => {
                debug!("Exchange {}: {}, discarding event", code, e);
                return false;
            }
        };

        let Some(mut entry) = state.pending.remove(&code) else {
            return false;
        };
        state.reply_queue.retain(|c| *c != code);

        info!(
            "Exchange {} ({}) finished after {}ms: {}",
            code,
            entry.kind,
            now_ms().saturating_sub(entry.created_at),
            describe(&outcome)
        );

        if let Some(resolver) = entry.resolver.take() {
            // Waiter may have gone away already; the outcome is simply dropped
            let _ = resolver.send(outcome);
        }

        self.release_listener_if_idle(state);
        true
    }

    /// Hand an inbound text to a pending exchange
    ///
    /// With no explicit code, the oldest reply-awaiting exchange takes it. The
    /// device reply does not carry the request code, so when several queries
    /// overlap a reply may be attributed to the wrong one.
    pub fn resolve_with_reply(
        &self,
        code: Option<RequestCode>,
        reply: DeviceReply,
    ) -> Option<RequestCode> {
        let mut state = self.lock();

        let target = match code {
            Some(code) => code,
            None => match state.reply_queue.front() {
                Some(code) => *code,
                None => {
                    debug!("Unsolicited text from {}, discarding", reply.sender);
                    return None;
                }
            },
        };

        if let Some(entry) = state.pending.get(&target) {
            if entry.address != reply.sender {
                debug!(
                    "Reply sender {} differs from {} address {}",
                    reply.sender, target, entry.address
                );
            }
        }

        self.apply(&mut state, target, ExchangeEvent::ReplyReceived(reply))
            .then_some(target)
    }

    /// Transport reported the command as sent
    pub fn confirm_sent(&self, code: RequestCode) -> bool {
        let mut state = self.lock();
        self.apply(&mut state, code, ExchangeEvent::SendConfirmed)
    }

    /// Transport reported a send failure for this code
    pub fn fail_transport(&self, code: RequestCode, kind: TransportErrorKind) -> bool {
        let mut state = self.lock();
        self.apply(&mut state, code, ExchangeEvent::TransportFailed(kind))
    }

    /// Cancel an exchange; a no-op if it already finished
    pub fn cancel(&self, code: RequestCode) -> bool {
        let mut state = self.lock();
        self.apply(&mut state, code, ExchangeEvent::Cancelled)
    }

    /// Cancel everything in flight and drop the inbound listener
    pub fn shutdown(&self) -> usize {
        let mut state = self.lock();
        let codes: Vec<RequestCode> = state.pending.keys().copied().collect();
        let cancelled = codes
            .into_iter()
            .filter(|code| self.apply(&mut state, *code, ExchangeEvent::Cancelled))
            .count();
        self.release_listener_if_idle(&mut state);

        if cancelled > 0 {
            info!("Correlator shut down, cancelled {} exchange(s)", cancelled);
        }
        cancelled
    }

    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_pending(&self, code: RequestCode) -> bool {
        self.lock().pending.contains_key(&code)
    }

    /// Whether an inbound listener is currently registered with the transport
    pub fn listener_active(&self) -> bool {
        self.lock().listener.is_some()
    }
}

impl Drop for Correlator {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(id) = state.listener.take() {
            self.transport.unsubscribe_inbound(id);
        }
    }
}

fn describe(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Reply(reply) => format!("reply from {}", reply.sender),
        Outcome::Acknowledged => "sent".into(),
        Outcome::Failed(kind) => format!("transport failed ({})", kind),
        Outcome::Cancelled => "cancelled".into(),
    }
}

/// Waiter's side of a pending exchange
///
/// Dropping the handle before the outcome is collected cancels the exchange.
#[derive(Debug)]
pub struct ExchangeHandle {
    code: RequestCode,
    rx: oneshot::Receiver<Outcome>,
    correlator: Weak<Correlator>,
    outcome: Option<Outcome>,
}

impl ExchangeHandle {
    pub fn code(&self) -> RequestCode {
        self.code
    }

    /// Wait for the terminal outcome
    ///
    /// Cancel safe: dropping this future and calling it again keeps waiting.
    pub async fn wait(&mut self) -> Outcome {
        if let Some(outcome) = &self.outcome {
            return outcome.clone();
        }
        // A dropped resolver means the correlator itself is gone
        let outcome = (&mut self.rx).await.unwrap_or(Outcome::Cancelled);
        self.outcome = Some(outcome.clone());
        outcome
    }

    /// Ask the correlator to cancel this exchange
    pub fn cancel(&self) -> bool {
        match self.correlator.upgrade() {
            Some(correlator) => correlator.cancel(self.code),
            None => false,
        }
    }
}

impl Drop for ExchangeHandle {
    fn drop(&mut self) {
        if self.outcome.is_none() {
            self.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::SimulatedController;
    use gatelink_shared::{OutputChannel, SlotFeature};

    const ADDR: &str = "+15550100";
    const RSSI: CommandKind = CommandKind::ReadSignalStrength;

    fn setup() -> (SimulatedController, Arc<Correlator>) {
        let sim = SimulatedController::new(ADDR, "1234");
        let correlator = Correlator::new(Arc::new(sim.clone()), 1..=999);
        (sim, correlator)
    }

    #[tokio::test]
    async fn test_duplicate_request_code() {
        let (_sim, correlator) = setup();
        let _first = correlator.register(RequestCode(7), RSSI, ADDR).unwrap();
        assert_eq!(
            correlator.register(RequestCode(7), RSSI, ADDR).unwrap_err(),
            CorrelatorError::DuplicateRequestCode(RequestCode(7))
        );
        assert_eq!(correlator.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_code_released_after_terminal() {
        let (_sim, correlator) = setup();
        let mut handle = correlator.register(RequestCode(7), RSSI, ADDR).unwrap();
        assert!(correlator.fail_transport(RequestCode(7), TransportErrorKind::NoService));
        assert_eq!(
            handle.wait().await,
            Outcome::Failed(TransportErrorKind::NoService)
        );
        assert!(!correlator.is_pending(RequestCode(7)));

        let _again = correlator.register(RequestCode(7), RSSI, ADDR).unwrap();
        assert!(correlator.is_pending(RequestCode(7)));
    }

    #[tokio::test]
    async fn test_single_pending_takes_any_reply() {
        let (sim, correlator) = setup();
        let mut handle = correlator.register(RequestCode(3), RSSI, ADDR).unwrap();

        sim.inject_inbound("some-other-number", "RSSI is 12");

        assert_eq!(
            handle.wait().await,
            Outcome::Reply(DeviceReply::new("some-other-number", "RSSI is 12"))
        );
    }

    #[tokio::test]
    async fn test_replies_resolve_oldest_first() {
        let (sim, correlator) = setup();
        let mut first = correlator.register(RequestCode(1), RSSI, ADDR).unwrap();
        let mut second = correlator
            .register(RequestCode(2), CommandKind::ReadOutputName(OutputChannel::One), ADDR)
            .unwrap();

        sim.inject_inbound(ADDR, "reply A");
        assert!(!correlator.is_pending(RequestCode(1)));
        assert!(correlator.is_pending(RequestCode(2)));

        sim.inject_inbound(ADDR, "reply B");
        assert_eq!(first.wait().await, Outcome::Reply(DeviceReply::new(ADDR, "reply A")));
        assert_eq!(second.wait().await, Outcome::Reply(DeviceReply::new(ADDR, "reply B")));
    }

    #[tokio::test]
    async fn test_actions_skip_reply_queue() {
        let (sim, correlator) = setup();
        let mut open = correlator.register(RequestCode(1), CommandKind::OpenGate, ADDR).unwrap();
        assert!(!correlator.listener_active());

        let mut query = correlator.register(RequestCode(2), RSSI, ADDR).unwrap();
        sim.inject_inbound(ADDR, "RSSI is 5");
        assert_eq!(query.wait().await, Outcome::Reply(DeviceReply::new(ADDR, "RSSI is 5")));

        assert!(correlator.is_pending(RequestCode(1)));
        assert!(correlator.confirm_sent(RequestCode(1)));
        assert_eq!(open.wait().await, Outcome::Acknowledged);
    }

    #[tokio::test]
    async fn test_send_confirmation_keeps_query_open() {
        let (_sim, correlator) = setup();
        let _handle = correlator.register(RequestCode(4), RSSI, ADDR).unwrap();
        assert!(!correlator.confirm_sent(RequestCode(4)));
        assert!(correlator.is_pending(RequestCode(4)));
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let (_sim, correlator) = setup();
        let mut handle = correlator.register(RequestCode(9), RSSI, ADDR).unwrap();

        assert!(correlator.cancel(RequestCode(9)));
        assert!(!correlator.cancel(RequestCode(9)));
        assert!(!handle.cancel());
        assert_eq!(handle.wait().await, Outcome::Cancelled);

        // Cancelling a code that never existed is also harmless
        assert!(!correlator.cancel(RequestCode(500)));
    }

    #[tokio::test]
    async fn test_late_events_discarded() {
        let (sim, correlator) = setup();
        let mut handle = correlator.register(RequestCode(9), RSSI, ADDR).unwrap();
        correlator.cancel(RequestCode(9));

        assert!(!correlator.fail_transport(RequestCode(9), TransportErrorKind::RadioOff));
        assert!(!correlator.confirm_sent(RequestCode(9)));
        sim.inject_inbound(ADDR, "RSSI is 1");
        assert_eq!(
            correlator.resolve_with_reply(Some(RequestCode(9)), DeviceReply::new(ADDR, "x")),
            None
        );
        assert_eq!(handle.wait().await, Outcome::Cancelled);
    }

    #[tokio::test]
    async fn test_unsolicited_reply_discarded() {
        let (_sim, correlator) = setup();
        assert_eq!(
            correlator.resolve_with_reply(None, DeviceReply::new(ADDR, "RSSI is 2")),
            None
        );
    }

    #[tokio::test]
    async fn test_explicit_code_reply() {
        let (_sim, correlator) = setup();
        let _first = correlator.register(RequestCode(1), RSSI, ADDR).unwrap();
        let mut second = correlator.register(RequestCode(2), RSSI, ADDR).unwrap();

        let resolved =
            correlator.resolve_with_reply(Some(RequestCode(2)), DeviceReply::new(ADDR, "RSSI is 8"));
        assert_eq!(resolved, Some(RequestCode(2)));
        assert_eq!(second.wait().await, Outcome::Reply(DeviceReply::new(ADDR, "RSSI is 8")));
        assert!(correlator.is_pending(RequestCode(1)));
    }

    #[tokio::test]
    async fn test_listener_released_on_every_terminal_path() {
        let (sim, correlator) = setup();

        let _h = correlator.register(RequestCode(1), RSSI, ADDR).unwrap();
        assert_eq!(sim.listener_count(), 1);
        sim.inject_inbound(ADDR, "RSSI is 1");
        assert_eq!(sim.listener_count(), 0);

        let _h = correlator.register(RequestCode(2), RSSI, ADDR).unwrap();
        correlator.fail_transport(RequestCode(2), TransportErrorKind::GenericFailure);
        assert_eq!(sim.listener_count(), 0);

        let _h = correlator.register(RequestCode(3), RSSI, ADDR).unwrap();
        correlator.cancel(RequestCode(3));
        assert_eq!(sim.listener_count(), 0);
        assert!(!correlator.listener_active());
    }

    #[tokio::test]
    async fn test_one_listener_shared_by_overlapping_queries() {
        let (sim, correlator) = setup();
        let _a = correlator.register(RequestCode(1), RSSI, ADDR).unwrap();
        let _b = correlator
            .register(RequestCode(2), CommandKind::FindFreeSlot(SlotFeature::CallerId), ADDR)
            .unwrap();
        assert_eq!(sim.listener_count(), 1);

        correlator.cancel(RequestCode(1));
        assert_eq!(sim.listener_count(), 1);
        correlator.cancel(RequestCode(2));
        assert_eq!(sim.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_dropping_handle_cancels() {
        let (sim, correlator) = setup();
        let handle = correlator.register(RequestCode(6), RSSI, ADDR).unwrap();
        drop(handle);
        assert!(!correlator.is_pending(RequestCode(6)));
        assert_eq!(sim.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_register_next_skips_in_flight() {
        let sim = SimulatedController::new(ADDR, "1234");
        let correlator = Correlator::new(Arc::new(sim), 1..=3);

        let a = correlator.register(RequestCode(1), RSSI, ADDR).unwrap();
        let b = correlator.register_next(RSSI, ADDR).unwrap();
        let c = correlator.register_next(RSSI, ADDR).unwrap();
        assert_eq!(b.code(), RequestCode(2));
        assert_eq!(c.code(), RequestCode(3));
        assert_eq!(
            correlator.register_next(RSSI, ADDR).unwrap_err(),
            CorrelatorError::CodesExhausted { start: 1, end: 3 }
        );

        drop(b);
        let d = correlator.register_next(RSSI, ADDR).unwrap();
        assert_eq!(d.code(), RequestCode(2));
        drop((a, c, d));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_everything() {
        let (sim, correlator) = setup();
        let mut a = correlator.register(RequestCode(1), RSSI, ADDR).unwrap();
        let mut b = correlator.register(RequestCode(2), CommandKind::OpenGate, ADDR).unwrap();

        assert_eq!(correlator.shutdown(), 2);
        assert_eq!(a.wait().await, Outcome::Cancelled);
        assert_eq!(b.wait().await, Outcome::Cancelled);
        assert_eq!(sim.listener_count(), 0);
        assert_eq!(correlator.shutdown(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_resolution_from_other_threads() {
        let (sim, correlator) = setup();
        let mut handles: Vec<ExchangeHandle> = (1..=8)
            .map(|n| correlator.register(RequestCode(n), RSSI, ADDR).unwrap())
            .collect();

        let threads: Vec<_> = (0..8)
            .map(|n| {
                let sim = sim.clone();
                std::thread::spawn(move || sim.inject_inbound(ADDR, &format!("RSSI is {}", n)))
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        for handle in handles.iter_mut() {
            assert!(matches!(handle.wait().await, Outcome::Reply(_)));
        }
        assert_eq!(correlator.pending_count(), 0);
        assert_eq!(sim.listener_count(), 0);
    }
}
