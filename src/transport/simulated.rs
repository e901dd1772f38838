//! In-process gate controller for development and tests
//!
//! Plays the firmware side of the text protocol: checks the password, applies
//! action commands, and answers queries with the firmware's reply phrases after
//! a configurable delay.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use gatelink_shared::{
    limits::DELIMITER, DeviceReply, OutputChannel, RequestCode, SlotFeature, TransportErrorKind,
};
use tracing::debug;

use super::traits::{
    DeliveryStatus, InboundListener, ListenerId, SendError, SendReceipt, SentStatus, TextTransport,
};

/// Slots per feature list on the controller
pub const SLOT_CAPACITY: u16 = 200;

/// A text the controller received
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub address: String,
    pub body: String,
    pub code: RequestCode,
}

#[derive(Debug)]
struct DeviceState {
    password: String,
    timezone: Option<String>,
    signal_strength: u32,
    output_names: HashMap<OutputChannel, String>,
    used_slots: HashMap<SlotFeature, u16>,
    gate_openings: u32,
}

impl DeviceState {
    /// Apply one command; returns the reply text, if the firmware sends one
    fn handle(&mut self, body: &str) -> Option<String> {
        let fields: Vec<&str> = body.split(DELIMITER).collect();

        // "<pwd>#<directive>#[<arg>#]" splits into a trailing empty field
        if fields.len() < 3 || fields.last() != Some(&"") {
            debug!("[SIM] Ignoring malformed command {:?}", body);
            return None;
        }
        if fields[0] != self.password {
            debug!("[SIM] Wrong password, ignoring command");
            return None;
        }

        match &fields[1..fields.len() - 1] {
            ["OPEN"] => {
                self.gate_openings += 1;
                None
            }
            ["PWD", new] => {
                self.password = new.to_string();
                None
            }
            ["RSSI?"] => Some(format!("RSSI is {}", self.signal_strength)),
            [directive] => {
                if let Some(feature) = SlotFeature::from_directive(directive) {
                    let used = self.used_slots.entry(feature).or_insert(0);
                    if *used >= SLOT_CAPACITY {
                        return Some("List is full".into());
                    }
                    let slot = *used + 1;
                    *used = slot;
                    return Some(format!("Location is {:03}", slot));
                }
                if let Some(output) = OutputChannel::from_directive(directive) {
                    let name = self
                        .output_names
                        .get(&output)
                        .cloned()
                        .unwrap_or_else(|| format!("Output {}", &directive[2..3]));
                    return Some(format!("Output name is {}", name));
                }
                self.timezone = Some(directive.to_string());
                None
            }
            _ => {
                debug!("[SIM] Unknown command {:?}", body);
                None
            }
        }
    }
}

/// Fault injection switches
#[derive(Debug, Default)]
struct Faults {
    refuse_next_send: Option<TransportErrorKind>,
    fail_next_sent: Option<TransportErrorKind>,
    cancel_next_delivery: bool,
    silent: bool,
}

struct SimInner {
    address: String,
    reply_delay: Mutex<Duration>,
    device: Mutex<DeviceState>,
    faults: Mutex<Faults>,
    listeners: Mutex<HashMap<ListenerId, InboundListener>>,
    next_listener: AtomicU64,
    sent_log: Mutex<Vec<SentMessage>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Simulated gate controller reachable at a single address
#[derive(Clone)]
pub struct SimulatedController {
    inner: Arc<SimInner>,
}

impl SimulatedController {
    /// Create a controller answering at `address` with the given password
    pub fn new(address: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(SimInner {
                address: address.into(),
                reply_delay: Mutex::new(Duration::from_millis(20)),
                device: Mutex::new(DeviceState {
                    password: password.into(),
                    timezone: None,
                    signal_strength: 18,
                    output_names: HashMap::new(),
                    used_slots: HashMap::new(),
                    gate_openings: 0,
                }),
                faults: Mutex::new(Faults::default()),
                listeners: Mutex::new(HashMap::new()),
                next_listener: AtomicU64::new(0),
                sent_log: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Set how long the controller takes to answer a query
    pub fn with_reply_delay(self, delay: Duration) -> Self {
        *lock(&self.inner.reply_delay) = delay;
        self
    }

    pub fn with_signal_strength(self, rssi: u32) -> Self {
        lock(&self.inner.device).signal_strength = rssi;
        self
    }

    pub fn with_output_name(self, output: OutputChannel, name: impl Into<String>) -> Self {
        lock(&self.inner.device).output_names.insert(output, name.into());
        self
    }

    /// Mark `count` slots of a feature list as already taken
    pub fn with_used_slots(self, feature: SlotFeature, count: u16) -> Self {
        lock(&self.inner.device).used_slots.insert(feature, count);
        self
    }

    /// Refuse the next send synchronously, as a phone with no radio does
    pub fn refuse_next_send(&self, kind: TransportErrorKind) {
        lock(&self.inner.faults).refuse_next_send = Some(kind);
    }

    /// Accept the next send but report failure through the sent notifier
    pub fn fail_next_sent(&self, kind: TransportErrorKind) {
        lock(&self.inner.faults).fail_next_sent = Some(kind);
    }

    /// Report the next delivery as cancelled (the send itself succeeds)
    pub fn cancel_next_delivery(&self) {
        lock(&self.inner.faults).cancel_next_delivery = true;
    }

    /// Stop (or resume) answering queries
    pub fn set_silent(&self, silent: bool) {
        lock(&self.inner.faults).silent = silent;
    }

    /// Deliver an arbitrary inbound text to every listener
    pub fn inject_inbound(&self, sender: &str, body: &str) {
        // Snapshot so listeners run without the registry lock held
        let listeners: Vec<InboundListener> =
            lock(&self.inner.listeners).values().cloned().collect();
        debug!("[SIM] Inbound from {} to {} listener(s)", sender, listeners.len());
        for listener in listeners {
            listener(DeviceReply::new(sender, body));
        }
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.inner.listeners).len()
    }

    pub fn sent_messages(&self) -> Vec<SentMessage> {
        lock(&self.inner.sent_log).clone()
    }

    pub fn password(&self) -> String {
        lock(&self.inner.device).password.clone()
    }

    pub fn timezone(&self) -> Option<String> {
        lock(&self.inner.device).timezone.clone()
    }

    pub fn gate_openings(&self) -> u32 {
        lock(&self.inner.device).gate_openings
    }
}

#[async_trait]
impl TextTransport for SimulatedController {
    async fn send_text(
        &self,
        address: &str,
        body: &str,
        code: RequestCode,
    ) -> Result<SendReceipt, SendError> {
        let (refused, failed, cancel_delivery, silent) = {
            let mut faults = lock(&self.inner.faults);
            (
                faults.refuse_next_send.take(),
                faults.fail_next_sent.take(),
                std::mem::take(&mut faults.cancel_next_delivery),
                faults.silent,
            )
        };

        if let Some(kind) = refused {
            return Err(SendError::new(kind, "simulated send refusal"));
        }

        lock(&self.inner.sent_log).push(SentMessage {
            address: address.to_string(),
            body: body.to_string(),
            code,
        });

        let (notifiers, receipt) = SendReceipt::channel(code);

        if let Some(kind) = failed {
            let _ = notifiers.sent.send(SentStatus::Failed(kind));
            return Ok(receipt);
        }

        let _ = notifiers.sent.send(SentStatus::Sent);
        let _ = notifiers.delivered.send(if cancel_delivery {
            DeliveryStatus::Cancelled
        } else {
            DeliveryStatus::Delivered
        });

        if address != self.inner.address {
            debug!("[SIM] {} is not this controller, no reply", address);
            return Ok(receipt);
        }

        let reply = lock(&self.inner.device).handle(body);
        if let (Some(reply), false) = (reply, silent) {
            let controller = self.clone();
            let delay = *lock(&self.inner.reply_delay);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                controller.inject_inbound(&controller.inner.address, &reply);
            });
        }

        Ok(receipt)
    }

    fn subscribe_inbound(&self, listener: InboundListener) -> ListenerId {
        let id = ListenerId(self.inner.next_listener.fetch_add(1, Ordering::SeqCst) + 1);
        lock(&self.inner.listeners).insert(id, listener);
        id
    }

    fn unsubscribe_inbound(&self, id: ListenerId) -> bool {
        lock(&self.inner.listeners).remove(&id).is_some()
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    const ADDR: &str = "+15550100";

    #[test]
    fn test_device_handles_queries() {
        let sim = SimulatedController::new(ADDR, "1234")
            .with_signal_strength(23)
            .with_output_name(OutputChannel::Two, "Garage");
        let mut device = lock(&sim.inner.device);

        assert_eq!(device.handle("1234#RSSI?#"), Some("RSSI is 23".into()));
        assert_eq!(device.handle("1234#CIA?#"), Some("Location is 001".into()));
        assert_eq!(device.handle("1234#CIA?#"), Some("Location is 002".into()));
        assert_eq!(device.handle("1234#SUA?#"), Some("Location is 001".into()));
        assert_eq!(device.handle("1234#ID2?#"), Some("Output name is Garage".into()));
        assert_eq!(device.handle("1234#ID1?#"), Some("Output name is Output 1".into()));
    }

    #[test]
    fn test_device_handles_actions() {
        let sim = SimulatedController::new(ADDR, "1234");
        {
            let mut device = lock(&sim.inner.device);
            assert_eq!(device.handle("1234#OPEN#"), None);
            assert_eq!(device.handle("1234#005#"), None);
            assert_eq!(device.handle("1234#PWD#4321#"), None);
            // Old password no longer accepted
            assert_eq!(device.handle("1234#RSSI?#"), None);
        }
        assert_eq!(sim.gate_openings(), 1);
        assert_eq!(sim.timezone().as_deref(), Some("005"));
        assert_eq!(sim.password(), "4321");
    }

    #[test]
    fn test_device_full_slot_list() {
        let sim = SimulatedController::new(ADDR, "1234")
            .with_used_slots(SlotFeature::Relay1Code, SLOT_CAPACITY);
        let mut device = lock(&sim.inner.device);
        assert_eq!(device.handle("1234#R1A?#"), Some("List is full".into()));
    }

    #[test]
    fn test_device_ignores_malformed() {
        let sim = SimulatedController::new(ADDR, "1234");
        let mut device = lock(&sim.inner.device);
        assert_eq!(device.handle("1234#RSSI?"), None);
        assert_eq!(device.handle("hello"), None);
    }

    #[test]
    fn test_listener_registry() {
        let sim = SimulatedController::new(ADDR, "1234");
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        let id = sim.subscribe_inbound(Arc::new(move |_: DeviceReply| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(sim.listener_count(), 1);

        sim.inject_inbound(ADDR, "RSSI is 3");
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(sim.unsubscribe_inbound(id));
        assert!(!sim.unsubscribe_inbound(id));
        sim.inject_inbound(ADDR, "RSSI is 3");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_send_replies_to_listeners() {
        let sim = SimulatedController::new(ADDR, "1234").with_signal_strength(11);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        sim.subscribe_inbound(Arc::new(move |reply: DeviceReply| {
            let _ = tx.send(reply);
        }));

        let receipt = sim.send_text(ADDR, "1234#RSSI?#", RequestCode(5)).await.unwrap();
        assert_eq!(receipt.sent.await.unwrap(), SentStatus::Sent);
        assert_eq!(receipt.delivered.await.unwrap(), DeliveryStatus::Delivered);

        let reply = rx.recv().await.unwrap();
        assert_eq!(reply, DeviceReply::new(ADDR, "RSSI is 11"));
        assert_eq!(
            sim.sent_messages(),
            vec![SentMessage {
                address: ADDR.into(),
                body: "1234#RSSI?#".into(),
                code: RequestCode(5),
            }]
        );
    }

    #[tokio::test]
    async fn test_send_faults() {
        let sim = SimulatedController::new(ADDR, "1234");

        sim.refuse_next_send(TransportErrorKind::RadioOff);
        let err = sim.send_text(ADDR, "1234#OPEN#", RequestCode(1)).await.unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::RadioOff);
        assert!(sim.sent_messages().is_empty());

        sim.fail_next_sent(TransportErrorKind::NullPdu);
        let receipt = sim.send_text(ADDR, "1234#OPEN#", RequestCode(2)).await.unwrap();
        assert_eq!(
            receipt.sent.await.unwrap(),
            SentStatus::Failed(TransportErrorKind::NullPdu)
        );
        assert_eq!(sim.gate_openings(), 0);

        sim.cancel_next_delivery();
        let receipt = sim.send_text(ADDR, "1234#OPEN#", RequestCode(3)).await.unwrap();
        assert_eq!(receipt.delivered.await.unwrap(), DeliveryStatus::Cancelled);
        assert_eq!(sim.gate_openings(), 1);
    }
}
