pub mod simulated;
pub mod traits;

pub use simulated::{SentMessage, SimulatedController, SLOT_CAPACITY};
pub use traits::{
    DeliveryStatus, InboundListener, ListenerId, SendError, SendNotifiers, SendReceipt, SentStatus,
    TextTransport,
};
