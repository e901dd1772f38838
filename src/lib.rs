//! GateLink
//!
//! Turns a one-way, unordered text message channel into reliable, cancellable
//! request/response exchanges with SMS-driven gate and intercom controllers.
//!
//! The engine is built explicitly and passed to callers:
//!
//! ```rust,ignore
//! let transport = Arc::new(SimulatedController::new("+15550100", "1234"));
//! let orchestrator = Arc::new(Orchestrator::new(transport, EngineConfig::default()));
//! let device = DeviceCommands::new(orchestrator, DeviceTarget::new("+15550100", "1234"));
//! let rssi = device.read_signal_strength().await?;
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod exchange;
pub mod transport;

pub use config::EngineConfig;
pub use device::{DeviceCommands, DeviceTarget};
pub use error::EngineError;
pub use exchange::{Correlator, ExchangeHandle, ExchangeRequest, Orchestrator};
pub use gatelink_shared as shared;
pub use transport::{SimulatedController, TextTransport};
