//! Command/response correlation for the gate controller
//!
//! This module handles:
//! - Allocating request codes and tracking in-flight exchanges
//! - Matching transport feedback and inbound texts to exchanges
//! - Driving one exchange from encode to decoded reply
//! - Cancellation and caller-supplied timeouts

mod correlator;
mod orchestrator;

pub use correlator::{Correlator, CorrelatorError, ExchangeHandle};
pub use orchestrator::{ExchangeRequest, Orchestrator};
