//! Device command use cases
//!
//! Thin, stateless wrappers that pick the command kind for one device
//! operation and run it through the [`Orchestrator`].

mod gate;
mod query;

use std::sync::Arc;

use gatelink_shared::{CommandKind, CommandParams, ExtractedValue};

use crate::error::EngineError;
use crate::exchange::Orchestrator;

/// Address and password of one controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTarget {
    pub address: String,
    pub password: String,
}

impl DeviceTarget {
    pub fn new(address: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            password: password.into(),
        }
    }
}

/// Commands for one controller
#[derive(Clone)]
pub struct DeviceCommands {
    orchestrator: Arc<Orchestrator>,
    target: DeviceTarget,
}

impl DeviceCommands {
    pub fn new(orchestrator: Arc<Orchestrator>, target: DeviceTarget) -> Self {
        Self {
            orchestrator,
            target,
        }
    }

    pub fn target(&self) -> &DeviceTarget {
        &self.target
    }

    fn password_params(&self) -> CommandParams {
        CommandParams::password(self.target.password.clone())
    }

    async fn run(
        &self,
        kind: CommandKind,
        params: CommandParams,
    ) -> Result<ExtractedValue, EngineError> {
        self.orchestrator
            .invoke(&self.target.address, kind, params)
            .await
    }
}

/// Map "reply not understood" to an absent value
fn absent_on_no_match<T>(result: Result<T, EngineError>) -> Result<Option<T>, EngineError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(EngineError::NoReplyMatch) => Ok(None),
        Err(e) => Err(e),
    }
}
