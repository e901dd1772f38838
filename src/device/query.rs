//! Query commands: answered by a reply text
//!
//! A reply that does not match the expected phrase means the feature is
//! unknown on this firmware, so these return `Ok(None)` rather than an error.

use gatelink_shared::{CommandKind, OutputChannel, SlotFeature};

use super::{absent_on_no_match, DeviceCommands};
use crate::error::EngineError;

impl DeviceCommands {
    /// Read GSM signal strength (`RSSI is <n>`)
    pub async fn read_signal_strength(&self) -> Result<Option<u32>, EngineError> {
        let value = self
            .run(CommandKind::ReadSignalStrength, self.password_params())
            .await;
        absent_on_no_match(value).map(|v| v.and_then(|v| v.as_integer()))
    }

    /// Read an output's configured name (`Output name is <text>`)
    pub async fn read_output_name(
        &self,
        output: OutputChannel,
    ) -> Result<Option<String>, EngineError> {
        let value = self
            .run(CommandKind::ReadOutputName(output), self.password_params())
            .await;
        absent_on_no_match(value).map(|v| v.and_then(|v| v.into_text()))
    }

    /// Find the next free slot for a feature (`Location is <nnn>`)
    pub async fn find_free_slot(&self, feature: SlotFeature) -> Result<Option<String>, EngineError> {
        let value = self
            .run(CommandKind::FindFreeSlot(feature), self.password_params())
            .await;
        absent_on_no_match(value).map(|v| v.and_then(|v| v.into_text()))
    }
}
