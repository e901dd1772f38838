//! Action commands: no reply expected, done once the text is sent

use gatelink_shared::{CommandKind, CommandParams};

use super::DeviceCommands;
use crate::error::EngineError;

impl DeviceCommands {
    /// Pulse the gate relay
    pub async fn open_gate(&self) -> Result<(), EngineError> {
        self.run(CommandKind::OpenGate, self.password_params()).await?;
        Ok(())
    }

    /// Replace the device password
    ///
    /// The target keeps the new password only once the send is confirmed.
    pub async fn change_password(&mut self, new_password: &str) -> Result<(), EngineError> {
        let params = CommandParams::PasswordChange {
            old: self.target.password.clone(),
            new: new_password.to_string(),
        };
        self.run(CommandKind::ChangePassword, params).await?;
        self.target.password = new_password.to_string();
        Ok(())
    }

    /// Set the device timezone code
    pub async fn set_timezone(&self, timezone_code: &str) -> Result<(), EngineError> {
        let params = CommandParams::Timezone {
            password: self.target.password.clone(),
            code: timezone_code.to_string(),
        };
        self.run(CommandKind::SetTimezone, params).await?;
        Ok(())
    }
}
