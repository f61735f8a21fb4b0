//! Settings types.
//!
//! Every struct uses `#[serde(default)]` so a partial user file only needs
//! the keys it overrides.

mod logging;
mod router;
mod server;

pub use logging::LoggingSettings;
pub use router::{DEFAULT_QUEUE_CAPACITY, RouterSettings};
pub use server::ServerSettings;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NexusSettings {
    /// Listener settings.
    pub server: ServerSettings,
    /// Router settings (codec, queue capacity).
    pub router: RouterSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

impl NexusSettings {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if !self.server.path.starts_with('/') {
            return Err(SettingsError::InvalidValue(format!(
                "server.path must start with '/': {}",
                self.server.path
            )));
        }
        if self.router.queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "router.queueCapacity must be at least 1".into(),
            ));
        }
        self.router
            .codec
            .build()
            .map_err(|e| SettingsError::InvalidValue(format!("router.codec: {e}")))?;
        Ok(())
    }
}
