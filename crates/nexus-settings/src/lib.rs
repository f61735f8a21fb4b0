//! # nexus-settings
//!
//! Layered configuration for the Nexus router and server.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** - [`NexusSettings::default()`]
//! 2. **User file** - `~/.nexus/settings.json` (deep-merged over defaults)
//! 3. **Environment variables** - `NEXUS_*` overrides (highest priority)
//!
//! The merged result is validated before it is returned.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = NexusSettings::default();
        let _path = settings_path();
    }

    #[test]
    fn default_settings_are_valid() {
        let settings = NexusSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.server.path, "/ws");
        assert_eq!(settings.router.queue_capacity, 100);
        assert_eq!(settings.router.codec, nexus_core::CodecConfig::Json);
        assert_eq!(settings.logging.level, "info");
    }
}
