//! Router settings.

use nexus_core::CodecConfig;
use serde::{Deserialize, Serialize};

/// Default capacity of each connection's outbound queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Packet routing settings, uniform for every connection of one router.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RouterSettings {
    /// Wire codec.
    pub codec: CodecConfig,
    /// Outbound queue capacity per connection.
    pub queue_capacity: usize,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            codec: CodecConfig::Json,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}
