//! Protocol constants and run-time configuration for the OTA engine.

use std::time::Duration;

/// Data chunk size. Stays below a 512 byte MTU once ATT overhead is taken off.
pub const DEFAULT_CHUNK_SIZE: usize = 490;

/// Largest chunk the CLI accepts.
pub const MAX_CHUNK_SIZE: usize = 512;

/// Status wait after `START`.
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(10);

/// Status wait after `END`. Longer because the device commits flash first.
pub const DEFAULT_FINISH_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on queueing `ABORT` over a possibly stalled link.
pub const ABORT_TIMEOUT: Duration = Duration::from_secs(1);

/// Discovery scan window.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(15);

/// Advertised name prefix of lamps.
pub const DEFAULT_NAME_PREFIX: &str = "SmartLamp";

/// Per-attempt OTA settings.
#[derive(Debug, Clone)]
pub struct OtaConfig {
    pub chunk_size: usize,
    pub start_timeout: Duration,
    pub finish_timeout: Duration,
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            start_timeout: DEFAULT_START_TIMEOUT,
            finish_timeout: DEFAULT_FINISH_TIMEOUT,
        }
    }
}

impl OtaConfig {
    /// Override the chunk size. Zero is clamped to one.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }
}
