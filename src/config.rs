//! Engine configuration parameters
//!
//! All tunable timing and sizing parameters for the action engine and
//! receive pipeline. Defaults match the BG96/BG95 family at 115200 baud.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Core engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    // --- Action lock ---
    /// Attempts made to obtain the action lock before reporting busy
    pub lock_retries: u8,
    /// Fixed delay between lock attempts (milliseconds)
    pub lock_retry_interval_ms: u32,

    // --- Actions ---
    /// Timeout applied when an invoke passes no explicit budget (milliseconds)
    pub default_timeout_ms: u32,

    // --- Receive pipeline ---
    /// Idle interval after which the active page is published to parsers (milliseconds)
    pub rx_idle_debounce_ms: u32,

    // --- Streams ---
    /// Maximum duration of a single stream drain (milliseconds)
    pub stream_timeout_ms: u32,
    /// Bytes requested per socket read request
    pub stream_request_size: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_retries: 3,
            lock_retry_interval_ms: 50,

            default_timeout_ms: 800,

            // 115200 baud moves a byte every ~87us; 2ms of silence ends a burst.
            rx_idle_debounce_ms: 2,

            stream_timeout_ms: 10_000,
            stream_request_size: 1500,
        }
    }
}

impl EngineConfig {
    /// Reject values that would wedge the engine.
    pub fn validate(&self) -> Result<()> {
        if self.default_timeout_ms == 0 {
            return Err(Error::Config("default_timeout_ms must be non-zero"));
        }
        if self.stream_timeout_ms == 0 {
            return Err(Error::Config("stream_timeout_ms must be non-zero"));
        }
        if self.stream_request_size == 0 {
            return Err(Error::Config("stream_request_size must be non-zero"));
        }
        if self.rx_idle_debounce_ms >= self.default_timeout_ms {
            return Err(Error::Config("rx_idle_debounce_ms must be below default_timeout_ms"));
        }
        Ok(())
    }
}
