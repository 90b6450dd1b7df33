//! Last-failure diagnostics.
//!
//! When an action fails (timeout or error code) the engine copies the
//! command text, the raw bytes the modem returned, the result code and the
//! elapsed time into one fixed-size record. The record is overwritten on
//! every failure and never appended to. Oversized command text and
//! responses are truncated.
//!
//! Records serialise with postcard so an application can persist the last
//! failure across a reset or ship it with telemetry.

use serde::{Deserialize, Serialize};

use crate::error::ResultCode;

pub const DIAG_COMMAND_LEN: usize = 96;
pub const DIAG_RESPONSE_LEN: usize = 96;

/// Upper bound of an encoded record (postcard varint lengths included).
pub const DIAG_ENCODED_MAX: usize = DIAG_COMMAND_LEN + DIAG_RESPONSE_LEN + 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticsRecord {
    pub command: heapless::String<DIAG_COMMAND_LEN>,
    pub response: heapless::Vec<u8, DIAG_RESPONSE_LEN>,
    pub code: ResultCode,
    pub duration_ms: u32,
}

impl DiagnosticsRecord {
    pub fn capture(command: &str, response: &[u8], code: ResultCode, duration_ms: u32) -> Self {
        let mut cut = command.len().min(DIAG_COMMAND_LEN);
        while !command.is_char_boundary(cut) {
            cut -= 1;
        }
        let mut c = heapless::String::new();
        let _ = c.push_str(&command[..cut]);

        let mut r = heapless::Vec::new();
        let _ = r.extend_from_slice(&response[..response.len().min(DIAG_RESPONSE_LEN)]);

        Self {
            command: c,
            response: r,
            code,
            duration_ms,
        }
    }

    /// Encode into `buf`, returning the used prefix.
    pub fn encode<'a>(&self, buf: &'a mut [u8]) -> Result<&'a mut [u8], postcard::Error> {
        postcard::to_slice(self, buf)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}
