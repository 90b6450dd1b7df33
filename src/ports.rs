//! Port traits: the boundary between the engine and the board.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ ActionEngine
//! ```
//!
//! The engine never touches hardware or a clock directly. A board supplies:
//!
//! - a [`Transport`] moving bytes to and from the modem UART,
//! - a [`Platform`] with a monotonic millisecond clock and the cooperative
//!   yield / blocking delay primitives,
//! - the module status line as any `embedded_hal::digital::InputPin`,
//! - a [`NotifySink`] receiving out-of-band [`Notification`]s.

use core::fmt;

// ───────────────────────────────────────────────────────────────
// Transport (driven adapter: engine ↔ modem UART)
// ───────────────────────────────────────────────────────────────

/// Byte-oriented channel to the modem.
pub trait Transport {
    /// Error type for this transport.
    type Error: core::fmt::Debug;

    /// Read up to `buf.len()` bytes into `buf`.
    /// Returns the number of bytes actually read.
    /// Returns 0 if no data is available (non-blocking).
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// Write `data` to the transport.
    /// Returns the number of bytes actually written.
    fn write(&mut self, data: &[u8]) -> Result<usize, Self::Error>;

    /// Flush any buffered output.
    fn flush(&mut self) -> Result<(), Self::Error>;

    /// Check if data is available for reading.
    fn available(&mut self) -> bool;

    /// Whether the transport hardware itself still answers (bridge health).
    fn comm_ready(&mut self) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Platform (clock + scheduling primitives)
// ───────────────────────────────────────────────────────────────

/// Clock and scheduling primitives of the host MCU.
pub trait Platform {
    /// Monotonic milliseconds since boot. Wraps at `u32::MAX`.
    fn millis(&mut self) -> u32;

    /// Cooperative yield point: let byte ingestion and application work run.
    fn yield_now(&mut self);

    /// Blocking delay.
    fn delay_ms(&mut self, ms: u32);
}

/// Milliseconds elapsed from `since` to `now` on a wrapping tick.
pub const fn elapsed_ms(since: u32, now: u32) -> u32 {
    now.wrapping_sub(since)
}

// ───────────────────────────────────────────────────────────────
// Notifications (engine → application)
// ───────────────────────────────────────────────────────────────

/// Out-of-band conditions the engine surfaces to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// An action timed out and the module status line reads not-ready.
    ModemOffline,
    /// An action timed out and the SPI-UART bridge does not answer.
    BridgeUnresponsive,
    /// A stream drain faulted or timed out.
    StreamFault { context: u8 },
    /// The receive buffer dropped bytes.
    BufferOverflow { dropped: usize },
    /// The modem reported a socket closed by the peer.
    SocketClosed { context: u8 },
    /// The modem reported the PDP context deactivated.
    PdpDeactivated { context: u8 },
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ModemOffline => write!(f, "modem HW status offline"),
            Self::BridgeUnresponsive => write!(f, "modem comm unresponsive"),
            Self::StreamFault { context } => write!(f, "stream fault ctx={context}"),
            Self::BufferOverflow { dropped } => write!(f, "rx overflow, {dropped} bytes dropped"),
            Self::SocketClosed { context } => write!(f, "socket closed ctx={context}"),
            Self::PdpDeactivated { context } => write!(f, "pdp deactivated ctx={context}"),
        }
    }
}

/// Receives [`Notification`]s. Adapters decide where they go (log, channel, LED).
pub trait NotifySink {
    fn notify(&mut self, notification: Notification);
}
