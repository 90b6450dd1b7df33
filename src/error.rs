//! Result codes and error types for the LTEm driver.
//!
//! Two layers:
//!
//! - [`ResultCode`]: the unified numeric result space every action and
//!   completion parser reports into. HTTP-like: `0` is pending, `200..=299`
//!   is success, everything else is a terminal failure. Modem extended
//!   error codes (`+CME ERROR: <n>`) pass through verbatim unless they
//!   would alias a code the engine reports itself. Service results live
//!   at `SERVICE_BASE + n`, above every engine and CME code.
//! - [`Error`]: Rust-level failures of engine calls (lock unobtainable,
//!   command too long, stream association broken). All variants are `Copy`
//!   so protocol modules can pass them around without allocation.

use core::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Result codes
// ---------------------------------------------------------------------------

/// Numeric outcome of an action or completion parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResultCode(pub u16);

impl ResultCode {
    /// Not enough bytes yet; the parser wants to see more.
    pub const PENDING: Self = Self(0);
    /// Canonical success.
    pub const SUCCESS: Self = Self(200);
    /// Upper bound of the success range.
    pub const SUCCESS_MAX: Self = Self(299);
    /// Base added to non-zero modem service results (`+QIOPEN: 0,<n>`).
    pub const SERVICE_BASE: u16 = 2000;
    /// Expected content (preamble, token count) missing from a complete response.
    pub const NOT_FOUND: Self = Self(404);
    /// No terminal response within the action's timeout budget.
    pub const TIMEOUT: Self = Self(408);
    /// Action lock could not be obtained.
    pub const CONFLICT: Self = Self(409);
    /// External cancellation observed while waiting.
    pub const CANCELLED: Self = Self(499);
    /// Generic protocol error (`ERROR`, `FAIL`, insufficient gap).
    pub const ERROR: Self = Self(500);
    /// Driver invariant violated (malformed trailer, stream association mismatch).
    pub const INTERNAL_ERROR: Self = Self(1000);

    /// Map a modem service value into the unified space: `0` is success,
    /// anything else lands at or above `SERVICE_BASE + 1`.
    pub const fn service(value: u16) -> Self {
        if value == 0 {
            Self::SUCCESS
        } else {
            Self(Self::SERVICE_BASE.saturating_add(value))
        }
    }

    /// Map a `+CME ERROR` value. Values that would alias pending, the
    /// success range, an engine-reported code or the service range collapse
    /// to [`ResultCode::ERROR`].
    pub const fn extended(value: u16) -> Self {
        if Self::is_reserved(value) {
            Self::ERROR
        } else {
            Self(value)
        }
    }

    const fn is_reserved(value: u16) -> bool {
        value == Self::PENDING.0
            || (value >= Self::SUCCESS.0 && value <= Self::SUCCESS_MAX.0)
            || value == Self::NOT_FOUND.0
            || value == Self::TIMEOUT.0
            || value == Self::CONFLICT.0
            || value == Self::CANCELLED.0
            || value == Self::INTERNAL_ERROR.0
            || value > Self::SERVICE_BASE
    }

    /// A modem service failure mapped by [`ResultCode::service`].
    pub const fn is_service_failure(self) -> bool {
        self.0 > Self::SERVICE_BASE
    }

    pub const fn is_pending(self) -> bool {
        self.0 == Self::PENDING.0
    }

    pub const fn is_success(self) -> bool {
        self.0 >= Self::SUCCESS.0 && self.0 <= Self::SUCCESS_MAX.0
    }

    /// Any non-pending code outside the success range.
    pub const fn is_error(self) -> bool {
        !self.is_pending() && !self.is_success()
    }

    pub const fn is_terminal(self) -> bool {
        !self.is_pending()
    }

    pub const fn value(self) -> u16 {
        self.0
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::PENDING => write!(f, "pending"),
            Self::SUCCESS => write!(f, "success"),
            Self::NOT_FOUND => write!(f, "not found (404)"),
            Self::TIMEOUT => write!(f, "timeout (408)"),
            Self::CONFLICT => write!(f, "conflict (409)"),
            Self::CANCELLED => write!(f, "cancelled (499)"),
            Self::ERROR => write!(f, "error (500)"),
            Self::INTERNAL_ERROR => write!(f, "internal error"),
            Self(code) if self.is_success() => write!(f, "success ({code})"),
            Self(code) => write!(f, "failure ({code})"),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine errors
// ---------------------------------------------------------------------------

/// Failures of engine calls that never reached the modem, or that broke a
/// driver invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Another action holds the lock.
    Busy,
    /// Operation requires an open action and none is open.
    NotLocked,
    /// The open action already sent its command; a new command needs a
    /// fresh lock.
    AlreadyInvoked,
    /// Command text exceeds the fixed command buffer.
    CommandTooLong,
    /// The transport rejected a write.
    Transport,
    /// Stream mode requested without holding the action lock.
    StreamNotLocked,
    /// Stream leave/drain for a context that is not the active stream peer.
    StreamMismatch { active: Option<u8>, requested: u8 },
    /// Configuration is invalid.
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Busy => write!(f, "action lock busy"),
            Self::NotLocked => write!(f, "no open action"),
            Self::AlreadyInvoked => write!(f, "action already invoked"),
            Self::CommandTooLong => write!(f, "command exceeds buffer"),
            Self::Transport => write!(f, "transport write failed"),
            Self::StreamNotLocked => write!(f, "stream mode requires the action lock"),
            Self::StreamMismatch { active, requested } => write!(
                f,
                "stream peer mismatch: active={:?} requested={}",
                active, requested
            ),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl From<Error> for ResultCode {
    fn from(e: Error) -> Self {
        match e {
            Error::Busy => ResultCode::CONFLICT,
            Error::Config(_) | Error::CommandTooLong => ResultCode(400),
            Error::NotLocked
            | Error::AlreadyInvoked
            | Error::Transport
            | Error::StreamNotLocked
            | Error::StreamMismatch { .. } => ResultCode::INTERNAL_ERROR,
        }
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Driver-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
