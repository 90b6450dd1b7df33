//! LTEm cellular modem driver core.
//!
//! Command/action engine and receive pipeline for Quectel BGx modules
//! behind an SC16IS741A SPI-UART bridge. Pure logic builds and tests on
//! the host; ESP-IDF glue is behind the `espidf` feature.
//!
//! ```text
//!   protocol module ──invoke──▶ ActionEngine ──bytes──▶ Transport
//!         ▲                        │    ▲
//!         └──── ResultCode ────────┘    │
//!                           Parser ◀── RxPager ◀──bytes── Transport
//!                       StreamPeer ◀──┘
//! ```

#![deny(unused_must_use)]

pub mod action;
pub mod adapters;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod notify;
pub mod pager;
pub mod parser;
pub mod ports;
pub mod protocols;
pub mod stream;
pub mod urc;

pub use action::{ActionEngine, CANCEL_REQUEST, StreamStatus};
pub use config::EngineConfig;
pub use error::{Error, Result, ResultCode};
pub use parser::{CompletionParser, Parser};
