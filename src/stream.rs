//! Stream multiplexer.
//!
//! Two-state handoff between line-oriented command parsing and bulk-data
//! draining by one protocol peer:
//!
//! ```text
//!   ┌──────────────┐   enter(ctx)    ┌─────────────────────┐
//!   │ Command mode │ ──────────────▶ │ Stream mode (ctx)   │
//!   │ parsers run  │ ◀────────────── │ peer.drain() runs   │
//!   └──────────────┘   leave(ctx)    └─────────────────────┘
//! ```
//!
//! Peers flagged pending by a `recv` URC are serviced round-robin by data
//! context: the search for the next pending peer always starts one past
//! the last context serviced, so no open peer waits more than
//! [`DATA_CONTEXT_COUNT`] rotations.

use core::fmt;

use log::debug;

use crate::action::{CommandText, RxBuffer};
use crate::error::{Error, Result};

/// Number of modem data contexts (socket / MQTT / HTTP instances).
pub const DATA_CONTEXT_COUNT: usize = 6;

/// Receive pipeline mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamMode {
    #[default]
    Command,
    Stream { context: u8 },
}

/// Result of one drain step by a stream peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drain {
    /// Not enough bytes yet; call again after more arrive.
    Continue,
    /// Transfer finished. `more_pending` re-flags the peer for another read.
    Complete { more_pending: bool },
    /// Malformed header or trailer, or modem error.
    Fault,
}

/// A protocol control instance that can drain bulk data for one context.
pub trait StreamPeer {
    fn context(&self) -> u8;

    /// Format the read request (IRD) for up to `request_size` bytes.
    fn read_request(&self, cmd: &mut CommandText, request_size: u16) -> fmt::Result;

    /// Consume whatever of the transfer is published in `rx`.
    fn drain(&mut self, rx: &mut RxBuffer) -> Drain;
}

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    open: bool,
    pending: bool,
}

/// Mode flag, peer table and rotation pointer.
#[derive(Debug)]
pub struct StreamMux {
    mode: StreamMode,
    slots: [Slot; DATA_CONTEXT_COUNT],
    /// Last context serviced; the next search starts one past it.
    rotation: u8,
    started_at: Option<u32>,
}

impl Default for StreamMux {
    fn default() -> Self {
        Self::new()
    }
}

fn slot_index(context: u8) -> usize {
    let idx = usize::from(context);
    assert!(
        idx < DATA_CONTEXT_COUNT,
        "data context {context} out of range"
    );
    idx
}

impl StreamMux {
    pub const fn new() -> Self {
        Self {
            mode: StreamMode::Command,
            slots: [Slot {
                open: false,
                pending: false,
            }; DATA_CONTEXT_COUNT],
            rotation: (DATA_CONTEXT_COUNT - 1) as u8,
            started_at: None,
        }
    }

    pub fn mode(&self) -> StreamMode {
        self.mode
    }

    /// Context currently owning stream mode.
    pub fn active(&self) -> Option<u8> {
        match self.mode {
            StreamMode::Stream { context } => Some(context),
            StreamMode::Command => None,
        }
    }

    /// When the active drain started.
    pub fn started_at(&self) -> Option<u32> {
        self.started_at
    }

    pub fn register(&mut self, context: u8) {
        let slot = &mut self.slots[slot_index(context)];
        slot.open = true;
        slot.pending = false;
    }

    pub fn unregister(&mut self, context: u8) {
        self.slots[slot_index(context)] = Slot::default();
    }

    pub fn is_registered(&self, context: u8) -> bool {
        self.slots[slot_index(context)].open
    }

    pub fn is_pending(&self, context: u8) -> bool {
        self.slots[slot_index(context)].pending
    }

    /// Flag data waiting on `context`. Ignored for contexts with no peer.
    pub fn mark_pending(&mut self, context: u8) {
        let slot = &mut self.slots[slot_index(context)];
        if slot.open {
            slot.pending = true;
        } else {
            debug!("STREAM: recv on unregistered ctx={context}");
        }
    }

    pub fn set_pending(&mut self, context: u8, pending: bool) {
        let slot = &mut self.slots[slot_index(context)];
        slot.pending = slot.open && pending;
    }

    pub fn any_pending(&self) -> bool {
        self.slots.iter().any(|s| s.open && s.pending)
    }

    /// Pick the next pending context after the rotation pointer and move the
    /// pointer onto it. Its pending flag is cleared; the drain re-flags it
    /// if the modem still holds data.
    pub fn next_pending(&mut self) -> Option<u8> {
        for step in 1..=DATA_CONTEXT_COUNT {
            let idx = (usize::from(self.rotation) + step) % DATA_CONTEXT_COUNT;
            let slot = &mut self.slots[idx];
            if slot.open && slot.pending {
                slot.pending = false;
                self.rotation = idx as u8;
                return Some(idx as u8);
            }
        }
        None
    }

    /// Hand stream mode to `context`. Only the engine switches modes, so
    /// the action lock is always held here.
    pub(crate) fn enter(&mut self, context: u8, now: u32) -> Result<()> {
        slot_index(context);
        match self.mode {
            StreamMode::Command => {
                self.mode = StreamMode::Stream { context };
                self.started_at = Some(now);
                debug!("STREAM: enter ctx={context}");
                Ok(())
            }
            StreamMode::Stream { context: active } => Err(Error::StreamMismatch {
                active: Some(active),
                requested: context,
            }),
        }
    }

    /// Return to command mode. Fails if `context` is not the active peer.
    pub(crate) fn leave(&mut self, context: u8) -> Result<()> {
        match self.mode {
            StreamMode::Stream { context: active } if active == context => {
                self.mode = StreamMode::Command;
                self.started_at = None;
                debug!("STREAM: leave ctx={context}");
                Ok(())
            }
            _ => Err(Error::StreamMismatch {
                active: self.active(),
                requested: context,
            }),
        }
    }
}
