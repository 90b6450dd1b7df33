//! Notification sink adapters.
//!
//! ```text
//!   ActionEngine ──▶ NotifySink ──┬──▶ LogNotifier     (serial console)
//!                                 └──▶ ChannelNotifier (NOTIFY_CHANNEL ──▶ app task)
//! ```
//!
//! The channel variant lets an application task react to modem faults
//! without the engine calling back into application code.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::{info, warn};

use crate::ports::{Notification, NotifySink};

/// Channel depth for engine notifications.
const NOTIFY_DEPTH: usize = 8;

/// Engine notifications: engine → application task.
pub static NOTIFY_CHANNEL: Channel<CriticalSectionRawMutex, Notification, NOTIFY_DEPTH> =
    Channel::new();

/// Writes every [`Notification`] to the logger.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

impl NotifySink for LogNotifier {
    fn notify(&mut self, notification: Notification) {
        match notification {
            Notification::ModemOffline | Notification::BridgeUnresponsive => {
                warn!("HWFAULT | {}", notification);
            }
            Notification::StreamFault { .. } | Notification::BufferOverflow { .. } => {
                warn!("STREAM | {}", notification);
            }
            Notification::SocketClosed { .. } | Notification::PdpDeactivated { .. } => {
                info!("NET | {}", notification);
            }
        }
    }
}

/// Pushes notifications into [`NOTIFY_CHANNEL`]. A full channel drops the
/// newest notification after logging it.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChannelNotifier;

impl NotifySink for ChannelNotifier {
    fn notify(&mut self, notification: Notification) {
        if NOTIFY_CHANNEL.try_send(notification).is_err() {
            warn!("NOTIFY | channel full, dropped: {}", notification);
        }
    }
}

/// Non-blocking receive for polling application loops.
pub fn try_recv_notification() -> Option<Notification> {
    NOTIFY_CHANNEL.try_receive().ok()
}
