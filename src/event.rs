// MIT License - Copyright (c) 2026 Peter Wright
// Events published to subscribers

use serde::Serialize;

use crate::message::MessageBlock;

/// All events that can be emitted by the panel.
///
/// Users subscribe via `panel.subscribe()` to receive a
/// `tokio::sync::broadcast::Receiver<PanelEvent>`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PanelEvent {
    /// TCP connection to the gateway established
    Connected,
    /// TCP connection lost
    Disconnected,
    /// One message block decoded from a data telegram
    Block { block: MessageBlock },
    /// A contact-info reply carried a name for this address
    NameDiscovered { address: u16, name: String },
    /// A discovery run finished
    DiscoveryComplete { queried: usize, found: usize },
}

/// Type alias for the broadcast sender.
pub type EventSender = tokio::sync::broadcast::Sender<PanelEvent>;

/// Type alias for the broadcast receiver.
pub type EventReceiver = tokio::sync::broadcast::Receiver<PanelEvent>;

/// Create a new event channel with the given capacity.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    tokio::sync::broadcast::channel(capacity)
}
