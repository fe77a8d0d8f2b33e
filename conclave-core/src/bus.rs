//! Event fan-out over a message bus.
//!
//! The realtime transport framing (WebSocket or otherwise) lives outside the
//! core; what the core sees is a bus of logical broadcast channels plus a
//! narrow per-connection capability. Every socket-like the core touches
//! satisfies [`SocketHandle`]: send an event, disconnect. No shape probing,
//! no back-pointers.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

use crate::models::id::ChannelId;

/// Narrow capability over one live connection.
///
/// Sends are best-effort, non-blocking enqueues; a dead peer drops events
/// silently. `disconnect(true)` tears the transport down without a close
/// handshake.
pub trait SocketHandle: Send + Sync {
    /// Stable id of the connection (distinct from any user identity).
    fn id(&self) -> &str;

    fn send(&self, event: &str, payload: Value);

    fn disconnect(&self, close_immediate: bool);
}

/// Logical broadcast groups keyed by channel id.
///
/// Ordering guarantee: events enqueued by one logical operation on one
/// channel are delivered in the order they were enqueued. Cross-operation
/// ordering is not guaranteed. No acknowledgement, no retry.
pub trait MessageBus: Send + Sync {
    fn join(&self, channel: &ChannelId, socket: Arc<dyn SocketHandle>);

    fn leave(&self, channel: &ChannelId, socket_id: &str);

    fn send_to_channel(&self, channel: &ChannelId, event: &str, payload: Value);

    fn send_to_socket(&self, socket: &dyn SocketHandle, event: &str, payload: Value);

    /// Disconnect every socket currently in the channel.
    fn disconnect_channel(&self, channel: &ChannelId);
}

/// In-process bus: one subscriber list per channel.
pub struct InMemoryBus {
    channels: DashMap<ChannelId, Vec<Arc<dyn SocketHandle>>>,
}

impl InMemoryBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    #[must_use]
    pub fn channel_size(&self, channel: &ChannelId) -> usize {
        self.channels.get(channel).map_or(0, |s| s.len())
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus for InMemoryBus {
    fn join(&self, channel: &ChannelId, socket: Arc<dyn SocketHandle>) {
        let mut subscribers = self.channels.entry(channel.clone()).or_default();
        if subscribers.iter().any(|s| s.id() == socket.id()) {
            return;
        }
        subscribers.push(socket);
        debug!(
            channel_id = %channel,
            subscribers = subscribers.len(),
            "Socket joined channel"
        );
    }

    fn leave(&self, channel: &ChannelId, socket_id: &str) {
        if let Some(mut subscribers) = self.channels.get_mut(channel) {
            subscribers.retain(|s| s.id() != socket_id);
            if subscribers.is_empty() {
                drop(subscribers);
                self.channels.remove(channel);
            }
        }
    }

    fn send_to_channel(&self, channel: &ChannelId, event: &str, payload: Value) {
        if let Some(subscribers) = self.channels.get(channel) {
            for socket in subscribers.iter() {
                socket.send(event, payload.clone());
            }
        }
    }

    fn send_to_socket(&self, socket: &dyn SocketHandle, event: &str, payload: Value) {
        socket.send(event, payload);
    }

    fn disconnect_channel(&self, channel: &ChannelId) {
        if let Some((_, subscribers)) = self.channels.remove(channel) {
            for socket in subscribers {
                socket.disconnect(false);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::RecordingSocket;

    #[test]
    fn test_join_and_broadcast() {
        let bus = InMemoryBus::new();
        let channel = ChannelId::from_string("t1:room".to_string());
        let a = Arc::new(RecordingSocket::new("a"));
        let b = Arc::new(RecordingSocket::new("b"));

        bus.join(&channel, a.clone());
        bus.join(&channel, b.clone());
        assert_eq!(bus.channel_size(&channel), 2);

        bus.send_to_channel(&channel, "notice", serde_json::json!({"text": "hi"}));
        assert_eq!(a.events().len(), 1);
        assert_eq!(b.events().len(), 1);
        assert_eq!(a.events()[0].0, "notice");
    }

    #[test]
    fn test_join_is_idempotent_per_socket_id() {
        let bus = InMemoryBus::new();
        let channel = ChannelId::from_string("t1:room".to_string());
        let a = Arc::new(RecordingSocket::new("a"));

        bus.join(&channel, a.clone());
        bus.join(&channel, a.clone());
        assert_eq!(bus.channel_size(&channel), 1);
    }

    #[test]
    fn test_leave_removes_empty_channel() {
        let bus = InMemoryBus::new();
        let channel = ChannelId::from_string("t1:room".to_string());
        let a = Arc::new(RecordingSocket::new("a"));

        bus.join(&channel, a.clone());
        bus.leave(&channel, "a");
        assert_eq!(bus.channel_size(&channel), 0);
    }

    #[test]
    fn test_disconnect_channel() {
        let bus = InMemoryBus::new();
        let channel = ChannelId::from_string("t1:room".to_string());
        let a = Arc::new(RecordingSocket::new("a"));
        let b = Arc::new(RecordingSocket::new("b"));

        bus.join(&channel, a.clone());
        bus.join(&channel, b.clone());
        bus.disconnect_channel(&channel);

        assert!(a.is_disconnected());
        assert!(b.is_disconnected());
        assert_eq!(bus.channel_size(&channel), 0);
    }
}
