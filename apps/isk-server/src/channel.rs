use dashmap::DashMap;
use metrics::counter;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

use isk_proto::OutboundFrame;

pub type ConnectionId = Uuid;

pub const DEFAULT_CHANNEL_DEPTH: usize = 64;

/// Named broadcast channels over the set of live connections.
///
/// Delivery is best effort: a frame for a full connection queue is dropped,
/// a frame for a closed queue evicts that connection. Nothing is persisted;
/// clients resynchronize with `hello` or `display_data` after reconnecting.
#[derive(Clone)]
pub struct EventChannel {
    inner: Arc<EventChannelInner>,
}

struct EventChannelInner {
    connections: DashMap<ConnectionId, ConnectionEntry>,
    channels: DashMap<String, HashSet<ConnectionId>>,
    depth: usize,
}

struct ConnectionEntry {
    sender: mpsc::Sender<OutboundFrame>,
    subscriptions: HashSet<String>,
}

pub struct Connection {
    pub id: ConnectionId,
    pub receiver: mpsc::Receiver<OutboundFrame>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishMetrics {
    pub delivered: usize,
    pub dropped: usize,
    pub closed: usize,
}

impl EventChannel {
    pub fn new(depth: usize) -> Self {
        Self {
            inner: Arc::new(EventChannelInner {
                connections: DashMap::new(),
                channels: DashMap::new(),
                depth: depth.max(1),
            }),
        }
    }

    pub fn connect(&self) -> Connection {
        let (tx, rx) = mpsc::channel(self.inner.depth);
        let id = Uuid::new_v4();
        self.inner.connections.insert(
            id,
            ConnectionEntry {
                sender: tx,
                subscriptions: HashSet::new(),
            },
        );
        debug!(connection_id = %id, "connection opened");
        Connection { id, receiver: rx }
    }

    /// Returns false when the connection is already gone.
    pub fn subscribe(&self, connection: ConnectionId, channel: &str) -> bool {
        match self.inner.connections.get_mut(&connection) {
            Some(mut entry) => {
                entry.subscriptions.insert(channel.to_string());
            }
            None => return false,
        }
        self.inner
            .channels
            .entry(channel.to_string())
            .or_default()
            .insert(connection);
        debug!(connection_id = %connection, channel, "subscribed");
        true
    }

    pub fn unsubscribe(&self, connection: ConnectionId, channel: &str) {
        if let Some(mut entry) = self.inner.connections.get_mut(&connection) {
            entry.subscriptions.remove(channel);
        }
        self.remove_member(channel, connection);
    }

    /// Deliver a frame to a single connection.
    pub fn send(&self, connection: ConnectionId, frame: OutboundFrame) -> bool {
        let Some(sender) = self.sender(connection) else {
            return false;
        };
        match sender.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                counter!("isk_channel_frames_dropped_total", 1, "mode" => "direct");
                warn!(connection_id = %connection, "outbound queue full, dropping frame");
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.disconnect(connection);
                false
            }
        }
    }

    /// Deliver `event` to every connection currently subscribed to `channel`.
    pub fn publish(&self, channel: &str, event: &str, data: serde_json::Value) -> PublishMetrics {
        let mut metrics = PublishMetrics::default();
        let members: Vec<ConnectionId> = match self.inner.channels.get(channel) {
            Some(members) => members.iter().copied().collect(),
            None => return metrics,
        };

        let frame = OutboundFrame::broadcast(channel, event, data);
        for connection in members {
            let Some(sender) = self.sender(connection) else {
                self.remove_member(channel, connection);
                continue;
            };
            match sender.try_send(frame.clone()) {
                Ok(()) => metrics.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    metrics.dropped += 1;
                    counter!("isk_channel_frames_dropped_total", 1, "mode" => "broadcast");
                }
                Err(TrySendError::Closed(_)) => {
                    metrics.closed += 1;
                    self.disconnect(connection);
                }
            }
        }

        counter!("isk_channel_frames_published_total", metrics.delivered as u64);
        debug!(channel, event, delivered = metrics.delivered, "published");
        metrics
    }

    /// Drop a connection and all of its subscriptions.
    pub fn disconnect(&self, connection: ConnectionId) -> Vec<String> {
        let Some((_, entry)) = self.inner.connections.remove(&connection) else {
            return Vec::new();
        };
        let channels: Vec<String> = entry.subscriptions.into_iter().collect();
        for channel in &channels {
            self.remove_member(channel, connection);
        }
        debug!(connection_id = %connection, channels = channels.len(), "connection closed");
        channels
    }

    pub fn is_connected(&self, connection: ConnectionId) -> bool {
        self.inner.connections.contains_key(&connection)
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.inner
            .channels
            .get(channel)
            .map(|members| members.len())
            .unwrap_or(0)
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections.len()
    }

    fn sender(&self, connection: ConnectionId) -> Option<mpsc::Sender<OutboundFrame>> {
        self.inner
            .connections
            .get(&connection)
            .map(|entry| entry.sender.clone())
    }

    fn remove_member(&self, channel: &str, connection: ConnectionId) {
        let mut empty = false;
        if let Some(mut members) = self.inner.channels.get_mut(channel) {
            members.remove(&connection);
            empty = members.is_empty();
        }
        if empty {
            self.inner
                .channels
                .remove_if(channel, |_, members| members.is_empty());
        }
    }
}
