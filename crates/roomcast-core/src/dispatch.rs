//! Broadcast fan-out to room subscribers.
//!
//! The dispatcher owns the derived membership index (room → subscriber
//! set). The index is rebuilt incrementally as sessions join, leave, and
//! disconnect; it is never persisted.

use std::collections::HashMap;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use roomcast_protocol::ServerEvent;

use crate::registry::ConnectionId;

/// Delivery handle for one connection's outbound event queue.
pub type OutboundSender = mpsc::UnboundedSender<ServerEvent>;

/// Delivers events to every connection subscribed to a room.
///
/// Mutations and fan-out both run under the room's entry lock, so a
/// broadcast observes either the pre- or post-mutation subscriber set for
/// any given join or leave, never a torn intermediate view. Delivery is
/// at-most-once and best-effort: a connection that disconnects
/// mid-delivery is skipped, with no retry or offline queue.
#[derive(Debug, Default)]
pub struct Dispatcher {
    rooms: DashMap<String, HashMap<ConnectionId, OutboundSender>>,
}

impl Dispatcher {
    /// Create a dispatcher with an empty membership index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a room's subscriber set.
    pub fn subscribe(&self, room: &str, connection: ConnectionId, sender: OutboundSender) {
        debug!(room = %room, connection = %connection, "Subscribed");
        self.rooms
            .entry(room.to_string())
            .or_default()
            .insert(connection, sender);
    }

    /// Remove a connection from a room's subscriber set.
    ///
    /// Returns `true` if the connection was subscribed. Rooms with no
    /// remaining subscribers are dropped from the index.
    pub fn unsubscribe(&self, room: &str, connection: &ConnectionId) -> bool {
        let Some(mut members) = self.rooms.get_mut(room) else {
            return false;
        };
        let removed = members.remove(connection).is_some();
        let emptied = members.is_empty();
        drop(members);

        if removed {
            debug!(room = %room, connection = %connection, "Unsubscribed");
        }
        if emptied {
            self.rooms.remove_if(room, |_, members| members.is_empty());
        }
        removed
    }

    /// Deliver an event to every current subscriber of a room.
    ///
    /// Returns the number of connections the event was handed to.
    pub fn publish(&self, room: &str, event: &ServerEvent) -> usize {
        self.fanout(room, None, event)
    }

    /// Deliver an event to every current subscriber except one connection.
    pub fn publish_except(
        &self,
        room: &str,
        except: &ConnectionId,
        event: &ServerEvent,
    ) -> usize {
        self.fanout(room, Some(except), event)
    }

    fn fanout(&self, room: &str, except: Option<&ConnectionId>, event: &ServerEvent) -> usize {
        let Some(members) = self.rooms.get(room) else {
            trace!(room = %room, "Publish to room with no subscribers");
            return 0;
        };

        let mut delivered = 0;
        for (connection, sender) in members.iter() {
            if except.is_some_and(|skipped| skipped == connection) {
                continue;
            }
            if sender.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }

        trace!(room = %room, recipients = delivered, "Published event");
        delivered
    }

    /// Number of subscribers currently in a room.
    #[must_use]
    pub fn subscriber_count(&self, room: &str) -> usize {
        self.rooms.get(room).map(|m| m.len()).unwrap_or(0)
    }

    /// Number of rooms with at least one subscriber.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
