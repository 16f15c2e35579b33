//! Registry of live connections.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use dashmap::DashMap;
use gymcast_core::{ChannelId, ConnectionId};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::channels::ChannelTable;
use super::connection::{ClientConnection, Frame};
use crate::errors::ServerError;

/// Tracks every live connection and owns the channel membership table.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<ClientConnection>>,
    channels: Arc<ChannelTable>,
    queue_capacity: usize,
    max_connections: usize,
    /// Slots claimed by registered connections. Reserved before insert so
    /// concurrent registrations cannot exceed `max_connections`.
    reserved: AtomicUsize,
    accepting: AtomicBool,
}

impl ConnectionRegistry {
    /// Create a registry with the given per-connection queue capacity and
    /// connection limit.
    pub fn new(queue_capacity: usize, max_connections: usize) -> Self {
        Self {
            connections: DashMap::new(),
            channels: Arc::new(ChannelTable::new()),
            queue_capacity: queue_capacity.max(1),
            max_connections,
            reserved: AtomicUsize::new(0),
            accepting: AtomicBool::new(true),
        }
    }

    /// Shared membership table.
    pub fn channels(&self) -> &Arc<ChannelTable> {
        &self.channels
    }

    /// Register a new connection with a fresh ID and no channels.
    ///
    /// Returns the connection and the receiving end of its outbound queue.
    pub fn register(&self) -> Result<(Arc<ClientConnection>, mpsc::Receiver<Frame>), ServerError> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(ServerError::ShuttingDown);
        }
        let limit = self.max_connections;
        if self
            .reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < limit).then_some(n + 1)
            })
            .is_err()
        {
            return Err(ServerError::TooManyConnections { limit });
        }
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let conn = Arc::new(ClientConnection::new(ConnectionId::new(), tx));
        let _ = self.connections.insert(conn.id.clone(), Arc::clone(&conn));
        debug!(conn_id = %conn.id, "connection registered");
        Ok((conn, rx))
    }

    /// Remove a connection from every channel it joined and discard it.
    ///
    /// Unknown or already-removed IDs are a no-op returning `false`.
    pub fn unregister(&self, id: &ConnectionId) -> bool {
        let Some((_, conn)) = self.connections.remove(id) else {
            return false;
        };
        let _ = self.reserved.fetch_sub(1, Ordering::AcqRel);
        // Closed first so a racing join rolls itself back.
        conn.close();
        let channels = conn.channels();
        for channel in &channels {
            let _ = self.channels.leave(channel, id);
            let _ = conn.cache_leave(channel);
        }
        debug!(conn_id = %id, channels = channels.len(), "connection unregistered");
        true
    }

    /// Add a connection to a channel. Returns `true` if newly joined.
    pub fn join(&self, conn: &Arc<ClientConnection>, channel: &ChannelId) -> bool {
        if conn.is_closed() {
            return false;
        }
        let added = self.channels.join(channel, conn);
        let _ = conn.cache_join(channel.clone());
        if conn.is_closed() {
            // Unregister ran concurrently and may have missed this channel.
            let _ = self.channels.leave(channel, &conn.id);
            let _ = conn.cache_leave(channel);
            return false;
        }
        if added {
            debug!(conn_id = %conn.id, gym_id = %channel, "joined channel");
        }
        added
    }

    /// Remove a connection from a channel. Returns `true` if it was a member.
    pub fn leave(&self, conn: &ClientConnection, channel: &ChannelId) -> bool {
        let _ = conn.cache_leave(channel);
        let removed = self.channels.leave(channel, &conn.id);
        if removed {
            debug!(conn_id = %conn.id, gym_id = %channel, "left channel");
        }
        removed
    }

    /// Refuse further registrations.
    pub fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::Release);
    }

    /// Whether new registrations are accepted.
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Force-close every live connection. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        let ids: Vec<ConnectionId> = self.connections.iter().map(|e| e.key().clone()).collect();
        let closed = ids.iter().filter(|id| self.unregister(id)).count();
        if closed > 0 {
            info!(closed, "force-closed connections");
        }
        closed
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Look up a live connection.
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.connections.get(id).map(|e| Arc::clone(e.value()))
    }
}
