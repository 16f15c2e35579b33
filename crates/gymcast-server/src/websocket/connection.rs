//! WebSocket client connection state.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::extract::ws::Utf8Bytes;
use gymcast_core::{ChannelId, ConnectionId};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// One serialized outbound text frame. Cheap to clone across recipients.
pub type Frame = Utf8Bytes;

/// Represents a connected WebSocket client.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Channels this connection has joined. A cache of the membership
    /// table so disconnect cleanup touches only these channels.
    channels: Mutex<HashSet<ChannelId>>,
    /// Send channel to the client's WebSocket write task.
    tx: mpsc::Sender<Frame>,
    /// Cancelled once the connection is unregistered or force-closed.
    closed: CancellationToken,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Whether the client has responded to the last ping.
    pub is_alive: AtomicBool,
    /// When the last Pong (or any activity) was received.
    last_pong: Mutex<Instant>,
    /// Count of messages dropped due to a full or closed queue.
    pub dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a new connection.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Frame>) -> Self {
        let now = Instant::now();
        Self {
            id,
            channels: Mutex::new(HashSet::new()),
            tx,
            closed: CancellationToken::new(),
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Queue a text frame for the client.
    ///
    /// Never waits. Returns `false` if the queue is full or closed, and
    /// increments the dropped message counter.
    pub fn send(&self, frame: Frame) -> bool {
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record a joined channel. Returns `true` if it was not cached yet.
    pub(crate) fn cache_join(&self, channel: ChannelId) -> bool {
        self.channels.lock().insert(channel)
    }

    /// Forget a joined channel. Returns `true` if it was cached.
    pub(crate) fn cache_leave(&self, channel: &ChannelId) -> bool {
        self.channels.lock().remove(channel)
    }

    /// Snapshot of the channels this connection has joined.
    pub fn channels(&self) -> Vec<ChannelId> {
        self.channels.lock().iter().cloned().collect()
    }

    /// Mark the connection closed. Session tasks observe this and exit.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Whether the connection has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Token cancelled when the connection closes.
    pub fn close_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Mark the connection as alive (pong received).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Duration since the last pong (or connection establishment).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Check and reset the alive flag for heartbeat.
    ///
    /// Returns `true` if the connection was alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("channels", &*self.channels.lock())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_connection() -> (ClientConnection, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(32);
        let conn = ClientConnection::new(ConnectionId::from("conn_1"), tx);
        (conn, rx)
    }

    fn gym(id: &str) -> ChannelId {
        ChannelId::parse(id).unwrap()
    }

    #[test]
    fn create_connection() {
        let (conn, _rx) = make_connection();
        assert_eq!(conn.id.as_str(), "conn_1");
        assert!(conn.channels().is_empty());
        assert!(!conn.is_closed());
        assert!(conn.is_alive.load(Ordering::Relaxed));
    }

    #[test]
    fn debug_shows_id_and_channels() {
        let (conn, _rx) = make_connection();
        let _ = conn.cache_join(gym("gym-1"));
        let out = format!("{conn:?}");
        assert!(out.contains("conn_1"), "{out}");
        assert!(out.contains("gym-1"), "{out}");
        assert!(out.contains("closed: false"), "{out}");
    }

    #[tokio::test]
    async fn send_message_success() {
        let (conn, mut rx) = make_connection();
        assert!(conn.send(Frame::from("hello")));
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.as_str(), "hello");
    }

    #[tokio::test]
    async fn send_to_closed_channel_returns_false() {
        let (tx, rx) = mpsc::channel(32);
        let conn = ClientConnection::new(ConnectionId::from("conn_2"), tx);
        drop(rx);
        assert!(!conn.send(Frame::from("hello")));
        assert_eq!(conn.drop_count(), 1);
    }

    #[tokio::test]
    async fn send_to_full_channel_returns_false() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = ClientConnection::new(ConnectionId::from("conn_3"), tx);
        assert!(conn.send(Frame::from("msg1")));
        // Queue is now full
        assert!(!conn.send(Frame::from("msg2")));
        assert!(!conn.send(Frame::from("msg3")));
        assert_eq!(conn.drop_count(), 2);
    }

    #[tokio::test]
    async fn frames_arrive_in_send_order() {
        let (conn, mut rx) = make_connection();
        for i in 0..5 {
            assert!(conn.send(Frame::from(format!("m{i}"))));
        }
        for i in 0..5 {
            assert_eq!(rx.recv().await.unwrap().as_str(), format!("m{i}"));
        }
    }

    #[test]
    fn channel_cache_is_a_set() {
        let (conn, _rx) = make_connection();
        assert!(conn.cache_join(gym("gym-1")));
        assert!(!conn.cache_join(gym("gym-1")));
        assert!(conn.cache_join(gym("gym-2")));
        let mut channels = conn.channels();
        channels.sort();
        assert_eq!(channels, vec![gym("gym-1"), gym("gym-2")]);

        assert!(conn.cache_leave(&gym("gym-1")));
        assert!(!conn.cache_leave(&gym("gym-1")));
        assert_eq!(conn.channels(), vec![gym("gym-2")]);
    }

    #[tokio::test]
    async fn close_cancels_token() {
        let (conn, _rx) = make_connection();
        let token = conn.close_token();
        assert!(!token.is_cancelled());
        conn.close();
        assert!(conn.is_closed());
        token.cancelled().await;
        // Closing twice is harmless
        conn.close();
        assert!(conn.is_closed());
    }

    #[test]
    fn mark_alive_and_check() {
        let (conn, _rx) = make_connection();
        // Initially alive
        assert!(conn.check_alive());
        // After check, no longer alive
        assert!(!conn.check_alive());
        conn.mark_alive();
        assert!(conn.check_alive());
    }

    #[test]
    fn last_pong_resets_on_mark_alive() {
        let (conn, _rx) = make_connection();
        std::thread::sleep(Duration::from_millis(10));
        assert!(conn.last_pong_elapsed() >= Duration::from_millis(10));
        conn.mark_alive();
        assert!(conn.last_pong_elapsed() < Duration::from_millis(10));
        assert!(conn.age() >= Duration::from_millis(10));
    }
}
