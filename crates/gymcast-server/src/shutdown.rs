//! Graceful shutdown coordination via `CancellationToken`.
//!
//! Shutdown runs exactly once, in order:
//! 1. stop accepting new connections
//! 2. close the broadcast bridge, waiting for in-flight publishes
//! 3. drain live sessions, force-closing stragglers after the grace period
//! 4. release the listener

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::websocket::bridge::BroadcastBridge;
use crate::websocket::registry::ConnectionRegistry;

/// How long to wait for sessions to exit after a forced close.
const FORCE_CLOSE_WAIT: Duration = Duration::from_secs(1);

/// How long to wait for the listener task to finish.
const LISTENER_WAIT: Duration = Duration::from_secs(5);

/// Coordinates graceful shutdown across all server tasks.
pub struct ShutdownCoordinator {
    /// Cancelled when shutdown begins.
    accepting: CancellationToken,
    /// Cancelled when sessions should flush and close.
    draining: CancellationToken,
    /// Cancelled to stop the HTTP listener.
    listener: CancellationToken,
    /// Cancelled when shutdown has completed.
    done: CancellationToken,
    started: AtomicBool,
    grace: Duration,
    registry: Arc<ConnectionRegistry>,
    bridge: BroadcastBridge,
    sessions: TaskTracker,
    server_task: Mutex<Option<JoinHandle<()>>>,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new(grace: Duration, registry: Arc<ConnectionRegistry>, bridge: BroadcastBridge) -> Self {
        Self {
            accepting: CancellationToken::new(),
            draining: CancellationToken::new(),
            listener: CancellationToken::new(),
            done: CancellationToken::new(),
            started: AtomicBool::new(false),
            grace,
            registry,
            bridge,
            sessions: TaskTracker::new(),
            server_task: Mutex::new(None),
        }
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.accepting.is_cancelled()
    }

    /// Whether shutdown has finished.
    pub fn is_done(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Token sessions watch to begin draining.
    pub fn draining_token(&self) -> CancellationToken {
        self.draining.clone()
    }

    /// Token the listener watches to stop serving.
    pub fn listener_token(&self) -> CancellationToken {
        self.listener.clone()
    }

    /// Tracker for live session tasks.
    pub fn tracker(&self) -> &TaskTracker {
        &self.sessions
    }

    /// Attach the listener task so shutdown can await it.
    pub fn attach_server(&self, handle: JoinHandle<()>) {
        let previous = self.server_task.lock().replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Perform the ordered shutdown.
    ///
    /// Concurrent or repeated calls wait for the first call to finish and
    /// never re-run any step.
    pub async fn graceful_shutdown(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            self.done.cancelled().await;
            return;
        }

        info!(
            connections = self.registry.connection_count(),
            grace_ms = u64::try_from(self.grace.as_millis()).unwrap_or(u64::MAX),
            "shutdown started"
        );

        // 1. Stop accepting
        self.accepting.cancel();
        self.registry.stop_accepting();

        // 2. Wait for in-flight broadcasts, refuse new ones
        self.bridge.close().await;

        // 3. Drain sessions
        self.draining.cancel();
        let _ = self.sessions.close();
        if tokio::time::timeout(self.grace, self.sessions.wait())
            .await
            .is_err()
        {
            let forced = self.registry.close_all();
            warn!(forced, "shutdown grace period elapsed, forcing connections closed");
            if tokio::time::timeout(FORCE_CLOSE_WAIT, self.sessions.wait())
                .await
                .is_err()
            {
                warn!(
                    remaining = self.sessions.len(),
                    "sessions still running after forced close"
                );
            }
        }

        // 4. Release the listener
        self.listener.cancel();
        let task = self.server_task.lock().take();
        if let Some(task) = task {
            match tokio::time::timeout(LISTENER_WAIT, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "listener task failed"),
                Err(_) => warn!("listener did not stop within {LISTENER_WAIT:?}"),
            }
        }

        self.done.cancel();
        info!("shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gymcast_core::{ActivityKind, ChannelId};
    use serde_json::json;

    fn setup(grace: Duration) -> (Arc<ShutdownCoordinator>, Arc<ConnectionRegistry>, BroadcastBridge) {
        let registry = Arc::new(ConnectionRegistry::new(8, 100));
        let bridge = BroadcastBridge::new(Arc::clone(registry.channels()));
        let coord = Arc::new(ShutdownCoordinator::new(
            grace,
            Arc::clone(&registry),
            bridge.clone(),
        ));
        (coord, registry, bridge)
    }

    #[test]
    fn initial_state_not_shutting_down() {
        let (coord, _, _) = setup(Duration::from_secs(1));
        assert!(!coord.is_shutting_down());
        assert!(!coord.is_done());
        assert!(!coord.draining_token().is_cancelled());
        assert!(!coord.listener_token().is_cancelled());
    }

    #[tokio::test]
    async fn shutdown_runs_every_step() {
        let (coord, registry, bridge) = setup(Duration::from_secs(1));
        let draining = coord.draining_token();
        let listener = coord.listener_token();

        coord.graceful_shutdown().await;

        assert!(coord.is_shutting_down());
        assert!(coord.is_done());
        assert!(draining.is_cancelled());
        assert!(listener.is_cancelled());
        assert!(!registry.is_accepting());
        assert!(!bridge.is_open().await);
    }

    #[tokio::test]
    async fn sessions_that_drain_finish_within_grace() {
        let (coord, registry, _) = setup(Duration::from_secs(5));
        let (conn, _rx) = registry.register().unwrap();
        let draining = coord.draining_token();
        let session_registry = Arc::clone(&registry);
        let _ = coord.tracker().spawn(async move {
            draining.cancelled().await;
            let _ = session_registry.unregister(&conn.id);
        });

        coord.graceful_shutdown().await;
        assert_eq!(registry.connection_count(), 0);
        assert!(coord.tracker().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_sessions_are_forced_after_grace() {
        let (coord, registry, _) = setup(Duration::from_secs(10));
        let (conn, _rx) = registry.register().unwrap();
        // Ignores draining; only exits when force-closed.
        let closed = conn.close_token();
        let _ = coord.tracker().spawn(async move {
            closed.cancelled().await;
        });

        let started = tokio::time::Instant::now();
        coord.graceful_shutdown().await;

        assert!(started.elapsed() >= Duration::from_secs(10));
        assert!(conn.is_closed());
        assert_eq!(registry.connection_count(), 0);
        assert!(coord.is_done());
    }

    #[tokio::test]
    async fn second_call_is_harmless() {
        let (coord, _, _) = setup(Duration::from_millis(100));
        coord.graceful_shutdown().await;
        coord.graceful_shutdown().await;
        assert!(coord.is_done());
    }

    #[tokio::test]
    async fn concurrent_calls_share_completion() {
        let (coord, _, _) = setup(Duration::from_millis(100));
        let a = {
            let coord = Arc::clone(&coord);
            tokio::spawn(async move { coord.graceful_shutdown().await })
        };
        let b = {
            let coord = Arc::clone(&coord);
            tokio::spawn(async move { coord.graceful_shutdown().await })
        };
        a.await.unwrap();
        b.await.unwrap();
        assert!(coord.is_done());
    }

    #[tokio::test]
    async fn no_registrations_or_publishes_after_shutdown() {
        let (coord, registry, bridge) = setup(Duration::from_millis(100));
        coord.graceful_shutdown().await;
        assert!(registry.register().is_err());
        let report = bridge
            .publish_activity(
                ChannelId::parse("gym-1").unwrap(),
                ActivityKind::CheckIn,
                json!("m1"),
            )
            .await;
        assert_eq!(report.recipients, 0);
    }

    #[tokio::test]
    async fn attached_server_task_is_awaited() {
        let (coord, _, _) = setup(Duration::from_millis(100));
        let listener = coord.listener_token();
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        coord.attach_server(tokio::spawn(async move {
            listener.cancelled().await;
            flag.store(true, Ordering::SeqCst);
        }));

        coord.graceful_shutdown().await;
        assert!(finished.load(Ordering::SeqCst));
    }
}
