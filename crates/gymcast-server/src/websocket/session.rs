//! WebSocket session lifecycle. Handles a single connected client from
//! upgrade through disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures::{SinkExt, StreamExt};
use gymcast_core::OutboundEvent;
use metrics::{counter, gauge, histogram};
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, info, instrument, warn};

use super::connection::Frame;
use super::registry::ConnectionRegistry;
use super::router::EventRouter;
use crate::errors::ServerError;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};

/// Lower bound on the ping interval.
const MIN_PING_INTERVAL: Duration = Duration::from_millis(50);

/// Heartbeat timing for a session.
#[derive(Clone, Copy, Debug)]
pub struct Heartbeat {
    /// Interval between server-initiated Ping frames.
    pub interval: Duration,
    /// How long to wait for a Pong before considering the client dead.
    pub timeout: Duration,
}

/// Run a WebSocket session for a connected client.
///
/// 1. Registers the connection and sends `connection.established`
/// 2. Routes incoming text frames through the [`EventRouter`]
/// 3. Forwards queued outbound frames and sends periodic Pings
/// 4. On `draining`, flushes the queue and sends a Close frame
/// 5. Unregisters on disconnect
#[instrument(skip_all, fields(conn_id = tracing::field::Empty))]
pub async fn run_ws_session(
    ws: WebSocket,
    registry: Arc<ConnectionRegistry>,
    router: Arc<EventRouter>,
    draining: CancellationToken,
    heartbeat: Heartbeat,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let (connection, mut send_rx) = match registry.register() {
        Ok(pair) => pair,
        Err(e) => {
            let code = match e {
                ServerError::ShuttingDown => close_code::AWAY,
                _ => close_code::AGAIN,
            };
            info!(error = %e, "connection refused");
            let _ = ws_tx
                .send(Message::Close(Some(CloseFrame {
                    code,
                    reason: e.to_string().into(),
                })))
                .await;
            return;
        }
    };
    let _ = Span::current().record("conn_id", connection.id.as_str());

    let connection_start = Instant::now();
    info!("client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    match OutboundEvent::connection_established(&connection.id).to_json() {
        Ok(json) => {
            let _ = ws_tx.send(Message::Text(json.into())).await;
        }
        Err(e) => warn!(error = %e, "failed to serialize connection.established"),
    }

    // Outbound forwarder with periodic Ping frames.
    let outbound_conn = Arc::clone(&connection);
    let closed = connection.close_token();
    let outbound = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(heartbeat.interval.max(MIN_PING_INTERVAL));
        // Skip the immediate first tick
        let _ = ping_interval.tick().await;

        loop {
            tokio::select! {
                biased;
                () = closed.cancelled() => break,
                () = draining.cancelled() => {
                    while let Ok(frame) = send_rx.try_recv() {
                        if ws_tx.send(Message::Text(frame)).await.is_err() {
                            return;
                        }
                    }
                    debug!("queue flushed, sending close frame");
                    let _ = ws_tx
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::AWAY,
                            reason: "server shutting down".into(),
                        })))
                        .await;
                    // Inbound loop ends on the client's Close reply or a forced close.
                    return;
                }
                msg = send_rx.recv() => {
                    let Some(frame) = msg else { break };
                    if ws_tx.send(Message::Text(frame)).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if !outbound_conn.check_alive()
                        && outbound_conn.last_pong_elapsed() > heartbeat.timeout
                    {
                        warn!("client unresponsive for {:?}, disconnecting", heartbeat.timeout);
                        break;
                    }
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
        outbound_conn.close();
    });

    let closed = connection.close_token();
    loop {
        let next = tokio::select! {
            biased;
            () = closed.cancelled() => break,
            next = ws_rx.next() => next,
        };
        let Some(Ok(msg)) = next else { break };

        let text: Option<Frame> = match msg {
            Message::Text(t) => Some(t),
            Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                Ok(s) => Some(s.into()),
                Err(_) => {
                    debug!(len = data.len(), "received non-UTF8 binary frame");
                    None
                }
            },
            Message::Close(_) => {
                info!("client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {
                connection.mark_alive();
                None
            }
        };
        let Some(text) = text else { continue };

        connection.mark_alive();
        let _ = router.route(&connection, text.as_str()).await;
    }

    // Cleanup
    outbound.abort();
    let _ = outbound.await;
    let _ = router.disconnect(&connection.id);

    let duration = connection_start.elapsed().as_secs_f64();
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(duration);
    info!(
        duration_secs = duration,
        dropped = connection.drop_count(),
        "client disconnected"
    );
}
