//! `GymcastServer`: Axum HTTP + WebSocket server on one listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api;
use crate::config::ServerConfig;
use crate::errors::ServerError;
use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::bridge::BroadcastBridge;
use crate::websocket::registry::ConnectionRegistry;
use crate::websocket::router::{EventRouter, RouteContext};
use crate::websocket::session::{Heartbeat, run_ws_session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Live connections and channel membership.
    pub registry: Arc<ConnectionRegistry>,
    /// Publish seam for HTTP handlers.
    pub bridge: BroadcastBridge,
    /// Inbound event dispatch.
    pub router: Arc<EventRouter>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus render handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The gymcast server.
pub struct GymcastServer {
    state: AppState,
}

impl GymcastServer {
    /// Create a new server. Nothing is bound until [`listen`](Self::listen).
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(
            config.send_queue_capacity,
            config.max_connections,
        ));
        let bridge = BroadcastBridge::new(Arc::clone(registry.channels()));
        let router = Arc::new(EventRouter::new(RouteContext {
            registry: Arc::clone(&registry),
            bridge: bridge.clone(),
        }));
        let shutdown = Arc::new(ShutdownCoordinator::new(
            config.shutdown_grace(),
            Arc::clone(&registry),
            bridge.clone(),
        ));
        Self {
            state: AppState {
                registry,
                bridge,
                router,
                shutdown,
                config: Arc::new(config),
                start_time: Instant::now(),
                metrics: None,
            },
        }
    }

    /// Serve `/metrics` from an installed Prometheus recorder.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.state.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(api::welcome))
            .route("/api/health", get(health_handler))
            .route("/api/gyms/{gym_id}/activity", post(api::publish_activity))
            .route("/metrics", get(metrics_handler))
            .route("/ws", get(ws_handler))
            .with_state(self.state.clone())
            .layer(cors_layer(&self.state.config.frontend_url))
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the listener and start serving in the background.
    ///
    /// Returns the bound address. The listener is released by
    /// [`ShutdownCoordinator::graceful_shutdown`].
    pub async fn listen(&self) -> Result<SocketAddr, ServerError> {
        let addr = self.state.config.bind_addr();
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let app = self.router();
        let stop = self.state.shutdown.listener_token();
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(stop.cancelled_owned())
                .await
            {
                warn!(error = %e, "server exited with error");
            }
        });
        self.state.shutdown.attach_server(handle);

        info!(%local_addr, "gymcast server listening");
        Ok(local_addr)
    }

    /// Publish seam for code outside the connection layer.
    pub fn bridge(&self) -> &BroadcastBridge {
        &self.state.bridge
    }

    /// Live connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.state.registry
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }
}

/// CORS for the configured frontend origin only.
fn cors_layer(frontend_url: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true);
    match HeaderValue::from_str(frontend_url) {
        Ok(origin) => layer.allow_origin(origin),
        Err(e) => {
            warn!(frontend_url, error = %e, "invalid frontend origin, cross-origin requests disabled");
            layer
        }
    }
}

/// GET /ws
async fn ws_handler(
    State(state): State<AppState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if state.shutdown.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "server is shutting down").into_response();
    }
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };
    let registry = Arc::clone(&state.registry);
    let router = Arc::clone(&state.router);
    let draining = state.shutdown.draining_token();
    let heartbeat = Heartbeat {
        interval: state.config.heartbeat_interval(),
        timeout: state.config.heartbeat_timeout(),
    };
    let tracker = state.shutdown.tracker().clone();
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| {
            tracker.track_future(run_ws_session(socket, registry, router, draining, heartbeat))
        })
}

/// GET /api/health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        &state.config.environment,
        state.registry.connection_count(),
        state.registry.channels().channel_count(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
