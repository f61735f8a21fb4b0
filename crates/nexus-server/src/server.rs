//! `NexusServer`: axum HTTP + WebSocket front end for a [`Router`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::router::Router;
use crate::shutdown::ShutdownCoordinator;
use crate::transport::ws;

#[derive(Clone)]
struct AppState {
    router: Router,
    start_time: Instant,
    max_message_size: usize,
    metrics: Option<PrometheusHandle>,
}

/// Serves a [`Router`] over WebSocket.
pub struct NexusServer {
    config: ServerConfig,
    router: Router,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl NexusServer {
    /// Create a server. Its shutdown coordinator drives the router's root
    /// token.
    pub fn new(config: ServerConfig, router: Router) -> Self {
        let shutdown = Arc::new(ShutdownCoordinator::from_token(router.shutdown_token()));
        Self {
            config,
            router,
            shutdown,
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the axum app: the WebSocket route, `/health` and `/metrics`.
    pub fn app(&self) -> axum::Router {
        let state = AppState {
            router: self.router.clone(),
            start_time: self.start_time,
            max_message_size: self.config.max_message_size,
            metrics: self.metrics.clone(),
        };

        axum::Router::new()
            .route(&self.config.path, get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
    }

    /// Bind the configured address and serve in a background task.
    ///
    /// Returns the bound address (useful with port 0) and the server task,
    /// which finishes after [`shutdown`](Self::shutdown).
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let app = self.app();
        let token = self.shutdown.token();

        let handle = tokio::spawn(async move {
            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await;
            if let Err(e) = result {
                error!(error = %e, "server error");
            }
        });

        info!(%addr, path = %self.config.path, codec = self.router.codec().name(), "nexus server listening");
        Ok((addr, handle))
    }

    /// The router being served.
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket: WebSocket| async move {
            state.router.serve(ws::transport(socket, addr.to_string())).await;
        })
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let pool = state.router.pool();
    Json(health::health_check(
        state.start_time,
        pool.len(),
        pool.active_streams(),
    ))
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt;

    fn make_server() -> NexusServer {
        NexusServer::new(ServerConfig::default(), Router::default())
    }

    async fn get_body(app: axum::Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 100_000)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    #[test]
    fn shutdown_drives_router_token() {
        let server = make_server();
        let token = server.router().shutdown_token();
        assert!(!server.shutdown().is_shutting_down());
        server.shutdown().shutdown();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let (status, body) = get_body(make_server().app(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert_eq!(parsed["active_streams"], 0);
    }

    #[tokio::test]
    async fn metrics_endpoint_without_recorder_is_404() {
        let (status, _) = get_body(make_server().app(), "/metrics").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_endpoint_renders_handle() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let app = make_server().with_metrics(handle).app();
        let (status, _) = get_body(app, "/metrics").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn ws_route_follows_config_path() {
        let config = ServerConfig {
            path: "/nexus".into(),
            ..ServerConfig::default()
        };
        let app = NexusServer::new(config, Router::default()).app();

        let (status, _) = get_body(app.clone(), "/nexus").await;
        assert_ne!(status, StatusCode::NOT_FOUND);
        let (status, _) = get_body(app, "/ws").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listen_binds_ephemeral_port_and_stops_on_shutdown() {
        let server = make_server();
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);

        server.shutdown().shutdown();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
