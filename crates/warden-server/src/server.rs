use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use warden_core::TelemetryUpdate;
use warden_engine::{ControllerHandle, ControllerStatus};

use crate::client;
use crate::hub::{self, HubHandle};

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_send_queue: usize,
    pub heartbeat_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            max_send_queue: 256,
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub hub: HubHandle,
    pub controller: ControllerHandle,
    pub heartbeat_interval: Duration,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    session: ControllerStatus,
    subscribers: usize,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Start the hub and the HTTP listener. Both stop when `shutdown` fires.
pub async fn start(
    config: ServerConfig,
    telemetry: &broadcast::Sender<TelemetryUpdate>,
    controller: ControllerHandle,
    shutdown: CancellationToken,
) -> Result<ServerHandle, std::io::Error> {
    let (hub, hub_task) = hub::spawn_hub(telemetry.subscribe(), config.max_send_queue);

    let state = AppState {
        hub,
        controller,
        heartbeat_interval: config.heartbeat_interval,
    };
    let router = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(host = %config.host, port = local_addr.port(), "telemetry server started");

    let server_task = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "telemetry server failed");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        server: server_task,
        _hub: hub_task,
    })
}

/// Handle returned by `start()`; keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    server: tokio::task::JoinHandle<()>,
    _hub: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Wait for the HTTP listener to finish its graceful shutdown.
    pub async fn join(self) {
        let _ = self.server.await;
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let Some((subscriber_id, rx)) = state.hub.subscribe().await else {
        tracing::warn!("telemetry hub stopped, refusing viewer");
        return;
    };
    tracing::info!(subscriber_id = %subscriber_id, "viewer connected");

    client::handle_ws_connection(socket, subscriber_id, rx, state.hub, state.heartbeat_interval)
        .await;
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        session: state.controller.status(),
        subscribers: state.hub.count().await,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use warden_core::mock::MockConnector;
    use warden_engine::{ControllerConfig, ReconnectController, VisionLog};

    use super::*;

    fn idle_controller(tx: &broadcast::Sender<TelemetryUpdate>) -> ControllerHandle {
        let controller = ReconnectController::new(
            ControllerConfig::default(),
            Arc::new(MockConnector::default()),
            VisionLog::new(tx.clone()),
            tx.clone(),
        )
        .unwrap();
        controller.handle()
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let (tx, _) = broadcast::channel(100);
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            ..Default::default()
        };

        let handle = start(config, &tx, idle_controller(&tx), CancellationToken::new())
            .await
            .unwrap();
        assert!(handle.port > 0);

        let url = format!("http://127.0.0.1:{}/health", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["session"]["state"], "idle");
        assert_eq!(body["subscribers"], 0);
    }

    #[tokio::test]
    async fn shutdown_stops_listener() {
        let (tx, _) = broadcast::channel(100);
        let shutdown = CancellationToken::new();
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            ..Default::default()
        };
        let handle = start(config, &tx, idle_controller(&tx), shutdown.clone())
            .await
            .unwrap();

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle.join())
            .await
            .unwrap();
    }
}
