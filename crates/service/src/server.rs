//! HTTP/WebSocket server
//!
//! One WebSocket endpoint carries the ordered STS event channel; HTTP
//! endpoints expose Prometheus metrics and component health.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use livedub_core::events::{ClientEvent, ServerEvent};

use crate::handlers::EventHandler;

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<EventHandler>,
    pub prometheus: PrometheusHandle,
}

/// Build the service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_endpoint))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Per-connection loop: a writer task drains the outbound queue while the
/// read loop feeds events to the handler.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let sid = Uuid::new_v4().to_string();
    tracing::info!(sid = %sid, "STS channel connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<ServerEvent>(64);

    let writer = tokio::spawn(async move {
        while let Some(event) = out_rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(error = %e, "failed to serialize server event");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = ws_rx.next().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(sid = %sid, error = %e, "socket read error");
                break;
            }
        };

        match message {
            Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => state.handler.handle_event(&sid, event, &out_tx).await,
                Err(e) => {
                    tracing::warn!(sid = %sid, error = %e, "unparseable client event");
                }
            },
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
        }
    }

    state.handler.handle_disconnect(&sid).await;
    drop(out_tx);
    let _ = writer.await;
    tracing::info!(sid = %sid, "STS channel closed");
}

/// Liveness plus per-component readiness.
async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let components = state.handler.coordinator().component_readiness();
    let ready = components.iter().all(|(_, ok)| *ok);

    let status = if ready {
        axum::http::StatusCode::OK
    } else {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    };

    let body = serde_json::json!({
        "status": if ready { "ok" } else { "degraded" },
        "channel": "up",
        "components": components
            .iter()
            .map(|(name, ok)| (name.to_string(), *ok))
            .collect::<std::collections::HashMap<_, _>>(),
        "sessions": state.handler.store().count(),
    });

    (status, Json(body))
}

async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    state.prometheus.render()
}
