//! HTTP and WebSocket surface.
//!
//! `/stream` upgrades to the live channel; `/events` is the ingestion hand-off
//! into the hub. The remaining routes are read-only views over the store.

use anyhow::Result;
use axum::extract::rejection::JsonRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::hub::Hub;
use super::registry::{ChannelConnection, Connection};
use super::subscription::Subscription;
use crate::consts::{DEFAULT_RECENT_LIMIT, STREAM_PATH, clamp_limit};
use crate::hook::{FilterOptions, HookEvent, HumanInTheLoopResponse};

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub outbound_queue: usize,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(STREAM_PATH, get(stream))
        .route("/events", post(ingest))
        .route("/events/recent", get(recent))
        .route("/events/filter-options", get(filter_options))
        .route("/events/{id}/respond", post(respond))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// JSON error body `{"error": "..."}` with a matching status.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = %format!("{err:#}"), "request failed");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

async fn health() -> &'static str {
    "OK"
}

async fn ingest(
    State(state): State<AppState>,
    body: Result<Json<HookEvent>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(event) = body?;
    let stored = state.hub.ingest(event).await?;
    Ok(Json(json!({ "id": stored.id })))
}

#[derive(Debug, Deserialize)]
struct RecentParams {
    limit: Option<i64>,
}

async fn recent(
    State(state): State<AppState>,
    Query(params): Query<RecentParams>,
) -> Result<Json<Vec<HookEvent>>, ApiError> {
    let limit = clamp_limit(params.limit.unwrap_or(DEFAULT_RECENT_LIMIT as i64));
    Ok(Json(state.hub.store().recent(limit).await?))
}

async fn filter_options(State(state): State<AppState>) -> Result<Json<FilterOptions>, ApiError> {
    Ok(Json(state.hub.store().filter_options().await?))
}

/// Records an answer in the store only; the live stream is not touched.
async fn respond(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Result<Json<HumanInTheLoopResponse>, JsonRejection>,
) -> Result<Json<HookEvent>, ApiError> {
    let Json(response) = body?;
    match state.hub.store().respond(id, response).await? {
        Some(event) => Ok(Json(event)),
        None => Err(ApiError::not_found(format!("event {id} not found"))),
    }
}

async fn stream(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| run_connection(socket, state))
}

/// Drive one upgraded socket: register immediately, then answer inbound
/// frames until the peer goes away or the registry evicts the connection.
async fn run_connection(socket: WebSocket, state: AppState) {
    let hub = state.hub;
    let (mut sink, mut inbound) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(state.outbound_queue.max(1));

    let id = hub.registry().next_id();
    let connection = Arc::new(ChannelConnection::new(id, tx));
    let mut evicted = connection.closed();
    hub.registry().register(connection.clone()).await;
    tracing::info!(connection = id, "stream opened");

    let mut writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(Message::Text(frame.into())).await.is_err() {
                return;
            }
        }
        let _ = sink.close().await;
    });

    let mut subscription = Subscription::new();

    loop {
        let frame = tokio::select! {
            biased;
            _ = evicted.wait_for(|closed| *closed) => {
                tracing::info!(connection = id, "closing evicted stream");
                break;
            }
            frame = inbound.next() => frame,
        };
        let text = match frame {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::debug!(connection = id, error = %e, "stream read failed");
                break;
            }
        };

        if let Err(e) = hub
            .handle_frame(&mut subscription, text.as_str(), &*connection)
            .await
        {
            tracing::info!(connection = id, error = %format!("{e:#}"), "reply could not be sent");
            break;
        }
    }

    hub.registry().unregister(id).await;
    connection.close();
    // The writer drains and closes once every sender (ours and any in-flight
    // broadcast snapshot) is gone. A peer that stopped reading gets cut off.
    drop(connection);
    let grace = hub.registry().send_timeout();
    if tokio::time::timeout(grace, &mut writer).await.is_err() {
        writer.abort();
        tracing::debug!(connection = id, "writer stalled; socket dropped");
    }
    tracing::info!(connection = id, "stream closed");
}
