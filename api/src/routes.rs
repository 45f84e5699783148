use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use sentinel_common::config::ZoneConfig;
use sentinel_vision::geometry::Point;
use sentinel_vision::{ZoneDefinition, ZoneEditError, ZoneEvent};
use serde::Serialize;
use std::fmt::Display;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

use crate::broadcast::Broadcaster;
use crate::editor::{EditorError, ZoneEditorHandle};
use crate::store::LatestResultStore;

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

pub struct AppState {
    pub broadcaster: Arc<Broadcaster>,
    pub store: LatestResultStore,
    pub zone: ZoneEditorHandle,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .route("/zone", get(get_zone).put(put_zone).delete(clear_zone))
        .route("/zone/points", post(add_point))
        .route("/zone/finalize", post(finalize_zone))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Observers
// ---------------------------------------------------------------------------

/// GET /ws: live result feed, one JSON text message per tick
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let broadcaster = Arc::clone(&state.broadcaster);
    ws.on_upgrade(move |socket: WebSocket| {
        let (sink, incoming) = socket.split();
        observe(sink, incoming, broadcaster)
    })
}

/// One observer session. The observer is registered for as long as both
/// directions are open.
async fn observe<S, R, E>(mut sink: S, mut incoming: R, broadcaster: Arc<Broadcaster>)
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Display + Send,
    R: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
    E: Send + 'static,
{
    let (id, mut results) = broadcaster.register();

    let mut send_task = tokio::spawn(async move {
        // Ends when the broadcaster drops this observer or the peer goes away
        while let Some(payload) = results.recv().await {
            if let Err(e) = sink.send(Message::Text(payload.to_string())).await {
                debug!(observer = id, error = %e, "websocket send failed");
                break;
            }
        }
        let _ = sink.close().await;
    });

    // Observers have nothing to say; only watch for the close
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = incoming.next().await {
            if let Message::Close(_) = message {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
    broadcaster.unregister(id);
}

#[derive(Serialize)]
struct Health {
    observers: usize,
    latest_seq: u64,
}

/// GET /health
async fn health(State(state): State<Arc<AppState>>) -> Json<Health> {
    Json(Health {
        observers: state.broadcaster.observer_count(),
        latest_seq: state.store.current_seq(),
    })
}

// ---------------------------------------------------------------------------
// Zone editing
// ---------------------------------------------------------------------------

impl IntoResponse for EditorError {
    fn into_response(self) -> Response {
        let status = match &self {
            EditorError::Rejected(ZoneEditError::ZoneActive) => StatusCode::CONFLICT,
            EditorError::Rejected(
                ZoneEditError::TooFewPoints(_)
                | ZoneEditError::Degenerate
                | ZoneEditError::OutOfRange { .. },
            ) => StatusCode::UNPROCESSABLE_ENTITY,
            EditorError::Closed => {
                error!("zone edit attempted with the editor stopped");
                StatusCode::SERVICE_UNAVAILABLE
            }
        };
        (status, self.to_string()).into_response()
    }
}

async fn edit(state: &AppState, event: ZoneEvent) -> Response {
    match state.zone.send(event).await {
        Ok(view) => Json(view).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /zone: active zone and any points placed for the next one
async fn get_zone(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.zone.view())
}

/// PUT /zone
/// Body: { "kind": "rectangle", "x_min": 0, ... }
///    or { "kind": "polygon", "points": [[x, y], ...] }
async fn put_zone(
    State(state): State<Arc<AppState>>,
    Json(config): Json<ZoneConfig>,
) -> Response {
    match ZoneDefinition::from_config(&config) {
        Some(zone) => edit(&state, ZoneEvent::ZoneReplaced(zone)).await,
        None => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "a polygon zone needs at least 3 distinct in-range points enclosing an area",
        )
            .into_response(),
    }
}

/// DELETE /zone: disables intrusion testing until a new zone is set
async fn clear_zone(State(state): State<Arc<AppState>>) -> Response {
    edit(&state, ZoneEvent::ZoneCleared).await
}

/// POST /zone/points
/// Body: { "x": 120, "y": 80 }
async fn add_point(
    State(state): State<Arc<AppState>>,
    Json(point): Json<Point>,
) -> Response {
    edit(&state, ZoneEvent::PointAdded(point)).await
}

/// POST /zone/finalize: turn the placed points into the active polygon
async fn finalize_zone(State(state): State<Arc<AppState>>) -> Response {
    edit(&state, ZoneEvent::ZoneFinalized).await
}
