//! Axum SSE gateway for the reasoning status engine.
//!
//! One HTTP session per generation request: open a session, feed it
//! reasoning chunks (or forced phase changes) as they stream off the
//! upstream model, and subscribe to the session's SSE feed to receive the
//! engine's `reasoning_*` events. Finalizing tears the session down.
//!
//! The engine stays transport-agnostic; all SSE framing lives here.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{SecondsFormat, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, warn};

use noema_core::{
    DisabledStatusClient, EventSink, OpenRouterStatusClient, PhaseConfigMap, ReasoningConfig,
    ReasoningEvent, ReasoningEventKind, ReasoningStatusEngine, StatusModelClient, ThinkingPhase,
};

const DEFAULT_ADDR: &str = "127.0.0.1:8613";

/// Broadcast capacity per session. A lagging SSE subscriber loses oldest
/// events rather than stalling the engine.
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
struct AppState {
    sessions: Arc<DashMap<String, Session>>,
}

#[derive(Clone)]
struct Session {
    engine: ReasoningStatusEngine,
    events_tx: broadcast::Sender<ReasoningEvent>,
    created_at: String,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("noema=info,noema_gateway=info")
            }),
        )
        .init();

    let state = AppState {
        sessions: Arc::new(DashMap::new()),
    };
    let app = router(state);

    let addr =
        std::env::var("NOEMA_GATEWAY_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("bind gateway address");
    info!(target: "noema::gateway", %addr, "reasoning status gateway listening");
    axum::serve(listener, app).await.expect("gateway server");
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/reasoning", post(open_session))
        .route("/api/v1/reasoning/:id", get(session_status))
        .route("/api/v1/reasoning/:id/chunks", post(push_chunk))
        .route("/api/v1/reasoning/:id/finalize", post(finalize_session))
        .route("/api/v1/reasoning/:id/stream", get(stream_events))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[derive(Deserialize, Default)]
struct OpenSessionRequest {
    /// Optional caller-supplied id, e.g. to correlate with an upstream
    /// generation request. A v4 UUID is minted when absent.
    request_id: Option<String>,
}

#[derive(Serialize)]
struct OpenSessionResponse {
    request_id: String,
    created_at: String,
}

/// POST /api/v1/reasoning — opens a session and starts its engine.
async fn open_session(
    State(state): State<AppState>,
    body: Option<Json<OpenSessionRequest>>,
) -> Response {
    let request_id = body
        .map(|Json(b)| b)
        .unwrap_or_default()
        .request_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    if state.sessions.contains_key(&request_id) {
        return (
            StatusCode::CONFLICT,
            Json(error_body("session already exists")),
        )
            .into_response();
    }

    let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    let sink: EventSink = {
        let tx = events_tx.clone();
        Arc::new(move |event| {
            // No subscribers yet is fine; events before the first SSE
            // connect are simply not replayed.
            let _ = tx.send(event);
        })
    };

    let client: Arc<dyn StatusModelClient> = match OpenRouterStatusClient::from_env() {
        Some(client) => Arc::new(client),
        None => {
            warn!(
                target: "noema::gateway",
                "no status API key configured, session runs fallback-only"
            );
            Arc::new(DisabledStatusClient)
        }
    };

    let engine = match ReasoningStatusEngine::new(
        request_id.clone(),
        sink,
        client,
        ReasoningConfig::default(),
        PhaseConfigMap::default(),
    ) {
        Ok(engine) => engine,
        Err(err) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(error_body(&err.to_string())),
            )
                .into_response();
        }
    };
    engine.start().await;

    let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    state.sessions.insert(
        request_id.clone(),
        Session {
            engine,
            events_tx,
            created_at: created_at.clone(),
        },
    );
    info!(target: "noema::gateway", request_id = %request_id, "reasoning session opened");

    (
        StatusCode::OK,
        Json(OpenSessionResponse {
            request_id,
            created_at,
        }),
    )
        .into_response()
}

/// GET /api/v1/reasoning/{id} — diagnostics snapshot of a live session.
async fn session_status(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let Some(session) = state.sessions.get(&id).map(|s| s.value().clone()) else {
        return (StatusCode::NOT_FOUND, Json(error_body("unknown session"))).into_response();
    };
    let snapshot = session.engine.state_snapshot().await;
    Json(serde_json::json!({
        "request_id": id,
        "created_at": session.created_at,
        "state": snapshot,
    }))
    .into_response()
}

#[derive(Deserialize)]
struct ChunkRequest {
    /// Raw reasoning text to feed through the buffering policy.
    #[serde(default)]
    text: Option<String>,
    /// Explicit phase override (bypasses automatic detection).
    #[serde(default)]
    phase: Option<ThinkingPhase>,
}

/// POST /api/v1/reasoning/{id}/chunks — feeds reasoning text and/or a
/// forced phase change into the session's engine.
async fn push_chunk(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ChunkRequest>,
) -> Response {
    let Some(session) = state.sessions.get(&id).map(|s| s.value().clone()) else {
        return (StatusCode::NOT_FOUND, Json(error_body("unknown session"))).into_response();
    };
    if let Some(phase) = body.phase {
        session.engine.set_phase(phase).await;
    }
    if let Some(text) = body.text {
        if !text.is_empty() {
            session.engine.process_reasoning_chunk(&text).await;
        }
    }
    StatusCode::NO_CONTENT.into_response()
}

#[derive(Deserialize)]
struct FinalizeRequest {
    /// Short description of what was produced, e.g. "a pricing dashboard".
    artifact: String,
}

/// POST /api/v1/reasoning/{id}/finalize — emits the final summary event
/// and removes the session.
async fn finalize_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<FinalizeRequest>,
) -> Response {
    let Some((_, session)) = state.sessions.remove(&id) else {
        return (StatusCode::NOT_FOUND, Json(error_body("unknown session"))).into_response();
    };
    session.engine.finalize(&body.artifact).await;
    info!(target: "noema::gateway", request_id = %id, "reasoning session finalized");
    StatusCode::NO_CONTENT.into_response()
}

/// GET /api/v1/reasoning/{id}/stream — SSE feed of the session's events.
/// The stream ends after the `reasoning_final` event or when the session
/// is dropped.
async fn stream_events(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    use async_stream::stream;

    let Some(session) = state.sessions.get(&id).map(|s| s.value().clone()) else {
        return (StatusCode::NOT_FOUND, Json(error_body("unknown session"))).into_response();
    };
    let mut rx = session.events_tx.subscribe();

    let stream = stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let done = event.kind == ReasoningEventKind::Final;
                    yield Ok::<Event, Infallible>(
                        Event::default()
                            .event(event.kind.sse_event_name())
                            .data(event.to_sse_data()),
                    );
                    if done {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(target: "noema::gateway", dropped = n, "SSE subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(15))
                .text("keepalive"),
        )
        .into_response()
}

fn error_body(message: &str) -> serde_json::Value {
    serde_json::json!({ "error": message })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        AppState {
            sessions: Arc::new(DashMap::new()),
        }
    }

    fn json_request(method: &str, uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(res: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_open_session_mints_request_id() {
        let app = router(test_state());
        let res = app
            .oneshot(json_request("POST", "/api/v1/reasoning", "{}"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let json = body_json(res.into_response()).await;
        assert!(json["request_id"].as_str().is_some_and(|id| !id.is_empty()));
    }

    #[tokio::test]
    async fn test_duplicate_session_is_a_conflict() {
        let app = router(test_state());
        let open = r#"{"request_id":"req-dup"}"#;
        let res = app
            .clone()
            .oneshot(json_request("POST", "/api/v1/reasoning", open))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let res = app
            .oneshot(json_request("POST", "/api/v1/reasoning", open))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_chunk_to_unknown_session_is_not_found() {
        let app = router(test_state());
        let res = app
            .oneshot(json_request(
                "POST",
                "/api/v1/reasoning/nope/chunks",
                r#"{"text":"hello"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_full_session_flow() {
        let state = test_state();
        let app = router(state.clone());

        let res = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/v1/reasoning",
                r#"{"request_id":"req-42"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let res = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/v1/reasoning/req-42/chunks",
                r#"{"text":"building the widget now"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NO_CONTENT);

        let res = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/api/v1/reasoning/req-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let json = body_json(res.into_response()).await;
        assert_eq!(json["request_id"], "req-42");
        assert_eq!(json["state"]["started"], true);
        assert_eq!(json["state"]["destroyed"], false);

        let res = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/v1/reasoning/req-42/finalize",
                r#"{"artifact":"a widget"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        assert!(state.sessions.is_empty());

        // The session is gone after finalize.
        let res = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/api/v1/reasoning/req-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_finalize_delivers_final_event_to_subscribers() {
        let state = test_state();
        let app = router(state.clone());

        app.clone()
            .oneshot(json_request(
                "POST",
                "/api/v1/reasoning",
                r#"{"request_id":"req-sse"}"#,
            ))
            .await
            .unwrap();

        let mut rx = state
            .sessions
            .get("req-sse")
            .map(|s| s.events_tx.subscribe())
            .unwrap();

        app.oneshot(json_request(
            "POST",
            "/api/v1/reasoning/req-sse/finalize",
            r#"{"artifact":"a widget"}"#,
        ))
        .await
        .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, ReasoningEventKind::Final);
        assert_eq!(event.metadata.request_id, "req-sse");
        assert!(!event.message.is_empty());
    }
}
