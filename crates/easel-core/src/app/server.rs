//! Server - Slack Events API の HTTP 受け口
//!
//! - `POST /slack/events`: url_verification の challenge を返す / event_callback を
//!   dispatch table に流す
//! - `GET /health`: queue の件数
//!
//! enqueue できた時点で 200 を返す。生成の成否はここでは分からない。

use std::future::Future;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use super::dispatch::{DispatchError, EventDispatchTable};
use super::receiver::ReceiveOutcome;
use crate::ports::DispatchQueue;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

#[derive(Clone)]
pub struct ServerState {
    pub table: Arc<EventDispatchTable>,
    pub queue: Arc<dyn DispatchQueue>,
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/slack/events", post(slack_events))
        .route("/health", get(health))
        .with_state(state)
}

/// Bind `addr` and serve until `shutdown` resolves.
pub async fn serve(
    addr: &str,
    state: ServerState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ServerError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })?;
    info!(%addr, "receiver listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn slack_events(State(state): State<ServerState>, Json(envelope): Json<Value>) -> Response {
    match envelope.get("type").and_then(Value::as_str) {
        Some("url_verification") => match envelope.get("challenge").and_then(Value::as_str) {
            Some(challenge) => Json(json!({ "challenge": challenge })).into_response(),
            None => (StatusCode::BAD_REQUEST, "missing challenge").into_response(),
        },
        Some("event_callback") => {
            let Some(event) = envelope.get("event") else {
                return (StatusCode::BAD_REQUEST, "missing event").into_response();
            };
            handle_event(&state, event).await
        }
        other => {
            debug!(envelope_type = ?other, "ignoring envelope");
            StatusCode::OK.into_response()
        }
    }
}

async fn handle_event(state: &ServerState, event: &Value) -> Response {
    match state.table.dispatch(event).await {
        Ok(ReceiveOutcome::Enqueued { message_id }) => {
            Json(json!({ "status": "enqueued", "message_id": message_id })).into_response()
        }
        Ok(ReceiveOutcome::Dropped { reason }) => {
            Json(json!({ "status": "dropped", "reason": reason.to_string() })).into_response()
        }
        // 再送されても結果は変わらないので 200 で受け流す
        Err(e @ (DispatchError::HandlerNotFound(_)
        | DispatchError::MissingType
        | DispatchError::Decode(_))) => {
            warn!(error = %e, "event not handled");
            Json(json!({ "status": "ignored", "reason": e.to_string() })).into_response()
        }
        Err(e) => {
            error!(error = %e, "event could not be enqueued");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable", "reason": e.to_string() })),
            )
                .into_response()
        }
    }
}

async fn health(State(state): State<ServerState>) -> Response {
    match state.queue.counts().await {
        Ok(counts) => Json(json!({ "status": "ok", "queue": counts })).into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "degraded", "reason": e.to_string() })),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::receiver::EventReceiver;
    use crate::test_support::RecordingQueue;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    fn state(queue: Arc<RecordingQueue>) -> ServerState {
        let receiver = Arc::new(EventReceiver::new(queue.clone()));
        ServerState {
            table: Arc::new(EventDispatchTable::with_mentions(receiver)),
            queue,
        }
    }

    async fn post_events(state: ServerState, body: Value) -> (StatusCode, Value) {
        let response = router(state)
            .oneshot(
                Request::post("/slack/events")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    fn mention(text: &str) -> Value {
        json!({
            "type": "event_callback",
            "event": { "type": "app_mention", "channel": "C1", "text": text }
        })
    }

    #[tokio::test]
    async fn url_verification_echoes_challenge() {
        let queue = Arc::new(RecordingQueue::default());
        let (status, body) = post_events(
            state(queue.clone()),
            json!({ "type": "url_verification", "challenge": "abc" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["challenge"], "abc");
        assert!(queue.sent().is_empty());
    }

    #[tokio::test]
    async fn mention_is_enqueued() {
        let queue = Arc::new(RecordingQueue::default());
        let (status, body) =
            post_events(state(queue.clone()), mention("<@U1> a red bicycle")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "enqueued");
        assert_eq!(queue.sent().len(), 1);
    }

    #[tokio::test]
    async fn empty_prompt_is_dropped_with_200() {
        let queue = Arc::new(RecordingQueue::default());
        let (status, body) = post_events(state(queue.clone()), mention("<@U1>   ")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "dropped");
        assert!(queue.sent().is_empty());
    }

    #[tokio::test]
    async fn unknown_event_type_is_ignored() {
        let queue = Arc::new(RecordingQueue::default());
        let (status, body) = post_events(
            state(queue.clone()),
            json!({ "type": "event_callback", "event": { "type": "reaction_added" } }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ignored");
    }

    #[tokio::test]
    async fn queue_outage_returns_503() {
        let queue = Arc::new(RecordingQueue::failing_send());
        let (status, body) = post_events(state(queue), mention("<@U1> a cat")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "unavailable");
    }

    #[tokio::test]
    async fn missing_event_is_bad_request() {
        let queue = Arc::new(RecordingQueue::default());
        let (status, _) = post_events(state(queue), json!({ "type": "event_callback" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn health_reports_queue_counts() {
        let queue = Arc::new(RecordingQueue::default());
        let response = router(state(queue))
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["queue"]["visible"], 0);
    }
}
