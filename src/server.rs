//! Webhook HTTP surface.
//!
//! - `POST /webhook/{secret}` feeds Telegram updates to the dispatcher
//! - `GET /` liveness probe
//! - `GET /version` build version
//!
//! A wrong path secret answers 404 so the route looks absent to scanners.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use subtle::ConstantTimeEq;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{error, warn, Level};

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::platform::telegram::parse_update;
use crate::platform::ReplySender;

/// Header Telegram sets when the webhook was registered with a secret token.
pub const SECRET_TOKEN_HEADER: &str = "x-telegram-bot-api-secret-token";

/// Request context, built once and shared read-only across requests
#[derive(Clone)]
pub struct AppState {
    dispatcher: Arc<Dispatcher>,
    sender: Arc<dyn ReplySender>,
    webhook_secret: Arc<str>,
    secret_token: Option<Arc<str>>,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher, sender: Arc<dyn ReplySender>, config: &Config) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
            sender,
            webhook_secret: Arc::from(config.webhook_secret.as_str()),
            secret_token: config.secret_token.as_deref().map(Arc::from),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/version", get(version))
        .route("/webhook/{secret}", post(webhook))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}

/// Compare a presented credential without short-circuiting on the first
/// differing byte.
fn credential_matches(expected: &str, provided: &str) -> bool {
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

async fn version() -> Json<Value> {
    Json(json!({ "ok": true, "version": env!("CARGO_PKG_VERSION") }))
}

async fn webhook(
    State(state): State<AppState>,
    Path(secret): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    if !credential_matches(&state.webhook_secret, &secret) {
        warn!("Webhook call with unknown path secret");
        return (StatusCode::NOT_FOUND, "not found");
    }

    if let Some(expected) = &state.secret_token {
        let provided = headers
            .get(SECRET_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !credential_matches(expected, provided) {
            warn!("Webhook call with missing or wrong secret token header");
            return (StatusCode::FORBIDDEN, "forbidden");
        }
    }

    let update = match parse_update(&body) {
        Ok(update) => update,
        Err(e) => {
            warn!("Rejected webhook body: {:#}", e);
            return (StatusCode::BAD_REQUEST, "bad request");
        }
    };

    // Telegram redelivers on non-2xx, so a failed reply is only logged.
    if let Err(e) = state
        .dispatcher
        .dispatch(&update, state.sender.as_ref())
        .await
    {
        error!("Failed to handle update {}: {:#}", update.update_id, e);
    }

    (StatusCode::OK, "ok")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::GREETING;
    use crate::platform::telegram::fixtures::message_update;
    use crate::platform::testing::RecordingSender;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use axum::response::Response;
    use std::sync::Mutex;
    use tower::ServiceExt;
    use tracing::{Event, Subscriber};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
    use tracing_subscriber::EnvFilter;

    fn config(secret_token: Option<&str>) -> Config {
        Config {
            bot_token: "123:abc".to_string(),
            webhook_secret: "secret123".to_string(),
            host: "127.0.0.1".to_string(),
            port: 0,
            secret_token: secret_token.map(str::to_string),
            public_url: None,
        }
    }

    fn app(sender: Arc<RecordingSender>, secret_token: Option<&str>) -> Router {
        let state = AppState::new(
            Dispatcher::with_default_rules().with_bot_username("render_bot"),
            sender,
            &config(secret_token),
        );
        build_router(state)
    }

    fn post(uri: &str, body: String) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn send_text(text: &str) -> (StatusCode, String, Vec<(i64, String)>) {
        let sender = Arc::new(RecordingSender::default());
        let response = app(sender.clone(), None)
            .oneshot(post(
                "/webhook/secret123",
                message_update(1, 42, Some(text)).to_string(),
            ))
            .await
            .unwrap();
        let status = response.status();
        (status, body_text(response).await, sender.sent())
    }

    #[tokio::test]
    async fn test_start_replies_with_greeting() {
        let (status, body, sent) = send_text("/start").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
        assert_eq!(sent, vec![(42, GREETING.to_string())]);
        assert_eq!(sent[0].1, "سلام از Render! ✅");
    }

    #[tokio::test]
    async fn test_text_is_echoed() {
        let (status, body, sent) = send_text("hello world").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
        assert_eq!(sent, vec![(42, "hello world".to_string())]);
    }

    #[tokio::test]
    async fn test_unknown_command_gets_no_reply() {
        let (status, body, sent) = send_text("/unknown").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
        assert!(sent.is_empty());
    }

    #[tokio::test]
    async fn test_message_without_text_gets_no_reply() {
        let sender = Arc::new(RecordingSender::default());
        let response = app(sender.clone(), None)
            .oneshot(post(
                "/webhook/secret123",
                message_update(2, 42, None).to_string(),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(sender.sent().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_secret_never_dispatches() {
        let sender = Arc::new(RecordingSender::default());
        let response = app(sender.clone(), None)
            .oneshot(post(
                "/webhook/guess",
                message_update(1, 42, Some("/start")).to_string(),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(sender.sent().is_empty());
    }

    #[tokio::test]
    async fn test_nested_path_not_routed() {
        let sender = Arc::new(RecordingSender::default());
        let response = app(sender.clone(), None)
            .oneshot(post(
                "/webhook/secret123/extra",
                message_update(1, 42, Some("hello")).to_string(),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(sender.sent().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_json_rejected() {
        let sender = Arc::new(RecordingSender::default());
        let response = app(sender.clone(), None)
            .oneshot(post("/webhook/secret123", "{not json".to_string()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(sender.sent().is_empty());
    }

    #[tokio::test]
    async fn test_secret_token_header_enforced() {
        let sender = Arc::new(RecordingSender::default());
        let body = message_update(1, 42, Some("hello")).to_string();

        let response = app(sender.clone(), Some("tg-token"))
            .oneshot(post("/webhook/secret123", body.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(sender.sent().is_empty());

        let mut request = post("/webhook/secret123", body);
        request
            .headers_mut()
            .insert(SECRET_TOKEN_HEADER, "tg-token".parse().unwrap());
        let response = app(sender.clone(), Some("tg-token"))
            .oneshot(request)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(sender.sent(), vec![(42, "hello".to_string())]);
    }

    #[tokio::test]
    async fn test_send_failure_still_acknowledged() {
        let sender = Arc::new(RecordingSender::failing());
        let response = app(sender.clone(), None)
            .oneshot(post(
                "/webhook/secret123",
                message_update(1, 42, Some("hello")).to_string(),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "ok");
        assert_eq!(sender.sent().len(), 1);
    }

    #[test]
    fn test_credential_matches() {
        assert!(credential_matches("tg-token", "tg-token"));
        assert!(!credential_matches("tg-token", "tg-tokem"));
        assert!(!credential_matches("tg-token", "tg-token-longer"));
        assert!(!credential_matches("tg-token", "tg"));
        assert!(!credential_matches("tg-token", ""));
    }

    #[tokio::test]
    async fn test_secret_token_prefix_rejected() {
        let sender = Arc::new(RecordingSender::default());
        let mut request = post(
            "/webhook/secret123",
            message_update(1, 42, Some("hello")).to_string(),
        );
        request
            .headers_mut()
            .insert(SECRET_TOKEN_HEADER, "tg-tok".parse().unwrap());
        let response = app(sender.clone(), Some("tg-token"))
            .oneshot(request)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(sender.sent().is_empty());
    }

    /// Collects (level, target) of every event that passes the filter.
    #[derive(Clone, Default)]
    struct CapturedEvents(Arc<Mutex<Vec<(Level, String)>>>);

    impl<S: Subscriber> Layer<S> for CapturedEvents {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            let meta = event.metadata();
            self.0
                .lock()
                .unwrap()
                .push((*meta.level(), meta.target().to_string()));
        }
    }

    #[tokio::test]
    async fn test_request_trace_visible_under_default_filter() {
        let captured = CapturedEvents::default();
        let subscriber = tracing_subscriber::registry()
            .with(EnvFilter::new(crate::DEFAULT_LOG_FILTER))
            .with(captured.clone());
        let _guard = tracing::subscriber::set_default(subscriber);

        let response = app(Arc::new(RecordingSender::default()), None)
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let events = captured.0.lock().unwrap().clone();
        assert!(
            events
                .iter()
                .any(|(level, target)| *level == Level::INFO && target.starts_with("tower_http")),
            "no request trace in {:?}",
            events
        );
    }

    #[tokio::test]
    async fn test_health() {
        let sender = Arc::new(RecordingSender::default());
        let response = app(sender.clone(), Some("tg-token"))
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body, json!({ "ok": true }));
        assert!(sender.sent().is_empty());
    }

    #[tokio::test]
    async fn test_version() {
        let response = app(Arc::new(RecordingSender::default()), None)
            .oneshot(Request::get("/version").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["ok"], json!(true));
        assert_eq!(body["version"], json!(env!("CARGO_PKG_VERSION")));
    }

    #[tokio::test]
    async fn test_unknown_path_not_found() {
        let response = app(Arc::new(RecordingSender::default()), None)
            .oneshot(Request::get("/export/users.csv").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
