//! Common test utilities

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::util::ServiceExt;

use streamledger::api::{self, AppState};
use streamledger::event_log::InMemoryEventLog;
use streamledger::projection::{AccountProjector, InMemoryViewStore};
use streamledger::service::AccountService;

pub const STREAM: &str = "accountStream";

/// Fully wired pipeline over in-memory backends: HTTP edge, command
/// service, and a connected projector sharing one log.
pub struct TestApp {
    pub app: Router,
    pub log: InMemoryEventLog,
    pub views: InMemoryViewStore,
    pub projector: AccountProjector,
}

pub async fn spawn_app() -> TestApp {
    let log = InMemoryEventLog::new(Duration::from_millis(5));
    let views = InMemoryViewStore::new();

    let service = Arc::new(AccountService::new(Arc::new(log.clone()), STREAM));

    let projector = AccountProjector::new(
        Arc::new(log.clone()),
        Arc::new(views.clone()),
        STREAM,
        "accountProjector:test_1",
        Duration::from_millis(20),
    );
    projector.connect().await.expect("projector failed to connect");

    let state = AppState {
        service,
        views: Arc::new(views.clone()),
    };
    let app = api::create_router().with_state(state);

    TestApp {
        app,
        log,
        views,
        projector,
    }
}

pub async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("failed to build request");

    send(app, request).await
}

pub async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("failed to build request");

    send(app, request).await
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("request failed");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read body");
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("body is not JSON")
    };
    (status, json)
}
