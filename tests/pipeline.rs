//! End-to-end pipeline tests over the in-memory backends: HTTP edge →
//! service → event log → projector → view store.

use std::time::Duration;

use axum::http::StatusCode;
use serde_json::json;

use streamledger::domain::AccountEvent;
use streamledger::event_log::EventLog;
use streamledger::projection::ViewStore;

mod common;

use common::{get, post_json, spawn_app, STREAM};

#[tokio::test]
async fn test_create_account_then_duplicate() {
    let harness = spawn_app().await;

    let (status, body) = post_json(&harness.app, "/accounts", json!({"id": "JohnDoe"})).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["id"], "JohnDoe");

    let (status, body) = post_json(&harness.app, "/accounts", json!({"id": "JohnDoe"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["errorMessage"]
        .as_str()
        .unwrap()
        .contains("already exists"));

    harness.projector.close().await;
}

#[tokio::test]
async fn test_fetch_snapshot_after_create() {
    let harness = spawn_app().await;
    post_json(&harness.app, "/accounts", json!({"id": "JohnDoe"})).await;

    let (status, body) = get(&harness.app, "/accounts/JohnDoe").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "JohnDoe");
    assert_eq!(body["funds"], 0);
    assert_eq!(body["version"], 1);
    assert!(!body["timestamp"].as_str().unwrap().is_empty());
    assert_ne!(body["timestamp"], "0");

    harness.projector.close().await;
}

#[tokio::test]
async fn test_deposit_and_withdraw_advance_the_snapshot() {
    let harness = spawn_app().await;
    post_json(&harness.app, "/accounts", json!({"id": "JohnDoe"})).await;

    let (status, body) = post_json(
        &harness.app,
        "/accounts/JohnDoe/deposits",
        json!({"amount": 100}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "JohnDoe");
    assert_eq!(body["amount"], 100);

    let (_, body) = get(&harness.app, "/accounts/JohnDoe").await;
    assert_eq!(body["funds"], 100);
    assert_eq!(body["version"], 2);

    let (status, _) = post_json(
        &harness.app,
        "/accounts/JohnDoe/withdrawals",
        json!({"amount": 100}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = get(&harness.app, "/accounts/JohnDoe").await;
    assert_eq!(body["funds"], 0);
    assert_eq!(body["version"], 3);

    harness.projector.close().await;
}

#[tokio::test]
async fn test_validation_failures_map_to_400() {
    let harness = spawn_app().await;
    post_json(&harness.app, "/accounts", json!({"id": "JohnDoe"})).await;

    let (status, body) = post_json(
        &harness.app,
        "/accounts/JohnDoe/withdrawals",
        json!({"amount": 1}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["errorMessage"]
        .as_str()
        .unwrap()
        .contains("insufficient funds"));

    let (status, body) = post_json(
        &harness.app,
        "/accounts/JohnDoe/deposits",
        json!({"amount": 0}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["errorMessage"].as_str().unwrap().contains("positive"));

    harness.projector.close().await;
}

#[tokio::test]
async fn test_unknown_account_is_404() {
    let harness = spawn_app().await;

    let (status, _) = get(&harness.app, "/accounts/Nobody").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = get(&harness.app, "/accounts/Nobody/balance").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    harness.projector.close().await;
}

#[tokio::test]
async fn test_concurrent_publishes_have_exactly_one_winner() {
    let harness = spawn_app().await;
    post_json(&harness.app, "/accounts", json!({"id": "JohnDoe"})).await;

    // Two publishers race with the same expected version.
    let log_a = harness.log.clone();
    let log_b = harness.log.clone();
    let event_a = AccountEvent::deposit("JohnDoe", 1, 10);
    let event_b = AccountEvent::deposit("JohnDoe", 1, 10);
    let (first, second) = tokio::join!(
        log_a.publish(STREAM, &event_a),
        log_b.publish(STREAM, &event_b),
    );

    let first = first.unwrap();
    let second = second.unwrap();
    assert!(
        first.is_some() ^ second.is_some(),
        "exactly one publish should win: {first:?} vs {second:?}"
    );
    let winner = first.or(second).unwrap();
    assert_eq!(winner.version, 2);

    // The snapshot reflects only the winning delta.
    let (_, body) = get(&harness.app, "/accounts/JohnDoe").await;
    assert_eq!(body["funds"], 10);
    assert_eq!(body["version"], 2);

    harness.projector.close().await;
}

#[tokio::test]
async fn test_projection_reaches_the_balance_endpoint() {
    let harness = spawn_app().await;
    post_json(&harness.app, "/accounts", json!({"id": "JohnDoe"})).await;
    post_json(
        &harness.app,
        "/accounts/JohnDoe/deposits",
        json!({"amount": 100}),
    )
    .await;
    post_json(
        &harness.app,
        "/accounts/JohnDoe/withdrawals",
        json!({"amount": 30}),
    )
    .await;

    // Give the projector a few poll cycles to drain the stream.
    tokio::time::sleep(Duration::from_millis(80)).await;

    let (status, body) = get(&harness.app, "/accounts/JohnDoe/balance").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "JohnDoe");
    assert_eq!(body["funds"], 70);

    // One applied timestamp per event, each folded exactly once.
    let view = harness.views.fetch("JohnDoe").await.unwrap().unwrap();
    assert_eq!(view.timestamps.len(), 3);

    // Everything the projector applied was acknowledged.
    let pending = harness
        .log
        .read_pending(STREAM, "checker", Duration::ZERO)
        .await
        .unwrap();
    assert!(pending.is_empty());

    harness.projector.close().await;
}
