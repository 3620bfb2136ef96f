mod common;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{FakeRunner, Harness};
use cr_gateway::api;

async fn call(h: &Harness, request: Request<Body>) -> (StatusCode, Value) {
    let app = api::router().with_state(h.state.clone());
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method(Method::GET)
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method(Method::POST)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_reports_version() {
    let h = Harness::new(FakeRunner::replying("x")).await;
    let (status, json) = call(&h, get("/v1/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn inbound_returns_replies() {
    let h = Harness::new(FakeRunner::replying("patched")).await;
    let token = h.repo_with_session("api").await;

    let (status, json) = call(
        &h,
        post_json(
            "/v1/inbound",
            json!({ "channel": "line", "chat_id": "u1", "text": format!("{token} fix it") }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json["replies"],
        json!([format!("Reply on [{token}] fix it:\npatched")])
    );
}

#[tokio::test]
async fn inbound_requires_a_chat() {
    let h = Harness::new(FakeRunner::replying("x")).await;
    let (status, _) = call(
        &h,
        post_json("/v1/inbound", json!({ "channel": "line", "chat_id": " ", "text": "/help" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn sessions_listing_and_lookup() {
    let h = Harness::new(FakeRunner::replying("x")).await;
    let token = h.repo_with_session("api").await;

    let (status, json) = call(&h, get("/v1/sessions?repo=api&limit=5")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["count"], 1);
    assert_eq!(json["sessions"][0]["token"], token.as_str());
    assert_eq!(json["sessions"][0]["conversation"], "Manual session");

    let (_, json) = call(&h, get("/v1/sessions?repo=other")).await;
    assert_eq!(json["count"], 0);

    let (status, json) = call(&h, get(&format!("/v1/sessions/{token}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["token"], token.as_str());
    assert_eq!(json["project"], "api");

    let (status, _) = call(&h, get("/v1/sessions/ZZZZ9999")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
