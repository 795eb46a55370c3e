//! HTTP surface: authentication, role guards, and status mapping.

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use common::TestApp;
use serde_json::Value;
use tower::ServiceExt;

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).expect("request")
}

fn post(uri: &str, token: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

#[tokio::test]
async fn requests_without_a_token_are_unauthorized() {
    let app = TestApp::spawn(4).await;
    let router = app.router();

    let response = router
        .clone()
        .oneshot(get("/velvet-hour/status", None))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = router
        .oneshot(get("/velvet-hour/status", Some("vlv_bogus")))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_routes_require_the_admin_role() {
    let mut app = TestApp::spawn(4).await;
    let alice = app.attending_user("attendee").await;
    let token = app.token_for(alice).await;

    let uri = format!("/admin/events/{}/velvet-hour", app.event_id);
    let response = app
        .router()
        .oneshot(get(&uri, Some(&token)))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let body = body_json(response).await;
    assert_eq!(body["code"], "forbidden");
}

#[tokio::test]
async fn start_below_quorum_maps_to_precondition_failed() {
    let mut app = TestApp::spawn(4).await; // needs 5 present
    let operator = app.attending_user("admin").await;
    let token = app.token_for(operator).await;

    // Three users marked attending, three connected sockets.
    let mut conns = Vec::new();
    for _ in 0..3 {
        let user_id = app.attending_user("attendee").await;
        conns.push(app.connect(user_id, false).await);
    }

    let uri = format!("/admin/events/{}/velvet-hour/start", app.event_id);
    let response = app
        .router()
        .oneshot(post(&uri, &token, serde_json::json!({})))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);

    let body = body_json(response).await;
    assert_eq!(body["code"], "not_enough_present");
    assert_eq!(body["required"], 5);
    assert_eq!(body["present"], 3);
}

#[tokio::test]
async fn status_reports_the_waiting_session() {
    let mut app = TestApp::spawn(1).await;
    let alice = app.attending_user("attendee").await;
    let token = app.token_for(alice).await;
    let _conn = app.connect(alice, false).await;

    // Before any session: connectable but idle.
    let response = app
        .router()
        .oneshot(get("/velvet-hour/status", Some(&token)))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["isActive"], true);
    assert!(body.get("session").is_none());
    assert_eq!(body["config"]["minParticipants"], 1);

    // With a session and a joined participant, the view fills in.
    app.coordinator
        .start_session(app.event_id)
        .await
        .expect("start");
    app.coordinator.join(alice).await.expect("join");

    let response = app
        .router()
        .oneshot(get("/velvet-hour/status", Some(&token)))
        .await
        .expect("response");
    let body = body_json(response).await;
    assert_eq!(body["isActive"], true);
    assert_eq!(body["session"]["status"], "waiting");
    assert_eq!(body["session"]["currentRound"], 0);
    assert_eq!(body["participant"]["userId"], serde_json::json!(alice));
}

#[tokio::test]
async fn duplicate_start_maps_to_conflict() {
    let mut app = TestApp::spawn(1).await;
    let operator = app.attending_user("admin").await;
    let token = app.token_for(operator).await;
    let alice = app.attending_user("attendee").await;
    let _conn = app.connect(alice, false).await;

    let uri = format!("/admin/events/{}/velvet-hour/start", app.event_id);
    let response = app
        .router()
        .oneshot(post(&uri, &token, serde_json::json!({})))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .router()
        .oneshot(post(&uri, &token, serde_json::json!({})))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["code"], "already_run");
}

#[tokio::test]
async fn unknown_event_maps_to_not_found() {
    let mut app = TestApp::spawn(4).await;
    let operator = app.attending_user("admin").await;
    let token = app.token_for(operator).await;

    let uri = format!(
        "/admin/events/{}/velvet-hour/attendance",
        uuid::Uuid::new_v4()
    );
    let response = app
        .router()
        .oneshot(get(&uri, Some(&token)))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
