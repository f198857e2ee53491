mod common;

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::Duration;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{monday_at, Harness};
use reservation_cell::{reservation_routes, ReservationAppState};
use shared_utils::test_utils::{JwtTestUtils, TestConfig, TestUser};

struct TestApp {
    harness: Harness,
    router: Router,
    secret: String,
}

impl TestApp {
    async fn new() -> Self {
        let harness = Harness::new().await;
        let config = TestConfig::default();
        let secret = config.jwt_secret.clone();

        let state = Arc::new(ReservationAppState {
            config: config.to_arc(),
            service: harness.service.clone(),
        });

        Self {
            harness,
            router: reservation_routes(state),
            secret,
        }
    }

    fn token(&self, user: &TestUser) -> String {
        JwtTestUtils::create_test_token(user, &self.secret, None)
    }

    async fn send(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    async fn lock(&self, token: &str, hour: u32, minute: u32) -> (StatusCode, Value) {
        let body = json!({
            "doctor_id": self.harness.doctor_id,
            "slot_start": monday_at(hour, minute),
        });
        self.send(Method::POST, "/reservations/lock", Some(token), Some(body)).await
    }
}

#[tokio::test]
async fn slots_are_public() {
    let app = TestApp::new().await;
    let uri = format!("/doctors/{}/slots?horizon_days=2", app.harness.doctor_id);

    let (status, json) = app.send(Method::GET, &uri, None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 2);
    assert_eq!(json["slot_duration_minutes"], 30);
    assert_eq!(json["slots"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn unknown_doctor_is_not_found() {
    let app = TestApp::new().await;
    let uri = format!("/doctors/{}/slots", uuid::Uuid::new_v4());

    let (status, json) = app.send(Method::GET, &uri, None, None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().unwrap().contains("availability"));
}

#[tokio::test]
async fn patient_routes_require_a_patient_token() {
    let app = TestApp::new().await;

    let (status, _) = app
        .send(Method::GET, "/reservations/my", None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let invalid = JwtTestUtils::create_invalid_signature_token(&TestUser::default());
    let (status, _) = app
        .send(Method::GET, "/reservations/my", Some(&invalid), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let doctor = app.token(&TestUser::doctor("doc@example.com"));
    let (status, _) = app.lock(&doctor, 9, 0).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn lock_confirm_and_list_over_http() {
    let app = TestApp::new().await;
    let patient = TestUser::patient("p@example.com");
    let token = app.token(&patient);

    let (status, json) = app.lock(&token, 9, 0).await;
    assert_eq!(status, StatusCode::CREATED);
    let reservation_id = json["reservation_id"].as_str().unwrap().to_string();

    let (status, _) = app
        .send(
            Method::POST,
            "/reservations/confirm",
            Some(&token),
            Some(json!({ "reservation_id": reservation_id, "verification_code": "999999" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = app
        .send(
            Method::POST,
            "/reservations/confirm",
            Some(&token),
            Some(json!({ "reservation_id": reservation_id, "verification_code": "123456" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["reservation"]["state"], "booked");
    assert_eq!(json["reservation"]["patient_id"], patient.id);

    let rival = app.token(&TestUser::patient("q@example.com"));
    let (status, _) = app.lock(&rival, 9, 0).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, json) = app
        .send(Method::GET, "/reservations/my?status=booked", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 1);
    assert_eq!(json["reservations"][0]["id"], reservation_id.as_str());

    let (_, json) = app
        .send(Method::GET, "/reservations/my?status=cancelled", Some(&token), None)
        .await;
    assert_eq!(json["total"], 0);

    let (status, json) = app
        .send(Method::GET, "/reservations/my?status=bogus", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 1);
}

#[tokio::test]
async fn expired_lock_confirmation_is_gone() {
    let app = TestApp::new().await;
    let token = app.token(&TestUser::patient("p@example.com"));

    let (_, json) = app.lock(&token, 9, 30).await;
    app.harness.clock.advance(Duration::minutes(6));

    let (status, _) = app
        .send(
            Method::POST,
            "/reservations/confirm",
            Some(&token),
            Some(json!({ "reservation_id": json["reservation_id"], "verification_code": "123456" })),
        )
        .await;
    assert_eq!(status, StatusCode::GONE);
}

#[tokio::test]
async fn misaligned_slot_is_a_bad_request() {
    let app = TestApp::new().await;
    let token = app.token(&TestUser::patient("p@example.com"));

    let (status, _) = app.lock(&token, 9, 10).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cancel_and_reschedule_follow_the_window() {
    let app = TestApp::new().await;
    let patient = TestUser::patient("p@example.com");
    let token = app.token(&patient);
    let (_, first) = app.harness.book_as(patient.uuid(), monday_at(9, 0)).await;
    let (_, second) = app.harness.book_as(patient.uuid(), monday_at(9, 30)).await;

    let (status, json) = app
        .send(Method::POST, &format!("/reservations/{}/reschedule", first), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["reservation"]["state"], "cancelled");

    app.harness.clock.set(monday_at(8, 0));
    let (status, json) = app
        .send(Method::POST, &format!("/reservations/{}/cancel", second), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(json["error"].as_str().unwrap().contains("24 hours"));

    let other = app.token(&TestUser::patient("q@example.com"));
    let (status, _) = app
        .send(Method::POST, &format!("/reservations/{}/cancel", second), Some(&other), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
