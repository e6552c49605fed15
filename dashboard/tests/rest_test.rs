mod common;

use common::*;
use garden_dashboard::config::SessionConfig;
use garden_dashboard::model::Credentials;
use garden_dashboard::schedule::WateringSchedule;
use garden_dashboard::{rest, Session};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::sync::Arc;

struct Api {
    base: String,
    http: reqwest::Client,
    session: Session<FakePlatform>,
    platform: FakePlatform,
}

impl Api {
    async fn start() -> Self {
        let platform = FakePlatform::new();
        let session = Session::new(
            SessionConfig::new("http://platform.test", DEVICE_ID),
            platform.clone(),
            Arc::new(CollectingNotifier::default()),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = rest::create_router(session.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base: format!("http://{}", addr),
            http: reqwest::Client::new(),
            session,
            platform,
        }
    }

    async fn login(&self) {
        self.session
            .login(&Credentials::new("gardener@example.com", PASSWORD))
            .await
            .unwrap();
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn post_schedule(&self, schedule: &WateringSchedule) -> StatusCode {
        self.http
            .post(self.url("/api/v1/schedules"))
            .json(schedule)
            .send()
            .await
            .unwrap()
            .status()
    }
}

#[tokio::test]
async fn test_state_snapshot() {
    let api = Api::start().await;
    api.session.ingest_frame(&healthy_frame());

    let response = api.http.get(api.url("/api/v1/state")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["connection"], "DISCONNECTED");
    assert_eq!(body["readings"]["soil_moisture"], 50.0);
    assert_eq!(body["readings"]["pump"], json!({ "on": false, "pending": false }));
}

#[tokio::test]
async fn test_pump_requires_login() {
    let api = Api::start().await;
    let pump = |on: bool| {
        api.http
            .post(api.url("/api/v1/pump"))
            .json(&json!({ "on": on }))
            .send()
    };

    assert_eq!(pump(true).await.unwrap().status(), StatusCode::UNAUTHORIZED);
    assert!(api.platform.rpc_calls().is_empty());

    api.login().await;
    assert_eq!(pump(true).await.unwrap().status(), StatusCode::ACCEPTED);
    assert!(api.session.snapshot().readings.pump.on);
}

#[tokio::test]
async fn test_history_refresh() {
    let api = Api::start().await;

    let response = api
        .http
        .post(api.url("/api/v1/history/refresh"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(api.session.snapshot().temperature_history.points.len(), 24);
}

#[tokio::test]
async fn test_schedule_status_codes() {
    let api = Api::start().await;
    let schedule = WateringSchedule::new("Morning", 6, 30, vec![1, 3, 5], 15_000);

    assert_eq!(api.post_schedule(&schedule).await, StatusCode::UNAUTHORIZED);

    api.login().await;
    assert_eq!(api.post_schedule(&schedule).await, StatusCode::CREATED);

    let invalid = WateringSchedule {
        hour: 25,
        ..WateringSchedule::default()
    };
    assert_eq!(api.post_schedule(&invalid).await, StatusCode::BAD_REQUEST);

    let listed: Vec<WateringSchedule> = api
        .http
        .get(api.url("/api/v1/schedules"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed, vec![schedule.clone()]);

    let edited = WateringSchedule {
        minute: 45,
        ..schedule.clone()
    };
    let put = |id: &str| {
        api.http
            .put(api.url(&format!("/api/v1/schedules/{}", id)))
            .json(&edited)
            .send()
    };
    assert_eq!(put("missing").await.unwrap().status(), StatusCode::NOT_FOUND);
    assert_eq!(put(&schedule.id).await.unwrap().status(), StatusCode::NO_CONTENT);
    assert_eq!(api.session.snapshot().schedules[0].minute, 45);

    let delete = |id: &str| {
        api.http
            .delete(api.url(&format!("/api/v1/schedules/{}", id)))
            .send()
    };
    assert_eq!(delete("missing").await.unwrap().status(), StatusCode::NOT_FOUND);
    assert_eq!(delete(&schedule.id).await.unwrap().status(), StatusCode::NO_CONTENT);
    assert!(api.session.snapshot().schedules.is_empty());
}

#[tokio::test]
async fn test_platform_failure_is_bad_gateway() {
    let api = Api::start().await;
    api.login().await;
    api.platform.fail_writes(true);

    let status = api.post_schedule(&WateringSchedule::default()).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(api.session.snapshot().schedules.is_empty());
}
