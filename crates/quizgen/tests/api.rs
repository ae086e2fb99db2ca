// tests/api.rs
mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use common::{
    controller, setup_db, wait_terminal, GatedGenerator, StubGenerator, TestDb, MEASUREMENT,
};
use quizgen::api::{router, ApiState, ADMIN_ID_HEADER};
use quizgen::generation::{GenerationController, QuestionGenerator};
use std::sync::Arc;

fn app(db: &TestDb, generator: Arc<dyn QuestionGenerator>) -> (Router, GenerationController) {
    let ctl = controller(db, generator);
    (
        router(ApiState {
            controller: ctl.clone(),
        }),
        ctl,
    )
}

async fn call(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let res = app.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header(ADMIN_ID_HEADER, "17")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn start_then_conflict_then_cancel() {
    let db = setup_db().await;
    let gate = GatedGenerator::new();
    let (app, ctl) = app(&db, gate.clone());

    let (status, body) = call(
        &app,
        post_json("/api/generation/start", json!({ "count": 50 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let job_id: Uuid = body["job_id"].as_str().unwrap().parse().unwrap();
    let total: u64 = body["distribution"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["quota"].as_u64().unwrap())
        .sum();
    assert_eq!(total, 50);

    let (status, body) = call(
        &app,
        post_json("/api/generation/start", json!({ "count": 5 })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["reason"], "already_running");
    assert_eq!(body["job_id"], job_id.to_string());

    let (status, body) = call(&app, get("/api/generation/active")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["running"], true);
    assert_eq!(body["job_id"], job_id.to_string());
    assert_eq!(body["created_by"], 17);

    let (status, body) = call(
        &app,
        post_json(&format!("/api/generation/{job_id}/cancel"), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cancelled"], true);

    gate.close();
    wait_terminal(&ctl, job_id).await;

    let (status, body) = call(&app, get(&format!("/api/generation/progress/{job_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");
    assert_eq!(body["running"], false);
    assert_eq!(body["requested_count"], 50);

    let (status, body) = call(
        &app,
        post_json(&format!("/api/generation/{job_id}/cancel"), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["reason"], "already_terminal");
    assert_eq!(body["status"], "cancelled");

    let (_, body) = call(&app, get("/api/generation/active")).await;
    assert_eq!(body, json!({ "running": false }));
}

#[tokio::test]
async fn invalid_start_is_a_400_with_reason() {
    let db = setup_db().await;
    let (app, _) = app(&db, StubGenerator::always_ok());

    for (payload, reason) in [
        (json!({ "count": 0 }), "count_out_of_range"),
        (json!({ "count": 501 }), "count_out_of_range"),
        (json!({ "count": 10, "selected_areas": [] }), "empty_areas"),
        (json!({ "count": 10, "selected_areas": ["Ethics", "Tarot"] }), "unknown_area"),
    ] {
        let (status, body) = call(&app, post_json("/api/generation/start", payload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["reason"], reason);
        assert!(body["error"].as_str().is_some());
    }

    let (_, body) = call(&app, get("/api/generation/history")).await;
    assert_eq!(body["items"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn unknown_job_and_idle_cancel_are_404() {
    let db = setup_db().await;
    let (app, _) = app(&db, StubGenerator::always_ok());

    let (status, body) = call(
        &app,
        get(&format!("/api/generation/progress/{}", Uuid::new_v4())),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["reason"], "not_found");

    let (status, body) = call(&app, post_json("/api/generation/cancel", json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["reason"], "no_active_job");
}

#[tokio::test]
async fn read_only_endpoints() {
    let db = setup_db().await;
    let (app, ctl) = app(&db, StubGenerator::always_ok());

    let (status, body) = call(&app, get("/api/generation/preview?count=100")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cost_estimate"]["with_dedup"], 10.0);
    assert_eq!(body["cost_estimate"]["without_dedup"], 9.0);

    let (status, body) = call(
        &app,
        get("/api/generation/preview?count=20&areas=Ethics&areas=Experimental%20Design"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["distribution"][0]["area"], "Ethics");
    assert_eq!(body["distribution"][0]["quota"], 13);
    assert_eq!(body["distribution"][1]["quota"], 7);

    let (status, body) = call(&app, get("/api/generation/preview?areas=Ethics")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["reason"], "malformed_query");

    let (status, body) = call(&app, get("/api/generation/preview?count=900")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["reason"], "count_out_of_range");

    let (status, body) = call(&app, get("/api/generation/config")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count_max"], 500);
    assert_eq!(body["area_weights"].as_object().unwrap().len(), 9);

    let (status, body) = call(&app, get("/api/generation/pool-stats")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["health"], "empty");

    let handle = ctl
        .submit(
            quizgen::generation::GenerationRequest {
                count: 3,
                ..Default::default()
            },
            0,
        )
        .await
        .unwrap();
    wait_terminal(&ctl, handle.job_id).await;

    let (_, body) = call(&app, get("/api/generation/history?limit=500")).await;
    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["status"], "completed");
    assert_eq!(items[0]["total_generated"], 3);
    assert!(items[0]["elapsed_seconds"].as_i64().unwrap() >= 0);
    let areas = items[0]["areas"].as_array().unwrap();
    assert_eq!(areas.len(), 9);
    let done: i64 = areas.iter().map(|a| a["done"].as_i64().unwrap()).sum();
    assert_eq!(done, 3);
    assert!(areas
        .iter()
        .filter(|a| a["target"].as_i64().unwrap() > 0)
        .all(|a| a["status"] == "complete"));

    let (_, body) = call(&app, get("/api/generation/pool-stats")).await;
    assert_eq!(body["total_questions"], 3);

    let res = app.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = app.clone().oneshot(get("/")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn preview_keeps_area_names_that_contain_commas() {
    let db = setup_db().await;
    let (app, _) = app(&db, StubGenerator::always_ok());

    let (status, body) = call(
        &app,
        get("/api/generation/preview?count=10&areas=Measurement%2C%20Data%20Display%2C%20and%20Interpretation"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let distribution = body["distribution"].as_array().unwrap();
    assert_eq!(distribution.len(), 1);
    assert_eq!(distribution[0]["area"], MEASUREMENT);
    assert_eq!(distribution[0]["quota"], 10);

    let (status, body) = call(
        &app,
        get("/api/generation/preview?count=10&areas=Ethics&areas=Measurement%2C%20Data%20Display%2C%20and%20Interpretation"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let areas: Vec<&str> = body["distribution"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["area"].as_str().unwrap())
        .collect();
    assert_eq!(areas, vec!["Ethics", MEASUREMENT]);
}

#[tokio::test]
async fn start_with_comma_area_tracks_it_per_area() {
    let db = setup_db().await;
    let (app, ctl) = app(&db, StubGenerator::always_ok());

    let (status, body) = call(
        &app,
        post_json(
            "/api/generation/start",
            json!({ "count": 4, "selected_areas": [MEASUREMENT] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let job_id: Uuid = body["job_id"].as_str().unwrap().parse().unwrap();
    wait_terminal(&ctl, job_id).await;

    let (_, body) = call(&app, get(&format!("/api/generation/progress/{job_id}"))).await;
    assert_eq!(body["selected_areas"], json!([MEASUREMENT]));
    assert_eq!(
        body["areas"],
        json!([{ "area": MEASUREMENT, "weight": 0.12, "target": 4, "done": 4, "status": "complete" }])
    );
}

#[tokio::test]
async fn undecodable_start_body_is_a_json_400() {
    let db = setup_db().await;
    let (app, _) = app(&db, StubGenerator::always_ok());

    for payload in [
        json!({ "count": "fifty" }),
        json!({}),
        json!({ "count": 10.5 }),
        json!({ "count": 10, "selected_areas": "Ethics" }),
    ] {
        let (status, body) = call(&app, post_json("/api/generation/start", payload.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "payload {payload}");
        assert_eq!(body["reason"], "malformed_body");
        assert!(!body["error"].as_str().unwrap().is_empty());
    }

    let req = Request::builder()
        .method("POST")
        .uri("/api/generation/start")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = call(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["reason"], "malformed_body");

    let (_, body) = call(&app, get("/api/generation/history")).await;
    assert_eq!(body["items"].as_array().unwrap().len(), 0);
}
