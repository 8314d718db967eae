use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use quarry_core::testutil::MockStrategy;
use quarry_core::{AppError, StrategyKind};

use crate::integration::common::{ARTICLE, TEST_API_KEY, setup_test_app, setup_test_app_no_auth};

fn article_app() -> crate::integration::common::TestApp {
    setup_test_app(MockStrategy::new(StrategyKind::Simple, ARTICLE))
}

fn authed_post(path: &str, body: serde_json::Value) -> Request<Body> {
    Request::post(path)
        .header("authorization", format!("Bearer {TEST_API_KEY}"))
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn authed(method: &str, path: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(path)
        .header("authorization", format!("Bearer {TEST_API_KEY}"))
        .body(Body::empty())
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

// ---------------------------------------------------------------------------
// Health & auth
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_returns_200() {
    let app = article_app();

    let response = app
        .router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["strategies"], serde_json::json!(["simple", "framework"]));
}

#[tokio::test]
async fn unauthenticated_request_returns_401() {
    let app = article_app();

    let response = app
        .router
        .oneshot(Request::get("/v1/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn wrong_api_key_returns_401() {
    let app = article_app();

    let response = app
        .router
        .oneshot(
            Request::get("/v1/metrics")
                .header("authorization", "Bearer wrong-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = json_body(response).await;
    assert_eq!(json["error"], "unauthorized");
}

#[tokio::test]
async fn empty_configured_key_rejects_everything() {
    let app = setup_test_app_no_auth();

    let response = app
        .router
        .oneshot(
            Request::get("/v1/metrics")
                .header("authorization", "Bearer ")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// ---------------------------------------------------------------------------
// Scrape
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scrape_returns_success_envelope() {
    let app = article_app();

    let response = app
        .router
        .oneshot(authed_post(
            "/v1/scrape",
            serde_json::json!({ "target": "https://example.com/article" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["title"], "Quarry Test");
    assert_eq!(json["data"]["strategy"], "simple");
    assert!(json["data"]["markdown"].as_str().unwrap().contains("Hello"));
    assert_eq!(json["metadata"]["cache_hit"], false);
    assert_eq!(json["metadata"]["attempted"], serde_json::json!(["simple"]));
    assert!(json.get("error").is_none());
}

#[tokio::test]
async fn repeated_scrape_is_served_from_cache() {
    let app = article_app();
    let body = serde_json::json!({ "target": "https://example.com/cached" });

    let first = app
        .router
        .clone()
        .oneshot(authed_post("/v1/scrape", body.clone()))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .router
        .oneshot(authed_post("/v1/scrape", body))
        .await
        .unwrap();
    let json = json_body(second).await;
    assert_eq!(json["metadata"]["cache_hit"], true);
    assert_eq!(app.simple.calls(), 1);
}

#[tokio::test]
async fn invalid_target_returns_400_envelope() {
    let app = article_app();

    let response = app
        .router
        .oneshot(authed_post(
            "/v1/scrape",
            serde_json::json!({ "target": "ftp://example.com/file" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["error"]["category"], "invalid_input");
    assert!(json["metadata"]["fetched_at"].is_string());
}

#[tokio::test]
async fn unknown_method_returns_400() {
    let app = article_app();

    let response = app
        .router
        .oneshot(authed_post(
            "/v1/scrape",
            serde_json::json!({ "target": "https://example.com", "method": "teleport" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["error"], "invalid_input");
}

#[tokio::test]
async fn explicit_strategy_failure_maps_category_to_status() {
    let app = setup_test_app(MockStrategy::with_error(
        StrategyKind::Simple,
        AppError::ParseError("binary body".into()),
    ));

    let response = app
        .router
        .oneshot(authed_post(
            "/v1/scrape",
            serde_json::json!({ "target": "https://example.com/pdf", "method": "simple" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let json = json_body(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["error"]["category"], "parse");
    assert_eq!(json["metadata"]["attempted"], serde_json::json!(["simple"]));
}

#[tokio::test]
async fn auto_method_falls_back_past_a_block() {
    let app = setup_test_app(MockStrategy::with_error(
        StrategyKind::Simple,
        AppError::AntiBot("captcha".into()),
    ));

    let response = app
        .router
        .oneshot(authed_post(
            "/v1/scrape",
            serde_json::json!({ "target": "https://example.com/guarded" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["data"]["strategy"], "framework");
    assert_eq!(
        json["metadata"]["attempted"],
        serde_json::json!(["simple", "framework"])
    );
}

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn batch_keeps_input_order() {
    let app = article_app();

    let response = app
        .router
        .oneshot(authed_post(
            "/v1/batch",
            serde_json::json!({
                "targets": ["https://example.com/a", "not a url", "https://example.com/c"]
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    let results = json["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0]["metadata"]["target"], "https://example.com/a");
    assert_eq!(results[1]["error"]["category"], "invalid_input");
    assert_eq!(results[2]["metadata"]["target"], "https://example.com/c");
    assert_eq!(json["summary"]["succeeded"], 2);
    assert_eq!(json["summary"]["failed"], 1);
}

#[tokio::test]
async fn oversized_batch_returns_400() {
    let app = article_app();
    let targets: Vec<String> = (0..4).map(|i| format!("https://example.com/{i}")).collect();

    let response = app
        .router
        .oneshot(authed_post(
            "/v1/batch",
            serde_json::json!({ "targets": targets }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["error"], "invalid_input");
    assert_eq!(app.simple.calls(), 0);
}

#[tokio::test]
async fn empty_batch_returns_400() {
    let app = article_app();

    let response = app
        .router
        .oneshot(authed_post("/v1/batch", serde_json::json!({ "targets": [] })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Service management
// ---------------------------------------------------------------------------

#[tokio::test]
async fn metrics_reflect_traffic() {
    let app = article_app();

    app.router
        .clone()
        .oneshot(authed_post(
            "/v1/scrape",
            serde_json::json!({ "target": "https://example.com/m" }),
        ))
        .await
        .unwrap();

    let response = app
        .router
        .oneshot(authed("GET", "/v1/metrics"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["requests"]["total"], 1);
    assert_eq!(json["cache"]["size"], 1);
    assert_eq!(json["strategies"], serde_json::json!(["simple", "framework"]));
}

#[tokio::test]
async fn clear_cache_reports_removed_entries() {
    let app = article_app();

    for path in ["https://example.com/1", "https://example.com/2"] {
        app.router
            .clone()
            .oneshot(authed_post("/v1/scrape", serde_json::json!({ "target": path })))
            .await
            .unwrap();
    }

    let response = app
        .router
        .clone()
        .oneshot(authed("DELETE", "/v1/cache"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["removed_count"], 2);

    let again = app
        .router
        .oneshot(authed("DELETE", "/v1/cache"))
        .await
        .unwrap();
    assert_eq!(json_body(again).await["removed_count"], 0);
}

#[tokio::test]
async fn openapi_document_is_public() {
    let app = article_app();

    let response = app
        .router
        .oneshot(
            Request::get("/api-docs/openapi.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert!(json["paths"]["/v1/scrape"].is_object());
    assert!(json["paths"]["/v1/cache"]["delete"].is_object());
}
