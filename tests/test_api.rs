//! HTTP API behaviour through warp's test client

mod test_helpers;

use menu_pipeline::api::{routes, ApiState, ParseResponse, StatusUpdateResponse};
use menu_pipeline::domain::{ProductStatus, ProductStatusChangeEvent, TaskStatus};
use menu_pipeline::protocol::{decode_status_event, MenuParsingMessage};
use menu_pipeline::testing::MockSheetSource;
use menu_pipeline::transport::{QueueChannel, QueueTransport};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use test_helpers::*;
use warp::http::StatusCode;

fn api_state(harness: &Harness) -> Arc<ApiState> {
    Arc::new(ApiState {
        menus: harness.menus.clone(),
        products: harness.products.clone(),
        transport: Arc::new(harness.queue.clone()),
    })
}

fn body_json(body: &[u8]) -> Value {
    serde_json::from_slice(body).unwrap()
}

#[tokio::test]
async fn test_create_parse_task_queues_message() {
    let harness = Harness::new(MockSheetSource::new());
    let api = routes(api_state(&harness));

    let response = warp::test::request()
        .method("POST")
        .path("/api/v1/parse")
        .json(&json!({"spreadsheet_id": "sheet-1", "restaurant_name": RESTAURANT}))
        .reply(&api)
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let created: ParseResponse = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(created.status, "queued");

    let task = harness.menus.get_task(&created.task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Queued);
    assert_eq!(task.spreadsheet_id, "sheet-1");
    assert_eq!(harness.queue.pending(QueueChannel::MenuParsing).await, 1);

    let mut deliveries = harness.queue.consume(QueueChannel::MenuParsing).await.unwrap();
    let delivery = deliveries.recv().await.unwrap();
    let message = MenuParsingMessage::decode(&delivery.payload).unwrap();
    assert_eq!(message.task_id, created.task_id);
}

#[tokio::test]
async fn test_create_parse_task_rejects_blank_fields() {
    let harness = Harness::new(MockSheetSource::new());
    let api = routes(api_state(&harness));

    let response = warp::test::request()
        .method("POST")
        .path("/api/v1/parse")
        .json(&json!({"spreadsheet_id": "  ", "restaurant_name": RESTAURANT}))
        .reply(&api)
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(response.body())["error"].is_string());
    assert_eq!(harness.queue.pending(QueueChannel::MenuParsing).await, 0);
}

#[tokio::test]
async fn test_create_parse_task_rejects_malformed_body() {
    let harness = Harness::new(MockSheetSource::new());
    let api = routes(api_state(&harness));

    let response = warp::test::request()
        .method("POST")
        .path("/api/v1/parse")
        .header("content-type", "application/json")
        .body("{\"spreadsheet_id\": 12")
        .reply(&api)
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_task_and_menu_after_processing() {
    let harness = Harness::new(MockSheetSource::new().with_rows(burger_rows()));
    let worker = harness.start_worker().await;
    let api = routes(api_state(&harness));

    let task = harness
        .menus
        .create_parsing_task("sheet-1", RESTAURANT)
        .await
        .unwrap();
    let task_id = task.task_id.clone();
    assert!(
        wait_for(Duration::from_secs(5), || async {
            harness
                .menus
                .get_task(&task_id)
                .await
                .map(|task| task.status == TaskStatus::Completed)
                .unwrap_or(false)
        })
        .await
    );

    let response = warp::test::request()
        .path(&format!("/api/v1/parse/{task_id}"))
        .reply(&api)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response.body());
    assert_eq!(body["status"], "completed");
    assert_eq!(body["retry_count"], 0);
    let menu_id = body["menu_id"].as_str().unwrap().to_string();

    let response = warp::test::request()
        .path(&format!("/api/v1/menu/{menu_id}"))
        .reply(&api)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let menu = body_json(response.body());
    assert_eq!(menu["_id"], menu_id.as_str());
    assert_eq!(menu["restaurant_id"], RESTAURANT);
    assert_eq!(menu["products"][0]["ext_id"], BURGER_EXT_ID);

    worker.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_unknown_ids_are_404() {
    let harness = Harness::new(MockSheetSource::new());
    let api = routes(api_state(&harness));

    for path in ["/api/v1/parse/missing", "/api/v1/menu/missing", "/api/v1/nowhere"] {
        let response = warp::test::request().path(path).reply(&api).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{path}");
    }
}

#[tokio::test]
async fn test_status_update_is_accepted_and_published() {
    let harness = Harness::new(MockSheetSource::new());
    harness.seed_menu().await;
    let api = routes(api_state(&harness));

    let response = warp::test::request()
        .method("PATCH")
        .path(&format!(
            "/api/v1/restaurants/{}/products/{BURGER_EXT_ID}/status",
            "Burger%20House"
        ))
        .header("x-user-id", "manager-7")
        .json(&json!({"status": "not_available", "reason": "sold out"}))
        .reply(&api)
        .await;

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let accepted: StatusUpdateResponse = serde_json::from_slice(response.body()).unwrap();
    assert!(accepted.success);

    let mut deliveries = harness.queue.consume(QueueChannel::ProductStatus).await.unwrap();
    let delivery = deliveries.recv().await.unwrap();
    let event: ProductStatusChangeEvent = decode_status_event(&delivery.payload).unwrap();
    assert_eq!(event.product_id, BURGER_EXT_ID);
    assert_eq!(event.old_status, ProductStatus::Available);
    assert_eq!(event.new_status, ProductStatus::NotAvailable);
    assert_eq!(event.user_id, "manager-7");
    assert_eq!(event.reason, "sold out");
}

#[tokio::test]
async fn test_status_update_defaults_user_to_system() {
    let harness = Harness::new(MockSheetSource::new());
    harness.seed_menu().await;
    let api = routes(api_state(&harness));

    let response = warp::test::request()
        .method("PATCH")
        .path(&format!(
            "/api/v1/restaurants/Burger%20House/products/{BURGER_EXT_ID}/status"
        ))
        .json(&json!({"status": "deleted"}))
        .reply(&api)
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let mut deliveries = harness.queue.consume(QueueChannel::ProductStatus).await.unwrap();
    let event = decode_status_event(&deliveries.recv().await.unwrap().payload).unwrap();
    assert_eq!(event.user_id, "system");
}

#[tokio::test]
async fn test_status_update_rejects_unknown_status_and_product() {
    let harness = Harness::new(MockSheetSource::new());
    harness.seed_menu().await;
    let api = routes(api_state(&harness));

    let response = warp::test::request()
        .method("PATCH")
        .path(&format!(
            "/api/v1/restaurants/Burger%20House/products/{BURGER_EXT_ID}/status"
        ))
        .json(&json!({"status": "sold_out"}))
        .reply(&api)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = warp::test::request()
        .method("PATCH")
        .path("/api/v1/restaurants/Burger%20House/products/9999999/status")
        .json(&json!({"status": "deleted"}))
        .reply(&api)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    assert_eq!(harness.queue.pending(QueueChannel::ProductStatus).await, 0);
}

#[tokio::test]
async fn test_health_follows_queue_connection() {
    let harness = Harness::new(MockSheetSource::new());
    let api = routes(api_state(&harness));

    let response = warp::test::request().path("/api/v1/health").reply(&api).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response.body());
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["queue_connected"], true);

    harness.queue.close().await;

    let response = warp::test::request().path("/api/v1/health").reply(&api).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response.body())["status"], "degraded");
}

#[tokio::test]
async fn test_metrics_snapshot_is_served() {
    let harness = Harness::new(MockSheetSource::new());
    let api = routes(api_state(&harness));

    let response = warp::test::request().path("/api/v1/metrics").reply(&api).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_json(response.body()).is_object());
}
