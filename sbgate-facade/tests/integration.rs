//! Facade integration tests
//!
//! Drive the HTTP routes with the in-memory broker behind them.

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    response::Response,
    Router,
};
use sbgate_broker::memory::MemoryBroker;
use sbgate_facade::{routes, FacadeState, ManagementFacade, RetryPolicy, TransferFacade};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

/// Create a test router backed by a fresh in-memory broker
fn create_test_router() -> Router {
    let broker = MemoryBroker::new();
    let state = Arc::new(FacadeState {
        management: ManagementFacade::new(Arc::new(broker.clone()), RetryPolicy::none(), 100),
        transfer: TransferFacade::new(
            Arc::new(broker),
            RetryPolicy::none(),
            Duration::from_millis(50),
        ),
    });
    routes().with_state(state)
}

async fn call(app: &Router, method: Method, uri: &str, body: &str) -> Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn json(response: Response) -> serde_json::Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_create_queue_twice() {
    let app = create_test_router();

    let response = call(
        &app,
        Method::POST,
        "/queues/create?name=orders&lockDuration=00:00:30&maxDeliveryCount=5&maxQueueSizeMB=1024",
        "",
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = call(&app, Method::POST, "/queues/create?name=orders", "").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error = json(response).await;
    assert_eq!(error["code"], "EntityAlreadyExists");
    assert!(error["requestId"].is_string());
}

#[tokio::test]
async fn test_create_queue_validation() {
    let app = create_test_router();

    let response = call(&app, Method::POST, "/queues/create", "").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json(response).await["code"], "InvalidParameter");

    let response = call(
        &app,
        Method::POST,
        "/queues/create?name=orders&lockDuration=soon",
        "",
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = call(
        &app,
        Method::POST,
        "/queues/create?name=orders&maxDeliveryCount=many",
        "",
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_delete_topic() {
    let app = create_test_router();

    let response = call(&app, Method::DELETE, "/topics/events", "").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    call(&app, Method::POST, "/topics/create?name=events&maxTopicSizeMB=1024", "").await;
    let response = call(&app, Method::DELETE, "/topics/events", "").await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = call(&app, Method::GET, "/topics", "").await;
    assert_eq!(json(response).await, serde_json::json!([]));
}

#[tokio::test]
async fn test_subscription_needs_topic() {
    let app = create_test_router();

    let uri = "/subscriptions/create?topicName=events&subscriptionName=audit";
    let response = call(&app, Method::POST, uri, "").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json(response).await["code"], "ParentNotFound");

    call(&app, Method::POST, "/topics/create?name=events", "").await;
    assert_eq!(call(&app, Method::POST, uri, "").await.status(), StatusCode::OK);
    assert_eq!(
        call(&app, Method::POST, uri, "").await.status(),
        StatusCode::BAD_REQUEST
    );

    let response = call(&app, Method::DELETE, "/subscriptions/events/audit", "").await;
    assert_eq!(response.status(), StatusCode::OK);
    let response = call(&app, Method::DELETE, "/subscriptions/events/audit", "").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_rejected_rule_removes_subscription() {
    let app = create_test_router();
    call(&app, Method::POST, "/topics/create?name=events", "").await;

    let response = call(
        &app,
        Method::POST,
        "/subscriptions/create?topicName=events&subscriptionName=eu&ruleName=eu&filter=region%20%3D",
        "",
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json(response).await["code"], "RuleRejected");

    // Gone, so deleting it is a 404
    let response = call(&app, Method::DELETE, "/subscriptions/events/eu", "").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_deeply_nested_filter_is_rejected() {
    let app = create_test_router();
    call(&app, Method::POST, "/topics/create?name=events", "").await;

    let filter = format!("{}1%3D1{}", "%28".repeat(200), "%29".repeat(200));
    let uri = format!(
        "/subscriptions/create?topicName=events&subscriptionName=deep&ruleName=deep&filter={}",
        filter
    );
    let response = call(&app, Method::POST, &uri, "").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json(response).await["code"], "RuleRejected");

    let response = call(&app, Method::DELETE, "/subscriptions/events/deep", "").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_oversized_lock_duration_is_rejected() {
    let app = create_test_router();

    let response = call(
        &app,
        Method::POST,
        "/queues/create?name=orders&lockDuration=999999999999999999.00:00:00",
        "",
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = call(&app, Method::GET, "/queues", "").await;
    assert_eq!(json(response).await, serde_json::json!([]));
}

#[tokio::test]
async fn test_send_and_receive_in_order() {
    let app = create_test_router();
    call(&app, Method::POST, "/queues/create?name=orders", "").await;

    for body in ["first", "second", "third"] {
        let response = call(&app, Method::POST, "/queues/orders/send", body).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = call(&app, Method::GET, "/queues/orders/receive?messageCount=3", "").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json(response).await,
        serde_json::json!([
            {"success": true, "payload": "first", "encoding": "utf8"},
            {"success": true, "payload": "second", "encoding": "utf8"},
            {"success": true, "payload": "third", "encoding": "utf8"},
        ])
    );
}

#[tokio::test]
async fn test_receive_more_than_available() {
    let app = create_test_router();
    call(&app, Method::POST, "/queues/create?name=orders", "").await;
    call(&app, Method::POST, "/queues/orders/send", "only").await;

    let response = call(&app, Method::GET, "/queues/orders/receive?messageCount=10", "").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json(response).await.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_receive_validation_and_missing_entity() {
    let app = create_test_router();
    call(&app, Method::POST, "/queues/create?name=orders", "").await;

    let response = call(&app, Method::GET, "/queues/orders/receive?messageCount=0", "").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = call(&app, Method::GET, "/queues/ghost/receive?messageCount=1", "").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = call(&app, Method::POST, "/queues/ghost/send", "boo").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_scheduled_send() {
    let app = create_test_router();
    call(&app, Method::POST, "/queues/create?name=orders", "").await;

    let response = call(
        &app,
        Method::POST,
        "/queues/orders/send?scheduleAt=2999-01-01T00:00:00Z",
        "later",
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = call(&app, Method::GET, "/queues/orders/receive?messageCount=1", "").await;
    assert_eq!(json(response).await, serde_json::json!([]));

    let response = call(
        &app,
        Method::POST,
        "/queues/orders/send?scheduleAt=next-week",
        "bad",
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_topic_fan_out_with_metadata() {
    let app = create_test_router();
    call(&app, Method::POST, "/topics/create?name=events", "").await;
    call(
        &app,
        Method::POST,
        "/subscriptions/create?topicName=events&subscriptionName=audit",
        "",
    )
    .await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/topics/events/send")
                .header("content-type", "application/json")
                .header("x-message-subject", "order.created")
                .header("x-property-region", "eu")
                .body(Body::from(r#""hello""#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = call(
        &app,
        Method::GET,
        "/topics/events/subscriptions/audit/receive?messageCount=5",
        "",
    )
    .await;
    assert_eq!(
        json(response).await,
        serde_json::json!([{"success": true, "payload": "hello", "encoding": "utf8"}])
    );
}

#[tokio::test]
async fn test_list_queues() {
    let app = create_test_router();
    for name in ["gamma", "alpha", "beta"] {
        call(&app, Method::POST, &format!("/queues/create?name={}", name), "").await;
    }

    let response = call(&app, Method::GET, "/queues", "").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json(response).await,
        serde_json::json!(["alpha", "beta", "gamma"])
    );
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let app = create_test_router();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/queues")
                .header("x-request-id", "trace-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.headers()["x-request-id"], "trace-123");

    let response = call(&app, Method::GET, "/topics", "").await;
    assert!(!response.headers()["x-request-id"].is_empty());
}
