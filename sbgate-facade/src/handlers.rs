//! HTTP handlers for the management and transfer facades

use axum::{
    extract::{rejection::QueryRejection, Path, Query, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Extension, Json, Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use sbgate_broker::{
    OutgoingMessage, QueueOptions, ReceiveSource, RuleOptions, SubscriptionOptions, TopicOptions,
};
use sbgate_core::{parse_timespan, ApiError, ErrorCode, RequestId, REQUEST_ID_HEADER};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::management::ManagementFacade;
use crate::outcome::Outcome;
use crate::transfer::{ReceiveResult, TransferFacade};

const MESSAGE_ID_HEADER: &str = "x-message-id";
const SUBJECT_HEADER: &str = "x-message-subject";
const CORRELATION_ID_HEADER: &str = "x-correlation-id";
const PROPERTY_HEADER_PREFIX: &str = "x-property-";

/// Shared state for every facade route
pub struct FacadeState {
    pub management: ManagementFacade,
    pub transfer: TransferFacade,
}

/// Routes for both facades, with request IDs assigned to every request
pub fn routes() -> Router<Arc<FacadeState>> {
    Router::new()
        // Management
        .route("/queues/create", post(create_queue))
        .route("/topics/create", post(create_topic))
        .route("/subscriptions/create", post(create_subscription))
        .route("/queues", get(list_queues))
        .route("/topics", get(list_topics))
        .route("/queues/{name}", delete(delete_queue))
        .route("/topics/{name}", delete(delete_topic))
        .route(
            "/subscriptions/{topic}/{subscription}",
            delete(delete_subscription),
        )
        // Transfer
        .route("/queues/{name}/send", post(send_to_queue))
        .route("/topics/{name}/send", post(send_to_topic))
        .route("/queues/{name}/receive", get(receive_from_queue))
        .route(
            "/topics/{name}/subscriptions/{subscription}/receive",
            get(receive_from_subscription),
        )
        .layer(middleware::from_fn(assign_request_id))
}

/// Reuse the caller's `x-request-id` or mint one, and echo it back
async fn assign_request_id(mut request: Request, next: Next) -> Response {
    let request_id = RequestId::from_header(
        request
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok()),
    );
    request.extensions_mut().insert(request_id.clone());

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

// === Request parameters ===

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateQueueParams {
    pub name: String,
    pub lock_duration: Option<String>,
    pub max_delivery_count: Option<u32>,
    #[serde(rename = "maxQueueSizeMB")]
    pub max_queue_size_mb: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTopicParams {
    pub name: String,
    #[serde(rename = "maxTopicSizeMB")]
    pub max_topic_size_mb: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubscriptionParams {
    pub topic_name: String,
    pub subscription_name: String,
    pub rule_name: Option<String>,
    pub filter: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendParams {
    pub schedule_at: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveParams {
    pub message_count: Option<usize>,
}

/// Receive result as rendered to callers
#[derive(Debug, Serialize)]
struct ReceivedPayload {
    success: bool,
    payload: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    encoding: Option<&'static str>,
}

impl From<ReceiveResult> for ReceivedPayload {
    fn from(result: ReceiveResult) -> Self {
        let Some(payload) = result.payload else {
            return Self {
                success: result.success,
                payload: None,
                encoding: None,
            };
        };
        match String::from_utf8(payload.to_vec()) {
            Ok(text) => Self {
                success: result.success,
                payload: Some(text),
                encoding: Some("utf8"),
            },
            Err(_) => Self {
                success: result.success,
                payload: Some(BASE64.encode(&payload)),
                encoding: Some("base64"),
            },
        }
    }
}

// === Response helpers ===

fn error_response(error: ApiError) -> Response {
    let status =
        StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        error.to_json(),
    )
        .into_response()
}

fn ok_response() -> Response {
    (StatusCode::OK, "OK").into_response()
}

fn required(value: &str, field: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        Err(ApiError::invalid_parameter(format!("{} is required", field)))
    } else {
        Ok(())
    }
}

fn query_error(rejection: &QueryRejection, request_id: &RequestId) -> Response {
    error_response(
        ApiError::invalid_parameter(rejection.body_text()).with_request_id(request_id.as_str()),
    )
}

/// Map a facade outcome onto an HTTP response; `entity` names the target in messages
fn outcome_response(outcome: Outcome, entity: &str, request_id: &RequestId) -> Response {
    let error = match outcome {
        Outcome::Success => return ok_response(),
        Outcome::AlreadyExists => {
            ApiError::new(ErrorCode::EntityAlreadyExists, format!("{} already exists", entity))
        }
        Outcome::NotFound => {
            ApiError::new(ErrorCode::EntityNotFound, format!("{} does not exist", entity))
        }
        Outcome::ParentMissing => ApiError::new(
            ErrorCode::ParentNotFound,
            format!("Parent topic of {} does not exist", entity),
        ),
        Outcome::RuleRejected(reason) => ApiError::new(
            ErrorCode::RuleRejected,
            format!("Rule for {} was rejected: {}", entity, reason),
        ),
        Outcome::TransportError(reason) => ApiError::new(ErrorCode::BrokerUnavailable, reason),
    };
    error_response(error.with_request_id(request_id.as_str()))
}

// === Management handlers ===

async fn create_queue(
    State(state): State<Arc<FacadeState>>,
    Extension(request_id): Extension<RequestId>,
    params: Result<Query<CreateQueueParams>, QueryRejection>,
) -> Response {
    let Query(params) = match params {
        Ok(params) => params,
        Err(rejection) => return query_error(&rejection, &request_id),
    };
    if let Err(e) = required(&params.name, "name") {
        return error_response(e.with_request_id(request_id.as_str()));
    }

    let mut options = QueueOptions::new(params.name.trim());
    if let Some(lock_duration) = params.lock_duration.as_deref() {
        match parse_timespan(lock_duration) {
            Ok(duration) => options.lock_duration = duration,
            Err(e) => {
                return error_response(
                    ApiError::invalid_parameter(format!("lockDuration: {}", e))
                        .with_request_id(request_id.as_str()),
                )
            }
        }
    }
    if let Some(count) = params.max_delivery_count {
        options.max_delivery_count = count;
    }
    if let Some(size) = params.max_queue_size_mb {
        options.max_size_mb = size;
    }

    info!(queue = %options.name, request_id = %request_id, "CreateQueue");
    let outcome = state.management.create_queue(&options).await;
    outcome_response(outcome, &format!("Queue '{}'", options.name), &request_id)
}

async fn create_topic(
    State(state): State<Arc<FacadeState>>,
    Extension(request_id): Extension<RequestId>,
    params: Result<Query<CreateTopicParams>, QueryRejection>,
) -> Response {
    let Query(params) = match params {
        Ok(params) => params,
        Err(rejection) => return query_error(&rejection, &request_id),
    };
    if let Err(e) = required(&params.name, "name") {
        return error_response(e.with_request_id(request_id.as_str()));
    }

    let mut options = TopicOptions::new(params.name.trim());
    if let Some(size) = params.max_topic_size_mb {
        options.max_size_mb = size;
    }

    info!(topic = %options.name, request_id = %request_id, "CreateTopic");
    let outcome = state.management.create_topic(&options).await;
    outcome_response(outcome, &format!("Topic '{}'", options.name), &request_id)
}

async fn create_subscription(
    State(state): State<Arc<FacadeState>>,
    Extension(request_id): Extension<RequestId>,
    params: Result<Query<CreateSubscriptionParams>, QueryRejection>,
) -> Response {
    let Query(params) = match params {
        Ok(params) => params,
        Err(rejection) => return query_error(&rejection, &request_id),
    };
    if let Err(e) = required(&params.topic_name, "topicName")
        .and_then(|()| required(&params.subscription_name, "subscriptionName"))
    {
        return error_response(e.with_request_id(request_id.as_str()));
    }

    let options = SubscriptionOptions::new(
        params.topic_name.trim(),
        params.subscription_name.trim(),
    );
    // A rule is only attached when both parts are present
    let rule = match (params.rule_name.as_deref(), params.filter.as_deref()) {
        (Some(name), Some(filter)) if !name.trim().is_empty() && !filter.trim().is_empty() => {
            Some(RuleOptions::new(name.trim(), filter.trim()))
        }
        _ => None,
    };

    info!(
        topic = %options.topic,
        subscription = %options.name,
        rule = ?rule.as_ref().map(|r| &r.name),
        request_id = %request_id,
        "CreateSubscription"
    );
    let outcome = state
        .management
        .create_subscription(&options, rule.as_ref())
        .await;
    outcome_response(
        outcome,
        &format!("Subscription '{}/{}'", options.topic, options.name),
        &request_id,
    )
}

async fn delete_queue(
    State(state): State<Arc<FacadeState>>,
    Extension(request_id): Extension<RequestId>,
    Path(name): Path<String>,
) -> Response {
    info!(queue = %name, request_id = %request_id, "DeleteQueue");
    let outcome = state.management.delete_queue(&name).await;
    if outcome.is_success() {
        state.transfer.evict_queue(&name).await;
    }
    outcome_response(outcome, &format!("Queue '{}'", name), &request_id)
}

async fn delete_topic(
    State(state): State<Arc<FacadeState>>,
    Extension(request_id): Extension<RequestId>,
    Path(name): Path<String>,
) -> Response {
    info!(topic = %name, request_id = %request_id, "DeleteTopic");
    let outcome = state.management.delete_topic(&name).await;
    if outcome.is_success() {
        state.transfer.evict_topic(&name).await;
    }
    outcome_response(outcome, &format!("Topic '{}'", name), &request_id)
}

async fn delete_subscription(
    State(state): State<Arc<FacadeState>>,
    Extension(request_id): Extension<RequestId>,
    Path((topic, subscription)): Path<(String, String)>,
) -> Response {
    info!(topic = %topic, subscription = %subscription, request_id = %request_id, "DeleteSubscription");
    let outcome = state
        .management
        .delete_subscription(&topic, &subscription)
        .await;
    if outcome.is_success() {
        state
            .transfer
            .evict_receiver(&ReceiveSource::subscription(topic.as_str(), subscription.as_str()))
            .await;
    }
    outcome_response(
        outcome,
        &format!("Subscription '{}/{}'", topic, subscription),
        &request_id,
    )
}

async fn list_queues(
    State(state): State<Arc<FacadeState>>,
    Extension(request_id): Extension<RequestId>,
) -> Response {
    match state.management.list_queue_names().await {
        Ok(names) => Json(names).into_response(),
        Err(e) => error_response(
            ApiError::new(ErrorCode::BrokerUnavailable, e.to_string())
                .with_request_id(request_id.as_str()),
        ),
    }
}

async fn list_topics(
    State(state): State<Arc<FacadeState>>,
    Extension(request_id): Extension<RequestId>,
) -> Response {
    match state.management.list_topic_names().await {
        Ok(names) => Json(names).into_response(),
        Err(e) => error_response(
            ApiError::new(ErrorCode::BrokerUnavailable, e.to_string())
                .with_request_id(request_id.as_str()),
        ),
    }
}

// === Transfer handlers ===

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Build the outgoing message from the request body and metadata headers
fn build_message(headers: &HeaderMap, body: Bytes) -> OutgoingMessage {
    let content_type = header_str(headers, header::CONTENT_TYPE.as_str()).map(str::to_string);

    // A JSON string body carries plain text
    let is_json = content_type
        .as_deref()
        .is_some_and(|ct| ct.starts_with("application/json"));
    let body = if is_json {
        match serde_json::from_slice::<serde_json::Value>(&body) {
            Ok(serde_json::Value::String(text)) => Bytes::from(text),
            _ => body,
        }
    } else {
        body
    };

    let mut message = OutgoingMessage::new(body);
    message.content_type = content_type;
    message.message_id = header_str(headers, MESSAGE_ID_HEADER).map(str::to_string);
    message.subject = header_str(headers, SUBJECT_HEADER).map(str::to_string);
    message.correlation_id = header_str(headers, CORRELATION_ID_HEADER).map(str::to_string);

    for (name, value) in headers {
        let Some(property) = name.as_str().strip_prefix(PROPERTY_HEADER_PREFIX) else {
            continue;
        };
        if let (false, Ok(value)) = (property.is_empty(), value.to_str()) {
            message.properties.insert(property.to_string(), value.to_string());
        }
    }
    message
}

fn parse_schedule(value: Option<&str>) -> Result<Option<DateTime<Utc>>, ApiError> {
    value
        .map(|v| {
            DateTime::parse_from_rfc3339(v.trim())
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| ApiError::invalid_parameter(format!("scheduleAt: {}", e)))
        })
        .transpose()
}

async fn send(
    state: &FacadeState,
    request_id: &RequestId,
    target: &str,
    entity: &str,
    params: Result<Query<SendParams>, QueryRejection>,
    headers: &HeaderMap,
    body: Bytes,
) -> Response {
    let Query(params) = match params {
        Ok(params) => params,
        Err(rejection) => return query_error(&rejection, request_id),
    };
    let schedule_at = match parse_schedule(params.schedule_at.as_deref()) {
        Ok(at) => at,
        Err(e) => return error_response(e.with_request_id(request_id.as_str())),
    };

    let message = build_message(headers, body);
    debug!(
        target = %target,
        bytes = message.body.len(),
        schedule_at = ?schedule_at,
        request_id = %request_id,
        "SendMessage"
    );
    let outcome = state
        .transfer
        .send_message(target, &message, schedule_at)
        .await;
    outcome_response(outcome, entity, request_id)
}

async fn send_to_queue(
    State(state): State<Arc<FacadeState>>,
    Extension(request_id): Extension<RequestId>,
    Path(name): Path<String>,
    params: Result<Query<SendParams>, QueryRejection>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let entity = format!("Queue '{}'", name);
    send(&state, &request_id, &name, &entity, params, &headers, body).await
}

async fn send_to_topic(
    State(state): State<Arc<FacadeState>>,
    Extension(request_id): Extension<RequestId>,
    Path(name): Path<String>,
    params: Result<Query<SendParams>, QueryRejection>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let entity = format!("Topic '{}'", name);
    send(&state, &request_id, &name, &entity, params, &headers, body).await
}

async fn receive(
    state: &FacadeState,
    request_id: &RequestId,
    source: ReceiveSource,
    params: Result<Query<ReceiveParams>, QueryRejection>,
) -> Response {
    let Query(params) = match params {
        Ok(params) => params,
        Err(rejection) => return query_error(&rejection, request_id),
    };
    let count = params.message_count.unwrap_or(1);
    if count < 1 {
        return error_response(
            ApiError::invalid_parameter("messageCount must be at least 1")
                .with_request_id(request_id.as_str()),
        );
    }

    debug!(source = %source, count, request_id = %request_id, "ReceiveMessages");
    match state.transfer.receive_messages(&source, count).await {
        Ok(results) => {
            let body: Vec<ReceivedPayload> = results.into_iter().map(Into::into).collect();
            Json(body).into_response()
        }
        Err(e) => {
            let code = if e.is_not_found() {
                ErrorCode::EntityNotFound
            } else {
                ErrorCode::BrokerUnavailable
            };
            error_response(
                ApiError::new(code, format!("{}: {}", source, e))
                    .with_request_id(request_id.as_str()),
            )
        }
    }
}

async fn receive_from_queue(
    State(state): State<Arc<FacadeState>>,
    Extension(request_id): Extension<RequestId>,
    Path(name): Path<String>,
    params: Result<Query<ReceiveParams>, QueryRejection>,
) -> Response {
    receive(&state, &request_id, ReceiveSource::queue(name), params).await
}

async fn receive_from_subscription(
    State(state): State<Arc<FacadeState>>,
    Extension(request_id): Extension<RequestId>,
    Path((name, subscription)): Path<(String, String)>,
    params: Result<Query<ReceiveParams>, QueryRejection>,
) -> Response {
    receive(
        &state,
        &request_id,
        ReceiveSource::subscription(name, subscription),
        params,
    )
    .await
}
