//! HTTP router for sbgate

use axum::{
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use sbgate_broker::BrokerClients;
use sbgate_facade::{FacadeState, ManagementFacade, TransferFacade};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::Config;

/// Build both facades on top of the shared broker clients
pub fn build_state(clients: &BrokerClients, config: &Config) -> Arc<FacadeState> {
    let retry = config.retry_policy();
    Arc::new(FacadeState {
        management: ManagementFacade::new(
            clients.admin.clone(),
            retry.clone(),
            config.broker.list_page_size,
        ),
        transfer: TransferFacade::new(clients.messaging.clone(), retry, config.receive_wait()),
    })
}

/// Create the main application router
pub fn create_router(state: Arc<FacadeState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .merge(sbgate_facade::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        r#"{"status":"running"}"#,
    )
}
