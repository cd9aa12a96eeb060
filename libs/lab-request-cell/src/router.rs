// libs/lab-request-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers::{self, LabRequestCellState};

pub fn lab_request_routes(state: Arc<LabRequestCellState>) -> Router {
    // Every lab request route needs a caller
    Router::new()
        .route("/", post(handlers::create_lab_request).get(handlers::list_lab_requests))
        .route("/{request_id}", get(handlers::get_lab_request))
        .route("/{request_id}/claim", post(handlers::claim_lab_request))
        .route("/{request_id}/assign", post(handlers::assign_lab_request))
        .route("/{request_id}/complete", post(handlers::complete_lab_request))
        .route("/{request_id}/cancel", post(handlers::cancel_lab_request))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware))
        .with_state(state)
}
