use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, patch, put},
    Router,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers::{self, DoctorCellState};

pub fn doctor_routes(state: Arc<DoctorCellState>) -> Router {
    // Anyone may look at opening hours
    let public_routes = Router::new()
        .route("/{doctor_id}/availability", get(handlers::get_protocol));

    let protected_routes = Router::new()
        .route("/{doctor_id}/availability", put(handlers::set_protocol))
        .route("/{doctor_id}/availability/{weekday}", patch(handlers::edit_day))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
