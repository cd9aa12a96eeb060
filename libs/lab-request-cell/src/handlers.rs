// libs/lab-request-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::Role;
use shared_models::error::AppError;
use shared_utils::extractor::AuthPrincipal;

use crate::models::{AssignLabRequest, CompleteLabRequest, CreateLabRequest, LabRequestError, LabRequestQuery};
use crate::services::assignment::LabRequestService;

pub struct LabRequestCellState {
    pub config: Arc<AppConfig>,
    pub lab_requests: LabRequestService,
}

pub fn map_lab_request_error(e: LabRequestError) -> AppError {
    match e {
        LabRequestError::NotFound => AppError::NotFound("Lab request not found".to_string()),
        LabRequestError::ValidationError(msg) => AppError::ValidationError(msg),
        LabRequestError::InvalidTransition { .. }
        | LabRequestError::AlreadyClaimed { .. }
        | LabRequestError::ConcurrentUpdate => AppError::Conflict(e.to_string()),
        LabRequestError::NotAssignee => AppError::Forbidden(e.to_string()),
        LabRequestError::Unauthorized(msg) => AppError::Forbidden(msg),
        LabRequestError::DatabaseError(db) => AppError::Database(db.to_string()),
    }
}

#[axum::debug_handler]
pub async fn create_lab_request(
    State(state): State<Arc<LabRequestCellState>>,
    AuthPrincipal(principal): AuthPrincipal,
    Json(request): Json<CreateLabRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let lab_request = state
        .lab_requests
        .create(&principal, request)
        .await
        .map_err(map_lab_request_error)?;

    Ok((StatusCode::CREATED, Json(json!(lab_request))))
}

#[axum::debug_handler]
pub async fn list_lab_requests(
    State(state): State<Arc<LabRequestCellState>>,
    AuthPrincipal(principal): AuthPrincipal,
    Query(query): Query<LabRequestQuery>,
) -> Result<Json<Value>, AppError> {
    let lab_requests = state
        .lab_requests
        .list(&principal, query)
        .await
        .map_err(map_lab_request_error)?;

    Ok(Json(json!({
        "lab_requests": lab_requests,
        "total": lab_requests.len()
    })))
}

#[axum::debug_handler]
pub async fn get_lab_request(
    State(state): State<Arc<LabRequestCellState>>,
    Path(request_id): Path<Uuid>,
    AuthPrincipal(principal): AuthPrincipal,
) -> Result<Json<Value>, AppError> {
    let lab_request = state
        .lab_requests
        .get(&principal, request_id)
        .await
        .map_err(map_lab_request_error)?;

    Ok(Json(json!(lab_request)))
}

#[axum::debug_handler]
pub async fn claim_lab_request(
    State(state): State<Arc<LabRequestCellState>>,
    Path(request_id): Path<Uuid>,
    AuthPrincipal(principal): AuthPrincipal,
) -> Result<Json<Value>, AppError> {
    let lab_request = state
        .lab_requests
        .claim(&principal, request_id)
        .await
        .map_err(map_lab_request_error)?;

    Ok(Json(json!(lab_request)))
}

#[axum::debug_handler]
pub async fn assign_lab_request(
    State(state): State<Arc<LabRequestCellState>>,
    Path(request_id): Path<Uuid>,
    AuthPrincipal(principal): AuthPrincipal,
    Json(request): Json<AssignLabRequest>,
) -> Result<Json<Value>, AppError> {
    if !(principal.has_role(Role::Doctor) || principal.is_admin()) {
        return Err(AppError::Forbidden("Only doctors can assign lab requests".to_string()));
    }

    let lab_request = state
        .lab_requests
        .assign(&principal, request_id, request.laborant_id)
        .await
        .map_err(map_lab_request_error)?;

    Ok(Json(json!(lab_request)))
}

#[axum::debug_handler]
pub async fn complete_lab_request(
    State(state): State<Arc<LabRequestCellState>>,
    Path(request_id): Path<Uuid>,
    AuthPrincipal(principal): AuthPrincipal,
    Json(request): Json<CompleteLabRequest>,
) -> Result<Json<Value>, AppError> {
    if !principal.has_role(Role::Laborant) {
        return Err(AppError::Forbidden("Only laborants can complete lab requests".to_string()));
    }

    let lab_request = state
        .lab_requests
        .complete(&principal, request_id, request.medical_file_id)
        .await
        .map_err(map_lab_request_error)?;

    Ok(Json(json!(lab_request)))
}

#[axum::debug_handler]
pub async fn cancel_lab_request(
    State(state): State<Arc<LabRequestCellState>>,
    Path(request_id): Path<Uuid>,
    AuthPrincipal(principal): AuthPrincipal,
) -> Result<Json<Value>, AppError> {
    let lab_request = state
        .lab_requests
        .cancel(&principal, request_id)
        .await
        .map_err(map_lab_request_error)?;

    Ok(Json(json!(lab_request)))
}
