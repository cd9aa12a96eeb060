// libs/doctor-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Weekday;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::{Principal, Role};
use shared_models::error::AppError;
use shared_utils::extractor::AuthPrincipal;

use crate::models::{AvailabilityError, EditDayRequest, SetProtocolRequest};
use crate::services::availability::AvailabilityService;

pub struct DoctorCellState {
    pub config: Arc<AppConfig>,
    pub availability: AvailabilityService,
}

pub fn map_availability_error(e: AvailabilityError) -> AppError {
    match e {
        AvailabilityError::Validation { .. } | AvailabilityError::InvalidTime(_) => {
            AppError::ValidationError(e.to_string())
        }
        AvailabilityError::Store(db) => AppError::Database(db.to_string()),
    }
}

fn ensure_can_manage(principal: &Principal, doctor_id: Uuid) -> Result<(), AppError> {
    let is_owner = principal.has_role(Role::Doctor) && principal.user_id == doctor_id;
    if !is_owner && !principal.is_admin() {
        return Err(AppError::Forbidden(
            "Only the doctor or an admin can change this availability".to_string(),
        ));
    }
    Ok(())
}

// ==============================================================================
// PUBLIC HANDLERS (NO AUTHENTICATION REQUIRED)
// ==============================================================================

#[axum::debug_handler]
pub async fn get_protocol(
    State(state): State<Arc<DoctorCellState>>,
    Path(doctor_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let protocol = state
        .availability
        .get_protocol(doctor_id)
        .await
        .map_err(map_availability_error)?;

    Ok(Json(json!(protocol)))
}

// ==============================================================================
// PROTECTED HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn set_protocol(
    State(state): State<Arc<DoctorCellState>>,
    Path(doctor_id): Path<Uuid>,
    AuthPrincipal(principal): AuthPrincipal,
    Json(request): Json<SetProtocolRequest>,
) -> Result<Json<Value>, AppError> {
    ensure_can_manage(&principal, doctor_id)?;

    let protocol = state
        .availability
        .set_protocol(doctor_id, request.week)
        .await
        .map_err(map_availability_error)?;

    Ok(Json(json!({
        "success": true,
        "protocol": protocol,
        "message": "Availability protocol saved"
    })))
}

#[axum::debug_handler]
pub async fn edit_day(
    State(state): State<Arc<DoctorCellState>>,
    Path((doctor_id, weekday)): Path<(Uuid, String)>,
    AuthPrincipal(principal): AuthPrincipal,
    Json(request): Json<EditDayRequest>,
) -> Result<Json<Value>, AppError> {
    ensure_can_manage(&principal, doctor_id)?;

    let day = weekday
        .parse::<Weekday>()
        .map_err(|_| AppError::ValidationError(format!("'{}' is not a weekday", weekday)))?;

    let protocol = state
        .availability
        .edit_day(doctor_id, day, request)
        .await
        .map_err(map_availability_error)?;

    Ok(Json(json!({
        "success": true,
        "protocol": protocol
    })))
}
