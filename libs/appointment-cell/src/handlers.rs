// libs/appointment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use doctor_cell::handlers::map_availability_error;
use shared_config::AppConfig;
use shared_models::auth::Role;
use shared_models::error::AppError;
use shared_utils::extractor::AuthPrincipal;

use crate::models::{
    AppointmentError, AppointmentSearchQuery, AvailableSlotsQuery, BookAppointmentRequest,
    RateAppointmentRequest,
};
use crate::services::booking::AppointmentBookingService;

pub struct AppointmentCellState {
    pub config: Arc<AppConfig>,
    pub bookings: AppointmentBookingService,
}

pub fn map_appointment_error(e: AppointmentError) -> AppError {
    match e {
        AppointmentError::NotFound => AppError::NotFound("Appointment not found".to_string()),
        AppointmentError::ValidationError(msg) => AppError::ValidationError(msg),
        AppointmentError::InvalidTransition { .. }
        | AppointmentError::SlotConflict { .. }
        | AppointmentError::AlreadyRated
        | AppointmentError::ConcurrentUpdate => AppError::Conflict(e.to_string()),
        AppointmentError::Unauthorized(msg) => AppError::Forbidden(msg),
        AppointmentError::Availability(inner) => map_availability_error(inner),
        AppointmentError::DatabaseError(db) => AppError::Database(db.to_string()),
    }
}

// ==============================================================================
// PUBLIC HANDLERS (NO AUTHENTICATION REQUIRED)
// ==============================================================================

#[axum::debug_handler]
pub async fn get_available_slots(
    State(state): State<Arc<AppointmentCellState>>,
    Path(doctor_id): Path<Uuid>,
    Query(query): Query<AvailableSlotsQuery>,
) -> Result<Json<Value>, AppError> {
    let view = state
        .bookings
        .available_slots(
            doctor_id,
            query.date,
            state.config.clinic_now(),
            query.available_only.unwrap_or(false),
        )
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!(view)))
}

// ==============================================================================
// PROTECTED HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn book_appointment(
    State(state): State<Arc<AppointmentCellState>>,
    AuthPrincipal(principal): AuthPrincipal,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    if principal.has_role(Role::Laborant) {
        return Err(AppError::Forbidden("Laborants cannot book appointments".to_string()));
    }

    let appointment = state
        .bookings
        .book(&principal, request, state.config.clinic_now())
        .await
        .map_err(map_appointment_error)?;

    Ok((StatusCode::CREATED, Json(json!(appointment))))
}

#[axum::debug_handler]
pub async fn search_appointments(
    State(state): State<Arc<AppointmentCellState>>,
    AuthPrincipal(principal): AuthPrincipal,
    Query(query): Query<AppointmentSearchQuery>,
) -> Result<Json<Value>, AppError> {
    let appointments = state
        .bookings
        .search(&principal, query)
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({
        "appointments": appointments,
        "total": appointments.len()
    })))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<Arc<AppointmentCellState>>,
    Path(appointment_id): Path<Uuid>,
    AuthPrincipal(principal): AuthPrincipal,
) -> Result<Json<Value>, AppError> {
    let appointment = state
        .bookings
        .get(&principal, appointment_id)
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn mark_appointment_done(
    State(state): State<Arc<AppointmentCellState>>,
    Path(appointment_id): Path<Uuid>,
    AuthPrincipal(principal): AuthPrincipal,
) -> Result<Json<Value>, AppError> {
    if !(principal.has_role(Role::Doctor) || principal.is_admin()) {
        return Err(AppError::Forbidden("Only doctors can complete appointments".to_string()));
    }

    let appointment = state
        .bookings
        .mark_done(&principal, appointment_id)
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<Arc<AppointmentCellState>>,
    Path(appointment_id): Path<Uuid>,
    AuthPrincipal(principal): AuthPrincipal,
) -> Result<Json<Value>, AppError> {
    let appointment = state
        .bookings
        .cancel(&principal, appointment_id)
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn rate_appointment(
    State(state): State<Arc<AppointmentCellState>>,
    Path(appointment_id): Path<Uuid>,
    AuthPrincipal(principal): AuthPrincipal,
    Json(request): Json<RateAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    if !principal.has_role(Role::Patient) {
        return Err(AppError::Forbidden("Only patients can rate appointments".to_string()));
    }

    let appointment = state
        .bookings
        .rate(&principal, appointment_id, request.score)
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!(appointment)))
}
