// libs/appointment-cell/src/models.rs
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use doctor_cell::models::{AvailabilityError, Slot, SlotTime};
use shared_database::DatabaseError;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub patient_id: Uuid,
    pub date: NaiveDate,
    pub time: SlotTime,
    pub status: AppointmentStatus,
    pub rating: Option<Rating>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    /// Non-cancelled appointments hold their slot.
    pub fn holds_slot(&self) -> bool {
        self.status != AppointmentStatus::Cancelled
    }

    pub fn occupies(&self, doctor_id: Uuid, date: NaiveDate, time: SlotTime) -> bool {
        self.holds_slot() && self.doctor_id == doctor_id && self.date == date && self.time == time
    }

    pub fn snapshot(&self) -> AppointmentSnapshot {
        AppointmentSnapshot {
            id: self.id,
            status: self.status,
            rating: self.rating,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Approved,
    Done,
    Cancelled,
}

impl AppointmentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AppointmentStatus::Done | AppointmentStatus::Cancelled)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Approved => write!(f, "approved"),
            AppointmentStatus::Done => write!(f, "done"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Status-changing events. Rating is handled separately since it leaves the
/// status untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppointmentEvent {
    MarkDone,
    Cancel,
}

impl fmt::Display for AppointmentEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentEvent::MarkDone => write!(f, "mark as done"),
            AppointmentEvent::Cancel => write!(f, "cancel"),
        }
    }
}

/// Patient score for a completed visit, 1 to 5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Rating(u8);

impl Rating {
    pub const MIN: i64 = 1;
    pub const MAX: i64 = 5;

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for Rating {
    type Error = String;

    fn try_from(score: i64) -> Result<Self, Self::Error> {
        if (Self::MIN..=Self::MAX).contains(&score) {
            Ok(Rating(score as u8))
        } else {
            Err(format!("rating must be between {} and {}, got {}", Self::MIN, Self::MAX, score))
        }
    }
}

impl From<Rating> for i64 {
    fn from(rating: Rating) -> Self {
        i64::from(rating.0)
    }
}

/// The fields a conditional write compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppointmentSnapshot {
    pub id: Uuid,
    pub status: AppointmentStatus,
    pub rating: Option<Rating>,
}

/// The fields a conditional write sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppointmentUpdate {
    pub status: AppointmentStatus,
    pub rating: Option<Rating>,
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    pub doctor_id: Uuid,
    pub patient_id: Uuid,
    pub date: NaiveDate,
    pub time: SlotTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateAppointmentRequest {
    pub score: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppointmentSearchQuery {
    pub doctor_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub date: Option<NaiveDate>,
    pub status: Option<AppointmentStatus>,
}

impl AppointmentSearchQuery {
    pub fn matches(&self, appointment: &Appointment) -> bool {
        self.doctor_id.map_or(true, |id| appointment.doctor_id == id)
            && self.patient_id.map_or(true, |id| appointment.patient_id == id)
            && self.date.map_or(true, |date| appointment.date == date)
            && self.status.map_or(true, |status| appointment.status == status)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AvailableSlotsQuery {
    pub date: NaiveDate,
    pub available_only: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailableSlotsResponse {
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    /// False when the doctor does not work that weekday.
    pub is_open: bool,
    pub slots: Vec<Slot>,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppointmentError {
    #[error("Appointment not found")]
    NotFound,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Cannot {action} an appointment that is {from}")]
    InvalidTransition { from: AppointmentStatus, action: String },

    #[error("The {time} slot on {date} was just booked by someone else")]
    SlotConflict { date: NaiveDate, time: SlotTime },

    #[error("Appointment has already been rated")]
    AlreadyRated,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Appointment changed while it was being updated, reload and retry")]
    ConcurrentUpdate,

    #[error(transparent)]
    Availability(#[from] AvailabilityError),

    #[error("Database error: {0}")]
    DatabaseError(#[from] DatabaseError),
}

impl AppointmentError {
    pub fn invalid_transition(from: AppointmentStatus, action: impl fmt::Display) -> Self {
        AppointmentError::InvalidTransition {
            from,
            action: action.to_string(),
        }
    }
}
