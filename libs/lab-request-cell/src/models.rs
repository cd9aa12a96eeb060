// libs/lab-request-cell/src/models.rs
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_database::DatabaseError;

// ==============================================================================
// CORE LAB REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabRequest {
    pub id: Uuid,
    pub patient_id: Uuid,
    /// The doctor who created the request and decides its assignment.
    pub requested_by: Uuid,
    pub file_title: String,
    pub notes: Option<String>,
    pub status: LabRequestStatus,
    /// Holder while ASSIGNED or COMPLETED; a PENDING request may carry a
    /// laborant picked at creation.
    pub assignee_laborant_id: Option<Uuid>,
    /// Set only on completion.
    pub medical_file_id: Option<i64>,
    pub requested_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LabRequest {
    pub fn snapshot(&self) -> LabRequestSnapshot {
        LabRequestSnapshot {
            id: self.id,
            status: self.status,
            assignee_laborant_id: self.assignee_laborant_id,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LabRequestStatus {
    Pending,
    Assigned,
    Completed,
    Canceled,
}

impl LabRequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LabRequestStatus::Completed | LabRequestStatus::Canceled)
    }
}

impl fmt::Display for LabRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabRequestStatus::Pending => write!(f, "pending"),
            LabRequestStatus::Assigned => write!(f, "assigned"),
            LabRequestStatus::Completed => write!(f, "completed"),
            LabRequestStatus::Canceled => write!(f, "canceled"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabRequestEvent {
    Claim { laborant_id: Uuid },
    Assign { laborant_id: Uuid },
    Complete { by: Uuid, medical_file_id: i64 },
    Cancel,
}

impl LabRequestEvent {
    pub fn action(&self) -> &'static str {
        match self {
            LabRequestEvent::Claim { .. } => "claim",
            LabRequestEvent::Assign { .. } => "assign",
            LabRequestEvent::Complete { .. } => "complete",
            LabRequestEvent::Cancel => "cancel",
        }
    }
}

/// The fields a conditional write compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabRequestSnapshot {
    pub id: Uuid,
    pub status: LabRequestStatus,
    pub assignee_laborant_id: Option<Uuid>,
}

/// The fields a conditional write sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabRequestUpdate {
    pub status: LabRequestStatus,
    pub assignee_laborant_id: Option<Uuid>,
    pub medical_file_id: Option<i64>,
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateLabRequest {
    pub patient_id: Uuid,
    pub file_title: String,
    pub notes: Option<String>,
    /// Optional laborant picked up front.
    pub assignee_laborant_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignLabRequest {
    pub laborant_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteLabRequest {
    pub medical_file_id: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabRequestQuery {
    pub status: Option<LabRequestStatus>,
    pub assignee_laborant_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub requested_by: Option<Uuid>,
}

impl LabRequestQuery {
    pub fn matches(&self, request: &LabRequest) -> bool {
        self.status.map_or(true, |status| request.status == status)
            && self
                .assignee_laborant_id
                .map_or(true, |id| request.assignee_laborant_id == Some(id))
            && self.patient_id.map_or(true, |id| request.patient_id == id)
            && self.requested_by.map_or(true, |id| request.requested_by == id)
    }
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum LabRequestError {
    #[error("Lab request not found")]
    NotFound,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Cannot {action} a lab request that is {from}")]
    InvalidTransition { from: LabRequestStatus, action: String },

    #[error("Lab request is already held by laborant {holder}")]
    AlreadyClaimed { holder: Uuid },

    #[error("Only the assigned laborant can complete this lab request")]
    NotAssignee,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Lab request changed while it was being updated, reload and retry")]
    ConcurrentUpdate,

    #[error("Database error: {0}")]
    DatabaseError(#[from] DatabaseError),
}

impl LabRequestError {
    pub fn invalid_transition(from: LabRequestStatus, event: &LabRequestEvent) -> Self {
        LabRequestError::InvalidTransition {
            from,
            action: event.action().to_string(),
        }
    }
}
