// libs/appointment-cell/src/services/lifecycle.rs
use tracing::{debug, warn};

use shared_models::auth::Principal;

use crate::models::{Appointment, AppointmentError, AppointmentEvent, AppointmentStatus, Rating};

#[derive(Debug, Clone, Copy, Default)]
pub struct AppointmentLifecycleService;

impl AppointmentLifecycleService {
    pub fn new() -> Self {
        Self
    }

    /// The status `event` moves `current` to, or `InvalidTransition`.
    pub fn transition(
        &self,
        current: AppointmentStatus,
        event: AppointmentEvent,
    ) -> Result<AppointmentStatus, AppointmentError> {
        let next = match event {
            AppointmentEvent::MarkDone => AppointmentStatus::Done,
            AppointmentEvent::Cancel => AppointmentStatus::Cancelled,
        };
        self.validate_status_transition(current, next)
            .map_err(|_| AppointmentError::invalid_transition(current, event))?;
        Ok(next)
    }

    pub fn validate_status_transition(
        &self,
        current_status: AppointmentStatus,
        new_status: AppointmentStatus,
    ) -> Result<(), AppointmentError> {
        debug!("Validating status transition from {} to {}", current_status, new_status);

        if !self.get_valid_transitions(current_status).contains(&new_status) {
            warn!("Invalid status transition attempted: {} -> {}", current_status, new_status);
            return Err(AppointmentError::invalid_transition(current_status, format!("move to {}", new_status)));
        }
        Ok(())
    }

    pub fn get_valid_transitions(&self, current_status: AppointmentStatus) -> Vec<AppointmentStatus> {
        match current_status {
            AppointmentStatus::Approved => vec![AppointmentStatus::Done, AppointmentStatus::Cancelled],
            // Terminal states - no transitions allowed
            AppointmentStatus::Done => vec![],
            AppointmentStatus::Cancelled => vec![],
        }
    }

    /// Checks that `rater` may rate `appointment` with `score`.
    ///
    /// Checks run owner, status, prior rating, then range, so a second rating
    /// attempt reports `AlreadyRated` whatever score it carries.
    pub fn validate_rating(
        &self,
        appointment: &Appointment,
        rater: &Principal,
        score: i64,
    ) -> Result<Rating, AppointmentError> {
        if rater.user_id != appointment.patient_id {
            return Err(AppointmentError::Unauthorized(
                "only the patient of an appointment can rate it".to_string(),
            ));
        }
        if appointment.status != AppointmentStatus::Done {
            return Err(AppointmentError::invalid_transition(appointment.status, "rate"));
        }
        if appointment.rating.is_some() {
            return Err(AppointmentError::AlreadyRated);
        }
        Rating::try_from(score).map_err(AppointmentError::ValidationError)
    }
}
