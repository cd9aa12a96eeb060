// libs/doctor-cell/src/services/availability.rs
use std::sync::Arc;

use chrono::Weekday;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{AvailabilityError, AvailabilityProtocol, EditDayRequest, WeekSchedule};
use crate::services::store::ProtocolStore;

#[derive(Clone)]
pub struct AvailabilityService {
    store: Arc<dyn ProtocolStore>,
}

impl AvailabilityService {
    pub fn new(store: Arc<dyn ProtocolStore>) -> Self {
        Self { store }
    }

    /// The doctor's protocol, or the default open week when none was saved.
    pub async fn get_protocol(&self, doctor_id: Uuid) -> Result<AvailabilityProtocol, AvailabilityError> {
        debug!("Fetching availability protocol for doctor: {}", doctor_id);

        match self.store.fetch(doctor_id).await? {
            Some(protocol) => Ok(protocol),
            None => {
                debug!("No protocol stored for doctor {}, serving default week", doctor_id);
                Ok(AvailabilityProtocol::default_for(doctor_id))
            }
        }
    }

    /// Validates and stores a whole week, replacing whatever was there.
    pub async fn set_protocol(
        &self,
        doctor_id: Uuid,
        week: WeekSchedule,
    ) -> Result<AvailabilityProtocol, AvailabilityError> {
        if let Err(e) = validate_week(&week) {
            warn!("Rejected protocol for doctor {}: {}", doctor_id, e);
            return Err(e);
        }

        let protocol = AvailabilityProtocol {
            doctor_id,
            week,
            updated_at: None,
            is_default: false,
        };

        let saved = self.store.replace(&protocol).await?;
        info!("Availability protocol replaced for doctor {}", doctor_id);
        Ok(saved)
    }

    /// Edits one weekday and saves the resulting week through `set_protocol`.
    pub async fn edit_day(
        &self,
        doctor_id: Uuid,
        day: Weekday,
        edit: EditDayRequest,
    ) -> Result<AvailabilityProtocol, AvailabilityError> {
        let mut week = self.get_protocol(doctor_id).await?.week;
        apply_day_edit(&mut week, day, &edit);
        self.set_protocol(doctor_id, week).await
    }
}

/// Every open day must end strictly after it starts.
pub fn validate_week(week: &WeekSchedule) -> Result<(), AvailabilityError> {
    for (day, schedule) in week.iter() {
        if !schedule.is_valid() {
            return Err(AvailabilityError::invalid_day(
                day,
                format!("start {} must be before end {}", schedule.start, schedule.end),
            ));
        }
    }
    Ok(())
}

/// Start is applied before end, each pulling the other along, so the day never
/// holds `start > end` in between.
pub fn apply_day_edit(week: &mut WeekSchedule, day: Weekday, edit: &EditDayRequest) {
    let schedule = week.day_mut(day);
    if let Some(start) = edit.start {
        schedule.set_start(start);
    }
    if let Some(end) = edit.end {
        schedule.set_end(end);
    }
    if let Some(is_available) = edit.is_available {
        schedule.is_available = is_available;
    }
}
