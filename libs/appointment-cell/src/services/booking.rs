// libs/appointment-cell/src/services/booking.rs
use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate, NaiveDateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use doctor_cell::models::weekday_key;
use doctor_cell::services::{bookable, generate_slots, AvailabilityService};
use shared_models::auth::{Principal, Role};

use crate::models::{
    Appointment, AppointmentError, AppointmentEvent, AppointmentSearchQuery, AppointmentStatus,
    AppointmentUpdate, AvailableSlotsResponse, BookAppointmentRequest,
};
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::store::AppointmentStore;

#[derive(Clone)]
pub struct AppointmentBookingService {
    store: Arc<dyn AppointmentStore>,
    availability: AvailabilityService,
    lifecycle: AppointmentLifecycleService,
}

impl AppointmentBookingService {
    pub fn new(store: Arc<dyn AppointmentStore>, availability: AvailabilityService) -> Self {
        Self {
            store,
            availability,
            lifecycle: AppointmentLifecycleService::new(),
        }
    }

    /// Books `request.time` on `request.date`.
    ///
    /// The slot must lie inside the doctor's window for that weekday and after
    /// `now`. Whether it is still free is decided only by the store's
    /// conditional insert, so two racing bookings cannot both succeed.
    pub async fn book(
        &self,
        principal: &Principal,
        request: BookAppointmentRequest,
        now: NaiveDateTime,
    ) -> Result<Appointment, AppointmentError> {
        info!(
            "Booking appointment for patient {} with doctor {} at {} {}",
            request.patient_id, request.doctor_id, request.date, request.time
        );

        self.ensure_can_book(principal, &request)?;

        let protocol = self.availability.get_protocol(request.doctor_id).await?;
        let slots = generate_slots(request.date, &protocol.week, &HashSet::new(), now);

        if slots.is_empty() {
            return Err(AppointmentError::ValidationError(format!(
                "doctor does not work on {}",
                weekday_key(request.date.weekday())
            )));
        }
        let slot = slots
            .iter()
            .find(|slot| slot.time == request.time)
            .ok_or_else(|| {
                AppointmentError::ValidationError(format!(
                    "{} is outside the doctor's hours on {}",
                    request.time,
                    weekday_key(request.date.weekday())
                ))
            })?;
        if !slot.is_available {
            return Err(AppointmentError::ValidationError(format!(
                "the {} slot on {} has already started",
                request.time, request.date
            )));
        }

        let created_at = Utc::now();
        let appointment = Appointment {
            id: Uuid::new_v4(),
            doctor_id: request.doctor_id,
            patient_id: request.patient_id,
            date: request.date,
            time: request.time,
            status: AppointmentStatus::Approved,
            rating: None,
            created_at,
            updated_at: created_at,
        };

        match self.store.insert_if_free(&appointment).await {
            Ok(saved) => {
                info!("Appointment {} booked", saved.id);
                Ok(saved)
            }
            Err(e) if e.is_conflict() => {
                warn!(
                    "Slot {} {} for doctor {} lost to a concurrent booking",
                    request.date, request.time, request.doctor_id
                );
                Err(AppointmentError::SlotConflict {
                    date: request.date,
                    time: request.time,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn mark_done(&self, principal: &Principal, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        let current = self.load(appointment_id).await?;
        if !principal.is_self_or_admin(current.doctor_id) {
            return Err(AppointmentError::Unauthorized(
                "only the appointment's doctor can mark it done".to_string(),
            ));
        }
        self.apply_event(current, AppointmentEvent::MarkDone).await
    }

    pub async fn cancel(&self, principal: &Principal, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        let current = self.load(appointment_id).await?;
        ensure_participant(principal, &current)?;
        self.apply_event(current, AppointmentEvent::Cancel).await
    }

    /// Records the patient's score. A rating is written once and never changed.
    pub async fn rate(
        &self,
        principal: &Principal,
        appointment_id: Uuid,
        score: i64,
    ) -> Result<Appointment, AppointmentError> {
        let current = self.load(appointment_id).await?;
        let rating = self.lifecycle.validate_rating(&current, principal, score)?;

        let update = AppointmentUpdate {
            status: current.status,
            rating: Some(rating),
        };
        if let Some(updated) = self.store.compare_and_set(&current.snapshot(), &update).await? {
            info!("Appointment {} rated {}", appointment_id, rating.value());
            return Ok(updated);
        }

        warn!("Rating of appointment {} raced another write", appointment_id);
        let fresh = self.load(appointment_id).await?;
        self.lifecycle.validate_rating(&fresh, principal, score)?;
        Err(AppointmentError::ConcurrentUpdate)
    }

    pub async fn get(&self, principal: &Principal, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        let appointment = self.load(appointment_id).await?;
        ensure_participant(principal, &appointment)?;
        Ok(appointment)
    }

    /// Appointments matching `query`. Patients and doctors only ever see their
    /// own, whatever filters they pass.
    pub async fn search(
        &self,
        principal: &Principal,
        mut query: AppointmentSearchQuery,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        match principal.role {
            Role::Patient => query.patient_id = Some(principal.user_id),
            Role::Doctor => query.doctor_id = Some(principal.user_id),
            Role::Admin => {}
            Role::Laborant => {
                return Err(AppointmentError::Unauthorized(
                    "laborants cannot list appointments".to_string(),
                ))
            }
        }

        debug!("Searching appointments with {:?}", query);
        Ok(self.store.search(&query).await?)
    }

    /// The doctor's slots for `date` with current bookings applied.
    pub async fn available_slots(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        now: NaiveDateTime,
        available_only: bool,
    ) -> Result<AvailableSlotsResponse, AppointmentError> {
        debug!("Computing slots for doctor {} on {}", doctor_id, date);

        let protocol = self.availability.get_protocol(doctor_id).await?;
        let booked = self.store.booked_times(doctor_id, date).await?;
        let slots = generate_slots(date, &protocol.week, &booked, now);
        let is_open = !slots.is_empty();

        Ok(AvailableSlotsResponse {
            doctor_id,
            date,
            is_open,
            slots: if available_only { bookable(slots) } else { slots },
        })
    }

    async fn load(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        self.store
            .fetch(appointment_id)
            .await?
            .ok_or(AppointmentError::NotFound)
    }

    /// Runs one status change as a conditional write. A lost race is
    /// re-evaluated against the fresh row so the caller sees what happened.
    async fn apply_event(&self, current: Appointment, event: AppointmentEvent) -> Result<Appointment, AppointmentError> {
        let next = self.lifecycle.transition(current.status, event)?;
        let update = AppointmentUpdate {
            status: next,
            rating: current.rating,
        };

        if let Some(updated) = self.store.compare_and_set(&current.snapshot(), &update).await? {
            info!("Appointment {} is now {}", updated.id, updated.status);
            return Ok(updated);
        }

        warn!("Status change on appointment {} raced another write", current.id);
        let fresh = self.load(current.id).await?;
        self.lifecycle.transition(fresh.status, event)?;
        Err(AppointmentError::ConcurrentUpdate)
    }

    fn ensure_can_book(&self, principal: &Principal, request: &BookAppointmentRequest) -> Result<(), AppointmentError> {
        let allowed = match principal.role {
            Role::Admin => true,
            Role::Patient => principal.user_id == request.patient_id,
            Role::Doctor => principal.user_id == request.doctor_id,
            Role::Laborant => false,
        };
        if allowed {
            Ok(())
        } else {
            Err(AppointmentError::Unauthorized(
                "cannot book appointments on behalf of other users".to_string(),
            ))
        }
    }
}

fn ensure_participant(principal: &Principal, appointment: &Appointment) -> Result<(), AppointmentError> {
    if principal.is_admin()
        || principal.user_id == appointment.patient_id
        || principal.user_id == appointment.doctor_id
    {
        Ok(())
    } else {
        Err(AppointmentError::Unauthorized(
            "not a participant of this appointment".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Rating;
    use crate::services::store::{InMemoryAppointmentStore, MockAppointmentStore};
    use assert_matches::assert_matches;
    use chrono::Duration;
    use doctor_cell::services::InMemoryProtocolStore;
    use shared_database::DatabaseError;

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2030, 1, 7).unwrap()
    }

    fn last_friday() -> NaiveDateTime {
        (monday() - Duration::days(3)).and_hms_opt(12, 0, 0).unwrap()
    }

    fn availability() -> AvailabilityService {
        AvailabilityService::new(Arc::new(InMemoryProtocolStore::new()))
    }

    fn service() -> AppointmentBookingService {
        AppointmentBookingService::new(Arc::new(InMemoryAppointmentStore::new()), availability())
    }

    fn request(doctor_id: Uuid, patient_id: Uuid, time: &str) -> BookAppointmentRequest {
        BookAppointmentRequest {
            doctor_id,
            patient_id,
            date: monday(),
            time: time.parse().unwrap(),
        }
    }

    #[tokio::test]
    async fn test_booking_hides_slot_from_generator() {
        let service = service();
        let (doctor, patient) = (Uuid::new_v4(), Uuid::new_v4());

        let booked = service
            .book(&Principal::patient(patient), request(doctor, patient, "09:00"), last_friday())
            .await
            .unwrap();
        assert_eq!(booked.status, AppointmentStatus::Approved);

        let view = service.available_slots(doctor, monday(), last_friday(), false).await.unwrap();
        let nine = view.slots.iter().find(|s| s.time == booked.time).unwrap();
        assert!(!nine.is_available);

        let open = service.available_slots(doctor, monday(), last_friday(), true).await.unwrap();
        assert!(open.slots.iter().all(|s| s.time != booked.time));
    }

    #[tokio::test]
    async fn test_rejects_slots_outside_window_or_past() {
        let service = service();
        let (doctor, patient) = (Uuid::new_v4(), Uuid::new_v4());
        let caller = Principal::patient(patient);

        assert_matches!(
            service.book(&caller, request(doctor, patient, "17:30"), last_friday()).await,
            Err(AppointmentError::ValidationError(_))
        );

        let monday_noon = monday().and_hms_opt(12, 0, 0).unwrap();
        assert_matches!(
            service.book(&caller, request(doctor, patient, "11:30"), monday_noon).await,
            Err(AppointmentError::ValidationError(_))
        );
        assert!(service.book(&caller, request(doctor, patient, "12:30"), monday_noon).await.is_ok());
    }

    #[tokio::test]
    async fn test_closed_day_cannot_be_booked() {
        let protocols = Arc::new(InMemoryProtocolStore::new());
        let availability = AvailabilityService::new(protocols);
        let doctor = Uuid::new_v4();

        let mut week = availability.get_protocol(doctor).await.unwrap().week;
        week.monday.is_available = false;
        availability.set_protocol(doctor, week).await.unwrap();

        let service = AppointmentBookingService::new(Arc::new(InMemoryAppointmentStore::new()), availability);
        let patient = Uuid::new_v4();
        let result = service
            .book(&Principal::patient(patient), request(doctor, patient, "10:00"), last_friday())
            .await;

        assert_matches!(result, Err(AppointmentError::ValidationError(msg)) if msg.contains("monday"));
    }

    #[tokio::test]
    async fn test_patient_cannot_book_for_someone_else() {
        let service = service();
        let result = service
            .book(
                &Principal::patient(Uuid::new_v4()),
                request(Uuid::new_v4(), Uuid::new_v4(), "10:00"),
                last_friday(),
            )
            .await;

        assert_matches!(result, Err(AppointmentError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_store_conflict_surfaces_as_slot_conflict() {
        let mut store = MockAppointmentStore::new();
        store
            .expect_insert_if_free()
            .times(1)
            .returning(|_| Err(DatabaseError::Conflict("duplicate key".to_string())));

        let service = AppointmentBookingService::new(Arc::new(store), availability());
        let patient = Uuid::new_v4();
        let result = service
            .book(&Principal::patient(patient), request(Uuid::new_v4(), patient, "10:00"), last_friday())
            .await;

        assert_matches!(result, Err(AppointmentError::SlotConflict { .. }));
    }

    #[tokio::test]
    async fn test_lost_cancel_race_reports_actual_state() {
        let id = Uuid::new_v4();
        let doctor = Uuid::new_v4();
        let patient = Uuid::new_v4();
        let base = Appointment {
            id,
            doctor_id: doctor,
            patient_id: patient,
            date: monday(),
            time: "10:00".parse().unwrap(),
            status: AppointmentStatus::Approved,
            rating: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let done = Appointment { status: AppointmentStatus::Done, ..base.clone() };

        let mut store = MockAppointmentStore::new();
        // Popped from the back: the first read sees APPROVED, the re-read DONE.
        let mut reads = vec![done, base];
        store
            .expect_fetch()
            .times(2)
            .returning(move |_| Ok(reads.pop()));
        store.expect_compare_and_set().times(1).returning(|_, _| Ok(None));

        let service = AppointmentBookingService::new(Arc::new(store), availability());
        let result = service.cancel(&Principal::patient(patient), id).await;

        assert_matches!(
            result,
            Err(AppointmentError::InvalidTransition { from: AppointmentStatus::Done, .. })
        );
    }

    #[tokio::test]
    async fn test_lost_race_on_unchanged_row_is_a_concurrent_update() {
        let id = Uuid::new_v4();
        let patient = Uuid::new_v4();
        let approved = Appointment {
            id,
            doctor_id: Uuid::new_v4(),
            patient_id: patient,
            date: monday(),
            time: "11:00".parse().unwrap(),
            status: AppointmentStatus::Approved,
            rating: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let done = Appointment { status: AppointmentStatus::Done, ..approved.clone() };

        // The re-read still accepts the event, yet the guarded write matched nothing.
        let mut store = MockAppointmentStore::new();
        store
            .expect_fetch()
            .times(2)
            .returning(move |_| Ok(Some(approved.clone())));
        store.expect_compare_and_set().times(1).returning(|_, _| Ok(None));
        let service = AppointmentBookingService::new(Arc::new(store), availability());
        assert_matches!(
            service.cancel(&Principal::patient(patient), id).await,
            Err(AppointmentError::ConcurrentUpdate)
        );

        let mut store = MockAppointmentStore::new();
        store
            .expect_fetch()
            .times(2)
            .returning(move |_| Ok(Some(done.clone())));
        store.expect_compare_and_set().times(1).returning(|_, _| Ok(None));
        let service = AppointmentBookingService::new(Arc::new(store), availability());
        assert_matches!(
            service.rate(&Principal::patient(patient), id, 4).await,
            Err(AppointmentError::ConcurrentUpdate)
        );
    }

    #[tokio::test]
    async fn test_full_visit_then_single_rating() {
        let service = service();
        let (doctor, patient) = (Uuid::new_v4(), Uuid::new_v4());
        let patient_principal = Principal::patient(patient);

        let booked = service
            .book(&patient_principal, request(doctor, patient, "14:00"), last_friday())
            .await
            .unwrap();

        assert_matches!(
            service.mark_done(&patient_principal, booked.id).await,
            Err(AppointmentError::Unauthorized(_))
        );
        let done = service.mark_done(&Principal::doctor(doctor), booked.id).await.unwrap();
        assert_eq!(done.status, AppointmentStatus::Done);

        assert_matches!(
            service.cancel(&patient_principal, booked.id).await,
            Err(AppointmentError::InvalidTransition { from: AppointmentStatus::Done, .. })
        );

        let rated = service.rate(&patient_principal, booked.id, 5).await.unwrap();
        assert_eq!(rated.rating, Some(Rating::try_from(5).unwrap()));
        assert_matches!(
            service.rate(&patient_principal, booked.id, 1).await,
            Err(AppointmentError::AlreadyRated)
        );
    }

    #[tokio::test]
    async fn test_search_is_scoped_to_caller() {
        let service = service();
        let doctor = Uuid::new_v4();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

        service.book(&Principal::patient(alice), request(doctor, alice, "10:00"), last_friday()).await.unwrap();
        service.book(&Principal::patient(bob), request(doctor, bob, "10:30"), last_friday()).await.unwrap();

        let mine = service
            .search(&Principal::patient(alice), AppointmentSearchQuery::default())
            .await
            .unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].patient_id, alice);

        let for_doctor = service
            .search(&Principal::doctor(doctor), AppointmentSearchQuery::default())
            .await
            .unwrap();
        assert_eq!(for_doctor.len(), 2);
        assert!(for_doctor[0].time < for_doctor[1].time);

        assert_matches!(
            service.get(&Principal::patient(bob), mine[0].id).await,
            Err(AppointmentError::Unauthorized(_))
        );
    }
}
