// libs/appointment-cell/src/services/store.rs
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use doctor_cell::models::SlotTime;
use shared_database::{DatabaseError, SupabaseClient};

use crate::models::{Appointment, AppointmentSearchQuery, AppointmentSnapshot, AppointmentUpdate};

/// Appointment persistence. Both writes are conditional so racing callers
/// cannot both win.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    /// Inserts unless a non-cancelled appointment already holds the same
    /// doctor, date and time, in which case `DatabaseError::Conflict`.
    async fn insert_if_free(&self, appointment: &Appointment) -> Result<Appointment, DatabaseError>;

    async fn fetch(&self, id: Uuid) -> Result<Option<Appointment>, DatabaseError>;

    /// Times held by non-cancelled appointments for the doctor on `date`.
    async fn booked_times(&self, doctor_id: Uuid, date: NaiveDate) -> Result<HashSet<SlotTime>, DatabaseError>;

    async fn search(&self, query: &AppointmentSearchQuery) -> Result<Vec<Appointment>, DatabaseError>;

    /// Writes `update` only while the row still matches `expected`.
    /// `None` means another writer got there first.
    async fn compare_and_set(
        &self,
        expected: &AppointmentSnapshot,
        update: &AppointmentUpdate,
    ) -> Result<Option<Appointment>, DatabaseError>;
}

#[derive(Default)]
pub struct InMemoryAppointmentStore {
    appointments: RwLock<HashMap<Uuid, Appointment>>,
}

impl InMemoryAppointmentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AppointmentStore for InMemoryAppointmentStore {
    async fn insert_if_free(&self, appointment: &Appointment) -> Result<Appointment, DatabaseError> {
        let mut appointments = self.appointments.write().await;

        let taken = appointments
            .values()
            .any(|existing| existing.occupies(appointment.doctor_id, appointment.date, appointment.time));
        if taken {
            return Err(DatabaseError::Conflict(format!(
                "slot {} {} already booked for doctor {}",
                appointment.date, appointment.time, appointment.doctor_id
            )));
        }

        appointments.insert(appointment.id, appointment.clone());
        Ok(appointment.clone())
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<Appointment>, DatabaseError> {
        Ok(self.appointments.read().await.get(&id).cloned())
    }

    async fn booked_times(&self, doctor_id: Uuid, date: NaiveDate) -> Result<HashSet<SlotTime>, DatabaseError> {
        Ok(self
            .appointments
            .read()
            .await
            .values()
            .filter(|a| a.holds_slot() && a.doctor_id == doctor_id && a.date == date)
            .map(|a| a.time)
            .collect())
    }

    async fn search(&self, query: &AppointmentSearchQuery) -> Result<Vec<Appointment>, DatabaseError> {
        let mut found: Vec<Appointment> = self
            .appointments
            .read()
            .await
            .values()
            .filter(|a| query.matches(a))
            .cloned()
            .collect();
        found.sort_by_key(|a| (a.date, a.time, a.created_at));
        Ok(found)
    }

    async fn compare_and_set(
        &self,
        expected: &AppointmentSnapshot,
        update: &AppointmentUpdate,
    ) -> Result<Option<Appointment>, DatabaseError> {
        let mut appointments = self.appointments.write().await;

        let Some(current) = appointments.get_mut(&expected.id) else {
            return Ok(None);
        };
        if current.snapshot() != *expected {
            return Ok(None);
        }

        current.status = update.status;
        current.rating = update.rating;
        current.updated_at = Utc::now();
        Ok(Some(current.clone()))
    }
}

#[derive(Deserialize)]
struct BookedTimeRow {
    time: SlotTime,
}

/// Appointments in the `appointments` table. Slot uniqueness is enforced by a
/// partial unique index over active rows, which PostgREST reports as 409.
pub struct SupabaseAppointmentStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseAppointmentStore {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    fn search_path(query: &AppointmentSearchQuery) -> String {
        let mut path = String::from("/rest/v1/appointments?select=*");
        if let Some(doctor_id) = query.doctor_id {
            path.push_str(&format!("&doctor_id=eq.{}", doctor_id));
        }
        if let Some(patient_id) = query.patient_id {
            path.push_str(&format!("&patient_id=eq.{}", patient_id));
        }
        if let Some(date) = query.date {
            path.push_str(&format!("&date=eq.{}", date));
        }
        if let Some(status) = query.status {
            path.push_str(&format!("&status=eq.{}", status));
        }
        path.push_str("&order=date.asc,time.asc");
        path
    }
}

#[async_trait]
impl AppointmentStore for SupabaseAppointmentStore {
    async fn insert_if_free(&self, appointment: &Appointment) -> Result<Appointment, DatabaseError> {
        debug!(
            "Inserting appointment {} for doctor {} at {} {}",
            appointment.id, appointment.doctor_id, appointment.date, appointment.time
        );

        let body = serde_json::to_value(appointment)?;
        let rows: Vec<Appointment> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/appointments",
                None,
                Some(body),
                Some(SupabaseClient::prefer_representation()),
            )
            .await?;

        rows.into_iter().next().ok_or_else(|| DatabaseError::Api {
            status: 201,
            message: "insert returned no representation".to_string(),
        })
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<Appointment>, DatabaseError> {
        let path = format!("/rest/v1/appointments?id=eq.{}&select=*", id);
        let rows: Vec<Appointment> = self.supabase.request(Method::GET, &path, None, None).await?;
        Ok(rows.into_iter().next())
    }

    async fn booked_times(&self, doctor_id: Uuid, date: NaiveDate) -> Result<HashSet<SlotTime>, DatabaseError> {
        let path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&date=eq.{}&status=neq.cancelled&select=time",
            doctor_id, date
        );
        let rows: Vec<BookedTimeRow> = self.supabase.request(Method::GET, &path, None, None).await?;
        Ok(rows.into_iter().map(|row| row.time).collect())
    }

    async fn search(&self, query: &AppointmentSearchQuery) -> Result<Vec<Appointment>, DatabaseError> {
        let path = Self::search_path(query);
        self.supabase.request(Method::GET, &path, None, None).await
    }

    async fn compare_and_set(
        &self,
        expected: &AppointmentSnapshot,
        update: &AppointmentUpdate,
    ) -> Result<Option<Appointment>, DatabaseError> {
        let rating_filter = match expected.rating {
            Some(rating) => format!("eq.{}", rating.value()),
            None => "is.null".to_string(),
        };
        let path = format!(
            "/rest/v1/appointments?id=eq.{}&status=eq.{}&rating={}",
            expected.id, expected.status, rating_filter
        );
        let body = json!({
            "status": update.status,
            "rating": update.rating,
            "updated_at": Utc::now().to_rfc3339(),
        });

        let rows: Vec<Appointment> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                None,
                Some(body),
                Some(SupabaseClient::prefer_representation()),
            )
            .await?;

        Ok(rows.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AppointmentStatus, Rating};
    use assert_matches::assert_matches;

    fn appointment(doctor_id: Uuid, time: &str) -> Appointment {
        Appointment {
            id: Uuid::new_v4(),
            doctor_id,
            patient_id: Uuid::new_v4(),
            date: NaiveDate::from_ymd_opt(2030, 1, 7).unwrap(),
            time: time.parse().unwrap(),
            status: AppointmentStatus::Approved,
            rating: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_second_insert_on_same_slot_conflicts() {
        let store = InMemoryAppointmentStore::new();
        let doctor_id = Uuid::new_v4();

        store.insert_if_free(&appointment(doctor_id, "10:00")).await.unwrap();
        let result = store.insert_if_free(&appointment(doctor_id, "10:00")).await;
        assert_matches!(result, Err(DatabaseError::Conflict(_)));

        // Another doctor at the same time is independent.
        store.insert_if_free(&appointment(Uuid::new_v4(), "10:00")).await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_slot_can_be_rebooked() {
        let store = InMemoryAppointmentStore::new();
        let doctor_id = Uuid::new_v4();
        let first = store.insert_if_free(&appointment(doctor_id, "10:00")).await.unwrap();

        let cancelled = store
            .compare_and_set(
                &first.snapshot(),
                &AppointmentUpdate { status: AppointmentStatus::Cancelled, rating: None },
            )
            .await
            .unwrap();
        assert!(cancelled.is_some());

        assert!(store.booked_times(doctor_id, first.date).await.unwrap().is_empty());
        store.insert_if_free(&appointment(doctor_id, "10:00")).await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_snapshot_is_rejected() {
        let store = InMemoryAppointmentStore::new();
        let stored = store.insert_if_free(&appointment(Uuid::new_v4(), "11:30")).await.unwrap();
        let stale = stored.snapshot();

        let done = AppointmentUpdate { status: AppointmentStatus::Done, rating: None };
        assert!(store.compare_and_set(&stale, &done).await.unwrap().is_some());
        assert!(store.compare_and_set(&stale, &done).await.unwrap().is_none());

        let rated = AppointmentUpdate {
            status: AppointmentStatus::Done,
            rating: Some(Rating::try_from(5).unwrap()),
        };
        let current = store.fetch(stored.id).await.unwrap().unwrap().snapshot();
        assert!(store.compare_and_set(&current, &rated).await.unwrap().is_some());
        assert!(store.compare_and_set(&current, &rated).await.unwrap().is_none());
    }

    #[test]
    fn test_search_path_carries_filters_in_order() {
        let doctor_id = Uuid::nil();
        let path = SupabaseAppointmentStore::search_path(&AppointmentSearchQuery {
            doctor_id: Some(doctor_id),
            status: Some(AppointmentStatus::Approved),
            ..Default::default()
        });
        assert_eq!(
            path,
            format!(
                "/rest/v1/appointments?select=*&doctor_id=eq.{}&status=eq.approved&order=date.asc,time.asc",
                doctor_id
            )
        );
    }
}
