use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{NaiveDate, NaiveDateTime};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use appointment_cell::models::{AppointmentError, AppointmentStatus, BookAppointmentRequest};
use appointment_cell::services::{
    AppointmentBookingService, InMemoryAppointmentStore, SupabaseAppointmentStore,
};
use doctor_cell::services::{AvailabilityService, InMemoryProtocolStore};
use shared_database::SupabaseClient;
use shared_models::auth::Principal;
use shared_utils::test_utils::TestConfig;

fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, 1, 7).unwrap()
}

fn before_monday() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2030, 1, 4).unwrap().and_hms_opt(12, 0, 0).unwrap()
}

fn in_memory_service() -> AppointmentBookingService {
    AppointmentBookingService::new(
        Arc::new(InMemoryAppointmentStore::new()),
        AvailabilityService::new(Arc::new(InMemoryProtocolStore::new())),
    )
}

fn supabase_service(mock_server: &MockServer) -> AppointmentBookingService {
    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let client = Arc::new(SupabaseClient::new(&config));
    AppointmentBookingService::new(
        Arc::new(SupabaseAppointmentStore::new(client)),
        AvailabilityService::new(Arc::new(InMemoryProtocolStore::new())),
    )
}

fn appointment_row(id: Uuid, doctor_id: Uuid, patient_id: Uuid, status: &str, rating: Option<i64>) -> serde_json::Value {
    json!({
        "id": id,
        "doctor_id": doctor_id,
        "patient_id": patient_id,
        "date": "2030-01-07",
        "time": "10:00:00",
        "status": status,
        "rating": rating,
        "created_at": "2029-12-20T08:00:00Z",
        "updated_at": "2029-12-20T08:00:00Z"
    })
}

#[tokio::test]
async fn test_concurrent_bookings_have_one_winner() {
    let service = in_memory_service();
    let doctor_id = Uuid::new_v4();

    let attempts = (0..8).map(|_| {
        let service = service.clone();
        let patient_id = Uuid::new_v4();
        tokio::spawn(async move {
            service
                .book(
                    &Principal::patient(patient_id),
                    BookAppointmentRequest {
                        doctor_id,
                        patient_id,
                        date: monday(),
                        time: "10:00".parse().unwrap(),
                    },
                    before_monday(),
                )
                .await
        })
    });

    let results: Vec<_> = futures::future::join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    for result in results.iter().filter(|r| r.is_err()) {
        assert_matches!(result, Err(AppointmentError::SlotConflict { .. }));
    }
}

#[tokio::test]
async fn test_concurrent_cancel_and_done_have_one_winner() {
    let service = in_memory_service();
    let (doctor_id, patient_id) = (Uuid::new_v4(), Uuid::new_v4());
    let booked = service
        .book(
            &Principal::patient(patient_id),
            BookAppointmentRequest {
                doctor_id,
                patient_id,
                date: monday(),
                time: "16:30".parse().unwrap(),
            },
            before_monday(),
        )
        .await
        .unwrap();

    let done = {
        let service = service.clone();
        tokio::spawn(async move { service.mark_done(&Principal::doctor(doctor_id), booked.id).await })
    };
    let cancel = {
        let service = service.clone();
        tokio::spawn(async move { service.cancel(&Principal::patient(patient_id), booked.id).await })
    };
    let (done, cancel) = (done.await.unwrap(), cancel.await.unwrap());

    assert!(done.is_ok() ^ cancel.is_ok());
    let loser = if done.is_ok() { cancel } else { done };
    assert_matches!(loser, Err(AppointmentError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_supabase_unique_violation_maps_to_slot_conflict() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .and(body_partial_json(json!({ "status": "approved", "time": "10:00" })))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "code": "23505",
            "message": "duplicate key value violates unique constraint \"appointments_active_slot_key\""
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let patient_id = Uuid::new_v4();
    let result = supabase_service(&mock_server)
        .book(
            &Principal::patient(patient_id),
            BookAppointmentRequest {
                doctor_id: Uuid::new_v4(),
                patient_id,
                date: monday(),
                time: "10:00".parse().unwrap(),
            },
            before_monday(),
        )
        .await;

    assert_matches!(result, Err(AppointmentError::SlotConflict { date, .. }) if date == monday());
}

#[tokio::test]
async fn test_supabase_mark_done_patches_on_observed_state() {
    let mock_server = MockServer::start().await;
    let (id, doctor_id, patient_id) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", id)))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([appointment_row(id, doctor_id, patient_id, "approved", None)])),
        )
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", id)))
        .and(query_param("status", "eq.approved"))
        .and(query_param("rating", "is.null"))
        .and(body_partial_json(json!({ "status": "done" })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([appointment_row(id, doctor_id, patient_id, "done", None)])),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let updated = supabase_service(&mock_server)
        .mark_done(&Principal::doctor(doctor_id), id)
        .await
        .unwrap();

    assert_eq!(updated.status, AppointmentStatus::Done);
    assert_eq!(updated.time.to_string(), "10:00");
}

#[tokio::test]
async fn test_supabase_rating_race_reports_already_rated() {
    let mock_server = MockServer::start().await;
    let (id, doctor_id, patient_id) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    // First read sees the visit unrated; the re-read after the empty PATCH sees it rated.
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([appointment_row(id, doctor_id, patient_id, "done", None)])),
        )
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([appointment_row(id, doctor_id, patient_id, "done", Some(2))])),
        )
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("rating", "is.null"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let result = supabase_service(&mock_server)
        .rate(&Principal::patient(patient_id), id, 5)
        .await;

    assert_matches!(result, Err(AppointmentError::AlreadyRated));
}

#[tokio::test]
async fn test_supabase_slots_exclude_booked_times() {
    let mock_server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("doctor_id", format!("eq.{}", doctor_id)))
        .and(query_param("date", "eq.2030-01-07"))
        .and(query_param("status", "neq.cancelled"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "time": "09:00:00" },
            { "time": "09:30:00" }
        ])))
        .mount(&mock_server)
        .await;

    let view = supabase_service(&mock_server)
        .available_slots(doctor_id, monday(), before_monday(), true)
        .await
        .unwrap();

    assert!(view.is_open);
    assert_eq!(view.slots.first().unwrap().time.to_string(), "10:00");
}
