use std::sync::Arc;

use axum::{routing::get, Router};
use tracing::info;

use appointment_cell::handlers::AppointmentCellState;
use appointment_cell::router::appointment_routes;
use appointment_cell::services::{
    AppointmentBookingService, AppointmentStore, InMemoryAppointmentStore, SupabaseAppointmentStore,
};
use doctor_cell::handlers::DoctorCellState;
use doctor_cell::router::doctor_routes;
use doctor_cell::services::{AvailabilityService, InMemoryProtocolStore, ProtocolStore, SupabaseProtocolStore};
use lab_request_cell::handlers::LabRequestCellState;
use lab_request_cell::router::lab_request_routes;
use lab_request_cell::services::{
    InMemoryLabRequestStore, LabRequestService, LabRequestStore, SupabaseLabRequestStore,
};
use shared_config::{AppConfig, StorageBackend};
use shared_database::SupabaseClient;

struct Stores {
    protocols: Arc<dyn ProtocolStore>,
    appointments: Arc<dyn AppointmentStore>,
    lab_requests: Arc<dyn LabRequestStore>,
}

fn build_stores(config: &AppConfig) -> Stores {
    match config.storage_backend {
        StorageBackend::Memory => {
            info!("Using in-memory stores; data is lost on restart");
            Stores {
                protocols: Arc::new(InMemoryProtocolStore::new()),
                appointments: Arc::new(InMemoryAppointmentStore::new()),
                lab_requests: Arc::new(InMemoryLabRequestStore::new()),
            }
        }
        StorageBackend::Supabase => {
            let supabase = Arc::new(SupabaseClient::new(config));
            Stores {
                protocols: Arc::new(SupabaseProtocolStore::new(supabase.clone())),
                appointments: Arc::new(SupabaseAppointmentStore::new(supabase.clone())),
                lab_requests: Arc::new(SupabaseLabRequestStore::new(supabase)),
            }
        }
    }
}

pub fn create_router(config: Arc<AppConfig>) -> Router {
    let stores = build_stores(&config);
    let availability = AvailabilityService::new(stores.protocols);

    let doctor_state = Arc::new(DoctorCellState {
        config: config.clone(),
        availability: availability.clone(),
    });
    let appointment_state = Arc::new(AppointmentCellState {
        config: config.clone(),
        bookings: AppointmentBookingService::new(stores.appointments, availability),
    });
    let lab_request_state = Arc::new(LabRequestCellState {
        config: config.clone(),
        lab_requests: LabRequestService::new(stores.lab_requests, config.lab_pre_assignment_policy),
    });

    Router::new()
        .route("/", get(|| async { "Clinic scheduling API is running!" }))
        .nest("/doctors", doctor_routes(doctor_state))
        .nest("/appointments", appointment_routes(appointment_state))
        .nest("/lab-requests", lab_request_routes(lab_request_state))
}
