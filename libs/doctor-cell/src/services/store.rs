// libs/doctor-cell/src/services/store.rs
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use shared_database::{DatabaseError, SupabaseClient};

use crate::models::AvailabilityProtocol;

/// Persistence for weekly protocols. A protocol is only ever written whole.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProtocolStore: Send + Sync {
    async fn fetch(&self, doctor_id: Uuid) -> Result<Option<AvailabilityProtocol>, DatabaseError>;

    /// Replaces the stored week in one write; concurrent saves are last-write-wins.
    async fn replace(&self, protocol: &AvailabilityProtocol) -> Result<AvailabilityProtocol, DatabaseError>;
}

#[derive(Default)]
pub struct InMemoryProtocolStore {
    protocols: RwLock<HashMap<Uuid, AvailabilityProtocol>>,
}

impl InMemoryProtocolStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProtocolStore for InMemoryProtocolStore {
    async fn fetch(&self, doctor_id: Uuid) -> Result<Option<AvailabilityProtocol>, DatabaseError> {
        Ok(self.protocols.read().await.get(&doctor_id).cloned())
    }

    async fn replace(&self, protocol: &AvailabilityProtocol) -> Result<AvailabilityProtocol, DatabaseError> {
        let stored = AvailabilityProtocol {
            updated_at: Some(Utc::now()),
            is_default: false,
            ..protocol.clone()
        };
        self.protocols.write().await.insert(stored.doctor_id, stored.clone());
        Ok(stored)
    }
}

/// Protocols kept in the `availability_protocols` table, one row per doctor.
pub struct SupabaseProtocolStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseProtocolStore {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }
}

#[async_trait]
impl ProtocolStore for SupabaseProtocolStore {
    async fn fetch(&self, doctor_id: Uuid) -> Result<Option<AvailabilityProtocol>, DatabaseError> {
        debug!("Fetching availability protocol for doctor {}", doctor_id);

        let path = format!("/rest/v1/availability_protocols?doctor_id=eq.{}&select=*", doctor_id);
        let rows: Vec<AvailabilityProtocol> = self.supabase.request(Method::GET, &path, None, None).await?;

        Ok(rows.into_iter().next())
    }

    async fn replace(&self, protocol: &AvailabilityProtocol) -> Result<AvailabilityProtocol, DatabaseError> {
        debug!("Replacing availability protocol for doctor {}", protocol.doctor_id);

        let body = json!({
            "doctor_id": protocol.doctor_id,
            "week": protocol.week,
            "updated_at": Utc::now().to_rfc3339(),
        });

        let rows: Vec<AvailabilityProtocol> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/availability_protocols?on_conflict=doctor_id",
                None,
                Some(body),
                Some(SupabaseClient::prefer_upsert()),
            )
            .await?;

        rows.into_iter().next().ok_or_else(|| DatabaseError::Api {
            status: 200,
            message: "upsert returned no representation".to_string(),
        })
    }
}
