// libs/lab-request-cell/src/services/store.rs
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

use crate::models::{LabRequest, LabRequestQuery, LabRequestSnapshot, LabRequestUpdate};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LabRequestStore: Send + Sync {
    async fn insert(&self, request: &LabRequest) -> Result<LabRequest, DatabaseError>;

    async fn fetch(&self, id: Uuid) -> Result<Option<LabRequest>, DatabaseError>;

    async fn list(&self, query: &LabRequestQuery) -> Result<Vec<LabRequest>, DatabaseError>;

    /// Writes `update` only while status and assignee still match `expected`.
    /// `None` means another writer got there first.
    async fn compare_and_set(
        &self,
        expected: &LabRequestSnapshot,
        update: &LabRequestUpdate,
    ) -> Result<Option<LabRequest>, DatabaseError>;
}

#[derive(Default)]
pub struct InMemoryLabRequestStore {
    requests: RwLock<HashMap<Uuid, LabRequest>>,
}

impl InMemoryLabRequestStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LabRequestStore for InMemoryLabRequestStore {
    async fn insert(&self, request: &LabRequest) -> Result<LabRequest, DatabaseError> {
        let mut requests = self.requests.write().await;
        if requests.contains_key(&request.id) {
            return Err(DatabaseError::Conflict(format!("lab request {} already exists", request.id)));
        }
        requests.insert(request.id, request.clone());
        Ok(request.clone())
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<LabRequest>, DatabaseError> {
        Ok(self.requests.read().await.get(&id).cloned())
    }

    async fn list(&self, query: &LabRequestQuery) -> Result<Vec<LabRequest>, DatabaseError> {
        let mut found: Vec<LabRequest> = self
            .requests
            .read()
            .await
            .values()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();
        found.sort_by_key(|r| r.requested_at);
        Ok(found)
    }

    async fn compare_and_set(
        &self,
        expected: &LabRequestSnapshot,
        update: &LabRequestUpdate,
    ) -> Result<Option<LabRequest>, DatabaseError> {
        let mut requests = self.requests.write().await;

        let Some(current) = requests.get_mut(&expected.id) else {
            return Ok(None);
        };
        if current.snapshot() != *expected {
            return Ok(None);
        }

        current.status = update.status;
        current.assignee_laborant_id = update.assignee_laborant_id;
        current.medical_file_id = update.medical_file_id;
        current.updated_at = Utc::now();
        Ok(Some(current.clone()))
    }
}

/// Lab requests in the `lab_requests` table.
pub struct SupabaseLabRequestStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseLabRequestStore {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    fn list_path(query: &LabRequestQuery) -> String {
        let mut path = String::from("/rest/v1/lab_requests?select=*");
        if let Some(status) = query.status {
            path.push_str(&format!("&status=eq.{}", status));
        }
        if let Some(assignee) = query.assignee_laborant_id {
            path.push_str(&format!("&assignee_laborant_id=eq.{}", assignee));
        }
        if let Some(patient_id) = query.patient_id {
            path.push_str(&format!("&patient_id=eq.{}", patient_id));
        }
        if let Some(requested_by) = query.requested_by {
            path.push_str(&format!("&requested_by=eq.{}", requested_by));
        }
        path.push_str("&order=requested_at.asc");
        path
    }

    fn guarded_path(expected: &LabRequestSnapshot) -> String {
        let assignee_filter = match expected.assignee_laborant_id {
            Some(id) => format!("eq.{}", id),
            None => "is.null".to_string(),
        };
        format!(
            "/rest/v1/lab_requests?id=eq.{}&status=eq.{}&assignee_laborant_id={}",
            expected.id, expected.status, assignee_filter
        )
    }
}

#[async_trait]
impl LabRequestStore for SupabaseLabRequestStore {
    async fn insert(&self, request: &LabRequest) -> Result<LabRequest, DatabaseError> {
        debug!("Inserting lab request {} for patient {}", request.id, request.patient_id);

        let body = serde_json::to_value(request)?;
        let rows: Vec<LabRequest> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/lab_requests",
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

    async fn fetch(&self, id: Uuid) -> Result<Option<LabRequest>, DatabaseError> {
        let path = format!("/rest/v1/lab_requests?id=eq.{}&select=*", id);
        let rows: Vec<LabRequest> = self.supabase.request(Method::GET, &path, None, None).await?;
        Ok(rows.into_iter().next())
    }

    async fn list(&self, query: &LabRequestQuery) -> Result<Vec<LabRequest>, DatabaseError> {
        let path = Self::list_path(query);
        self.supabase.request(Method::GET, &path, None, None).await
    }

    async fn compare_and_set(
        &self,
        expected: &LabRequestSnapshot,
        update: &LabRequestUpdate,
    ) -> Result<Option<LabRequest>, DatabaseError> {
        let body = json!({
            "status": update.status,
            "assignee_laborant_id": update.assignee_laborant_id,
            "medical_file_id": update.medical_file_id,
            "updated_at": Utc::now().to_rfc3339(),
        });

        let rows: Vec<LabRequest> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &Self::guarded_path(expected),
                None,
                Some(body),
                Some(SupabaseClient::prefer_representation()),
            )
            .await?;

        Ok(rows.into_iter().next())
    }
}
