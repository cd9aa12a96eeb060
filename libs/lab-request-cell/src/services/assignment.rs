// libs/lab-request-cell/src/services/assignment.rs
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::PreAssignmentPolicy;
use shared_models::auth::{Principal, Role};

use crate::models::{
    CreateLabRequest, LabRequest, LabRequestError, LabRequestEvent, LabRequestQuery, LabRequestStatus,
};
use crate::services::store::LabRequestStore;
use crate::services::workflow::{transition, Transition};

#[derive(Clone)]
pub struct LabRequestService {
    store: Arc<dyn LabRequestStore>,
    policy: PreAssignmentPolicy,
}

impl LabRequestService {
    pub fn new(store: Arc<dyn LabRequestStore>, policy: PreAssignmentPolicy) -> Self {
        Self { store, policy }
    }

    /// Opens a PENDING request on behalf of the calling doctor.
    pub async fn create(&self, principal: &Principal, request: CreateLabRequest) -> Result<LabRequest, LabRequestError> {
        if !(principal.has_role(Role::Doctor) || principal.is_admin()) {
            return Err(LabRequestError::Unauthorized(
                "only doctors can request lab work".to_string(),
            ));
        }

        let file_title = request.file_title.trim();
        if file_title.is_empty() {
            return Err(LabRequestError::ValidationError("file_title must not be blank".to_string()));
        }

        let now = Utc::now();
        let lab_request = LabRequest {
            id: Uuid::new_v4(),
            patient_id: request.patient_id,
            requested_by: principal.user_id,
            file_title: file_title.to_string(),
            notes: request.notes.filter(|notes| !notes.trim().is_empty()),
            status: LabRequestStatus::Pending,
            assignee_laborant_id: request.assignee_laborant_id,
            medical_file_id: None,
            requested_at: now,
            updated_at: now,
        };

        let saved = self.store.insert(&lab_request).await?;
        info!(
            "Lab request {} created by {} for patient {}",
            saved.id, saved.requested_by, saved.patient_id
        );
        Ok(saved)
    }

    /// The calling laborant takes the request.
    pub async fn claim(&self, principal: &Principal, request_id: Uuid) -> Result<LabRequest, LabRequestError> {
        if !principal.has_role(Role::Laborant) {
            return Err(LabRequestError::Unauthorized("only laborants can claim lab requests".to_string()));
        }

        let current = self.load(request_id).await?;
        self.apply(current, LabRequestEvent::Claim { laborant_id: principal.user_id })
            .await
    }

    /// The creating doctor hands the request to `laborant_id`.
    pub async fn assign(
        &self,
        principal: &Principal,
        request_id: Uuid,
        laborant_id: Uuid,
    ) -> Result<LabRequest, LabRequestError> {
        let current = self.load(request_id).await?;
        ensure_creator(principal, &current)?;
        self.apply(current, LabRequestEvent::Assign { laborant_id }).await
    }

    /// The assignee attaches the result file and closes the request.
    pub async fn complete(
        &self,
        principal: &Principal,
        request_id: Uuid,
        medical_file_id: i64,
    ) -> Result<LabRequest, LabRequestError> {
        if medical_file_id <= 0 {
            return Err(LabRequestError::ValidationError(format!(
                "medical_file_id must be positive, got {}",
                medical_file_id
            )));
        }

        let current = self.load(request_id).await?;
        self.apply(
            current,
            LabRequestEvent::Complete {
                by: principal.user_id,
                medical_file_id,
            },
        )
        .await
    }

    pub async fn cancel(&self, principal: &Principal, request_id: Uuid) -> Result<LabRequest, LabRequestError> {
        let current = self.load(request_id).await?;
        ensure_creator(principal, &current)?;
        self.apply(current, LabRequestEvent::Cancel).await
    }

    pub async fn get(&self, principal: &Principal, request_id: Uuid) -> Result<LabRequest, LabRequestError> {
        let request = self.load(request_id).await?;

        let visible = match principal.role {
            Role::Admin | Role::Laborant => true,
            Role::Doctor => request.requested_by == principal.user_id,
            Role::Patient => request.patient_id == principal.user_id,
        };
        if !visible {
            return Err(LabRequestError::Unauthorized("not allowed to view this lab request".to_string()));
        }
        Ok(request)
    }

    /// Lab requests matching `query`. Doctors see what they requested and
    /// patients see their own.
    pub async fn list(&self, principal: &Principal, mut query: LabRequestQuery) -> Result<Vec<LabRequest>, LabRequestError> {
        match principal.role {
            Role::Doctor => query.requested_by = Some(principal.user_id),
            Role::Patient => query.patient_id = Some(principal.user_id),
            Role::Laborant | Role::Admin => {}
        }

        debug!("Listing lab requests with {:?}", query);
        Ok(self.store.list(&query).await?)
    }

    async fn load(&self, request_id: Uuid) -> Result<LabRequest, LabRequestError> {
        self.store.fetch(request_id).await?.ok_or(LabRequestError::NotFound)
    }

    /// Runs `event` as a conditional write on the observed state. A lost race
    /// is judged again against the fresh row, so the loser of a claim sees
    /// `AlreadyClaimed` and a repeat of the winning claim sees success.
    async fn apply(&self, current: LabRequest, event: LabRequestEvent) -> Result<LabRequest, LabRequestError> {
        let update = match transition(&current, &event, self.policy)? {
            Transition::Unchanged => {
                debug!("Lab request {} already satisfies {}", current.id, event.action());
                return Ok(current);
            }
            Transition::Changed(update) => update,
        };

        if let Some(updated) = self.store.compare_and_set(&current.snapshot(), &update).await? {
            info!(
                "Lab request {} {} -> {} (assignee {:?})",
                updated.id, current.status, updated.status, updated.assignee_laborant_id
            );
            return Ok(updated);
        }

        warn!("Lab request {} changed during {}", current.id, event.action());
        let fresh = self.load(current.id).await?;
        match transition(&fresh, &event, self.policy)? {
            Transition::Unchanged => Ok(fresh),
            Transition::Changed(_) => Err(LabRequestError::ConcurrentUpdate),
        }
    }
}

fn ensure_creator(principal: &Principal, request: &LabRequest) -> Result<(), LabRequestError> {
    if principal.is_self_or_admin(request.requested_by) {
        Ok(())
    } else {
        Err(LabRequestError::Unauthorized(
            "only the requesting doctor can manage this lab request".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LabRequestSnapshot;
    use crate::services::store::{InMemoryLabRequestStore, MockLabRequestStore};
    use assert_matches::assert_matches;

    fn service(policy: PreAssignmentPolicy) -> LabRequestService {
        LabRequestService::new(Arc::new(InMemoryLabRequestStore::new()), policy)
    }

    fn blood_panel(patient_id: Uuid) -> CreateLabRequest {
        CreateLabRequest {
            patient_id,
            file_title: "Blood panel".to_string(),
            notes: None,
            assignee_laborant_id: None,
        }
    }

    #[tokio::test]
    async fn test_claim_complete_then_cancel_fails() {
        let service = service(PreAssignmentPolicy::Advisory);
        let doctor = Principal::doctor(Uuid::new_v4());
        let l1 = Principal::laborant(Uuid::new_v4());

        let created = service.create(&doctor, blood_panel(Uuid::new_v4())).await.unwrap();
        assert_eq!(created.status, LabRequestStatus::Pending);
        assert_eq!(created.requested_by, doctor.user_id);

        let claimed = service.claim(&l1, created.id).await.unwrap();
        assert_eq!(claimed.status, LabRequestStatus::Assigned);
        assert_eq!(claimed.assignee_laborant_id, Some(l1.user_id));

        let completed = service.complete(&l1, created.id, 42).await.unwrap();
        assert_eq!(completed.status, LabRequestStatus::Completed);
        assert_eq!(completed.medical_file_id, Some(42));

        assert_matches!(
            service.cancel(&doctor, created.id).await,
            Err(LabRequestError::InvalidTransition { from: LabRequestStatus::Completed, .. })
        );
    }

    #[tokio::test]
    async fn test_blank_title_is_rejected() {
        let service = service(PreAssignmentPolicy::Advisory);
        let mut request = blood_panel(Uuid::new_v4());
        request.file_title = "   ".to_string();

        assert_matches!(
            service.create(&Principal::doctor(Uuid::new_v4()), request).await,
            Err(LabRequestError::ValidationError(_))
        );
    }

    #[tokio::test]
    async fn test_only_creator_assigns_or_cancels() {
        let service = service(PreAssignmentPolicy::Advisory);
        let creator = Principal::doctor(Uuid::new_v4());
        let colleague = Principal::doctor(Uuid::new_v4());
        let created = service.create(&creator, blood_panel(Uuid::new_v4())).await.unwrap();
        let laborant = Uuid::new_v4();

        assert_matches!(
            service.assign(&colleague, created.id, laborant).await,
            Err(LabRequestError::Unauthorized(_))
        );
        assert_matches!(service.cancel(&colleague, created.id).await, Err(LabRequestError::Unauthorized(_)));

        let assigned = service.assign(&creator, created.id, laborant).await.unwrap();
        assert_eq!(assigned.assignee_laborant_id, Some(laborant));

        let canceled = service.cancel(&creator, created.id).await.unwrap();
        assert_eq!(canceled.status, LabRequestStatus::Canceled);
    }

    #[tokio::test]
    async fn test_wrong_laborant_cannot_complete() {
        let service = service(PreAssignmentPolicy::Advisory);
        let doctor = Principal::doctor(Uuid::new_v4());
        let (l1, l2) = (Principal::laborant(Uuid::new_v4()), Principal::laborant(Uuid::new_v4()));

        let created = service.create(&doctor, blood_panel(Uuid::new_v4())).await.unwrap();
        service.claim(&l1, created.id).await.unwrap();

        assert_matches!(service.complete(&l2, created.id, 42).await, Err(LabRequestError::NotAssignee));
        assert_matches!(
            service.claim(&l2, created.id).await,
            Err(LabRequestError::AlreadyClaimed { holder }) if holder == l1.user_id
        );
        assert_matches!(service.complete(&l1, created.id, 0).await, Err(LabRequestError::ValidationError(_)));
    }

    #[tokio::test]
    async fn test_binding_pre_assignment_blocks_other_laborants() {
        let service = service(PreAssignmentPolicy::Binding);
        let doctor = Principal::doctor(Uuid::new_v4());
        let (pre, other) = (Principal::laborant(Uuid::new_v4()), Principal::laborant(Uuid::new_v4()));

        let mut request = blood_panel(Uuid::new_v4());
        request.assignee_laborant_id = Some(pre.user_id);
        let created = service.create(&doctor, request).await.unwrap();

        assert_matches!(service.claim(&other, created.id).await, Err(LabRequestError::AlreadyClaimed { .. }));
        assert_matches!(
            service.assign(&doctor, created.id, other.user_id).await,
            Err(LabRequestError::AlreadyClaimed { holder }) if holder == pre.user_id
        );
        let untouched = service.get(&doctor, created.id).await.unwrap();
        assert_eq!(untouched.status, LabRequestStatus::Pending);
        assert_eq!(untouched.assignee_laborant_id, Some(pre.user_id));

        let claimed = service.claim(&pre, created.id).await.unwrap();
        assert_eq!(claimed.status, LabRequestStatus::Assigned);
    }

    #[tokio::test]
    async fn test_lost_claim_race_reports_winner() {
        let id = Uuid::new_v4();
        let winner = Uuid::new_v4();
        let pending = LabRequest {
            id,
            patient_id: Uuid::new_v4(),
            requested_by: Uuid::new_v4(),
            file_title: "Thyroid".to_string(),
            notes: None,
            status: LabRequestStatus::Pending,
            assignee_laborant_id: None,
            medical_file_id: None,
            requested_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let taken = LabRequest {
            status: LabRequestStatus::Assigned,
            assignee_laborant_id: Some(winner),
            ..pending.clone()
        };

        let mut store = MockLabRequestStore::new();
        // Popped from the back: first read PENDING, re-read ASSIGNED.
        let mut reads = vec![taken, pending];
        store.expect_fetch().times(2).returning(move |_| Ok(reads.pop()));
        store
            .expect_compare_and_set()
            .withf(|expected: &LabRequestSnapshot, _| expected.assignee_laborant_id.is_none())
            .times(1)
            .returning(|_, _| Ok(None));

        let service = LabRequestService::new(Arc::new(store), PreAssignmentPolicy::Advisory);
        let result = service.claim(&Principal::laborant(Uuid::new_v4()), id).await;

        assert_matches!(result, Err(LabRequestError::AlreadyClaimed { holder }) if holder == winner);
    }

    #[tokio::test]
    async fn test_list_is_scoped_by_role() {
        let service = service(PreAssignmentPolicy::Advisory);
        let (d1, d2) = (Principal::doctor(Uuid::new_v4()), Principal::doctor(Uuid::new_v4()));
        let patient = Uuid::new_v4();

        service.create(&d1, blood_panel(patient)).await.unwrap();
        service.create(&d2, blood_panel(Uuid::new_v4())).await.unwrap();

        assert_eq!(service.list(&d1, LabRequestQuery::default()).await.unwrap().len(), 1);
        assert_eq!(
            service.list(&Principal::patient(patient), LabRequestQuery::default()).await.unwrap().len(),
            1
        );

        let pending = LabRequestQuery {
            status: Some(LabRequestStatus::Pending),
            ..Default::default()
        };
        assert_eq!(
            service.list(&Principal::laborant(Uuid::new_v4()), pending).await.unwrap().len(),
            2
        );
    }
}
