// libs/lab-request-cell/src/services/workflow.rs
use shared_config::PreAssignmentPolicy;

use crate::models::{LabRequest, LabRequestError, LabRequestEvent, LabRequestStatus, LabRequestUpdate};

/// Outcome of applying an event to a lab request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The request is already where the event would put it.
    Unchanged,
    Changed(LabRequestUpdate),
}

/// The single source of truth for lab request state changes.
///
/// ```text
/// PENDING --claim/assign--> ASSIGNED --complete--> COMPLETED
/// PENDING/ASSIGNED --cancel--> CANCELED
/// ```
///
/// A PENDING request with a pre-chosen assignee can also be completed by that
/// assignee directly.
pub fn transition(
    request: &LabRequest,
    event: &LabRequestEvent,
    policy: PreAssignmentPolicy,
) -> Result<Transition, LabRequestError> {
    use LabRequestStatus::*;

    match (*event, request.status, request.assignee_laborant_id) {
        (LabRequestEvent::Claim { laborant_id } | LabRequestEvent::Assign { laborant_id }, Pending, Some(holder))
            if holder != laborant_id && policy == PreAssignmentPolicy::Binding =>
        {
            Err(LabRequestError::AlreadyClaimed { holder })
        }
        (LabRequestEvent::Claim { laborant_id } | LabRequestEvent::Assign { laborant_id }, Pending, _) => {
            Ok(Transition::Changed(LabRequestUpdate {
                status: Assigned,
                assignee_laborant_id: Some(laborant_id),
                medical_file_id: None,
            }))
        }
        (LabRequestEvent::Claim { laborant_id } | LabRequestEvent::Assign { laborant_id }, Assigned, Some(holder)) => {
            if holder == laborant_id {
                Ok(Transition::Unchanged)
            } else {
                Err(LabRequestError::AlreadyClaimed { holder })
            }
        }

        (LabRequestEvent::Complete { by, medical_file_id }, Assigned | Pending, Some(holder)) => {
            if by != holder {
                return Err(LabRequestError::NotAssignee);
            }
            Ok(Transition::Changed(LabRequestUpdate {
                status: Completed,
                assignee_laborant_id: Some(holder),
                medical_file_id: Some(medical_file_id),
            }))
        }

        (LabRequestEvent::Cancel, Pending | Assigned, assignee) => Ok(Transition::Changed(LabRequestUpdate {
            status: Canceled,
            assignee_laborant_id: assignee,
            medical_file_id: None,
        })),

        (_, status, _) => Err(LabRequestError::invalid_transition(status, event)),
    }
}
