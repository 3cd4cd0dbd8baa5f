//! BFR credential identifiers minted for approved workflows.

use kyc_core::{Decision, IdNumberRule, WorkflowState};
use sha2::{Digest, Sha256};

use crate::error::CredentialError;
use crate::workflow::KycWorkflow;

/// Hex characters of the digest kept in the identifier.
const SUFFIX_LEN: usize = 12;

/// Mint `BFR-<CC>-<YYYY>-<12 hex>` for a completed, approved workflow.
///
/// The suffix is derived from SHA-256 over the country code, normalized ID
/// number, date of birth and workflow id, so the same workflow always mints
/// the same identifier. The year is the workflow's creation year.
pub fn generate_credential_id(workflow: &KycWorkflow) -> Result<String, CredentialError> {
    let workflow_id = &workflow.workflow_id;
    if workflow.current_state != WorkflowState::Completed {
        return Err(CredentialError::NotCompleted {
            workflow_id: workflow_id.clone(),
            state: workflow.current_state,
        });
    }
    if workflow.final_decision != Some(Decision::Approved) {
        return Err(CredentialError::NotApproved {
            workflow_id: workflow_id.clone(),
        });
    }

    let missing = |field| CredentialError::MissingField {
        workflow_id: workflow_id.clone(),
        field,
    };
    let country = workflow.detected_country.ok_or_else(|| missing("detected country"))?;
    let fields = workflow
        .extracted_fields
        .as_ref()
        .ok_or_else(|| missing("extracted fields"))?;
    let id_number = fields.id_number.as_deref().ok_or_else(|| missing("id number"))?;
    let date_of_birth = fields
        .date_of_birth
        .as_deref()
        .ok_or_else(|| missing("date of birth"))?;
    let year = workflow
        .created_at
        .get(0..4)
        .filter(|y| y.chars().all(|c| c.is_ascii_digit()))
        .ok_or_else(|| missing("creation year"))?;

    let normalized_id = IdNumberRule::normalize(id_number);
    let mut hasher = Sha256::new();
    for part in [
        country.code(),
        normalized_id.as_str(),
        date_of_birth.trim(),
        workflow_id.as_str(),
    ] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    let digest = format!("{:x}", hasher.finalize());

    Ok(format!(
        "BFR-{}-{}-{}",
        country.code(),
        year,
        &digest[..SUFFIX_LEN]
    ))
}

#[cfg(test)]
mod tests {
    use kyc_core::{Country, IdentityFields};

    use super::*;
    use crate::workflow::Submission;

    fn approved() -> KycWorkflow {
        let mut wf = KycWorkflow::new(
            Submission::new("user-1", "doc-1"),
            "wf-1".to_string(),
            "chain-1".to_string(),
        );
        wf.created_at = "2026-03-14T09:00:00Z".to_string();
        wf.current_state = WorkflowState::Completed;
        wf.final_decision = Some(Decision::Approved);
        wf.detected_country = Some(Country::Namibia);
        wf.extracted_fields = Some(IdentityFields {
            id_number: Some("85010112345".to_string()),
            date_of_birth: Some("01/01/1985".to_string()),
            ..Default::default()
        });
        wf
    }

    #[test]
    fn format_and_determinism() {
        let id = generate_credential_id(&approved()).unwrap();
        assert!(id.starts_with("BFR-NA-2026-"));
        let suffix = id.rsplit('-').next().unwrap();
        assert_eq!(suffix.len(), SUFFIX_LEN);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(generate_credential_id(&approved()).unwrap(), id);
    }

    #[test]
    fn different_workflows_mint_different_ids() {
        let mut other = approved();
        other.workflow_id = "wf-2".to_string();
        assert_ne!(
            generate_credential_id(&approved()).unwrap(),
            generate_credential_id(&other).unwrap()
        );
    }

    #[test]
    fn rejected_workflow_has_no_credential() {
        let mut wf = approved();
        wf.final_decision = Some(Decision::Rejected);
        assert!(matches!(
            generate_credential_id(&wf),
            Err(CredentialError::NotApproved { .. })
        ));
    }

    #[test]
    fn incomplete_workflow_has_no_credential() {
        let mut wf = approved();
        wf.current_state = WorkflowState::Decided;
        assert!(matches!(
            generate_credential_id(&wf),
            Err(CredentialError::NotCompleted { .. })
        ));
    }

    #[test]
    fn missing_id_number_is_reported() {
        let mut wf = approved();
        wf.extracted_fields = Some(IdentityFields::default());
        assert_eq!(
            generate_credential_id(&wf),
            Err(CredentialError::MissingField {
                workflow_id: "wf-1".to_string(),
                field: "id number",
            })
        );
    }
}
