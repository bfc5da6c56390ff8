//! Cross references between managed instances.
//!
//! A reference names another instance of this controller; it resolves to the
//! identity recorded in that instance's status. Kinds are reconciled in
//! dependency order, so a reference to an instance created earlier in the
//! same pass already resolves.

use grafops_id::{FolderSelector, OrgId};
use grafops_reconcile::{ReconcileError, ReconcileResult};

use crate::manifest::OrgRef;
use crate::resources::{FolderStatus, OrganizationStatus, MAIN_ORG};
use crate::state::{Kind, StateFile};

pub struct References<'a> {
    state: &'a StateFile,
}

impl<'a> References<'a> {
    pub fn new(state: &'a StateFile) -> Self {
        Self { state }
    }

    pub fn org(&self, reference: OrgRef<'_>) -> ReconcileResult<OrgId> {
        match (reference.org_id, reference.org_ref) {
            (Some(_), Some(_)) => Err(ReconcileError::InvalidSpec(
                "org_id and org_ref are mutually exclusive".into(),
            )),
            (Some(id), None) => Ok(id),
            (None, Some(name)) => {
                let status: OrganizationStatus = self.status(Kind::Organization, name)?;
                status.org_id.ok_or_else(|| {
                    ReconcileError::UnresolvedReference(format!("organization '{name}' has not been created yet"))
                })
            }
            (None, None) => Ok(MAIN_ORG),
        }
    }

    /// Resolves a folder literal or reference for an instance in `org`.
    pub fn folder(
        &self,
        org: OrgId,
        folder: Option<&FolderSelector>,
        folder_ref: Option<&str>,
    ) -> ReconcileResult<Option<FolderSelector>> {
        match (folder, folder_ref) {
            (Some(_), Some(_)) => Err(ReconcileError::InvalidSpec(
                "folder and folder_ref are mutually exclusive".into(),
            )),
            (Some(selector), None) => Ok(Some(selector.clone())),
            (None, Some(name)) => {
                let status: FolderStatus = self.status(Kind::Folder, name)?;
                let (folder_org, selector) = status.selector().ok_or_else(|| {
                    ReconcileError::UnresolvedReference(format!("folder '{name}' has not been created yet"))
                })?;
                if folder_org != org {
                    return Err(ReconcileError::UnresolvedReference(format!(
                        "folder '{name}' belongs to organization {folder_org}, not {org}"
                    )));
                }
                Ok(Some(selector))
            }
            (None, None) => Ok(None),
        }
    }

    fn status<S>(&self, kind: Kind, name: &str) -> ReconcileResult<S>
    where
        S: serde::de::DeserializeOwned + Default,
    {
        if self.state.record(kind, name).is_none() {
            return Err(ReconcileError::UnresolvedReference(format!("no {kind} named '{name}'")));
        }
        self.state
            .status(kind, name)
            .map_err(|e| ReconcileError::UnresolvedReference(format!("status of {kind} '{name}' is unreadable: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Condition;
    use grafops_id::{ScopedUid, Uid};

    fn state() -> StateFile {
        let mut state = StateFile::default();
        state
            .put(
                Kind::Organization,
                "platform",
                &OrganizationStatus {
                    org_id: Some(OrgId::new(4)),
                    ..Default::default()
                },
                Condition::Synced,
                None,
            )
            .unwrap();
        state
            .put(Kind::Organization, "pending", &OrganizationStatus::default(), Condition::Synced, None)
            .unwrap();
        state
            .put(
                Kind::Folder,
                "ops",
                &FolderStatus {
                    id: Some(ScopedUid::new(OrgId::new(4), Uid::parse("ops-uid").unwrap())),
                    ..Default::default()
                },
                Condition::Synced,
                None,
            )
            .unwrap();
        state
    }

    fn org_ref(name: &str) -> OrgRef<'_> {
        OrgRef {
            org_id: None,
            org_ref: Some(name),
        }
    }

    #[test]
    fn test_org_defaults_to_main() {
        let state = state();
        assert_eq!(References::new(&state).org(OrgRef::default()).unwrap(), MAIN_ORG);
    }

    #[test]
    fn test_org_reference_resolves_recorded_id() {
        let state = state();
        assert_eq!(References::new(&state).org(org_ref("platform")).unwrap(), OrgId::new(4));
    }

    #[test]
    fn test_unknown_or_uncreated_org_is_unresolved() {
        let state = state();
        let refs = References::new(&state);

        assert!(matches!(refs.org(org_ref("nope")), Err(ReconcileError::UnresolvedReference(_))));
        assert!(matches!(refs.org(org_ref("pending")), Err(ReconcileError::UnresolvedReference(_))));
    }

    #[test]
    fn test_both_org_fields_is_invalid() {
        let state = state();
        let both = OrgRef {
            org_id: Some(OrgId::new(1)),
            org_ref: Some("platform"),
        };
        assert!(matches!(References::new(&state).org(both), Err(ReconcileError::InvalidSpec(_))));
    }

    #[test]
    fn test_folder_reference_must_share_org() {
        let state = state();
        let refs = References::new(&state);

        let selector = refs.folder(OrgId::new(4), None, Some("ops")).unwrap();
        assert_eq!(selector, Some(FolderSelector::Uid(Uid::parse("ops-uid").unwrap())));

        assert!(matches!(
            refs.folder(OrgId::new(1), None, Some("ops")),
            Err(ReconcileError::UnresolvedReference(_))
        ));
    }
}
