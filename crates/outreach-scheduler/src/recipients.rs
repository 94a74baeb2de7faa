//! Recipient resolution — group ref to concrete, email-bearing people.
//!
//! Membership is read at dispatch time, never at task-definition time.
//! Entries without a usable address are dropped before the batch is
//! sized; an empty group is an empty batch, not an error.

use std::sync::Arc;

use outreach_core::error::Result;
use outreach_core::types::{Recipient, ScheduledTask, TargetRef};
use outreach_store::Store;

pub struct RecipientResolver {
    store: Arc<Store>,
}

impl RecipientResolver {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Expand the task's target into deliverable recipients.
    pub fn resolve(&self, task: &ScheduledTask) -> Result<Vec<Recipient>> {
        let recipients: Vec<Recipient> = match &task.target {
            TargetRef::CandidateGroup(group_id) => self
                .store
                .candidates_in_group(group_id)?
                .into_iter()
                .map(Recipient::Candidate)
                .collect(),
            TargetRef::ContactGroup(group_id) => self
                .store
                .contacts_in_group(group_id)?
                .into_iter()
                .map(Recipient::Contact)
                .collect(),
        };

        let total = recipients.len();
        let deliverable: Vec<Recipient> = recipients
            .into_iter()
            .filter(|r| r.email().is_some())
            .collect();
        if deliverable.len() < total {
            tracing::warn!(
                task = %task.id,
                skipped = total - deliverable.len(),
                "recipients without a usable address excluded"
            );
        }
        Ok(deliverable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outreach_core::types::{
        Cadence, Candidate, Contact, Gender, IdentitySelection, RecipientGroup,
    };
    use chrono::Utc;

    fn store_with_group() -> Arc<Store> {
        let store = Arc::new(Store::in_memory().unwrap());
        let group = RecipientGroup {
            id: "g1".into(),
            owner: "op".into(),
            name: "engineers".into(),
            description: None,
        };
        store.save_group(&group, "candidate").unwrap();
        store
    }

    fn task(target: TargetRef) -> ScheduledTask {
        ScheduledTask::new(
            "op",
            "t",
            target,
            "tpl",
            IdentitySelection::Single("i1".into()),
            Cadence::Daily,
            Utc::now(),
        )
    }

    #[test]
    fn test_addressless_candidates_excluded() {
        let store = store_with_group();
        for (id, emails) in [
            ("c1", vec!["a@example.com".to_string()]),
            ("c2", vec![]),
            ("c3", vec!["".to_string()]),
        ] {
            store
                .save_candidate(&Candidate {
                    id: id.into(),
                    owner: "op".into(),
                    name: id.to_uppercase(),
                    emails,
                    gender: Gender::Unknown,
                    location: None,
                    predicted_position: None,
                    keywords: vec![],
                })
                .unwrap();
            store.add_group_member("g1", id).unwrap();
        }

        let resolver = RecipientResolver::new(store);
        let resolved = resolver
            .resolve(&task(TargetRef::CandidateGroup("g1".into())))
            .unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].id(), "c1");
    }

    #[test]
    fn test_empty_group_is_empty_not_error() {
        let store = store_with_group();
        let resolver = RecipientResolver::new(store);
        let resolved = resolver
            .resolve(&task(TargetRef::CandidateGroup("g1".into())))
            .unwrap();
        assert!(resolved.is_empty());
    }

    #[test]
    fn test_missing_group_is_empty_not_error() {
        let resolver = RecipientResolver::new(Arc::new(Store::in_memory().unwrap()));
        let resolved = resolver
            .resolve(&task(TargetRef::ContactGroup("nope".into())))
            .unwrap();
        assert!(resolved.is_empty());
    }

    #[test]
    fn test_contact_group_resolution() {
        let store = Arc::new(Store::in_memory().unwrap());
        store
            .save_contact(&Contact {
                id: "k1".into(),
                owner: "op".into(),
                name: "Kim".into(),
                gender: Gender::Female,
                email: "kim@acme.example".into(),
                company: "Acme".into(),
                position: None,
                department: None,
                is_active: true,
            })
            .unwrap();
        store.add_group_member("g2", "k1").unwrap();

        let resolver = RecipientResolver::new(store);
        let resolved = resolver
            .resolve(&task(TargetRef::ContactGroup("g2".into())))
            .unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].email(), Some("kim@acme.example"));
    }
}
