//! Merge plans: one canonical identity and the identities it absorbs.
//!
//! Plans are built either from in-memory duplicate groups
//! ([`build_plans`]) or from a persisted plan file ([`plan_file::load`]).

pub mod plan_file;

use std::collections::HashSet;

use tracing::debug;

use crate::errors::PlanError;
use crate::models::{DuplicateGroup, MergePlan};

/// Build the plan for one duplicate group. `members[0]` becomes the
/// canonical identity.
pub fn build_plan(group: &DuplicateGroup) -> Result<MergePlan, PlanError> {
    let (main, others) = match group.members.split_first() {
        Some((main, others)) if !others.is_empty() => (main, others),
        _ => {
            return Err(PlanError::InvalidGroup {
                email: group.email.clone(),
                detail: format!("expected at least 2 members, found {}", group.members.len()),
            })
        }
    };

    let mut seen = HashSet::new();
    seen.insert(main.id.as_str());
    for other in others {
        if !seen.insert(other.id.as_str()) {
            return Err(PlanError::InvalidGroup {
                email: group.email.clone(),
                detail: format!("identity '{}' appears more than once", other.id),
            });
        }
    }

    let plan = MergePlan {
        email: group.email.clone(),
        main_id: main.id.clone(),
        other_ids: others.iter().map(|m| m.id.clone()).collect(),
    };
    debug!(email = %plan.email, main_id = %plan.main_id, others = plan.other_ids.len(), "built merge plan");
    Ok(plan)
}

/// Build plans for every group, preserving group order.
pub fn build_plans(groups: &[DuplicateGroup]) -> Result<Vec<MergePlan>, PlanError> {
    groups.iter().map(build_plan).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouping::group_duplicates;
    use crate::models::IdentityRecord;

    #[test]
    fn test_scenario_local_identity_becomes_main() {
        let records = vec![
            IdentityRecord::new("1", Some("A@X.com"), "local", ""),
            IdentityRecord::new("2", Some("a@x.com"), "google", "g-2"),
        ];
        let plans = build_plans(&group_duplicates(&records)).unwrap();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].email, "a@x.com");
        assert_eq!(plans[0].main_id, "1");
        assert_eq!(plans[0].other_ids, vec!["2".to_string()]);
    }

    #[test]
    fn test_single_member_group_is_invalid() {
        let group = DuplicateGroup {
            email: "solo@x.com".into(),
            members: vec![IdentityRecord::new("1", Some("solo@x.com"), "local", "")],
        };
        assert!(matches!(
            build_plan(&group),
            Err(PlanError::InvalidGroup { .. })
        ));

        let empty = DuplicateGroup {
            email: "none@x.com".into(),
            members: Vec::new(),
        };
        assert!(build_plan(&empty).is_err());
    }

    #[test]
    fn test_main_never_in_others() {
        let group = DuplicateGroup {
            email: "a@x.com".into(),
            members: vec![
                IdentityRecord::new("1", Some("a@x.com"), "local", ""),
                IdentityRecord::new("1", Some("a@x.com"), "google", ""),
            ],
        };
        assert!(matches!(
            build_plan(&group),
            Err(PlanError::InvalidGroup { .. })
        ));
    }

    #[test]
    fn test_plans_are_deterministic() {
        let records = vec![
            IdentityRecord::new("9", Some("b@x.com"), "google", ""),
            IdentityRecord::new("3", Some("b@x.com"), "facebook", ""),
            IdentityRecord::new("5", Some("c@x.com"), "local", ""),
            IdentityRecord::new("4", Some("C@x.com"), "local", ""),
        ];
        let first = build_plans(&group_duplicates(&records)).unwrap();
        let second = build_plans(&group_duplicates(&records)).unwrap();
        assert_eq!(first, second);
        assert_eq!(first[0].main_id, "3");
        assert_eq!(first[1].main_id, "4");
        assert_eq!(first[1].other_ids, vec!["5".to_string()]);
    }
}
