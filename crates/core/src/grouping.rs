//! Duplicate detection over a fully materialized identity snapshot.
//!
//! Identities are keyed by normalized email. Records without an email are
//! keyed by a `providerId@provider` placeholder instead, so they only group
//! with other records of the same provider account. A record with neither
//! an email nor a provider id has no key and is never grouped.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::models::{DuplicateGroup, IdentityRecord};

/// Lowercase, trimmed form of an email address.
pub fn normalize(email: &str) -> String {
    email.trim().to_lowercase()
}

/// The grouping key of a record: its normalized email, or a
/// `providerId@provider` placeholder when the email is absent or blank.
///
/// `None` when the provider id is blank too: every email-less `local`
/// account would otherwise share the key `@local`.
pub fn grouping_key(record: &IdentityRecord) -> Option<String> {
    match record.email.as_deref() {
        Some(email) if !email.trim().is_empty() => Some(normalize(email)),
        _ => {
            let provider_id = record.provider_id.trim();
            if provider_id.is_empty() {
                return None;
            }
            Some(format!("{}@{}", provider_id, record.provider.trim()))
        }
    }
}

/// Partition `records` into duplicate groups.
///
/// Groups come back in ascending key order; inside a group `local`-provider
/// identities come first, then ascending id. Groups with a single member are
/// dropped. Input order does not matter.
pub fn group_duplicates(records: &[IdentityRecord]) -> Vec<DuplicateGroup> {
    let mut by_key: BTreeMap<String, Vec<IdentityRecord>> = BTreeMap::new();
    let mut unkeyed = 0usize;
    for record in records {
        match grouping_key(record) {
            Some(key) => by_key.entry(key).or_default().push(record.clone()),
            None => unkeyed += 1,
        }
    }

    let groups: Vec<DuplicateGroup> = by_key
        .into_iter()
        .filter(|(_, members)| members.len() > 1)
        .map(|(email, mut members)| {
            members.sort_by(|a, b| {
                b.is_local()
                    .cmp(&a.is_local())
                    .then_with(|| a.id.cmp(&b.id))
            });

            let with_email = members.iter().filter(|m| m.has_email()).count();
            if with_email > 0 && with_email < members.len() {
                warn!(
                    email = %email,
                    members = members.len(),
                    "placeholder key collides with a real email address"
                );
            }

            debug!(email = %email, members = members.len(), "duplicate group");
            DuplicateGroup { email, members }
        })
        .collect();

    info!(
        identities = records.len(),
        groups = groups.len(),
        unkeyed,
        "grouped duplicate identities"
    );
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(id: &str, email: Option<&str>, provider: &str) -> IdentityRecord {
        IdentityRecord::new(id, email, provider, format!("pid-{}", id))
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for email in ["  A@X.com ", "a@x.com", "MiXeD@Example.ORG", ""] {
            let once = normalize(email);
            assert_eq!(normalize(&once), once);
        }
        assert_eq!(normalize("  A@X.com "), "a@x.com");
    }

    #[test]
    fn test_case_variants_co_group_with_local_first() {
        let records = vec![
            rec("2", Some("a@x.com"), "google"),
            rec("1", Some("A@X.com"), "local"),
        ];
        let groups = group_duplicates(&records);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].email, "a@x.com");
        assert_eq!(groups[0].members[0].id, "1");
        assert_eq!(groups[0].members[1].id, "2");
    }

    #[test]
    fn test_local_member_wins_regardless_of_id() {
        let records = vec![
            rec("a", Some("b@x.com"), "google"),
            rec("b", Some("b@x.com"), "facebook"),
            rec("z", Some("B@x.com"), "local"),
        ];
        let groups = group_duplicates(&records);
        assert_eq!(groups[0].members[0].id, "z");
        assert!(groups[0].members[0].is_local());
        assert_eq!(groups[0].members[1].id, "a");
    }

    #[test]
    fn test_ties_break_by_id() {
        let records = vec![
            rec("c", Some("t@x.com"), "google"),
            rec("a", Some("t@x.com"), "twitter"),
            rec("b", Some("t@x.com"), "facebook"),
        ];
        let ids: Vec<_> = group_duplicates(&records)[0]
            .members
            .iter()
            .map(|m| m.id.clone())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_singletons_are_dropped_and_groups_sorted() {
        let records = vec![
            rec("1", Some("zed@x.com"), "local"),
            rec("2", Some("zed@x.com"), "google"),
            rec("3", Some("solo@x.com"), "local"),
            rec("4", Some("abe@x.com"), "google"),
            rec("5", Some("ABE@x.com"), "google"),
        ];
        let groups = group_duplicates(&records);
        let emails: Vec<_> = groups.iter().map(|g| g.email.as_str()).collect();
        assert_eq!(emails, vec!["abe@x.com", "zed@x.com"]);
    }

    #[test]
    fn test_email_less_records_use_placeholder() {
        let records = vec![
            IdentityRecord::new("1", None, "twitter", "42"),
            IdentityRecord::new("2", Some("  "), "twitter", "42"),
            IdentityRecord::new("3", None, "google", "42"),
            IdentityRecord::new("4", Some("42@twitter-fan.com"), "local", ""),
        ];
        let groups = group_duplicates(&records);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].email, "42@twitter");
        assert_eq!(groups[0].members.len(), 2);
    }

    #[test]
    fn test_email_less_accounts_without_provider_id_never_group() {
        let records = vec![
            IdentityRecord::new("alice", None, "local", ""),
            IdentityRecord::new("bob", None, "local", ""),
            IdentityRecord::new("carol", Some(" "), "local", "  "),
            IdentityRecord::new("dave", Some("@local"), "local", ""),
        ];
        assert_eq!(grouping_key(&records[0]), None);
        assert_eq!(grouping_key(&records[2]), None);
        assert!(group_duplicates(&records).is_empty());
    }

    #[test]
    fn test_same_provider_different_provider_id_still_group() {
        let records = vec![
            IdentityRecord::new("1", Some("dup@x.com"), "google", "g-1"),
            IdentityRecord::new("2", Some("dup@x.com"), "google", "g-2"),
        ];
        assert_eq!(group_duplicates(&records).len(), 1);
    }

    #[test]
    fn test_every_identity_in_at_most_one_group() {
        let records: Vec<_> = (0..40)
            .map(|i| {
                let email = format!("user{}@X.com", i % 7);
                let provider = if i % 5 == 0 { "local" } else { "google" };
                rec(&format!("id{:02}", i), Some(email.as_str()), provider)
            })
            .collect();
        let groups = group_duplicates(&records);

        let mut seen = std::collections::HashSet::new();
        for group in &groups {
            for member in &group.members {
                assert!(seen.insert(member.id.clone()), "{} in two groups", member.id);
                assert_eq!(grouping_key(member).as_deref(), Some(group.email.as_str()));
            }
            if group.members.iter().any(|m| m.is_local()) {
                assert!(group.members[0].is_local());
            }
        }
        assert_eq!(seen.len(), 40);
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let mut records = vec![
            rec("1", Some("a@x.com"), "google"),
            rec("2", Some("A@x.com"), "local"),
            rec("3", Some("b@x.com"), "google"),
            rec("4", Some("b@X.com"), "facebook"),
        ];
        let forward = group_duplicates(&records);
        records.reverse();
        assert_eq!(group_duplicates(&records), forward);
    }
}
