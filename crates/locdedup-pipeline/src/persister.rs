//! Turns validated candidate groups into persisted `dedup_groups` rows.

use crate::error::Result;
use crate::store::GroupStore;
use chrono::Utc;
use locdedup::{CandidateGroup, DuplicateGroup, EntityKind, GroupSource, GroupStatus};
use locdedup_llm::{LlmDecision, ValidationOutcome};
use tracing::{debug, info};
use uuid::Uuid;

/// What one persistence pass did, for run totals and the scan response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistStats {
    pub created: usize,
    pub discarded_by_llm: usize,
    pub trimmed: usize,
}

/// Member lists after applying a decision. `None` means the group was
/// rejected outright.
#[must_use]
pub fn apply_decision(
    member_ids: &[String],
    member_names: &[String],
    decision: &LlmDecision,
) -> Option<(Vec<String>, Vec<String>, bool)> {
    if !decision.confirmed {
        return None;
    }

    let valid: Vec<&String> = decision
        .valid_member_ids
        .iter()
        .filter(|id| member_ids.contains(id))
        .collect();

    // Trim only on a usable strict subset; anything else keeps the group
    // whole (an empty or full list carries no trimming signal, a single
    // survivor is no longer a group).
    let is_strict_subset = !valid.is_empty() && valid.len() < member_ids.len();
    if !(is_strict_subset && valid.len() >= 2) {
        return Some((member_ids.to_vec(), member_names.to_vec(), false));
    }

    let mut ids = Vec::with_capacity(valid.len());
    let mut names = Vec::with_capacity(valid.len());
    for (id, name) in member_ids.iter().zip(member_names) {
        if decision.valid_member_ids.contains(id) {
            ids.push(id.clone());
            names.push(name.clone());
        }
    }
    Some((ids, names, true))
}

/// Build the row for one candidate, applying its validation outcome.
/// `None` means the validator rejected it and nothing is persisted.
#[must_use]
pub fn build_group(
    kind: EntityKind,
    candidate: &CandidateGroup,
    outcome: &ValidationOutcome,
) -> Option<(DuplicateGroup, bool)> {
    let (member_ids, member_names, normalized_name, source, llm_details, trimmed) = match outcome
    {
        ValidationOutcome::Skipped => (
            candidate.member_ids.clone(),
            candidate.member_names.clone(),
            candidate.normalized_name.clone(),
            GroupSource::Trigram,
            None,
            false,
        ),
        ValidationOutcome::Decided(decision) => {
            let (ids, names, trimmed) =
                apply_decision(&candidate.member_ids, &candidate.member_names, decision)?;
            let normalized_name = if decision.canonical_name.trim().is_empty() {
                candidate.normalized_name.clone()
            } else {
                decision.canonical_name.clone()
            };
            (
                ids,
                names,
                normalized_name,
                GroupSource::TrigramLlm,
                serde_json::to_value(decision).ok(),
                trimmed,
            )
        }
    };

    Some((
        DuplicateGroup {
            id: Uuid::new_v4(),
            entity_kind: kind,
            parent_id: candidate.parent_id.clone(),
            normalized_name,
            member_ids,
            member_names,
            mean_score: candidate.mean_score,
            source,
            llm_details,
            canonical_name: None,
            canonical_source: None,
            canonical_address: None,
            suggested_canonical_id: None,
            status: GroupStatus::Pending,
            chosen_canonical_id: None,
            chosen_name: None,
            executed_at: None,
            executed_by: None,
            reverted_at: None,
            decision_context: None,
            created_at: Utc::now(),
            total_fks_redirected: None,
        },
        trimmed,
    ))
}

/// Persist candidates in order. The clusterer already emits them by mean
/// score descending, so write order matches it. Returns the created groups
/// alongside the counters so the scan can hand them straight to enrichment.
pub async fn persist_groups(
    store: &GroupStore,
    kind: EntityKind,
    candidates: &[CandidateGroup],
    outcomes: &[ValidationOutcome],
) -> Result<(Vec<DuplicateGroup>, PersistStats)> {
    let mut stats = PersistStats::default();
    let mut created = Vec::new();

    for (candidate, outcome) in candidates.iter().zip(outcomes) {
        match build_group(kind, candidate, outcome) {
            Some((group, trimmed)) => {
                store.insert_group(&group).await?;
                stats.created += 1;
                if trimmed {
                    stats.trimmed += 1;
                    debug!(
                        "group {} trimmed to {} members",
                        group.id,
                        group.member_ids.len()
                    );
                }
                created.push(group);
            }
            None => {
                stats.discarded_by_llm += 1;
                debug!("candidate {:?} rejected by validator", candidate.member_ids);
            }
        }
    }

    info!(
        "persisted {} {} groups ({} rejected, {} trimmed)",
        stats.created, kind, stats.discarded_by_llm, stats.trimmed
    );
    Ok((created, stats))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate() -> CandidateGroup {
        CandidateGroup {
            member_ids: vec!["a".to_string(), "b".to_string(), "c".to_string()],
            member_names: vec![
                "Jardim Aurora".to_string(),
                "Jd Aurora".to_string(),
                "JARDIM AURORA".to_string(),
            ],
            parent_id: Some("100".to_string()),
            mean_score: 0.88,
            normalized_name: "aurora".to_string(),
        }
    }

    fn decision(confirmed: bool, valid: &[&str]) -> LlmDecision {
        LlmDecision {
            confirmed,
            confidence: 0.9,
            canonical_name: String::new(),
            rationale: "teste".to_string(),
            valid_member_ids: valid.iter().map(ToString::to_string).collect(),
        }
    }

    #[test]
    fn test_rejected_group_is_not_built() {
        let outcome = ValidationOutcome::Decided(decision(false, &[]));
        assert!(build_group(EntityKind::Neighborhood, &candidate(), &outcome).is_none());
    }

    #[test]
    fn test_skipped_group_persists_as_trigram_only() {
        let (group, trimmed) =
            build_group(EntityKind::Neighborhood, &candidate(), &ValidationOutcome::Skipped)
                .unwrap();
        assert_eq!(group.source, GroupSource::Trigram);
        assert!(group.llm_details.is_none());
        assert!(!trimmed);
        assert_eq!(group.member_ids.len(), 3);
        assert_eq!(group.status, GroupStatus::Pending);
    }

    #[test]
    fn test_trim_preserves_original_member_order() {
        // The decision lists the subset backwards; the group keeps its own order.
        let mut d = decision(true, &["c", "a"]);
        d.valid_member_ids = vec!["c".to_string(), "a".to_string()];
        let (ids, names, trimmed) =
            apply_decision(&candidate().member_ids, &candidate().member_names, &d).unwrap();
        assert!(trimmed);
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(names, vec!["Jardim Aurora", "JARDIM AURORA"]);
    }

    #[test]
    fn test_full_list_is_not_a_trim() {
        let d = decision(true, &["a", "b", "c"]);
        let (ids, _, trimmed) =
            apply_decision(&candidate().member_ids, &candidate().member_names, &d).unwrap();
        assert!(!trimmed);
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn test_single_survivor_keeps_group_whole() {
        let d = decision(true, &["a"]);
        let (ids, _, trimmed) =
            apply_decision(&candidate().member_ids, &candidate().member_names, &d).unwrap();
        assert!(!trimmed);
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn test_unknown_ids_in_decision_are_ignored() {
        let d = decision(true, &["a", "b", "zz"]);
        let (ids, _, trimmed) =
            apply_decision(&candidate().member_ids, &candidate().member_names, &d).unwrap();
        assert!(trimmed);
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_canonical_name_replaces_normalized() {
        let mut d = decision(true, &[]);
        d.canonical_name = "Jardim Aurora".to_string();
        let outcome = ValidationOutcome::Decided(d);
        let (group, _) = build_group(EntityKind::Neighborhood, &candidate(), &outcome).unwrap();
        assert_eq!(group.normalized_name, "Jardim Aurora");
        assert_eq!(group.source, GroupSource::TrigramLlm);
        assert!(group.llm_details.is_some());
    }

    #[test]
    fn test_trimmed_group_records_decision() {
        let d = decision(true, &["a", "b"]);
        let outcome = ValidationOutcome::Decided(d);
        let (group, trimmed) =
            build_group(EntityKind::Neighborhood, &candidate(), &outcome).unwrap();
        assert!(trimmed);
        assert_eq!(group.member_ids, vec!["a", "b"]);
        assert_eq!(group.member_names, vec!["Jardim Aurora", "Jd Aurora"]);
        let details = group.llm_details.unwrap();
        assert_eq!(details["confidence"], 0.9);
    }
}
