//! Detection, validation, enrichment and reversible merge execution for
//! duplicate location records.
//!
//! The [`Pipeline`] struct is the process-wide context the design notes ask
//! for: it carries the store, the validator, the enricher and the tuning
//! knobs, and every operation the HTTP surface exposes is a method on it.
//! Nothing in this crate reads global state.

pub mod detector;
pub mod enricher;
pub mod error;
pub mod impact;
pub mod merger;
pub mod persister;
pub mod reports;
pub mod scan;
pub mod reverser;
pub mod schema;
pub mod store;

pub use detector::DetectorParams;
pub use enricher::{CanonicalResolution, Enricher, EnrichmentResult};
pub use error::{PipelineError, Result};
pub use impact::{MemberImpact, TableCount};
pub use merger::{MergeOutcome, MergeRequest};
pub use reverser::RevertOutcome;
pub use scan::{KindScan, ScanOutcome};
pub use store::{GroupFilter, GroupPage, GroupStore, RunGuard};

use futures::future::join_all;
use locdedup::{CandidateGroup, DuplicateGroup, EntityKind, MemberContext, RunLog};
use locdedup_llm::{ValidationOutcome, Validator};
use tracing::{info, warn};
use uuid::Uuid;

/// Tuning knobs resolved from the environment at startup.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Trigram similarity threshold τ.
    pub similarity_threshold: f64,
    /// Maximum pairs per detection query (L).
    pub pair_limit: i64,
    /// Gate for the enrichment stage.
    pub enrichment_enabled: bool,
    /// Confidence floor for `/grupos/auto-aprovaveis`.
    pub auto_approve_confidence: f64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.4,
            pair_limit: 200,
            enrichment_enabled: true,
            auto_approve_confidence: 0.90,
        }
    }
}

/// Everything a request handler needs, built once at startup.
pub struct Pipeline {
    pub store: GroupStore,
    pub validator: Validator,
    pub enricher: Enricher,
    pub settings: PipelineSettings,
}

/// Per-id outcome of a batch approval.
#[derive(Debug)]
pub struct BatchApprovalItem {
    pub group_id: Uuid,
    pub result: Result<MergeOutcome>,
}

impl Pipeline {
    #[must_use]
    pub fn new(
        store: GroupStore,
        validator: Validator,
        enricher: Enricher,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            validator,
            enricher,
            settings,
        }
    }

    fn detector_params(&self) -> DetectorParams {
        DetectorParams {
            threshold: self.settings.similarity_threshold,
            pair_limit: self.settings.pair_limit,
        }
    }

    fn scan_deps(&self) -> scan::ScanDeps<'_> {
        scan::ScanDeps {
            store: &self.store,
            validator: &self.validator,
            enricher: &self.enricher,
            params: self.detector_params(),
            enrichment_enabled: self.settings.enrichment_enabled,
        }
    }

    /// Full detection run over one kind or, with `None`, all kinds in
    /// hierarchy order.
    pub async fn scan(&self, kind: Option<EntityKind>) -> Result<ScanOutcome> {
        let kinds: Vec<EntityKind> = match kind {
            Some(kind) => vec![kind],
            None => EntityKind::ALL.to_vec(),
        };
        scan::run_scan(&self.scan_deps(), &kinds).await
    }

    /// Detection dry run: clusters for one kind, nothing persisted.
    pub async fn scan_sync(
        &self,
        kind: EntityKind,
        parent_id: Option<&str>,
    ) -> Result<Vec<CandidateGroup>> {
        scan::scan_sync(&self.store, kind, self.detector_params(), parent_id).await
    }

    /// Re-run the validator over Pending groups that never saw it. Rejected
    /// groups are discarded, trimmed groups shrink, and everything decided
    /// gets its `llm_details`.
    pub async fn revalidate_pending(&self) -> Result<RevalidationOutcome> {
        let groups = self.store.pending_without_llm().await?;
        if groups.is_empty() {
            return Ok(RevalidationOutcome::default());
        }

        let deps = self.scan_deps();
        let mut outcome = RevalidationOutcome::default();

        for group in &groups {
            let candidate = CandidateGroup {
                member_ids: group.member_ids.clone(),
                member_names: group.member_names.clone(),
                parent_id: group.parent_id.clone(),
                mean_score: group.mean_score,
                normalized_name: group.normalized_name.clone(),
            };
            let inputs =
                scan::validation_inputs(&deps, group.entity_kind, std::slice::from_ref(&candidate))
                    .await?;
            let outcomes = self.validator.validate(&inputs).await;

            match outcomes.into_iter().next() {
                Some(ValidationOutcome::Decided(decision)) => {
                    if let Some((ids, names, _)) = persister::apply_decision(
                        &group.member_ids,
                        &group.member_names,
                        &decision,
                    ) {
                        let normalized = if decision.canonical_name.trim().is_empty() {
                            group.normalized_name.clone()
                        } else {
                            decision.canonical_name.clone()
                        };
                        let details = serde_json::to_value(&decision)
                            .unwrap_or(serde_json::Value::Null);
                        self.store
                            .update_llm_result(group.id, &ids, &names, &normalized, &details)
                            .await?;
                        outcome.validated += 1;
                    } else {
                        self.store.discard(group.id).await?;
                        outcome.discarded += 1;
                    }
                }
                _ => outcome.skipped += 1,
            }
        }

        info!(
            "revalidation: {} validated, {} discarded, {} skipped",
            outcome.validated, outcome.discarded, outcome.skipped
        );
        Ok(outcome)
    }

    /// Enrich Pending groups lacking a canonical name, ten at a time.
    pub async fn enrich_pending(&self) -> Result<usize> {
        let groups = self.store.pending_without_canonical().await?;
        let mut enriched = 0usize;

        for batch in groups.chunks(10) {
            let results = join_all(batch.iter().map(|g| self.enricher.enrich_group(g))).await;
            for (group, result) in batch.iter().zip(results) {
                match result {
                    Ok(_) => enriched += 1,
                    Err(e) => warn!("enrichment failed for group {}: {}", group.id, e),
                }
            }
        }

        info!("enriched {}/{} pending groups", enriched, groups.len());
        Ok(enriched)
    }

    pub async fn group_details(
        &self,
        id: Uuid,
    ) -> Result<(DuplicateGroup, Vec<MemberImpact>, Vec<MemberContext>)> {
        let group = self.store.require_group(id).await?;
        let impacts = impact::analyze_group(&self.store, &group).await?;
        let contexts = self.store.member_contexts(id).await?;
        Ok((group, impacts, contexts))
    }

    pub async fn group_impact(&self, id: Uuid) -> Result<Vec<MemberImpact>> {
        let group = self.store.require_group(id).await?;
        impact::analyze_group(&self.store, &group).await
    }

    pub async fn unify(&self, request: MergeRequest) -> Result<MergeOutcome> {
        merger::execute_merge(&self.store, request).await
    }

    pub async fn revert(&self, group_id: Uuid) -> Result<RevertOutcome> {
        reverser::execute_revert(&self.store, group_id).await
    }

    pub async fn discard(&self, group_id: Uuid) -> Result<DuplicateGroup> {
        self.store.discard(group_id).await
    }

    /// Merge a group along its enrichment suggestion.
    pub async fn approve_suggestion(
        &self,
        group_id: Uuid,
        executed_by: Option<String>,
    ) -> Result<MergeOutcome> {
        let group = self.store.require_group(group_id).await?;
        let (Some(suggested), Some(canonical_name)) =
            (group.suggested_canonical_id.clone(), group.canonical_name.clone())
        else {
            return Err(PipelineError::NoSuggestion(group_id));
        };

        self.unify(MergeRequest {
            group_id,
            chosen_canonical_id: suggested,
            chosen_name: Some(canonical_name),
            executed_by,
            decision_context: Some(serde_json::json!({"origem": "aprovacao-sugestao"})),
        })
        .await
    }

    /// Sequential batch of suggestion approvals; one failure never stops
    /// the rest.
    pub async fn approve_suggestions_batch(
        &self,
        group_ids: &[Uuid],
        executed_by: Option<String>,
    ) -> Vec<BatchApprovalItem> {
        let mut items = Vec::with_capacity(group_ids.len());
        for &group_id in group_ids {
            let result = self
                .approve_suggestion(group_id, executed_by.clone())
                .await;
            items.push(BatchApprovalItem { group_id, result });
        }
        items
    }

    pub async fn auto_approvable_ids(&self) -> Result<Vec<Uuid>> {
        self.store
            .auto_approvable_ids(self.settings.auto_approve_confidence)
            .await
    }

    pub async fn recent_runs(&self, limit: i64) -> Result<Vec<RunLog>> {
        self.store.recent_runs(limit).await
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Counters from `revalidate_pending`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RevalidationOutcome {
    pub validated: usize,
    pub discarded: usize,
    pub skipped: usize,
}
