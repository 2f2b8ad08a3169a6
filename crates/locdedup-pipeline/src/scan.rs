//! Detection-run orchestration.
//!
//! Kinds run sequentially in hierarchy order (cities before neighborhoods
//! before streets before condos) so parent canonical names exist before
//! children are enriched. Within a kind: detect, cluster, validate in
//! batches, persist in score order, then enrich the new groups. A failing
//! kind is recorded and the remaining kinds still run; the run log ends
//! Errored if anything failed.

use crate::detector::{detect_pairs, filter_known_pairs, DetectorParams};
use crate::enricher::Enricher;
use crate::error::Result;
use crate::persister::persist_groups;
use crate::store::GroupStore;
use locdedup::{cluster_pairs, CandidateGroup, EntityKind, RunStatus};
use locdedup_llm::{ValidationInput, Validator};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Per-kind outcome of a scan.
#[derive(Debug, Clone, Serialize)]
pub struct KindScan {
    pub tipo: EntityKind,
    pub pares: usize,
    pub grupos_criados: usize,
    pub descartados_llm: usize,
    pub aparados: usize,
    pub erro: Option<String>,
}

/// Whole-run outcome, mirrored into the run log.
#[derive(Debug, Clone, Serialize)]
pub struct ScanOutcome {
    pub run_id: Uuid,
    pub por_tipo: Vec<KindScan>,
    pub total_pares: usize,
    pub total_grupos: usize,
    pub total_descartados_llm: usize,
}

pub(crate) struct ScanDeps<'a> {
    pub store: &'a GroupStore,
    pub validator: &'a Validator,
    pub enricher: &'a Enricher,
    pub params: DetectorParams,
    pub enrichment_enabled: bool,
}

/// Run detection for the given kinds, in the order given (callers pass
/// `EntityKind::ALL` or a single kind).
///
/// The run guard covers cancellation: this future can be dropped between
/// kinds (client gone from `POST /scan`, process shutting down), and the
/// guard then closes the run log as Errored with the cancellation reason
/// and the progress recorded so far. Never mid-merge, never mid-batch:
/// every await point in the loop sits between per-group units of work.
pub(crate) async fn run_scan(deps: &ScanDeps<'_>, kinds: &[EntityKind]) -> Result<ScanOutcome> {
    let run_id = deps.store.start_run().await?;
    let mut guard = deps.store.guard_run(run_id);
    info!("scan {} started for {:?}", run_id, kinds);

    let mut por_tipo = Vec::with_capacity(kinds.len());
    for &kind in kinds {
        let scanned = scan_kind(deps, kind).await;
        guard.record(scanned.pares as i64, scanned.grupos_criados as i64);
        por_tipo.push(scanned);
    }

    let total_pares = por_tipo.iter().map(|k| k.pares).sum();
    let total_grupos = por_tipo.iter().map(|k| k.grupos_criados).sum();
    let total_descartados_llm = por_tipo.iter().map(|k| k.descartados_llm).sum();

    let errors: Vec<String> = por_tipo
        .iter()
        .filter_map(|k| k.erro.as_ref().map(|e| format!("{}: {e}", k.tipo)))
        .collect();
    let (status, error_text) = if errors.is_empty() {
        (RunStatus::Completed, None)
    } else {
        (RunStatus::Errored, Some(errors.join("; ")))
    };

    deps.store
        .finish_run(
            run_id,
            status,
            total_pares as i64,
            total_grupos as i64,
            error_text.as_deref(),
        )
        .await?;
    guard.disarm();

    info!(
        "scan {} finished: {} pairs, {} groups, {} rejected by LLM",
        run_id, total_pares, total_grupos, total_descartados_llm
    );
    Ok(ScanOutcome {
        run_id,
        por_tipo,
        total_pares,
        total_grupos,
        total_descartados_llm,
    })
}

/// One kind's pass. Errors stay inside the returned record: a broken pair
/// query for streets must not stop the condo pass.
async fn scan_kind(deps: &ScanDeps<'_>, kind: EntityKind) -> KindScan {
    match scan_kind_inner(deps, kind).await {
        Ok(scan) => scan,
        Err(e) => {
            error!("scan pass for {} failed: {}", kind, e);
            KindScan {
                tipo: kind,
                pares: 0,
                grupos_criados: 0,
                descartados_llm: 0,
                aparados: 0,
                erro: Some(e.to_string()),
            }
        }
    }
}

async fn scan_kind_inner(deps: &ScanDeps<'_>, kind: EntityKind) -> Result<KindScan> {
    let pairs = detect_pairs(deps.store, kind, deps.params, None).await?;
    let total_pairs = pairs.len();

    let existing = deps.store.existing_member_ids(kind).await?;
    let pairs = filter_known_pairs(pairs, &existing);
    let candidates = cluster_pairs(kind, &pairs);
    if candidates.is_empty() {
        return Ok(KindScan {
            tipo: kind,
            pares: total_pairs,
            grupos_criados: 0,
            descartados_llm: 0,
            aparados: 0,
            erro: None,
        });
    }

    let inputs = validation_inputs(deps, kind, &candidates).await?;
    let outcomes = deps.validator.validate(&inputs).await;
    let (created, stats) = persist_groups(deps.store, kind, &candidates, &outcomes).await?;

    if deps.enrichment_enabled {
        for group in &created {
            if let Err(e) = deps.enricher.enrich_group(group).await {
                // Enrichment is optional; the group stays usable without it.
                warn!("enrichment failed for group {}: {}", group.id, e);
            }
        }
    }

    Ok(KindScan {
        tipo: kind,
        pares: total_pairs,
        grupos_criados: stats.created,
        descartados_llm: stats.discarded_by_llm,
        aparados: stats.trimmed,
        erro: None,
    })
}

/// Context for the validator prompt: the first member's resolved hierarchy
/// stands in for the group (all members share the scope by construction).
pub(crate) async fn validation_inputs(
    deps: &ScanDeps<'_>,
    kind: EntityKind,
    candidates: &[CandidateGroup],
) -> Result<Vec<ValidationInput>> {
    let mut inputs = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let contexts = deps
            .enricher
            .resolve_contexts(
                kind,
                &candidate.member_ids[..1.min(candidate.member_ids.len())],
                &candidate.member_names[..1.min(candidate.member_names.len())],
            )
            .await?;
        let context = contexts.into_iter().next().unwrap_or_default();
        inputs.push(ValidationInput {
            kind,
            member_ids: candidate.member_ids.clone(),
            member_names: candidate.member_names.clone(),
            uf: context.uf,
            cidade: context.cidade_nome,
            bairro: context.bairro_nome,
            rua: context.rua_nome,
        });
    }
    Ok(inputs)
}

/// Detection without persistence: pairs and clusters for one kind, used by
/// the dry-run endpoint.
pub(crate) async fn scan_sync(
    store: &GroupStore,
    kind: EntityKind,
    params: DetectorParams,
    parent_id: Option<&str>,
) -> Result<Vec<CandidateGroup>> {
    let pairs = detect_pairs(store, kind, params, parent_id).await?;
    Ok(cluster_pairs(kind, &pairs))
}
