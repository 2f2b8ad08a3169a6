//! `/scan` handlers: detection runs, dry runs, enrichment, history.

use crate::error::Result;
use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use locdedup::CandidateGroup;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::instrument;

use super::grupos::parse_kind;

#[derive(Debug, Default, Deserialize)]
pub struct ScanBody {
    pub tipo: Option<String>,
}

#[instrument(skip(state, body))]
pub async fn scan(
    State(state): State<AppState>,
    body: Option<Json<ScanBody>>,
) -> Result<Json<Value>> {
    let kind = match body.and_then(|Json(b)| b.tipo) {
        Some(raw) => Some(parse_kind(&raw)?),
        None => None,
    };
    let outcome = state.pipeline.scan(kind).await?;
    Ok(Json(json!({
        "runId": outcome.run_id,
        "totalPares": outcome.total_pares,
        "totalGrupos": outcome.total_grupos,
        "descartadosLlm": outcome.total_descartados_llm,
        "porTipo": outcome.por_tipo,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSyncBody {
    pub tipo: String,
    pub parent_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateView {
    pub membros: Vec<MemberNameView>,
    pub parent_id: Option<String>,
    pub score: f64,
    pub nome_normalizado: String,
}

#[derive(Debug, Serialize)]
pub struct MemberNameView {
    pub id: String,
    pub nome: String,
}

impl From<CandidateGroup> for CandidateView {
    fn from(candidate: CandidateGroup) -> Self {
        Self {
            membros: candidate
                .member_ids
                .iter()
                .zip(&candidate.member_names)
                .map(|(id, nome)| MemberNameView {
                    id: id.clone(),
                    nome: nome.clone(),
                })
                .collect(),
            parent_id: candidate.parent_id,
            score: candidate.mean_score,
            nome_normalizado: candidate.normalized_name,
        }
    }
}

/// Detection output without persistence.
#[instrument(skip(state, body))]
pub async fn scan_sync(
    State(state): State<AppState>,
    Json(body): Json<ScanSyncBody>,
) -> Result<Json<Value>> {
    let kind = parse_kind(&body.tipo)?;
    let candidates = state
        .pipeline
        .scan_sync(kind, body.parent_id.as_deref())
        .await?;
    let grupos: Vec<CandidateView> = candidates.into_iter().map(CandidateView::from).collect();
    Ok(Json(json!({ "tipo": kind, "grupos": grupos })))
}

#[instrument(skip(state))]
pub async fn enrich(State(state): State<AppState>) -> Result<Json<Value>> {
    let enriched = state.pipeline.enrich_pending().await?;
    Ok(Json(json!({ "enriquecidos": enriched })))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunView {
    pub id: uuid::Uuid,
    pub iniciado_em: chrono::DateTime<chrono::Utc>,
    pub finalizado_em: Option<chrono::DateTime<chrono::Utc>>,
    pub status: String,
    pub total_analisados: i64,
    pub total_grupos: i64,
    pub erro: Option<String>,
}

#[instrument(skip(state))]
pub async fn history(State(state): State<AppState>) -> Result<Json<Vec<RunView>>> {
    let runs = state.pipeline.recent_runs(20).await?;
    Ok(Json(
        runs.into_iter()
            .map(|run| RunView {
                id: run.id,
                iniciado_em: run.started_at,
                finalizado_em: run.ended_at,
                status: run.status.as_str().to_string(),
                total_analisados: run.total_analyzed,
                total_grupos: run.total_groups,
                erro: run.error_text,
            })
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_sync_body_shape() {
        let body: ScanSyncBody =
            serde_json::from_str(r#"{"tipo": "bairro", "parentId": "100"}"#).unwrap();
        assert_eq!(body.tipo, "bairro");
        assert_eq!(body.parent_id.as_deref(), Some("100"));
    }

    #[test]
    fn test_candidate_view_pairs_members() {
        let candidate = CandidateGroup {
            member_ids: vec!["a".to_string(), "b".to_string()],
            member_names: vec!["Jardim Aurora".to_string(), "Jd Aurora".to_string()],
            parent_id: Some("100".to_string()),
            mean_score: 0.88,
            normalized_name: "aurora".to_string(),
        };
        let view = CandidateView::from(candidate);
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["membros"][1]["id"], "b");
        assert_eq!(json["nomeNormalizado"], "aurora");
    }
}
