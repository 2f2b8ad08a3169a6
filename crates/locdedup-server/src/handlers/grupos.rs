//! `/grupos` handlers: listing, detail, impact and the operator actions
//! (unify, revert, discard, suggestion approval).

use crate::error::{ApiError, Result};
use crate::state::AppState;
use crate::views::{ContextView, GroupView, ImpactView, RevertView};
use axum::extract::{Path, Query, State};
use axum::Json;
use locdedup::{EntityKind, GroupStatus};
use locdedup_pipeline::{GroupFilter, MergeRequest};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub tipo: Option<String>,
    pub status: Option<String>,
    pub parent_id: Option<String>,
    pub busca: Option<String>,
    pub pagina: Option<i64>,
    pub tamanho_pagina: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse {
    pub grupos: Vec<GroupView>,
    pub total: i64,
    pub pagina: i64,
    pub tamanho_pagina: i64,
}

#[instrument(skip(state, params))]
pub async fn list_groups(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ListResponse>> {
    let kind = match &params.tipo {
        Some(raw) => Some(parse_kind(raw)?),
        None => None,
    };
    // Unfiltered listings default to the operator's work queue.
    let status = match &params.status {
        Some(raw) if raw.eq_ignore_ascii_case("todos") => None,
        Some(raw) => Some(parse_status(raw)?),
        None => Some(GroupStatus::Pending),
    };

    let pagina = params.pagina.unwrap_or(1).max(1);
    let tamanho_pagina = params.tamanho_pagina.unwrap_or(20).clamp(1, 200);

    let page = state
        .pipeline
        .store
        .list_groups(&GroupFilter {
            kind,
            status,
            parent_id: params.parent_id.clone(),
            search: params.busca.clone(),
            page: pagina,
            page_size: tamanho_pagina,
        })
        .await?;

    let mut grupos = Vec::with_capacity(page.groups.len());
    for group in page.groups {
        let parent_nome = match &group.parent_id {
            Some(parent_id) => {
                state
                    .pipeline
                    .store
                    .parent_name(group.entity_kind, parent_id)
                    .await?
            }
            None => None,
        };
        let hierarquia = state
            .pipeline
            .store
            .member_contexts(group.id)
            .await?
            .into_iter()
            .find(|c| group.member_ids.first() == Some(&c.member_id))
            .map(ContextView::from);
        grupos.push(GroupView::from_group(group, parent_nome, hierarquia));
    }

    Ok(Json(ListResponse {
        grupos,
        total: page.total,
        pagina,
        tamanho_pagina,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupDetailResponse {
    pub grupo: GroupView,
    pub impacto: Vec<ImpactView>,
    pub contextos: Vec<ContextView>,
}

#[instrument(skip(state))]
pub async fn get_group(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<GroupDetailResponse>> {
    let (group, impacts, contexts) = state.pipeline.group_details(id).await?;
    let parent_nome = match &group.parent_id {
        Some(parent_id) => {
            state
                .pipeline
                .store
                .parent_name(group.entity_kind, parent_id)
                .await?
        }
        None => None,
    };
    Ok(Json(GroupDetailResponse {
        grupo: GroupView::from_group(group, parent_nome, None),
        impacto: impacts.into_iter().map(ImpactView::from).collect(),
        contextos: contexts.into_iter().map(ContextView::from).collect(),
    }))
}

#[instrument(skip(state))]
pub async fn get_impact(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<ImpactView>>> {
    let impacts = state.pipeline.group_impact(id).await?;
    Ok(Json(impacts.into_iter().map(ImpactView::from).collect()))
}

#[instrument(skip(state))]
pub async fn auto_approvable(State(state): State<AppState>) -> Result<Json<Value>> {
    let ids = state.pipeline.auto_approvable_ids().await?;
    let total = ids.len();
    Ok(Json(json!({ "grupoIds": ids, "total": total })))
}

#[instrument(skip(state))]
pub async fn revalidate_llm(State(state): State<AppState>) -> Result<Json<Value>> {
    let outcome = state.pipeline.revalidate_pending().await?;
    Ok(Json(json!({
        "validados": outcome.validated,
        "descartados": outcome.discarded,
        "pulados": outcome.skipped,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnifyBody {
    pub registro_canonico: String,
    pub nome_canonico_final: Option<String>,
    pub executado_por: Option<String>,
    pub decisao_contexto: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnifyResponse {
    pub grupo: GroupView,
    pub total_fks_redirecionados: i64,
    pub membros_absorvidos: usize,
}

#[instrument(skip(state, body))]
pub async fn unify(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<UnifyBody>,
) -> Result<Json<UnifyResponse>> {
    if body.registro_canonico.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "registroCanonico é obrigatório".to_string(),
        ));
    }

    let outcome = state
        .pipeline
        .unify(MergeRequest {
            group_id: id,
            chosen_canonical_id: body.registro_canonico,
            chosen_name: body.nome_canonico_final,
            executed_by: body.executado_por,
            decision_context: body.decisao_contexto,
        })
        .await?;

    Ok(Json(UnifyResponse {
        total_fks_redirecionados: outcome.total_fks_redirected,
        membros_absorvidos: outcome.absorbed_members,
        grupo: GroupView::from_group(outcome.group, None, None),
    }))
}

#[instrument(skip(state))]
pub async fn revert(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RevertView>> {
    let outcome = state.pipeline.revert(id).await?;
    Ok(Json(RevertView::from_outcome(outcome)))
}

#[instrument(skip(state))]
pub async fn discard(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<GroupView>> {
    let group = state.pipeline.discard(id).await?;
    Ok(Json(GroupView::from_group(group, None, None)))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveBody {
    pub executado_por: Option<String>,
}

#[instrument(skip(state, body))]
pub async fn approve_suggestion(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<ApproveBody>>,
) -> Result<Json<UnifyResponse>> {
    let executado_por = body.and_then(|Json(b)| b.executado_por);
    let outcome = state.pipeline.approve_suggestion(id, executado_por).await?;
    Ok(Json(UnifyResponse {
        total_fks_redirecionados: outcome.total_fks_redirected,
        membros_absorvidos: outcome.absorbed_members,
        grupo: GroupView::from_group(outcome.group, None, None),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveBatchBody {
    pub grupo_ids: Vec<Uuid>,
    pub executado_por: Option<String>,
}

#[instrument(skip(state, body))]
pub async fn approve_batch(
    State(state): State<AppState>,
    Json(body): Json<ApproveBatchBody>,
) -> Result<Json<Value>> {
    let items = state
        .pipeline
        .approve_suggestions_batch(&body.grupo_ids, body.executado_por)
        .await;

    let resultados: Vec<Value> = items
        .iter()
        .map(|item| match &item.result {
            Ok(outcome) => json!({
                "grupoId": item.group_id,
                "sucesso": true,
                "totalFksRedirecionados": outcome.total_fks_redirected,
            }),
            Err(e) => json!({
                "grupoId": item.group_id,
                "sucesso": false,
                "error": e.to_string(),
            }),
        })
        .collect();

    let sucessos = items.iter().filter(|i| i.result.is_ok()).count();
    Ok(Json(json!({
        "resultados": resultados,
        "sucessos": sucessos,
        "falhas": items.len() - sucessos,
    })))
}

pub(crate) fn parse_kind(raw: &str) -> std::result::Result<EntityKind, ApiError> {
    EntityKind::parse(raw)
        .ok_or_else(|| ApiError::BadRequest(format!("tipo inválido: {raw}")))
}

pub(crate) fn parse_status(raw: &str) -> std::result::Result<GroupStatus, ApiError> {
    GroupStatus::parse(raw)
        .ok_or_else(|| ApiError::BadRequest(format!("status inválido: {raw}")))
}
