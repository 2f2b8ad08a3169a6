//! `/stats` and `/relatorio` handlers.

use crate::error::Result;
use crate::state::AppState;
use crate::views::{ContextView, GroupView};
use axum::extract::{Path, State};
use axum::Json;
use locdedup_pipeline::reports;
use serde_json::{json, Value};
use tracing::instrument;
use uuid::Uuid;

#[instrument(skip(state))]
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": crate::state::SERVICE_NAME,
        "version": crate::state::SERVICE_VERSION,
        "uptime_seconds": state.uptime_seconds(),
    }))
}

#[instrument(skip(state))]
pub async fn stats(State(state): State<AppState>) -> Result<Json<reports::DashboardStats>> {
    Ok(Json(reports::dashboard_stats(&state.pipeline.store).await?))
}

#[instrument(skip(state))]
pub async fn city_ranking(
    State(state): State<AppState>,
) -> Result<Json<Vec<reports::CityRanking>>> {
    Ok(Json(
        reports::city_ranking(&state.pipeline.store, 20).await?,
    ))
}

#[instrument(skip(state))]
pub async fn city_breakdown(
    State(state): State<AppState>,
) -> Result<Json<Vec<reports::CityBreakdown>>> {
    Ok(Json(reports::city_breakdown(&state.pipeline.store).await?))
}

#[instrument(skip(state))]
pub async fn report_summary(
    State(state): State<AppState>,
) -> Result<Json<reports::ExecutionSummary>> {
    Ok(Json(
        reports::execution_summary(&state.pipeline.store).await?,
    ))
}

#[instrument(skip(state))]
pub async fn report_by_company(
    State(state): State<AppState>,
) -> Result<Json<Vec<reports::CompanyImpact>>> {
    Ok(Json(reports::company_impact(&state.pipeline.store).await?))
}

#[instrument(skip(state))]
pub async fn report_executed(State(state): State<AppState>) -> Result<Json<Vec<GroupView>>> {
    let groups = reports::executed_groups(&state.pipeline.store, 100).await?;
    Ok(Json(
        groups
            .into_iter()
            .map(|g| GroupView::from_group(g, None, None))
            .collect(),
    ))
}

#[instrument(skip(state))]
pub async fn report_group_details(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>> {
    let group = state.pipeline.store.require_group(id).await?;
    let log = state.pipeline.store.merge_log_for_group(id).await?;
    let contexts = state.pipeline.store.member_contexts(id).await?;

    let log_views: Vec<Value> = log
        .iter()
        .map(|entry| {
            json!({
                "id": entry.id,
                "membroAbsorvido": entry.absorbed_member_id,
                "tabela": entry.table_name,
                "coluna": entry.column_name,
                "registroAfetado": entry.affected_row_pk,
                "valorAnterior": entry.old_value,
                "valorNovo": entry.new_value,
                "revertido": entry.reverted,
                "revertidoEm": entry.reverted_at,
                "executadoEm": entry.executed_at,
            })
        })
        .collect();

    let contextos: Vec<ContextView> = contexts.into_iter().map(ContextView::from).collect();
    Ok(Json(json!({
        "grupo": GroupView::from_group(group, None, None),
        "logUnificacao": log_views,
        "contextos": contextos,
    })))
}
