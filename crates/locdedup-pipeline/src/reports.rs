//! Dashboard aggregates and audit rollups.
//!
//! Read-only queries over the pipeline tables (and, for the per-company
//! rollup, joins back into the CRM tables that carry `empresa_id`). These
//! feed `/stats` and `/relatorio`.

use crate::error::Result;
use crate::store::{group_from_row, GroupStore};
use chrono::{DateTime, Utc};
use locdedup::DuplicateGroup;
use serde::Serialize;
use sqlx::Row;

/// Headline numbers for the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardStats {
    pub total_grupos: i64,
    pub por_status: Vec<CountBy>,
    pub por_tipo: Vec<CountBy>,
    pub total_fks_redirecionados: i64,
    pub ultima_execucao: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CountBy {
    pub chave: String,
    pub total: i64,
}

/// One city in the pending-duplicates ranking.
#[derive(Debug, Clone, Serialize)]
pub struct CityRanking {
    pub cidade_id: Option<String>,
    pub cidade_nome: Option<String>,
    pub grupos_pendentes: i64,
}

/// Per-city, per-kind, per-status breakdown.
#[derive(Debug, Clone, Serialize)]
pub struct CityBreakdown {
    pub cidade_id: Option<String>,
    pub cidade_nome: Option<String>,
    pub tipo: String,
    pub status: String,
    pub total: i64,
}

/// Merge-log rows attributed to a company via the CRM tables.
#[derive(Debug, Clone, Serialize)]
pub struct CompanyImpact {
    pub empresa_id: String,
    pub registros_redirecionados: i64,
}

/// Executed-merge audit summary.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionSummary {
    pub grupos_executados: i64,
    pub grupos_revertidos: i64,
    pub grupos_descartados: i64,
    pub total_fks_redirecionados: i64,
    pub registros_absorvidos: i64,
}

pub async fn dashboard_stats(store: &GroupStore) -> Result<DashboardStats> {
    let por_status = count_by(store, "status").await?;
    let por_tipo = count_by(store, "entity_kind").await?;
    let total_grupos = por_status.iter().map(|c| c.total).sum();

    let row = sqlx::query(
        "SELECT COALESCE(sum(total_fks_redirected), 0)::bigint AS fks,
                max(executed_at) AS ultima
         FROM dedup_groups WHERE status = 'executado'",
    )
    .fetch_one(store.pool())
    .await?;

    Ok(DashboardStats {
        total_grupos,
        por_status,
        por_tipo,
        total_fks_redirecionados: row.try_get("fks")?,
        ultima_execucao: row.try_get("ultima")?,
    })
}

async fn count_by(store: &GroupStore, column: &str) -> Result<Vec<CountBy>> {
    // `column` is one of two compile-time literals, never user input.
    let sql = format!(
        "SELECT {column} AS chave, count(*) AS total
         FROM dedup_groups GROUP BY {column} ORDER BY total DESC"
    );
    let rows = sqlx::query(&sql).fetch_all(store.pool()).await?;
    rows.iter()
        .map(|r| {
            Ok(CountBy {
                chave: r.try_get("chave")?,
                total: r.try_get("total")?,
            })
        })
        .collect()
}

/// Cities with the most pending duplicate groups (neighborhoods and condos
/// carry a city-level `parent_id`).
pub async fn city_ranking(store: &GroupStore, limit: i64) -> Result<Vec<CityRanking>> {
    let rows = sqlx::query(
        "SELECT g.parent_id AS cidade_id, c.nome AS cidade_nome,
                count(*) AS grupos_pendentes
         FROM dedup_groups g
         LEFT JOIN cidades c ON c.id::text = g.parent_id
         WHERE g.entity_kind IN ('bairro', 'condominio') AND g.status = 'pendente'
         GROUP BY g.parent_id, c.nome
         ORDER BY grupos_pendentes DESC
         LIMIT $1",
    )
    .bind(limit)
    .fetch_all(store.pool())
    .await?;
    rows.iter()
        .map(|r| {
            Ok(CityRanking {
                cidade_id: r.try_get("cidade_id")?,
                cidade_nome: r.try_get("cidade_nome")?,
                grupos_pendentes: r.try_get("grupos_pendentes")?,
            })
        })
        .collect()
}

pub async fn city_breakdown(store: &GroupStore) -> Result<Vec<CityBreakdown>> {
    let rows = sqlx::query(
        "SELECT g.parent_id AS cidade_id, c.nome AS cidade_nome,
                g.entity_kind AS tipo, g.status, count(*) AS total
         FROM dedup_groups g
         LEFT JOIN cidades c ON c.id::text = g.parent_id
         WHERE g.entity_kind IN ('bairro', 'condominio')
         GROUP BY g.parent_id, c.nome, g.entity_kind, g.status
         ORDER BY total DESC",
    )
    .fetch_all(store.pool())
    .await?;
    rows.iter()
        .map(|r| {
            Ok(CityBreakdown {
                cidade_id: r.try_get("cidade_id")?,
                cidade_nome: r.try_get("cidade_nome")?,
                tipo: r.try_get("tipo")?,
                status: r.try_get("status")?,
                total: r.try_get("total")?,
            })
        })
        .collect()
}

pub async fn execution_summary(store: &GroupStore) -> Result<ExecutionSummary> {
    let row = sqlx::query(
        "SELECT
            count(*) FILTER (WHERE status = 'executado') AS executados,
            count(*) FILTER (WHERE status = 'revertido') AS revertidos,
            count(*) FILTER (WHERE status = 'descartado') AS descartados,
            COALESCE(sum(total_fks_redirected) FILTER (WHERE status = 'executado'), 0)::bigint AS fks,
            COALESCE(sum(array_length(member_ids, 1) - 1)
                FILTER (WHERE status = 'executado'), 0)::bigint AS absorvidos
         FROM dedup_groups",
    )
    .fetch_one(store.pool())
    .await?;
    Ok(ExecutionSummary {
        grupos_executados: row.try_get("executados")?,
        grupos_revertidos: row.try_get("revertidos")?,
        grupos_descartados: row.try_get("descartados")?,
        total_fks_redirecionados: row.try_get("fks")?,
        registros_absorvidos: row.try_get("absorvidos")?,
    })
}

/// Redirected rows per company, attributed through the CRM tables that
/// carry `empresa_id` (`imoveis`, `clientes`).
pub async fn company_impact(store: &GroupStore) -> Result<Vec<CompanyImpact>> {
    let rows = sqlx::query(
        "SELECT empresa_id, sum(n)::bigint AS registros FROM (
            SELECT i.empresa_id::text AS empresa_id, count(*) AS n
            FROM dedup_merge_log l
            JOIN imoveis i ON l.table_name = 'imoveis' AND i.id::text = l.affected_row_pk
            GROUP BY 1
            UNION ALL
            SELECT cl.empresa_id::text, count(*)
            FROM dedup_merge_log l
            JOIN clientes cl ON l.table_name = 'clientes' AND cl.id::text = l.affected_row_pk
            GROUP BY 1
         ) t
         GROUP BY empresa_id
         ORDER BY registros DESC",
    )
    .fetch_all(store.pool())
    .await?;
    rows.iter()
        .map(|r| {
            Ok(CompanyImpact {
                empresa_id: r.try_get("empresa_id")?,
                registros_redirecionados: r.try_get("registros")?,
            })
        })
        .collect()
}

/// Executed (and later reverted) groups, most recent first.
pub async fn executed_groups(store: &GroupStore, limit: i64) -> Result<Vec<DuplicateGroup>> {
    let rows = sqlx::query(
        "SELECT * FROM dedup_groups
         WHERE status IN ('executado', 'revertido')
         ORDER BY executed_at DESC NULLS LAST
         LIMIT $1",
    )
    .bind(limit)
    .fetch_all(store.pool())
    .await?;
    rows.iter().map(group_from_row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_serialize_with_portuguese_keys() {
        let stats = DashboardStats {
            total_grupos: 10,
            por_status: vec![CountBy {
                chave: "pendente".to_string(),
                total: 7,
            }],
            por_tipo: vec![CountBy {
                chave: "bairro".to_string(),
                total: 10,
            }],
            total_fks_redirecionados: 42,
            ultima_execucao: None,
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["total_grupos"], 10);
        assert_eq!(json["por_status"][0]["chave"], "pendente");
        assert_eq!(json["total_fks_redirecionados"], 42);
    }
}
