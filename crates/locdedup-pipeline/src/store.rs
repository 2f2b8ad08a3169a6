//! Postgres access for pipeline-owned state.
//!
//! One pool shared by the whole process; merge and revert open their own
//! transactions on a dedicated connection from it. All SQL against the host
//! CRM tables lives in `detector`, `enricher`, `impact`, `merger` and
//! `reverser`; this module owns only the `dedup_*` tables.

use crate::error::{PipelineError, Result};
use crate::schema;
use chrono::Utc;
use locdedup::{
    CanonicalSource, DuplicateGroup, EntityKind, GroupSource, GroupStatus, MemberContext,
    MergeLogEntry, RunLog, RunStatus,
};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, QueryBuilder, Row};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Page of groups plus the unpaged total.
#[derive(Debug, Clone)]
pub struct GroupPage {
    pub groups: Vec<DuplicateGroup>,
    pub total: i64,
}

/// Listing filter. `status` defaults to Pending at the API layer; `None`
/// here means "any status".
#[derive(Debug, Clone, Default)]
pub struct GroupFilter {
    pub kind: Option<EntityKind>,
    pub status: Option<GroupStatus>,
    pub parent_id: Option<String>,
    /// Matched against the normalized name, case/accent-insensitively.
    pub search: Option<String>,
    pub page: i64,
    pub page_size: i64,
}

#[derive(Clone)]
pub struct GroupStore {
    pool: PgPool,
}

impl GroupStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect, bounded pool, and bring the schema up.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        info!("connecting to Postgres");
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;
        schema::init_schema(&pool).await?;
        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ------------------------------------------------------------------
    // Groups
    // ------------------------------------------------------------------

    pub async fn insert_group(&self, group: &DuplicateGroup) -> Result<()> {
        sqlx::query(
            "INSERT INTO dedup_groups (
                id, entity_kind, parent_id, normalized_name, member_ids,
                member_names, mean_score, source, llm_details, canonical_name,
                canonical_source, canonical_address, suggested_canonical_id,
                status, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
        )
        .bind(group.id)
        .bind(group.entity_kind.as_str())
        .bind(&group.parent_id)
        .bind(&group.normalized_name)
        .bind(&group.member_ids)
        .bind(&group.member_names)
        .bind(group.mean_score)
        .bind(group.source.as_str())
        .bind(&group.llm_details)
        .bind(&group.canonical_name)
        .bind(group.canonical_source.map(CanonicalSource::as_str))
        .bind(&group.canonical_address)
        .bind(&group.suggested_canonical_id)
        .bind(group.status.as_str())
        .bind(group.created_at)
        .execute(&self.pool)
        .await?;
        debug!("inserted group {} ({})", group.id, group.normalized_name);
        Ok(())
    }

    pub async fn get_group(&self, id: Uuid) -> Result<Option<DuplicateGroup>> {
        let row = sqlx::query("SELECT * FROM dedup_groups WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| group_from_row(&r)).transpose()
    }

    /// Load or fail with `GroupNotFound`.
    pub async fn require_group(&self, id: Uuid) -> Result<DuplicateGroup> {
        self.get_group(id)
            .await?
            .ok_or(PipelineError::GroupNotFound(id))
    }

    pub async fn list_groups(&self, filter: &GroupFilter) -> Result<GroupPage> {
        let mut count_builder =
            QueryBuilder::new("SELECT count(*) FROM dedup_groups WHERE 1 = 1");
        push_filters(&mut count_builder, filter);
        let total: i64 = count_builder
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        let mut builder = QueryBuilder::new("SELECT * FROM dedup_groups WHERE 1 = 1");
        push_filters(&mut builder, filter);
        builder.push(" ORDER BY mean_score DESC, created_at DESC");

        let page_size = filter.page_size.clamp(1, 200);
        let offset = (filter.page.max(1) - 1) * page_size;
        builder.push(" LIMIT ");
        builder.push_bind(page_size);
        builder.push(" OFFSET ");
        builder.push_bind(offset);

        let rows = builder.build().fetch_all(&self.pool).await?;
        let groups = rows
            .iter()
            .map(group_from_row)
            .collect::<Result<Vec<_>>>()?;
        Ok(GroupPage { groups, total })
    }

    /// Union of member ids across Pending and Executed groups of a kind,
    /// for the detector's pre-cluster de-duplication.
    pub async fn existing_member_ids(&self, kind: EntityKind) -> Result<HashSet<String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT unnest(member_ids) AS member_id
             FROM dedup_groups
             WHERE entity_kind = $1 AND status IN ('pendente', 'executado')",
        )
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|r| r.try_get::<String, _>("member_id"))
            .collect::<std::result::Result<_, _>>()?)
    }

    /// Pending -> Discarded; any other state is a precondition failure.
    pub async fn discard(&self, id: Uuid) -> Result<DuplicateGroup> {
        let group = self.require_group(id).await?;
        if group.status != GroupStatus::Pending {
            return Err(PipelineError::InvalidStatus {
                id,
                status: group.status,
                operation: "descarte",
            });
        }
        sqlx::query("UPDATE dedup_groups SET status = 'descartado' WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        self.require_group(id).await
    }

    /// Pending groups ready for one-click approval: an enrichment suggestion
    /// exists and the validator was at least `min_confidence` sure.
    pub async fn auto_approvable_ids(&self, min_confidence: f64) -> Result<Vec<Uuid>> {
        let rows = sqlx::query(
            "SELECT id FROM dedup_groups
             WHERE status = 'pendente'
               AND suggested_canonical_id IS NOT NULL
               AND canonical_name IS NOT NULL
               AND (llm_details ->> 'confidence')::float8 >= $1
             ORDER BY mean_score DESC",
        )
        .bind(min_confidence)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|r| r.try_get::<Uuid, _>("id"))
            .collect::<std::result::Result<_, _>>()?)
    }

    /// Pending groups the validator never saw (LLM batch failed or it was
    /// disabled during the scan).
    pub async fn pending_without_llm(&self) -> Result<Vec<DuplicateGroup>> {
        let rows = sqlx::query(
            "SELECT * FROM dedup_groups
             WHERE status = 'pendente' AND llm_details IS NULL
             ORDER BY mean_score DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(group_from_row).collect()
    }

    /// Pending groups enrichment has not reached yet.
    pub async fn pending_without_canonical(&self) -> Result<Vec<DuplicateGroup>> {
        let rows = sqlx::query(
            "SELECT * FROM dedup_groups
             WHERE status = 'pendente' AND canonical_name IS NULL
             ORDER BY mean_score DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(group_from_row).collect()
    }

    /// Store a late validator decision: details, source upgrade and the
    /// possibly trimmed member lists.
    pub async fn update_llm_result(
        &self,
        id: Uuid,
        member_ids: &[String],
        member_names: &[String],
        normalized_name: &str,
        llm_details: &serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE dedup_groups
             SET member_ids = $2, member_names = $3, normalized_name = $4,
                 llm_details = $5, source = $6
             WHERE id = $1",
        )
        .bind(id)
        .bind(member_ids)
        .bind(member_names)
        .bind(normalized_name)
        .bind(llm_details)
        .bind(GroupSource::TrigramLlm.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_enrichment(
        &self,
        id: Uuid,
        canonical_name: Option<&str>,
        canonical_source: Option<CanonicalSource>,
        canonical_address: Option<&str>,
        suggested_canonical_id: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE dedup_groups
             SET canonical_name = $2, canonical_source = $3,
                 canonical_address = $4, suggested_canonical_id = $5
             WHERE id = $1",
        )
        .bind(id)
        .bind(canonical_name)
        .bind(canonical_source.map(CanonicalSource::as_str))
        .bind(canonical_address)
        .bind(suggested_canonical_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Display name of a group's parent scope: the city for neighborhood
    /// and condo groups, the neighborhood for street groups, the state code
    /// itself for city groups.
    pub async fn parent_name(
        &self,
        kind: EntityKind,
        parent_id: &str,
    ) -> Result<Option<String>> {
        let sql = match kind {
            EntityKind::City => return Ok(Some(parent_id.to_string())),
            EntityKind::Neighborhood | EntityKind::Condo => {
                "SELECT nome FROM cidades WHERE id = $1::bigint"
            }
            EntityKind::Street => "SELECT nome FROM bairros WHERE id = $1::uuid",
        };
        Ok(sqlx::query_scalar(sql)
            .bind(parent_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    // ------------------------------------------------------------------
    // Member contexts
    // ------------------------------------------------------------------

    pub async fn replace_member_contexts(
        &self,
        group_id: Uuid,
        contexts: &[MemberContext],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM dedup_member_contexts WHERE group_id = $1")
            .bind(group_id)
            .execute(&mut *tx)
            .await?;
        for context in contexts {
            sqlx::query(
                "INSERT INTO dedup_member_contexts (
                    group_id, member_id, member_name, uf, cidade_id,
                    cidade_nome, bairro_id, bairro_nome, rua_id, rua_nome,
                    cep, ceps, filhos
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
            )
            .bind(group_id)
            .bind(&context.member_id)
            .bind(&context.member_name)
            .bind(&context.uf)
            .bind(&context.cidade_id)
            .bind(&context.cidade_nome)
            .bind(&context.bairro_id)
            .bind(&context.bairro_nome)
            .bind(&context.rua_id)
            .bind(&context.rua_nome)
            .bind(&context.cep)
            .bind(&context.ceps)
            .bind(context.filhos)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn member_contexts(&self, group_id: Uuid) -> Result<Vec<MemberContext>> {
        let rows = sqlx::query(
            "SELECT * FROM dedup_member_contexts WHERE group_id = $1 ORDER BY member_id",
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(MemberContext {
                    member_id: row.try_get("member_id")?,
                    member_name: row.try_get("member_name")?,
                    uf: row.try_get("uf")?,
                    cidade_id: row.try_get("cidade_id")?,
                    cidade_nome: row.try_get("cidade_nome")?,
                    bairro_id: row.try_get("bairro_id")?,
                    bairro_nome: row.try_get("bairro_nome")?,
                    rua_id: row.try_get("rua_id")?,
                    rua_nome: row.try_get("rua_nome")?,
                    cep: row.try_get("cep")?,
                    ceps: row.try_get("ceps")?,
                    filhos: row.try_get("filhos")?,
                })
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Run log
    // ------------------------------------------------------------------

    pub async fn start_run(&self) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO dedup_run_log (id, started_at, status) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(Utc::now())
            .bind(RunStatus::Started.as_str())
            .execute(&self.pool)
            .await?;
        Ok(id)
    }

    pub async fn finish_run(
        &self,
        id: Uuid,
        status: RunStatus,
        total_analyzed: i64,
        total_groups: i64,
        error_text: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE dedup_run_log
             SET ended_at = $2, status = $3, total_analyzed = $4,
                 total_groups = $5, error_text = $6
             WHERE id = $1",
        )
        .bind(id)
        .bind(Utc::now())
        .bind(status.as_str())
        .bind(total_analyzed)
        .bind(total_groups)
        .bind(error_text)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Close a run that never reached `finish_run`, keeping whatever
    /// progress was recorded. Only runs still at Started are touched, so a
    /// late guard can never overwrite a terminal state.
    async fn close_cancelled_run(
        &self,
        id: Uuid,
        total_analyzed: i64,
        total_groups: i64,
        reason: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE dedup_run_log
             SET ended_at = $2, status = $3, total_analyzed = $4,
                 total_groups = $5, error_text = $6
             WHERE id = $1 AND status = $7",
        )
        .bind(id)
        .bind(Utc::now())
        .bind(RunStatus::Errored.as_str())
        .bind(total_analyzed)
        .bind(total_groups)
        .bind(reason)
        .bind(RunStatus::Started.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Guard for an open run. While armed, dropping it closes the run as
    /// Errored with a cancellation reason, so a scan whose driving future
    /// is dropped between groups never leaves the log stuck at Started.
    #[must_use]
    pub fn guard_run(&self, run_id: Uuid) -> RunGuard {
        RunGuard {
            store: self.clone(),
            run_id,
            total_analyzed: 0,
            total_groups: 0,
            armed: true,
        }
    }

    pub async fn recent_runs(&self, limit: i64) -> Result<Vec<RunLog>> {
        let rows = sqlx::query(
            "SELECT * FROM dedup_run_log ORDER BY started_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                let status: String = row.try_get("status")?;
                Ok(RunLog {
                    id: row.try_get("id")?,
                    started_at: row.try_get("started_at")?,
                    ended_at: row.try_get("ended_at")?,
                    status: RunStatus::parse(&status).ok_or_else(|| {
                        sqlx::Error::Decode(format!("status de run inválido: {status}").into())
                    })?,
                    total_analyzed: row.try_get("total_analyzed")?,
                    total_groups: row.try_get("total_groups")?,
                    error_text: row.try_get("error_text")?,
                })
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Merge log
    // ------------------------------------------------------------------

    pub async fn merge_log_for_group(&self, group_id: Uuid) -> Result<Vec<MergeLogEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM dedup_merge_log WHERE group_id = $1 ORDER BY executed_at, id",
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(merge_log_from_row).collect()
    }
}

impl std::fmt::Debug for GroupStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupStore").finish_non_exhaustive()
    }
}

/// See [`GroupStore::guard_run`]. The scan records per-kind progress as it
/// goes and disarms the guard once the run log reaches a terminal state on
/// the normal path.
#[derive(Debug)]
pub struct RunGuard {
    store: GroupStore,
    run_id: Uuid,
    total_analyzed: i64,
    total_groups: i64,
    armed: bool,
}

impl RunGuard {
    /// Accumulate progress so a cancelled run reports what it got through.
    pub fn record(&mut self, analyzed: i64, groups: i64) {
        self.total_analyzed += analyzed;
        self.total_groups += groups;
    }

    /// The run log was finalized through the normal path; dropping the
    /// guard is now a no-op.
    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let store = self.store.clone();
        let run_id = self.run_id;
        let (total_analyzed, total_groups) = (self.total_analyzed, self.total_groups);

        // Drop cannot await; the close runs detached on the current runtime.
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("run {} cancelled outside a runtime, log left at Started", run_id);
            return;
        };
        handle.spawn(async move {
            let result = store
                .close_cancelled_run(
                    run_id,
                    total_analyzed,
                    total_groups,
                    "varredura cancelada entre grupos",
                )
                .await;
            match result {
                Ok(true) => {
                    warn!("run {} cancelled between groups, log closed as Errored", run_id);
                }
                Ok(false) => {}
                Err(e) => warn!("failed to close cancelled run {}: {}", run_id, e),
            }
        });
    }
}

fn push_filters(builder: &mut QueryBuilder<'_, sqlx::Postgres>, filter: &GroupFilter) {
    if let Some(kind) = filter.kind {
        builder.push(" AND entity_kind = ");
        builder.push_bind(kind.as_str());
    }
    if let Some(status) = filter.status {
        builder.push(" AND status = ");
        builder.push_bind(status.as_str());
    }
    if let Some(parent_id) = &filter.parent_id {
        builder.push(" AND parent_id = ");
        builder.push_bind(parent_id.clone());
    }
    if let Some(search) = &filter.search {
        // The column is already folded for trigram-born groups; unaccent
        // covers the LLM-supplied canonical spellings.
        builder.push(" AND unaccent(lower(normalized_name)) LIKE '%' || ");
        builder.push_bind(locdedup::normalize::fold(search));
        builder.push(" || '%'");
    }
}

pub(crate) fn group_from_row(row: &PgRow) -> Result<DuplicateGroup> {
    let status: String = row.try_get("status")?;
    let source: String = row.try_get("source")?;
    let canonical_source: Option<String> = row.try_get("canonical_source")?;

    Ok(DuplicateGroup {
        id: row.try_get("id")?,
        entity_kind: parse_kind(&row.try_get::<String, _>("entity_kind")?)?,
        parent_id: row.try_get("parent_id")?,
        normalized_name: row.try_get("normalized_name")?,
        member_ids: row.try_get("member_ids")?,
        member_names: row.try_get("member_names")?,
        mean_score: row.try_get("mean_score")?,
        source: GroupSource::parse(&source).ok_or_else(|| {
            PipelineError::Database(sqlx::Error::Decode(
                format!("source inválido: {source}").into(),
            ))
        })?,
        llm_details: row.try_get("llm_details")?,
        canonical_name: row.try_get("canonical_name")?,
        canonical_source: canonical_source
            .as_deref()
            .and_then(CanonicalSource::parse),
        canonical_address: row.try_get("canonical_address")?,
        suggested_canonical_id: row.try_get("suggested_canonical_id")?,
        status: GroupStatus::parse(&status).ok_or_else(|| {
            PipelineError::Database(sqlx::Error::Decode(
                format!("status inválido: {status}").into(),
            ))
        })?,
        chosen_canonical_id: row.try_get("chosen_canonical_id")?,
        chosen_name: row.try_get("chosen_name")?,
        executed_at: row.try_get("executed_at")?,
        executed_by: row.try_get("executed_by")?,
        reverted_at: row.try_get("reverted_at")?,
        decision_context: row.try_get("decision_context")?,
        created_at: row.try_get("created_at")?,
        total_fks_redirected: row.try_get("total_fks_redirected")?,
    })
}

pub(crate) fn merge_log_from_row(row: &PgRow) -> Result<MergeLogEntry> {
    Ok(MergeLogEntry {
        id: row.try_get("id")?,
        group_id: row.try_get("group_id")?,
        absorbed_member_id: row.try_get("absorbed_member_id")?,
        table_name: row.try_get("table_name")?,
        column_name: row.try_get("column_name")?,
        affected_row_pk: row.try_get("affected_row_pk")?,
        old_value: row.try_get("old_value")?,
        new_value: row.try_get("new_value")?,
        reverted: row.try_get("reverted")?,
        reverted_at: row.try_get("reverted_at")?,
        executed_at: row.try_get("executed_at")?,
    })
}

fn parse_kind(raw: &str) -> Result<EntityKind> {
    EntityKind::parse(raw).ok_or_else(|| {
        PipelineError::Database(sqlx::Error::Decode(
            format!("entity_kind inválido: {raw}").into(),
        ))
    })
}
