//! Pipeline-owned tables.
//!
//! Everything the pipeline persists lives in `dedup_`-prefixed tables,
//! created idempotently at startup. The host CRM schema is never migrated;
//! the only host-side requirement is the `pg_trgm` and `unaccent`
//! extensions, created best-effort (they need createdb-ish privileges and
//! may already exist).

use sqlx::PgPool;
use tracing::{info, warn};

const CREATE_EXTENSIONS: &[&str] = &[
    "CREATE EXTENSION IF NOT EXISTS pg_trgm",
    "CREATE EXTENSION IF NOT EXISTS unaccent",
];

const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS dedup_groups (
    id UUID PRIMARY KEY,
    entity_kind TEXT NOT NULL,
    parent_id TEXT,
    normalized_name TEXT NOT NULL,
    member_ids TEXT[] NOT NULL,
    member_names TEXT[] NOT NULL,
    mean_score DOUBLE PRECISION NOT NULL,
    source TEXT NOT NULL,
    llm_details JSONB,
    canonical_name TEXT,
    canonical_source TEXT,
    canonical_address TEXT,
    suggested_canonical_id TEXT,
    status TEXT NOT NULL DEFAULT 'pendente',
    chosen_canonical_id TEXT,
    chosen_name TEXT,
    executed_at TIMESTAMPTZ,
    executed_by TEXT,
    reverted_at TIMESTAMPTZ,
    decision_context JSONB,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    total_fks_redirected BIGINT,
    CONSTRAINT dedup_groups_status_check
        CHECK (status IN ('pendente', 'executado', 'descartado', 'revertido')),
    CONSTRAINT dedup_groups_min_members
        CHECK (array_length(member_ids, 1) >= 2)
);

CREATE INDEX IF NOT EXISTS idx_dedup_groups_kind_status
    ON dedup_groups (entity_kind, status);
CREATE INDEX IF NOT EXISTS idx_dedup_groups_parent
    ON dedup_groups (parent_id);

CREATE TABLE IF NOT EXISTS dedup_member_contexts (
    group_id UUID NOT NULL REFERENCES dedup_groups(id) ON DELETE CASCADE,
    member_id TEXT NOT NULL,
    member_name TEXT NOT NULL,
    uf TEXT,
    cidade_id TEXT,
    cidade_nome TEXT,
    bairro_id TEXT,
    bairro_nome TEXT,
    rua_id TEXT,
    rua_nome TEXT,
    cep TEXT,
    ceps TEXT[] NOT NULL DEFAULT '{}',
    filhos BIGINT,
    PRIMARY KEY (group_id, member_id)
);

CREATE TABLE IF NOT EXISTS dedup_merge_log (
    id UUID PRIMARY KEY,
    group_id UUID NOT NULL REFERENCES dedup_groups(id) ON DELETE CASCADE,
    absorbed_member_id TEXT NOT NULL,
    table_name TEXT NOT NULL,
    column_name TEXT NOT NULL,
    affected_row_pk TEXT NOT NULL,
    old_value TEXT NOT NULL,
    new_value TEXT NOT NULL,
    reverted BOOLEAN NOT NULL DEFAULT false,
    reverted_at TIMESTAMPTZ,
    executed_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS idx_dedup_merge_log_group
    ON dedup_merge_log (group_id, reverted);

CREATE TABLE IF NOT EXISTS dedup_run_log (
    id UUID PRIMARY KEY,
    started_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    ended_at TIMESTAMPTZ,
    status TEXT NOT NULL DEFAULT 'iniciado',
    total_analyzed BIGINT NOT NULL DEFAULT 0,
    total_groups BIGINT NOT NULL DEFAULT 0,
    error_text TEXT
);
";

/// Create extensions (best-effort) and the pipeline tables (required).
pub async fn init_schema(pool: &PgPool) -> sqlx::Result<()> {
    for statement in CREATE_EXTENSIONS {
        if let Err(e) = sqlx::query(statement).execute(pool).await {
            // Usually a privilege problem; the DBA may have created them
            // already, in which case detection works regardless.
            warn!("extension setup skipped ({statement}): {e}");
        }
    }

    sqlx::raw_sql(CREATE_TABLES).execute(pool).await?;
    info!("pipeline schema ready");
    Ok(())
}
