//! Transactional merge execution.
//!
//! A merge redirects every inbound foreign key from the absorbed members to
//! the chosen canonical, soft-deletes the absorbed rows, and records one
//! log row per rewritten host row. Everything happens in one transaction
//! under a statement timeout; a failure of any statement rolls the whole
//! merge back and leaves the group untouched.

use crate::error::{PipelineError, Result};
use crate::store::GroupStore;
use chrono::Utc;
use locdedup::{edges_for, entity_table, DuplicateGroup, GroupStatus};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

/// Wall-clock budget for the merge transaction.
const MERGE_STATEMENT_TIMEOUT: &str = "SET LOCAL statement_timeout = '30s'";

/// Operator request to execute one group.
#[derive(Debug, Clone)]
pub struct MergeRequest {
    pub group_id: Uuid,
    pub chosen_canonical_id: String,
    /// Optional rename of the canonical row.
    pub chosen_name: Option<String>,
    pub executed_by: Option<String>,
    /// Opaque audit blob; kept across re-executions when absent.
    pub decision_context: Option<Value>,
}

/// What a merge did.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub group: DuplicateGroup,
    pub total_fks_redirected: i64,
    pub absorbed_members: usize,
}

/// Execute a merge. Preconditions checked before the transaction opens:
/// the group exists, its status allows execution (Pending or Reverted),
/// and the chosen canonical is one of its members.
pub async fn execute_merge(store: &GroupStore, request: MergeRequest) -> Result<MergeOutcome> {
    let group = store.require_group(request.group_id).await?;
    if !group.status.can_execute() {
        return Err(PipelineError::InvalidStatus {
            id: group.id,
            status: group.status,
            operation: "unificação",
        });
    }
    if !group.member_ids.contains(&request.chosen_canonical_id) {
        return Err(PipelineError::CanonicalNotMember {
            id: group.id,
            member: request.chosen_canonical_id.clone(),
        });
    }

    let host = entity_table(group.entity_kind);
    let cast = host.id_kind.sql_cast();
    let now = Utc::now();

    let mut tx = store.pool().begin().await?;
    sqlx::query(MERGE_STATEMENT_TIMEOUT).execute(&mut *tx).await?;

    let absorbed: Vec<&String> = group
        .member_ids
        .iter()
        .filter(|m| **m != request.chosen_canonical_id)
        .collect();

    let mut total_fks_redirected = 0i64;
    for member in &absorbed {
        for edge in edges_for(group.entity_kind) {
            let select = format!(
                "SELECT {}::text FROM {} WHERE {} = $1::{}",
                edge.pk_column,
                edge.table,
                edge.column,
                edge.id_kind.sql_cast()
            );
            let pks: Vec<String> = sqlx::query_scalar(&select)
                .bind(member.as_str())
                .fetch_all(&mut *tx)
                .await?;
            if pks.is_empty() {
                continue;
            }

            let update = format!(
                "UPDATE {} SET {} = $1::{} WHERE {} = $2::{}",
                edge.table,
                edge.column,
                edge.id_kind.sql_cast(),
                edge.column,
                edge.id_kind.sql_cast()
            );
            sqlx::query(&update)
                .bind(&request.chosen_canonical_id)
                .bind(member.as_str())
                .execute(&mut *tx)
                .await?;

            debug!(
                "redirected {} rows of {}.{} from {} to {}",
                pks.len(),
                edge.table,
                edge.column,
                member,
                request.chosen_canonical_id
            );

            for pk in pks {
                sqlx::query(
                    "INSERT INTO dedup_merge_log (
                        id, group_id, absorbed_member_id, table_name,
                        column_name, affected_row_pk, old_value, new_value,
                        reverted, executed_at
                    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, false, $9)",
                )
                .bind(Uuid::new_v4())
                .bind(group.id)
                .bind(member.as_str())
                .bind(edge.table)
                .bind(edge.column)
                .bind(&pk)
                .bind(member.as_str())
                .bind(&request.chosen_canonical_id)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                total_fks_redirected += 1;
            }
        }

        if host.has_excluded_flag {
            let soft_delete = format!(
                "UPDATE {} SET excluido = true WHERE id = $1::{cast}",
                host.table
            );
            sqlx::query(&soft_delete)
                .bind(member.as_str())
                .execute(&mut *tx)
                .await?;
        }
    }

    if let Some(chosen_name) = &request.chosen_name {
        let rename = format!(
            "UPDATE {} SET {} = $1 WHERE id = $2::{cast}",
            host.table, host.name_column
        );
        sqlx::query(&rename)
            .bind(chosen_name)
            .bind(&request.chosen_canonical_id)
            .execute(&mut *tx)
            .await?;
    }

    sqlx::query(
        "UPDATE dedup_groups
         SET status = $2, chosen_canonical_id = $3, chosen_name = $4,
             executed_at = $5, executed_by = $6, total_fks_redirected = $7,
             decision_context = COALESCE($8, decision_context),
             reverted_at = NULL
         WHERE id = $1",
    )
    .bind(group.id)
    .bind(GroupStatus::Executed.as_str())
    .bind(&request.chosen_canonical_id)
    .bind(&request.chosen_name)
    .bind(now)
    .bind(&request.executed_by)
    .bind(total_fks_redirected)
    .bind(&request.decision_context)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    info!(
        "group {} executed: {} FK rows redirected, {} members absorbed into {}",
        group.id,
        total_fks_redirected,
        absorbed.len(),
        request.chosen_canonical_id
    );

    let group = store.require_group(request.group_id).await?;
    Ok(MergeOutcome {
        total_fks_redirected,
        absorbed_members: absorbed.len(),
        group,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_request_carries_optionals() {
        let request = MergeRequest {
            group_id: Uuid::nil(),
            chosen_canonical_id: "a".to_string(),
            chosen_name: None,
            executed_by: Some("operador@latitude".to_string()),
            decision_context: Some(serde_json::json!({"motivo": "impacto maior"})),
        };
        assert!(request.chosen_name.is_none());
        assert_eq!(
            request.decision_context.as_ref().unwrap()["motivo"],
            "impacto maior"
        );
    }

    #[test]
    fn test_timeout_is_session_local() {
        // SET LOCAL scopes the timeout to the merge transaction; a plain
        // SET would leak onto the pooled connection.
        assert!(MERGE_STATEMENT_TIMEOUT.starts_with("SET LOCAL"));
    }
}
