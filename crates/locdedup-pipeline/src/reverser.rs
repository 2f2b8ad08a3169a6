//! Exact rollback of an executed merge.
//!
//! Driven entirely by the merge log: every non-reverted entry's old value
//! is written back through the row's primary key, absorbed members get
//! their `excluido` flag cleared, the entries flip to reverted, and the
//! group becomes Reverted (and can be executed again later). One
//! transaction, same timeout discipline as the merge.

use crate::error::{PipelineError, Result};
use crate::store::GroupStore;
use chrono::Utc;
use locdedup::{edge_for, entity_table, DuplicateGroup, GroupStatus, MergeLogEntry};
use std::collections::BTreeSet;
use tracing::info;
use uuid::Uuid;

const REVERT_STATEMENT_TIMEOUT: &str = "SET LOCAL statement_timeout = '30s'";

/// What a revert did.
#[derive(Debug, Clone)]
pub struct RevertOutcome {
    pub group: DuplicateGroup,
    pub entries_reverted: usize,
}

/// Revert one executed group. With no pending log rows this is a no-op
/// that reports zero reverted entries and leaves all state as it was.
pub async fn execute_revert(store: &GroupStore, group_id: Uuid) -> Result<RevertOutcome> {
    let group = store.require_group(group_id).await?;
    if group.status != GroupStatus::Executed {
        return Err(PipelineError::InvalidStatus {
            id: group.id,
            status: group.status,
            operation: "reversão",
        });
    }

    let host = entity_table(group.entity_kind);
    let now = Utc::now();

    let mut tx = store.pool().begin().await?;
    sqlx::query(REVERT_STATEMENT_TIMEOUT).execute(&mut *tx).await?;

    let rows = sqlx::query(
        "SELECT * FROM dedup_merge_log
         WHERE group_id = $1 AND reverted = false
         ORDER BY executed_at, id",
    )
    .bind(group_id)
    .fetch_all(&mut *tx)
    .await?;
    let entries = rows
        .iter()
        .map(crate::store::merge_log_from_row)
        .collect::<Result<Vec<MergeLogEntry>>>()?;

    if entries.is_empty() {
        // Nothing was ever redirected (or it is all reverted already).
        drop(tx);
        return Ok(RevertOutcome {
            group,
            entries_reverted: 0,
        });
    }

    for entry in &entries {
        let edge = edge_for(&entry.table_name, &entry.column_name).ok_or_else(|| {
            PipelineError::UnknownFkEdge {
                table: entry.table_name.clone(),
                column: entry.column_name.clone(),
            }
        })?;
        let restore = format!(
            "UPDATE {} SET {} = $1::{} WHERE {}::text = $2",
            edge.table,
            edge.column,
            edge.id_kind.sql_cast(),
            edge.pk_column
        );
        sqlx::query(&restore)
            .bind(&entry.old_value)
            .bind(&entry.affected_row_pk)
            .execute(&mut *tx)
            .await?;
    }

    let absorbed: BTreeSet<&String> =
        entries.iter().map(|e| &e.absorbed_member_id).collect();
    if host.has_excluded_flag {
        let restore_flag = format!(
            "UPDATE {} SET excluido = false WHERE id = $1::{}",
            host.table,
            host.id_kind.sql_cast()
        );
        for member in &absorbed {
            sqlx::query(&restore_flag)
                .bind(member.as_str())
                .execute(&mut *tx)
                .await?;
        }
    }

    sqlx::query(
        "UPDATE dedup_merge_log
         SET reverted = true, reverted_at = $2
         WHERE group_id = $1 AND reverted = false",
    )
    .bind(group_id)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    sqlx::query("UPDATE dedup_groups SET status = $2, reverted_at = $3 WHERE id = $1")
        .bind(group_id)
        .bind(GroupStatus::Reverted.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    info!(
        "group {} reverted: {} log entries restored across {} members",
        group_id,
        entries.len(),
        absorbed.len()
    );

    let group = store.require_group(group_id).await?;
    Ok(RevertOutcome {
        group,
        entries_reverted: entries.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distinct_absorbed_members() {
        let entry = |member: &str| MergeLogEntry {
            id: Uuid::new_v4(),
            group_id: Uuid::nil(),
            absorbed_member_id: member.to_string(),
            table_name: "ruas".to_string(),
            column_name: "bairro_id".to_string(),
            affected_row_pk: "pk".to_string(),
            old_value: member.to_string(),
            new_value: "canonical".to_string(),
            reverted: false,
            reverted_at: None,
            executed_at: Utc::now(),
        };
        let entries = vec![entry("b"), entry("b"), entry("c"), entry("b")];
        let absorbed: BTreeSet<&String> =
            entries.iter().map(|e| &e.absorbed_member_id).collect();
        assert_eq!(absorbed.len(), 2);
    }

    #[test]
    fn test_timeout_is_session_local() {
        assert!(REVERT_STATEMENT_TIMEOUT.starts_with("SET LOCAL"));
    }
}
