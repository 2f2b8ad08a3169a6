//! Inbound-reference counting per member.
//!
//! The operator UI proposes the most-referenced member as canonical when
//! enrichment produced no authoritative suggestion, and shows the blast
//! radius of a merge either way. Counts come straight from the FK map: one
//! `COUNT(*)` per (member, edge).

use crate::error::Result;
use crate::store::GroupStore;
use locdedup::{edges_for, DuplicateGroup};
use serde::Serialize;
use tracing::debug;

/// Reference counts for one member.
#[derive(Debug, Clone, Serialize)]
pub struct MemberImpact {
    pub id: String,
    pub name: String,
    /// `(table.column, count)` per FK edge, in map order.
    pub per_table_counts: Vec<TableCount>,
    pub total_references: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableCount {
    pub table: String,
    pub column: String,
    pub count: i64,
}

/// Count inbound references for every member of a group, sorted by
/// `total_references` descending (ties keep member order).
pub async fn analyze_group(store: &GroupStore, group: &DuplicateGroup) -> Result<Vec<MemberImpact>> {
    let mut impacts = Vec::with_capacity(group.member_ids.len());

    for (member_id, member_name) in group.member_ids.iter().zip(&group.member_names) {
        let mut per_table_counts = Vec::new();
        let mut total_references = 0i64;

        for edge in edges_for(group.entity_kind) {
            let sql = format!(
                "SELECT count(*) FROM {} WHERE {} = $1::{}",
                edge.table,
                edge.column,
                edge.id_kind.sql_cast()
            );
            let count: i64 = sqlx::query_scalar(&sql)
                .bind(member_id)
                .fetch_one(store.pool())
                .await?;
            total_references += count;
            per_table_counts.push(TableCount {
                table: edge.table.to_string(),
                column: edge.column.to_string(),
                count,
            });
        }

        debug!(
            "member {} of group {} holds {} inbound references",
            member_id, group.id, total_references
        );
        impacts.push(MemberImpact {
            id: member_id.clone(),
            name: member_name.clone(),
            per_table_counts,
            total_references,
        });
    }

    impacts.sort_by(|a, b| b.total_references.cmp(&a.total_references));
    Ok(impacts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_is_descending_and_stable() {
        let mut impacts = vec![
            MemberImpact {
                id: "a".to_string(),
                name: "A".to_string(),
                per_table_counts: vec![],
                total_references: 3,
            },
            MemberImpact {
                id: "b".to_string(),
                name: "B".to_string(),
                per_table_counts: vec![],
                total_references: 8,
            },
            MemberImpact {
                id: "c".to_string(),
                name: "C".to_string(),
                per_table_counts: vec![],
                total_references: 3,
            },
        ];
        impacts.sort_by(|a, b| b.total_references.cmp(&a.total_references));
        let ids: Vec<&str> = impacts.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_impact_serializes_for_the_api() {
        let impact = MemberImpact {
            id: "a".to_string(),
            name: "Jardim Aurora".to_string(),
            per_table_counts: vec![TableCount {
                table: "ruas".to_string(),
                column: "bairro_id".to_string(),
                count: 5,
            }],
            total_references: 5,
        };
        let json = serde_json::to_value(&impact).unwrap();
        assert_eq!(json["total_references"], 5);
        assert_eq!(json["per_table_counts"][0]["table"], "ruas");
    }
}
