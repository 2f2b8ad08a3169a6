//! Scoped trigram-similarity detection.
//!
//! One query per entity kind pairs rows inside a shared parent scope
//! (`a.id < b.id` keeps each pair unique), scored by `pg_trgm` similarity
//! over case/accent-folded names, capped and ordered score-descending.
//! Condos are the exception: they pair per street but the emitted
//! `parent_id` is the enclosing city, which is what the dashboard filters
//! by; most condo duplicates sit on the same street anyway.

use crate::error::Result;
use crate::store::GroupStore;
use locdedup::{EntityKind, SimilarPair};
use sqlx::Row;
use std::collections::HashSet;
use tracing::{debug, info};

/// Detection tuning for one pass.
#[derive(Debug, Clone, Copy)]
pub struct DetectorParams {
    /// Similarity threshold τ.
    pub threshold: f64,
    /// Maximum pairs per query.
    pub pair_limit: i64,
}

fn fold_expr(column: &str) -> String {
    format!("unaccent(lower({column}))")
}

/// The pair query for one kind, optionally scoped to a single parent.
fn pair_query(kind: EntityKind, with_parent_filter: bool) -> String {
    let sim = format!(
        "similarity({}, {})",
        fold_expr("a.nome"),
        fold_expr("b.nome")
    );

    let (from_join, parent_expr, extra_where, parent_filter) = match kind {
        EntityKind::City => (
            "FROM cidades a JOIN cidades b ON b.uf = a.uf AND a.id < b.id".to_string(),
            "a.uf",
            String::new(),
            " AND a.uf = $3",
        ),
        EntityKind::Neighborhood => (
            "FROM bairros a JOIN bairros b ON b.cidade_id = a.cidade_id AND a.id < b.id"
                .to_string(),
            "a.cidade_id::text",
            " AND NOT a.excluido AND NOT b.excluido".to_string(),
            " AND a.cidade_id = $3::bigint",
        ),
        EntityKind::Street => (
            "FROM ruas a JOIN ruas b ON b.bairro_id = a.bairro_id AND a.id < b.id".to_string(),
            "a.bairro_id::text",
            " AND NOT a.excluido AND NOT b.excluido".to_string(),
            " AND a.bairro_id = $3::uuid",
        ),
        EntityKind::Condo => (
            "FROM condominios a \
             JOIN condominios b ON b.rua_id = a.rua_id AND a.id < b.id \
             JOIN ruas r ON r.id = a.rua_id \
             JOIN bairros bb ON bb.id = r.bairro_id"
                .to_string(),
            "bb.cidade_id::text",
            String::new(),
            " AND bb.cidade_id = $3::bigint",
        ),
    };

    format!(
        "SELECT a.id::text AS id_a, b.id::text AS id_b, \
                a.nome AS nome_a, b.nome AS nome_b, \
                {parent_expr} AS parent_id, \
                {sim}::float8 AS score \
         {from_join} \
         WHERE {sim} > $1{extra_where}{} \
         ORDER BY score DESC \
         LIMIT $2",
        if with_parent_filter { parent_filter } else { "" },
    )
}

/// Run the pair query for one kind. All pairs or an error: a failing query
/// aborts this kind's pass without touching the others.
pub async fn detect_pairs(
    store: &GroupStore,
    kind: EntityKind,
    params: DetectorParams,
    parent_id: Option<&str>,
) -> Result<Vec<SimilarPair>> {
    let sql = pair_query(kind, parent_id.is_some());
    let mut query = sqlx::query(&sql).bind(params.threshold).bind(params.pair_limit);
    if let Some(parent_id) = parent_id {
        query = query.bind(parent_id.to_string());
    }

    let rows = query.fetch_all(store.pool()).await?;
    let pairs = rows
        .iter()
        .map(|row| {
            Ok(SimilarPair {
                id_a: row.try_get("id_a")?,
                id_b: row.try_get("id_b")?,
                name_a: row.try_get("nome_a")?,
                name_b: row.try_get("nome_b")?,
                parent_id: row.try_get("parent_id")?,
                score: row.try_get("score")?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    info!("detected {} candidate pairs for {}", pairs.len(), kind);
    Ok(pairs)
}

/// Drop pairs whose endpoints are both already members of a Pending or
/// Executed group of this kind. A pair with one new endpoint survives so
/// the newcomer can attach to a fresh group.
#[must_use]
pub fn filter_known_pairs(
    pairs: Vec<SimilarPair>,
    existing_members: &HashSet<String>,
) -> Vec<SimilarPair> {
    let before = pairs.len();
    let kept: Vec<SimilarPair> = pairs
        .into_iter()
        .filter(|pair| {
            !(existing_members.contains(&pair.id_a) && existing_members.contains(&pair.id_b))
        })
        .collect();
    if kept.len() != before {
        debug!("dropped {} pairs already grouped", before - kept.len());
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(a: &str, b: &str) -> SimilarPair {
        SimilarPair {
            id_a: a.to_string(),
            id_b: b.to_string(),
            name_a: a.to_uppercase(),
            name_b: b.to_uppercase(),
            parent_id: Some("1".to_string()),
            score: 0.9,
        }
    }

    #[test]
    fn test_city_query_scopes_by_state() {
        let sql = pair_query(EntityKind::City, false);
        assert!(sql.contains("b.uf = a.uf"));
        assert!(sql.contains("a.id < b.id"));
        assert!(sql.contains("a.uf AS parent_id"));
        assert!(!sql.contains("excluido"));
    }

    #[test]
    fn test_neighborhood_query_filters_soft_deleted() {
        let sql = pair_query(EntityKind::Neighborhood, false);
        assert!(sql.contains("b.cidade_id = a.cidade_id"));
        assert!(sql.contains("NOT a.excluido"));
        assert!(sql.contains("NOT b.excluido"));
    }

    #[test]
    fn test_street_query_scopes_by_neighborhood() {
        let sql = pair_query(EntityKind::Street, false);
        assert!(sql.contains("b.bairro_id = a.bairro_id"));
        assert!(sql.contains("NOT a.excluido"));
    }

    #[test]
    fn test_condo_query_pairs_per_street_labels_city() {
        let sql = pair_query(EntityKind::Condo, false);
        assert!(sql.contains("b.rua_id = a.rua_id"));
        assert!(sql.contains("bb.cidade_id::text AS parent_id"));
    }

    #[test]
    fn test_all_queries_fold_and_cap() {
        for kind in EntityKind::ALL {
            let sql = pair_query(kind, false);
            assert!(sql.contains("unaccent(lower(a.nome))"), "{kind}");
            assert!(sql.contains("ORDER BY score DESC"), "{kind}");
            assert!(sql.contains("LIMIT $2"), "{kind}");
            assert!(!sql.contains("$3"), "{kind} must not reference the parent bind");
        }
    }

    #[test]
    fn test_parent_filter_adds_third_bind() {
        for kind in EntityKind::ALL {
            let sql = pair_query(kind, true);
            assert!(sql.contains("$3"), "{kind}");
        }
    }

    #[test]
    fn test_filter_drops_only_fully_known_pairs() {
        let existing: HashSet<String> =
            ["a", "b", "c"].iter().map(ToString::to_string).collect();
        let pairs = vec![pair("a", "b"), pair("b", "d"), pair("e", "f")];
        let kept = filter_known_pairs(pairs, &existing);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].id_a, "b");
        assert_eq!(kept[1].id_a, "e");
    }

    #[test]
    fn test_filter_with_no_existing_members_keeps_all() {
        let kept = filter_known_pairs(vec![pair("a", "b")], &HashSet::new());
        assert_eq!(kept.len(), 1);
    }
}
