//! Transitive clustering of similar pairs.
//!
//! The detector emits pairs `(a, b, score)` scoped to one parent; this
//! module unions them into connected components and keeps the components
//! with at least two members as candidate groups.

use crate::normalize::fold_with_prefixes;
use crate::EntityKind;
use std::collections::HashMap;

/// One similar pair reported by the detector, already scoped to a parent.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarPair {
    pub id_a: String,
    pub id_b: String,
    pub name_a: String,
    pub name_b: String,
    /// State code for cities, parent row id otherwise (city id for condos).
    pub parent_id: Option<String>,
    /// Trigram similarity in `[0, 1]`.
    pub score: f64,
}

/// A connected component of similar members, not yet validated or persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateGroup {
    /// Members in discovery order.
    pub member_ids: Vec<String>,
    /// Original spellings, parallel to `member_ids`.
    pub member_names: Vec<String>,
    pub parent_id: Option<String>,
    /// Mean of the component's edge scores, rounded to 2 decimals.
    pub mean_score: f64,
    /// `fold_with_prefixes` of the first member's name.
    pub normalized_name: String,
}

/// Union-find with path compression and union by rank, keyed by dense
/// indices assigned in discovery order.
struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    fn new() -> Self {
        Self {
            parent: Vec::new(),
            rank: Vec::new(),
        }
    }

    fn push(&mut self) -> usize {
        let idx = self.parent.len();
        self.parent.push(idx);
        self.rank.push(0);
        idx
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

/// Cluster detector pairs into candidate groups.
///
/// Groups are the connected components of the pair graph with two or more
/// members. Members keep discovery order (order of first appearance across
/// the pair list), and components inherit the `parent_id` of their first
/// pair: the detector only ever pairs rows within one scope, so all pairs
/// of a component agree on it.
///
/// Output is ordered by `mean_score` descending, ties keeping discovery
/// order. A component's mean can drift below a later component's as weak
/// edges fold in, so discovery order alone does not track scores;
/// downstream persistence relies on this ordering.
#[must_use]
pub fn cluster_pairs(kind: EntityKind, pairs: &[SimilarPair]) -> Vec<CandidateGroup> {
    let mut uf = UnionFind::new();
    let mut index_of: HashMap<&str, usize> = HashMap::new();
    let mut ids: Vec<&str> = Vec::new();
    let mut names: Vec<&str> = Vec::new();

    for pair in pairs {
        for (id, name) in [(&pair.id_a, &pair.name_a), (&pair.id_b, &pair.name_b)] {
            if !index_of.contains_key(id.as_str()) {
                let idx = uf.push();
                index_of.insert(id.as_str(), idx);
                ids.push(id.as_str());
                names.push(name.as_str());
            }
        }
        let ia = index_of[pair.id_a.as_str()];
        let ib = index_of[pair.id_b.as_str()];
        uf.union(ia, ib);
    }

    // Bucket members and edges per component root, preserving discovery order.
    let mut members_by_root: HashMap<usize, Vec<usize>> = HashMap::new();
    let mut root_order: Vec<usize> = Vec::new();
    for idx in 0..ids.len() {
        let root = uf.find(idx);
        let bucket = members_by_root.entry(root).or_default();
        if bucket.is_empty() {
            root_order.push(root);
        }
        bucket.push(idx);
    }

    let mut scores_by_root: HashMap<usize, (f64, usize)> = HashMap::new();
    let mut parent_by_root: HashMap<usize, Option<String>> = HashMap::new();
    for pair in pairs {
        let root = uf.find(index_of[pair.id_a.as_str()]);
        let (sum, count) = scores_by_root.entry(root).or_insert((0.0, 0));
        *sum += pair.score;
        *count += 1;
        parent_by_root
            .entry(root)
            .or_insert_with(|| pair.parent_id.clone());
    }

    let mut groups = Vec::new();
    for root in root_order {
        let member_indices = &members_by_root[&root];
        if member_indices.len() < 2 {
            continue;
        }

        let member_ids: Vec<String> =
            member_indices.iter().map(|&i| ids[i].to_string()).collect();
        let member_names: Vec<String> =
            member_indices.iter().map(|&i| names[i].to_string()).collect();
        let (sum, count) = scores_by_root.get(&root).copied().unwrap_or((0.0, 0));
        let mean_score = if count == 0 {
            0.0
        } else {
            round2(sum / count as f64)
        };
        let normalized_name = fold_with_prefixes(&member_names[0], kind);

        groups.push(CandidateGroup {
            member_ids,
            member_names,
            parent_id: parent_by_root.get(&root).cloned().flatten(),
            mean_score,
            normalized_name,
        });
    }

    // Stable sort: equal means keep discovery order.
    groups.sort_by(|a, b| b.mean_score.total_cmp(&a.mean_score));
    groups
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}
