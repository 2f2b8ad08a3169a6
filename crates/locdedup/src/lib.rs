//! Core types for the `locdedup` pipeline.
//!
//! This crate is pure: text normalization, bigram-Dice similarity, the
//! union-find clusterer and the declarative map of inbound foreign keys.
//! Everything that touches a database, a cache or the network lives in the
//! sibling crates (`locdedup-pipeline`, `locdedup-cache`,
//! `locdedup-resolvers`, `locdedup-llm`).
//!
//! # Example
//!
//! ```rust
//! use locdedup::{normalize, EntityKind};
//!
//! let folded = normalize::fold_with_prefixes("Jardim São João II", EntityKind::Neighborhood);
//! assert_eq!(folded, "sao joao 2");
//! ```

pub mod cluster;
pub mod fk_map;
pub mod model;
pub mod normalize;
pub mod similarity;

mod entity;

pub use cluster::{cluster_pairs, CandidateGroup, SimilarPair};
pub use entity::{EntityKind, GroupStatus, RunStatus};
pub use fk_map::{edge_for, edges_for, entity_table, FkEdge, HostTable, IdKind, FK_MAP, HOST_TABLES};
pub use model::{
    CanonicalSource, DuplicateGroup, GroupSource, MemberContext, MergeLogEntry, RunLog,
};
