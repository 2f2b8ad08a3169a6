//! Declarative map of the host schema as the pipeline sees it.
//!
//! Two tables drive everything that touches host rows: [`HOST_TABLES`]
//! describes the four entity tables themselves (names, parent columns,
//! soft-delete flags), and [`FK_MAP`] lists every inbound foreign-key edge
//! the merger must redirect. Supporting a new referencing table is one new
//! [`FkEdge`] entry; the merge and revert engines have no per-kind branches.

use crate::EntityKind;
use serde::{Deserialize, Serialize};

/// SQL type of an id column, used to cast bound text parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdKind {
    #[serde(rename = "uuid")]
    Uuid,
    #[serde(rename = "int")]
    Int,
}

impl IdKind {
    /// Postgres cast target for a text-bound parameter of this kind.
    #[must_use]
    pub fn sql_cast(self) -> &'static str {
        match self {
            IdKind::Uuid => "uuid",
            IdKind::Int => "bigint",
        }
    }
}

/// One inbound foreign-key edge: rows of `table.column` point at an entity
/// of `kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FkEdge {
    pub kind: EntityKind,
    pub table: &'static str,
    pub column: &'static str,
    /// Type of `column` (same as the referenced entity's id).
    pub id_kind: IdKind,
    /// Primary key of `table`; "id" unless the table deviates.
    pub pk_column: &'static str,
}

/// Host-schema description of one entity table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostTable {
    pub kind: EntityKind,
    pub table: &'static str,
    pub name_column: &'static str,
    pub id_kind: IdKind,
    /// Column holding the parent reference (None for cities, which scope by
    /// state code instead).
    pub parent_column: Option<&'static str>,
    /// Whether the table carries the `excluido` soft-delete flag.
    pub has_excluded_flag: bool,
    /// Column holding the row's postal code, where the table has one.
    pub cep_column: Option<&'static str>,
}

/// The four entity tables. Cities are keyed by their IBGE code (integer);
/// the CRM-owned tables use uuid keys.
pub const HOST_TABLES: &[HostTable] = &[
    HostTable {
        kind: EntityKind::City,
        table: "cidades",
        name_column: "nome",
        id_kind: IdKind::Int,
        parent_column: None,
        has_excluded_flag: false,
        cep_column: None,
    },
    HostTable {
        kind: EntityKind::Neighborhood,
        table: "bairros",
        name_column: "nome",
        id_kind: IdKind::Uuid,
        parent_column: Some("cidade_id"),
        has_excluded_flag: true,
        cep_column: None,
    },
    HostTable {
        kind: EntityKind::Street,
        table: "ruas",
        name_column: "nome",
        id_kind: IdKind::Uuid,
        parent_column: Some("bairro_id"),
        has_excluded_flag: true,
        cep_column: Some("cep"),
    },
    HostTable {
        kind: EntityKind::Condo,
        table: "condominios",
        name_column: "nome",
        id_kind: IdKind::Uuid,
        parent_column: Some("rua_id"),
        has_excluded_flag: true,
        cep_column: None,
    },
];

/// Every inbound foreign key the merger redirects, per entity kind.
pub const FK_MAP: &[FkEdge] = &[
    // cidades
    FkEdge {
        kind: EntityKind::City,
        table: "bairros",
        column: "cidade_id",
        id_kind: IdKind::Int,
        pk_column: "id",
    },
    FkEdge {
        kind: EntityKind::City,
        table: "enderecos",
        column: "cidade_id",
        id_kind: IdKind::Int,
        pk_column: "endereco_id",
    },
    FkEdge {
        kind: EntityKind::City,
        table: "clientes",
        column: "cidade_id",
        id_kind: IdKind::Int,
        pk_column: "id",
    },
    FkEdge {
        kind: EntityKind::City,
        table: "imoveis",
        column: "cidade_id",
        id_kind: IdKind::Int,
        pk_column: "id",
    },
    // bairros
    FkEdge {
        kind: EntityKind::Neighborhood,
        table: "ruas",
        column: "bairro_id",
        id_kind: IdKind::Uuid,
        pk_column: "id",
    },
    FkEdge {
        kind: EntityKind::Neighborhood,
        table: "enderecos",
        column: "bairro_id",
        id_kind: IdKind::Uuid,
        pk_column: "endereco_id",
    },
    FkEdge {
        kind: EntityKind::Neighborhood,
        table: "imoveis",
        column: "bairro_id",
        id_kind: IdKind::Uuid,
        pk_column: "id",
    },
    // ruas
    FkEdge {
        kind: EntityKind::Street,
        table: "condominios",
        column: "rua_id",
        id_kind: IdKind::Uuid,
        pk_column: "id",
    },
    FkEdge {
        kind: EntityKind::Street,
        table: "enderecos",
        column: "rua_id",
        id_kind: IdKind::Uuid,
        pk_column: "endereco_id",
    },
    FkEdge {
        kind: EntityKind::Street,
        table: "imoveis",
        column: "rua_id",
        id_kind: IdKind::Uuid,
        pk_column: "id",
    },
    // condominios
    FkEdge {
        kind: EntityKind::Condo,
        table: "imoveis",
        column: "condominio_id",
        id_kind: IdKind::Uuid,
        pk_column: "id",
    },
    FkEdge {
        kind: EntityKind::Condo,
        table: "unidades",
        column: "condominio_id",
        id_kind: IdKind::Uuid,
        pk_column: "id",
    },
];

/// Inbound edges for one kind, in declaration order.
pub fn edges_for(kind: EntityKind) -> impl Iterator<Item = &'static FkEdge> {
    FK_MAP.iter().filter(move |edge| edge.kind == kind)
}

/// Look up an edge by table and column, e.g. when reverting a log entry.
#[must_use]
pub fn edge_for(table: &str, column: &str) -> Option<&'static FkEdge> {
    FK_MAP
        .iter()
        .find(|edge| edge.table == table && edge.column == column)
}

/// Host-table descriptor for a kind.
#[must_use]
pub fn entity_table(kind: EntityKind) -> &'static HostTable {
    // HOST_TABLES is declared in EntityKind::ALL order.
    match kind {
        EntityKind::City => &HOST_TABLES[0],
        EntityKind::Neighborhood => &HOST_TABLES[1],
        EntityKind::Street => &HOST_TABLES[2],
        EntityKind::Condo => &HOST_TABLES[3],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_has_a_host_table() {
        for kind in EntityKind::ALL {
            let table = entity_table(kind);
            assert_eq!(table.kind, kind);
            assert!(!table.table.is_empty());
        }
    }

    #[test]
    fn test_every_kind_has_inbound_edges() {
        for kind in EntityKind::ALL {
            assert!(edges_for(kind).count() >= 2, "no edges for {kind:?}");
        }
    }

    #[test]
    fn test_city_edges_are_int_keyed() {
        for edge in edges_for(EntityKind::City) {
            assert_eq!(edge.id_kind, IdKind::Int);
        }
    }

    #[test]
    fn test_non_city_edges_are_uuid_keyed() {
        for kind in [EntityKind::Neighborhood, EntityKind::Street, EntityKind::Condo] {
            for edge in edges_for(kind) {
                assert_eq!(edge.id_kind, IdKind::Uuid, "{}.{}", edge.table, edge.column);
            }
        }
    }

    #[test]
    fn test_edge_lookup_by_table_and_column() {
        let edge = edge_for("ruas", "bairro_id").unwrap();
        assert_eq!(edge.kind, EntityKind::Neighborhood);
        assert_eq!(edge.pk_column, "id");
        assert!(edge_for("ruas", "cidade_id").is_none());
    }

    #[test]
    fn test_enderecos_pk_override() {
        for edge in FK_MAP.iter().filter(|e| e.table == "enderecos") {
            assert_eq!(edge.pk_column, "endereco_id");
        }
    }

    #[test]
    fn test_no_duplicate_edges() {
        for (i, a) in FK_MAP.iter().enumerate() {
            for b in &FK_MAP[i + 1..] {
                assert!(
                    !(a.table == b.table && a.column == b.column),
                    "duplicate edge {}.{}",
                    a.table,
                    a.column
                );
            }
        }
    }

    #[test]
    fn test_parent_columns_follow_hierarchy() {
        assert_eq!(entity_table(EntityKind::City).parent_column, None);
        assert_eq!(
            entity_table(EntityKind::Neighborhood).parent_column,
            Some("cidade_id")
        );
        assert_eq!(entity_table(EntityKind::Street).parent_column, Some("bairro_id"));
        assert_eq!(entity_table(EntityKind::Condo).parent_column, Some("rua_id"));
    }

    #[test]
    fn test_excluded_flag_coverage() {
        assert!(!entity_table(EntityKind::City).has_excluded_flag);
        assert!(entity_table(EntityKind::Neighborhood).has_excluded_flag);
        assert!(entity_table(EntityKind::Street).has_excluded_flag);
        assert!(entity_table(EntityKind::Condo).has_excluded_flag);
    }

    #[test]
    fn test_sql_cast_targets() {
        assert_eq!(IdKind::Uuid.sql_cast(), "uuid");
        assert_eq!(IdKind::Int.sql_cast(), "bigint");
    }
}
