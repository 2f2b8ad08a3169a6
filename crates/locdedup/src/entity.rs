//! Entity kinds and lifecycle states.

use serde::{Deserialize, Serialize};

/// The four reference tables the pipeline deduplicates.
///
/// The order of [`EntityKind::ALL`] is the detection order: parents are
/// scanned before children so that a parent's canonical name already exists
/// when a child group is enriched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    #[serde(rename = "cidade")]
    City,
    #[serde(rename = "bairro")]
    Neighborhood,
    #[serde(rename = "rua")]
    Street,
    #[serde(rename = "condominio")]
    Condo,
}

impl EntityKind {
    /// All kinds, in detection order (parents before children).
    pub const ALL: [EntityKind; 4] = [
        EntityKind::City,
        EntityKind::Neighborhood,
        EntityKind::Street,
        EntityKind::Condo,
    ];

    /// Stable wire/database tag for this kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::City => "cidade",
            EntityKind::Neighborhood => "bairro",
            EntityKind::Street => "rua",
            EntityKind::Condo => "condominio",
        }
    }

    /// Parse a wire tag (`tipo` query values). Case-insensitive, accepts the
    /// accented spelling of "condomínio".
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "cidade" => Some(EntityKind::City),
            "bairro" => Some(EntityKind::Neighborhood),
            "rua" => Some(EntityKind::Street),
            "condominio" | "condomínio" => Some(EntityKind::Condo),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a duplicate group.
///
/// Transitions: `Pending -> Executed | Discarded`, `Executed -> Reverted`,
/// `Reverted -> Executed`. Anything else is rejected at the merge/revert
/// entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupStatus {
    #[serde(rename = "pendente")]
    Pending,
    #[serde(rename = "executado")]
    Executed,
    #[serde(rename = "descartado")]
    Discarded,
    #[serde(rename = "revertido")]
    Reverted,
}

impl GroupStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            GroupStatus::Pending => "pendente",
            GroupStatus::Executed => "executado",
            GroupStatus::Discarded => "descartado",
            GroupStatus::Reverted => "revertido",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pendente" => Some(GroupStatus::Pending),
            "executado" => Some(GroupStatus::Executed),
            "descartado" => Some(GroupStatus::Discarded),
            "revertido" => Some(GroupStatus::Reverted),
            _ => None,
        }
    }

    /// Whether a merge may be executed from this state.
    #[must_use]
    pub fn can_execute(self) -> bool {
        matches!(self, GroupStatus::Pending | GroupStatus::Reverted)
    }
}

impl std::fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one detection run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    #[serde(rename = "iniciado")]
    Started,
    #[serde(rename = "concluido")]
    Completed,
    #[serde(rename = "erro")]
    Errored,
}

impl RunStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Started => "iniciado",
            RunStatus::Completed => "concluido",
            RunStatus::Errored => "erro",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "iniciado" => Some(RunStatus::Started),
            "concluido" => Some(RunStatus::Completed),
            "erro" => Some(RunStatus::Errored),
            _ => None,
        }
    }
}
