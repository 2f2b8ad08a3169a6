//! Pipeline-owned records: groups, member contexts, merge log, run log.

use crate::{EntityKind, GroupStatus, RunStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a group earned its way into the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupSource {
    /// Trigram detection only (LLM unavailable or batch failed).
    #[serde(rename = "trigram")]
    Trigram,
    /// Trigram detection confirmed by the LLM validator.
    #[serde(rename = "trigram+llm")]
    TrigramLlm,
}

impl GroupSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            GroupSource::Trigram => "trigram",
            GroupSource::TrigramLlm => "trigram+llm",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "trigram" => Some(GroupSource::Trigram),
            "trigram+llm" => Some(GroupSource::TrigramLlm),
            _ => None,
        }
    }
}

/// Where a canonical name came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CanonicalSource {
    /// IBGE municipality registry.
    #[serde(rename = "ibge")]
    Registry,
    /// ViaCEP postal directory.
    #[serde(rename = "viacep")]
    PostalCep,
    /// Google Geocoding.
    #[serde(rename = "geocoder")]
    Geocoder,
    /// Google Places find-by-text.
    #[serde(rename = "places")]
    Places,
}

impl CanonicalSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CanonicalSource::Registry => "ibge",
            CanonicalSource::PostalCep => "viacep",
            CanonicalSource::Geocoder => "geocoder",
            CanonicalSource::Places => "places",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ibge" => Some(CanonicalSource::Registry),
            "viacep" => Some(CanonicalSource::PostalCep),
            "geocoder" => Some(CanonicalSource::Geocoder),
            "places" => Some(CanonicalSource::Places),
            _ => None,
        }
    }
}

/// A detected (and possibly validated, enriched, executed) duplicate group.
///
/// Invariants: `member_ids.len() >= 2`; `member_names` is parallel to
/// `member_ids`; `chosen_canonical_id` is a member when status is Executed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub id: Uuid,
    pub entity_kind: EntityKind,
    /// State code for cities, parent row id otherwise (city id for condos).
    pub parent_id: Option<String>,
    pub normalized_name: String,
    pub member_ids: Vec<String>,
    pub member_names: Vec<String>,
    pub mean_score: f64,
    pub source: GroupSource,
    /// Full validator response, preserved verbatim for audit.
    pub llm_details: Option<serde_json::Value>,
    pub canonical_name: Option<String>,
    pub canonical_source: Option<CanonicalSource>,
    /// Formatted address from the geocoder, when that path resolved.
    pub canonical_address: Option<String>,
    pub suggested_canonical_id: Option<String>,
    pub status: GroupStatus,
    pub chosen_canonical_id: Option<String>,
    pub chosen_name: Option<String>,
    pub executed_at: Option<DateTime<Utc>>,
    pub executed_by: Option<String>,
    pub reverted_at: Option<DateTime<Utc>>,
    /// Operator-supplied audit blob, opaque to the pipeline.
    pub decision_context: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub total_fks_redirected: Option<i64>,
}

impl DuplicateGroup {
    /// LLM confidence, when the validator ran.
    #[must_use]
    pub fn llm_confidence(&self) -> Option<f64> {
        self.llm_details
            .as_ref()
            .and_then(|d| d.get("confidence"))
            .and_then(serde_json::Value::as_f64)
    }
}

/// Hierarchy context resolved for one member, used by enrichment and the UI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemberContext {
    pub member_id: String,
    pub member_name: String,
    pub uf: Option<String>,
    pub cidade_id: Option<String>,
    pub cidade_nome: Option<String>,
    pub bairro_id: Option<String>,
    pub bairro_nome: Option<String>,
    pub rua_id: Option<String>,
    pub rua_nome: Option<String>,
    /// The member's own postal code (streets and condos).
    pub cep: Option<String>,
    /// Distinct postal codes under the member (neighborhoods), capped.
    pub ceps: Vec<String>,
    /// Number of direct descendants (bairros for a city, ruas for a bairro,
    /// condominios for a rua).
    pub filhos: Option<i64>,
}

/// One rewritten foreign-key row, the unit of rollback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeLogEntry {
    pub id: Uuid,
    pub group_id: Uuid,
    pub absorbed_member_id: String,
    pub table_name: String,
    pub column_name: String,
    /// Primary key of the rewritten row, as text.
    pub affected_row_pk: String,
    pub old_value: String,
    pub new_value: String,
    pub reverted: bool,
    pub reverted_at: Option<DateTime<Utc>>,
    pub executed_at: DateTime<Utc>,
}

/// One detection run, for the history endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLog {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub total_analyzed: i64,
    pub total_groups: i64,
    pub error_text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_group() -> DuplicateGroup {
        DuplicateGroup {
            id: Uuid::new_v4(),
            entity_kind: EntityKind::Neighborhood,
            parent_id: Some("100".to_string()),
            normalized_name: "aurora".to_string(),
            member_ids: vec!["a".to_string(), "b".to_string()],
            member_names: vec!["Jardim Aurora".to_string(), "Jd Aurora".to_string()],
            mean_score: 0.88,
            source: GroupSource::TrigramLlm,
            llm_details: Some(json!({"confidence": 0.93, "confirmed": true})),
            canonical_name: None,
            canonical_source: None,
            canonical_address: None,
            suggested_canonical_id: None,
            status: GroupStatus::Pending,
            chosen_canonical_id: None,
            chosen_name: None,
            executed_at: None,
            executed_by: None,
            reverted_at: None,
            decision_context: None,
            created_at: Utc::now(),
            total_fks_redirected: None,
        }
    }

    #[test]
    fn test_llm_confidence_extraction() {
        let group = sample_group();
        assert_eq!(group.llm_confidence(), Some(0.93));
    }

    #[test]
    fn test_llm_confidence_absent() {
        let mut group = sample_group();
        group.llm_details = None;
        assert_eq!(group.llm_confidence(), None);

        group.llm_details = Some(json!({"confirmed": true}));
        assert_eq!(group.llm_confidence(), None);
    }

    #[test]
    fn test_source_roundtrip() {
        for source in [GroupSource::Trigram, GroupSource::TrigramLlm] {
            assert_eq!(GroupSource::parse(source.as_str()), Some(source));
        }
    }

    #[test]
    fn test_canonical_source_roundtrip() {
        for source in [
            CanonicalSource::Registry,
            CanonicalSource::PostalCep,
            CanonicalSource::Geocoder,
            CanonicalSource::Places,
        ] {
            assert_eq!(CanonicalSource::parse(source.as_str()), Some(source));
        }
    }

    #[test]
    fn test_group_serde_roundtrip() {
        let group = sample_group();
        let json = serde_json::to_string(&group).unwrap();
        let back: DuplicateGroup = serde_json::from_str(&json).unwrap();
        assert_eq!(back.member_ids, group.member_ids);
        assert_eq!(back.status, GroupStatus::Pending);
        assert_eq!(back.source, GroupSource::TrigramLlm);
    }
}
