//! Response shapes.
//!
//! The frontend speaks camelCase Portuguese (the same convention as the
//! request bodies: `registroCanonico`, `tamanhoPagina`), so groups and
//! their satellites are mapped into dedicated view structs instead of
//! serializing the pipeline types directly.

use chrono::{DateTime, Utc};
use locdedup::{DuplicateGroup, MemberContext};
use locdedup_pipeline::{MemberImpact, RevertOutcome};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberView {
    pub id: String,
    pub nome: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupView {
    pub id: Uuid,
    pub tipo: String,
    pub parent_id: Option<String>,
    pub parent_nome: Option<String>,
    pub nome_normalizado: String,
    pub membros: Vec<MemberView>,
    pub score: f64,
    pub origem: String,
    pub llm_detalhes: Option<serde_json::Value>,
    pub nome_canonico: Option<String>,
    pub fonte_canonica: Option<String>,
    pub endereco_canonico: Option<String>,
    pub sugestao_canonico_id: Option<String>,
    pub status: String,
    pub registro_canonico: Option<String>,
    pub nome_escolhido: Option<String>,
    pub executado_em: Option<DateTime<Utc>>,
    pub executado_por: Option<String>,
    pub revertido_em: Option<DateTime<Utc>>,
    pub criado_em: DateTime<Utc>,
    pub total_fks_redirecionados: Option<i64>,
    /// First member's resolved hierarchy, when enrichment ran.
    pub hierarquia: Option<ContextView>,
}

impl GroupView {
    #[must_use]
    pub fn from_group(
        group: DuplicateGroup,
        parent_nome: Option<String>,
        hierarquia: Option<ContextView>,
    ) -> Self {
        let membros = group
            .member_ids
            .iter()
            .zip(&group.member_names)
            .map(|(id, nome)| MemberView {
                id: id.clone(),
                nome: nome.clone(),
            })
            .collect();

        Self {
            id: group.id,
            tipo: group.entity_kind.as_str().to_string(),
            parent_id: group.parent_id,
            parent_nome,
            nome_normalizado: group.normalized_name,
            membros,
            score: group.mean_score,
            origem: group.source.as_str().to_string(),
            llm_detalhes: group.llm_details,
            nome_canonico: group.canonical_name,
            fonte_canonica: group.canonical_source.map(|s| s.as_str().to_string()),
            endereco_canonico: group.canonical_address,
            sugestao_canonico_id: group.suggested_canonical_id,
            status: group.status.as_str().to_string(),
            registro_canonico: group.chosen_canonical_id,
            nome_escolhido: group.chosen_name,
            executado_em: group.executed_at,
            executado_por: group.executed_by,
            revertido_em: group.reverted_at,
            criado_em: group.created_at,
            total_fks_redirecionados: group.total_fks_redirected,
            hierarquia,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextView {
    pub membro_id: String,
    pub nome: String,
    pub uf: Option<String>,
    pub cidade_id: Option<String>,
    pub cidade_nome: Option<String>,
    pub bairro_id: Option<String>,
    pub bairro_nome: Option<String>,
    pub rua_id: Option<String>,
    pub rua_nome: Option<String>,
    pub cep: Option<String>,
    pub ceps: Vec<String>,
    pub filhos: Option<i64>,
}

impl From<MemberContext> for ContextView {
    fn from(context: MemberContext) -> Self {
        Self {
            membro_id: context.member_id,
            nome: context.member_name,
            uf: context.uf,
            cidade_id: context.cidade_id,
            cidade_nome: context.cidade_nome,
            bairro_id: context.bairro_id,
            bairro_nome: context.bairro_nome,
            rua_id: context.rua_id,
            rua_nome: context.rua_nome,
            cep: context.cep,
            ceps: context.ceps,
            filhos: context.filhos,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpactView {
    pub id: String,
    pub nome: String,
    pub total_referencias: i64,
    pub por_tabela: Vec<TableCountView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableCountView {
    pub tabela: String,
    pub coluna: String,
    pub total: i64,
}

impl From<MemberImpact> for ImpactView {
    fn from(impact: MemberImpact) -> Self {
        Self {
            id: impact.id,
            nome: impact.name,
            total_referencias: impact.total_references,
            por_tabela: impact
                .per_table_counts
                .into_iter()
                .map(|c| TableCountView {
                    tabela: c.table,
                    coluna: c.column,
                    total: c.count,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevertView {
    pub grupo: GroupView,
    pub registros_revertidos: usize,
}

impl RevertView {
    #[must_use]
    pub fn from_outcome(outcome: RevertOutcome) -> Self {
        Self {
            registros_revertidos: outcome.entries_reverted,
            grupo: GroupView::from_group(outcome.group, None, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use locdedup::{EntityKind, GroupSource, GroupStatus};

    fn group() -> DuplicateGroup {
        DuplicateGroup {
            id: Uuid::nil(),
            entity_kind: EntityKind::Neighborhood,
            parent_id: Some("100".to_string()),
            normalized_name: "aurora".to_string(),
            member_ids: vec!["a".to_string(), "b".to_string()],
            member_names: vec!["Jardim Aurora".to_string(), "Jd Aurora".to_string()],
            mean_score: 0.88,
            source: GroupSource::Trigram,
            llm_details: None,
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
    fn test_group_view_uses_camel_case_portuguese() {
        let view = GroupView::from_group(group(), Some("Goiânia".to_string()), None);
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["tipo"], "bairro");
        assert_eq!(json["parentNome"], "Goiânia");
        assert_eq!(json["nomeNormalizado"], "aurora");
        assert_eq!(json["status"], "pendente");
        assert_eq!(json["membros"][0]["nome"], "Jardim Aurora");
        assert!(json.get("member_ids").is_none());
    }

    #[test]
    fn test_members_stay_paired_and_ordered() {
        let view = GroupView::from_group(group(), None, None);
        assert_eq!(view.membros.len(), 2);
        assert_eq!(view.membros[0].id, "a");
        assert_eq!(view.membros[1].nome, "Jd Aurora");
    }
}
