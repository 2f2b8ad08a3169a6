//! Prompt assembly for the validator.

use crate::rubric::RUBRIC;
use crate::ValidationInput;

/// System message: role, rubric, output contract.
#[must_use]
pub fn system_prompt() -> String {
    format!(
        "Você é um auditor de dados geográficos de um CRM imobiliário \
brasileiro. Receberá grupos de registros suspeitos de serem duplicatas do \
mesmo lugar real (cidade, bairro, rua ou condomínio) dentro de um mesmo \
contexto geográfico.\n\n{RUBRIC}\n\n\
Responda APENAS com JSON válido no formato:\n\
{{\"resultados\": [{{\"grupo\": <número do grupo>, \"confirmed\": <bool>, \
\"confidence\": <0.0 a 1.0>, \"canonical_name\": \"<melhor grafia oficial>\", \
\"rationale\": \"<justificativa curta citando a regra aplicada>\", \
\"valid_member_ids\": [\"<ids dos membros que são de fato duplicatas>\"]}}]}}\n\
Inclua em valid_member_ids somente os membros que são o MESMO lugar; um \
subconjunto é válido quando parte do grupo não pertence."
    )
}

/// User message listing one batch of groups.
#[must_use]
pub fn batch_prompt(inputs: &[ValidationInput]) -> String {
    let mut out = String::from("Analise os grupos a seguir.\n");
    for (i, input) in inputs.iter().enumerate() {
        out.push_str(&format!("\nGrupo {}: tipo {}\n", i + 1, input.kind.as_str()));

        let mut context = Vec::new();
        if let Some(rua) = &input.rua {
            context.push(format!("rua {rua}"));
        }
        if let Some(bairro) = &input.bairro {
            context.push(format!("bairro {bairro}"));
        }
        if let Some(cidade) = &input.cidade {
            context.push(format!("cidade {cidade}"));
        }
        if let Some(uf) = &input.uf {
            context.push(format!("UF {uf}"));
        }
        if !context.is_empty() {
            out.push_str(&format!("Contexto: {}\n", context.join(", ")));
        }

        out.push_str("Membros:\n");
        for (id, name) in input.member_ids.iter().zip(&input.member_names) {
            out.push_str(&format!("  - [{id}] {name}\n"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use locdedup::EntityKind;

    fn sample_input() -> ValidationInput {
        ValidationInput {
            kind: EntityKind::Neighborhood,
            member_ids: vec!["a".to_string(), "b".to_string()],
            member_names: vec!["Jardim Aurora".to_string(), "Jd Aurora".to_string()],
            uf: Some("GO".to_string()),
            cidade: Some("Goiânia".to_string()),
            bairro: None,
            rua: None,
        }
    }

    #[test]
    fn test_system_prompt_embeds_rubric_verbatim() {
        assert!(system_prompt().contains(RUBRIC));
    }

    #[test]
    fn test_system_prompt_demands_json() {
        let prompt = system_prompt();
        assert!(prompt.contains("JSON"));
        assert!(prompt.contains("valid_member_ids"));
        assert!(prompt.contains("resultados"));
    }

    #[test]
    fn test_batch_prompt_lists_groups_and_members() {
        let prompt = batch_prompt(&[sample_input()]);
        assert!(prompt.contains("Grupo 1: tipo bairro"));
        assert!(prompt.contains("[a] Jardim Aurora"));
        assert!(prompt.contains("[b] Jd Aurora"));
        assert!(prompt.contains("cidade Goiânia"));
        assert!(prompt.contains("UF GO"));
    }

    #[test]
    fn test_batch_prompt_numbers_sequentially() {
        let prompt = batch_prompt(&[sample_input(), sample_input(), sample_input()]);
        assert!(prompt.contains("Grupo 1:"));
        assert!(prompt.contains("Grupo 2:"));
        assert!(prompt.contains("Grupo 3:"));
    }

    #[test]
    fn test_batch_prompt_omits_empty_context() {
        let input = ValidationInput {
            kind: EntityKind::City,
            member_ids: vec!["1".to_string(), "2".to_string()],
            member_names: vec!["Goiania".to_string(), "Goiânia".to_string()],
            uf: None,
            cidade: None,
            bairro: None,
            rua: None,
        };
        let prompt = batch_prompt(&[input]);
        assert!(!prompt.contains("Contexto:"));
    }
}
