//! Validator integration tests against a mock chat-completions endpoint.

#![allow(clippy::unwrap_used)]

use locdedup::EntityKind;
use locdedup_cache::Cache;
use locdedup_llm::{ChatClient, ValidationInput, ValidationOutcome, Validator};
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn chat_body(content: &serde_json::Value) -> serde_json::Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content.to_string()},
            "finish_reason": "stop"
        }]
    })
}

fn input(names: &[&str]) -> ValidationInput {
    ValidationInput {
        kind: EntityKind::Neighborhood,
        member_ids: (1..=names.len()).map(|i| format!("m{i}")).collect(),
        member_names: names.iter().map(|s| (*s).to_string()).collect(),
        uf: Some("GO".to_string()),
        cidade: Some("Goiânia".to_string()),
        bairro: None,
        rua: None,
    }
}

#[tokio::test]
async fn test_confirmed_decision_round_trip() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_string_contains("Jardim Aurora"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_body(&json!({
            "resultados": [{
                "grupo": 1,
                "confirmed": true,
                "confidence": 0.95,
                "canonical_name": "Jardim Aurora",
                "rationale": "Regra 5: variação de grafia",
                "valid_member_ids": ["m1", "m2"]
            }]
        }))))
        .mount(&mock_server)
        .await;

    let client = ChatClient::new("test-key").with_base_url(mock_server.uri());
    let validator = Validator::new(Some(client), Cache::disabled());

    let outcomes = validator
        .validate(&[input(&["Jardim Aurora", "JARDIM AURORA"])])
        .await;

    match &outcomes[0] {
        ValidationOutcome::Decided(decision) => {
            assert!(decision.confirmed);
            assert_eq!(decision.canonical_name, "Jardim Aurora");
            assert_eq!(decision.valid_member_ids, vec!["m1", "m2"]);
        }
        ValidationOutcome::Skipped => panic!("expected a decision"),
    }
}

#[tokio::test]
async fn test_numeric_suffix_group_comes_back_rejected() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_body(&json!({
            "resultados": [{
                "grupo": 1,
                "confirmed": false,
                "confidence": 0.97,
                "canonical_name": "",
                "rationale": "Regra 1: sufixo numérico distingue",
                "valid_member_ids": []
            }]
        }))))
        .mount(&mock_server)
        .await;

    let client = ChatClient::new("test-key").with_base_url(mock_server.uri());
    let validator = Validator::new(Some(client), Cache::disabled());

    let outcomes = validator
        .validate(&[input(&["Parque Industrial I", "Parque Industrial II"])])
        .await;

    match &outcomes[0] {
        ValidationOutcome::Decided(decision) => {
            assert!(!decision.confirmed);
            assert!(decision.rationale.contains("Regra 1"));
        }
        ValidationOutcome::Skipped => panic!("expected a decision"),
    }
}

#[tokio::test]
async fn test_api_error_skips_the_batch() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "error": {"message": "overloaded", "type": "server_error"}
        })))
        .mount(&mock_server)
        .await;

    let client = ChatClient::new("test-key").with_base_url(mock_server.uri());
    let validator = Validator::new(Some(client), Cache::disabled());

    let outcomes = validator.validate(&[input(&["A", "B"]), input(&["C", "D"])]).await;
    assert_eq!(
        outcomes,
        vec![ValidationOutcome::Skipped, ValidationOutcome::Skipped]
    );
}

#[tokio::test]
async fn test_batches_are_split_by_batch_size() {
    let mock_server = MockServer::start().await;

    // Every batch of size <= 2 answers both its slots.
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_body(&json!({
            "resultados": [
                {"grupo": 1, "confirmed": true, "confidence": 0.9,
                 "canonical_name": "X", "rationale": "", "valid_member_ids": ["m1", "m2"]},
                {"grupo": 2, "confirmed": true, "confidence": 0.9,
                 "canonical_name": "Y", "rationale": "", "valid_member_ids": ["m1", "m2"]}
            ]
        }))))
        .mount(&mock_server)
        .await;

    let client = ChatClient::new("test-key").with_base_url(mock_server.uri());
    let validator = Validator::new(Some(client), Cache::disabled()).with_batch_size(2);

    let inputs = vec![
        input(&["A", "A."]),
        input(&["B", "B."]),
        input(&["C", "C."]),
        input(&["D", "D."]),
        input(&["E", "E."]),
    ];
    let outcomes = validator.validate(&inputs).await;

    assert!(outcomes
        .iter()
        .all(|o| matches!(o, ValidationOutcome::Decided(_))));
    // 5 inputs at batch size 2 -> 3 sequential requests.
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_unparseable_content_skips_the_batch() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(chat_body(&json!("desculpe, não entendi"))),
        )
        .mount(&mock_server)
        .await;

    let client = ChatClient::new("test-key").with_base_url(mock_server.uri());
    let validator = Validator::new(Some(client), Cache::disabled());

    let outcomes = validator.validate(&[input(&["A", "B"])]).await;
    assert_eq!(outcomes, vec![ValidationOutcome::Skipped]);
}
