//! Merge/revert integration tests against a real PostgreSQL.
//!
//! These start PostgreSQL in Docker and clean up afterward. They build a
//! miniature CRM schema (one city, two duplicate neighborhoods, inbound
//! rows from streets, addresses and properties), then drive the full
//! unify -> revert -> unify cycle and assert byte-exact restoration.
//!
//! Run with a Docker socket available:
//! ```bash
//! cargo test -p locdedup-pipeline --test merge_revert_testcontainers
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use chrono::Utc;
use locdedup::{DuplicateGroup, EntityKind, GroupSource, GroupStatus};
use locdedup_pipeline::{GroupStore, MergeRequest, PipelineError};
use sqlx::PgPool;
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::postgres::Postgres;
use uuid::Uuid;

const HOST_SCHEMA: &str = r"
CREATE TABLE cidades (
    id BIGINT PRIMARY KEY,
    nome TEXT NOT NULL,
    uf TEXT NOT NULL
);
CREATE TABLE bairros (
    id UUID PRIMARY KEY,
    nome TEXT NOT NULL,
    cidade_id BIGINT NOT NULL REFERENCES cidades(id),
    excluido BOOLEAN NOT NULL DEFAULT false
);
CREATE TABLE ruas (
    id UUID PRIMARY KEY,
    nome TEXT NOT NULL,
    bairro_id UUID NOT NULL,
    cep TEXT,
    excluido BOOLEAN NOT NULL DEFAULT false
);
CREATE TABLE condominios (
    id UUID PRIMARY KEY,
    nome TEXT NOT NULL,
    rua_id UUID NOT NULL,
    excluido BOOLEAN NOT NULL DEFAULT false
);
CREATE TABLE enderecos (
    endereco_id UUID PRIMARY KEY,
    cidade_id BIGINT,
    bairro_id UUID,
    rua_id UUID
);
CREATE TABLE imoveis (
    id UUID PRIMARY KEY,
    empresa_id BIGINT,
    cidade_id BIGINT,
    bairro_id UUID,
    rua_id UUID,
    condominio_id UUID
);
CREATE TABLE clientes (
    id UUID PRIMARY KEY,
    empresa_id BIGINT,
    cidade_id BIGINT
);
CREATE TABLE unidades (
    id UUID PRIMARY KEY,
    condominio_id UUID
);
";

struct Env {
    store: GroupStore,
    canonical: Uuid,
    absorbed: Uuid,
    street_ids: Vec<Uuid>,
    address_id: Uuid,
    property_ids: Vec<Uuid>,
}

async fn connect(host: &str, port: u16) -> PgPool {
    let url = format!("postgres://postgres:postgres@{host}:{port}/postgres");
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .expect("connect to container")
}

/// City 100 with two spellings of the same neighborhood: 5 streets, 1
/// address and 2 properties point at the absorbed one (8 inbound rows).
async fn seed(pool: &PgPool) -> Env {
    sqlx::raw_sql(HOST_SCHEMA).execute(pool).await.unwrap();

    let store = GroupStore::new(pool.clone());
    locdedup_pipeline::schema::init_schema(pool).await.unwrap();

    sqlx::query("INSERT INTO cidades (id, nome, uf) VALUES (100, 'Goiânia', 'GO')")
        .execute(pool)
        .await
        .unwrap();

    let canonical = Uuid::new_v4();
    let absorbed = Uuid::new_v4();
    for (id, nome) in [(canonical, "Jardim Aurora"), (absorbed, "Jd Aurora")] {
        sqlx::query("INSERT INTO bairros (id, nome, cidade_id) VALUES ($1, $2, 100)")
            .bind(id)
            .bind(nome)
            .execute(pool)
            .await
            .unwrap();
    }

    let mut street_ids = Vec::new();
    for i in 0..5 {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO ruas (id, nome, bairro_id, cep) VALUES ($1, $2, $3, $4)")
            .bind(id)
            .bind(format!("Rua {i}"))
            .bind(absorbed)
            .bind(format!("7481510{i}"))
            .execute(pool)
            .await
            .unwrap();
        street_ids.push(id);
    }

    let address_id = Uuid::new_v4();
    sqlx::query("INSERT INTO enderecos (endereco_id, cidade_id, bairro_id) VALUES ($1, 100, $2)")
        .bind(address_id)
        .bind(absorbed)
        .execute(pool)
        .await
        .unwrap();

    let mut property_ids = Vec::new();
    for _ in 0..2 {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO imoveis (id, empresa_id, cidade_id, bairro_id) VALUES ($1, 7, 100, $2)")
            .bind(id)
            .bind(absorbed)
            .execute(pool)
            .await
            .unwrap();
        property_ids.push(id);
    }

    Env {
        store,
        canonical,
        absorbed,
        street_ids,
        address_id,
        property_ids,
    }
}

fn group_for(env: &Env) -> DuplicateGroup {
    DuplicateGroup {
        id: Uuid::new_v4(),
        entity_kind: EntityKind::Neighborhood,
        parent_id: Some("100".to_string()),
        normalized_name: "aurora".to_string(),
        member_ids: vec![env.canonical.to_string(), env.absorbed.to_string()],
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

async fn neighborhood_of_street(pool: &PgPool, street: Uuid) -> Uuid {
    sqlx::query_scalar("SELECT bairro_id FROM ruas WHERE id = $1")
        .bind(street)
        .fetch_one(pool)
        .await
        .unwrap_or_else(|_| panic!("street {street} vanished"))
}

async fn excluded_flag(pool: &PgPool, bairro: Uuid) -> bool {
    sqlx::query_scalar("SELECT excluido FROM bairros WHERE id = $1")
        .bind(bairro)
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_merge_revert_round_trip() {
    let container = Postgres::default().start().await.unwrap();
    let host = container.get_host().await.unwrap().to_string();
    let port = container.get_host_port_ipv4(5432).await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    let pool = connect(&host, port).await;
    let env = seed(&pool).await;

    let group = group_for(&env);
    env.store.insert_group(&group).await.unwrap();

    // Unify onto the canonical spelling.
    let outcome = locdedup_pipeline::merger::execute_merge(
        &env.store,
        MergeRequest {
            group_id: group.id,
            chosen_canonical_id: env.canonical.to_string(),
            chosen_name: None,
            executed_by: Some("teste".to_string()),
            decision_context: None,
        },
    )
    .await
    .unwrap();

    // 5 streets + 1 address + 2 properties.
    assert_eq!(outcome.total_fks_redirected, 8);
    assert_eq!(outcome.group.status, GroupStatus::Executed);
    assert_eq!(
        outcome.group.chosen_canonical_id.as_deref(),
        Some(env.canonical.to_string().as_str())
    );
    assert_eq!(outcome.group.total_fks_redirected, Some(8));

    // Log completeness: one entry per rewritten row.
    let log = env.store.merge_log_for_group(group.id).await.unwrap();
    assert_eq!(log.len(), 8);
    assert!(log.iter().all(|e| !e.reverted));
    assert!(log
        .iter()
        .all(|e| e.absorbed_member_id == env.absorbed.to_string()));

    // All inbound rows now point at the canonical; absorbed is soft-deleted.
    for street in &env.street_ids {
        assert_eq!(neighborhood_of_street(&pool, *street).await, env.canonical);
    }
    let address_bairro: Uuid =
        sqlx::query_scalar("SELECT bairro_id FROM enderecos WHERE endereco_id = $1")
            .bind(env.address_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(address_bairro, env.canonical);
    assert!(excluded_flag(&pool, env.absorbed).await);
    assert!(!excluded_flag(&pool, env.canonical).await);

    // Revert: byte-exact restoration.
    let reverted = locdedup_pipeline::reverser::execute_revert(&env.store, group.id)
        .await
        .unwrap();
    assert_eq!(reverted.entries_reverted, 8);
    assert_eq!(reverted.group.status, GroupStatus::Reverted);

    for street in &env.street_ids {
        assert_eq!(neighborhood_of_street(&pool, *street).await, env.absorbed);
    }
    for property in &env.property_ids {
        let bairro: Uuid = sqlx::query_scalar("SELECT bairro_id FROM imoveis WHERE id = $1")
            .bind(property)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(bairro, env.absorbed);
    }
    assert!(!excluded_flag(&pool, env.absorbed).await);

    let log = env.store.merge_log_for_group(group.id).await.unwrap();
    assert!(log.iter().all(|e| e.reverted && e.reverted_at.is_some()));

    // Re-unification lands in the same post-state as the first unify.
    let again = locdedup_pipeline::merger::execute_merge(
        &env.store,
        MergeRequest {
            group_id: group.id,
            chosen_canonical_id: env.canonical.to_string(),
            chosen_name: None,
            executed_by: Some("teste".to_string()),
            decision_context: None,
        },
    )
    .await
    .unwrap();
    assert_eq!(again.total_fks_redirected, 8);
    assert_eq!(again.group.status, GroupStatus::Executed);
    for street in &env.street_ids {
        assert_eq!(neighborhood_of_street(&pool, *street).await, env.canonical);
    }
    assert!(excluded_flag(&pool, env.absorbed).await);
}

#[tokio::test]
async fn test_merge_preconditions() {
    let container = Postgres::default().start().await.unwrap();
    let host = container.get_host().await.unwrap().to_string();
    let port = container.get_host_port_ipv4(5432).await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    let pool = connect(&host, port).await;
    let env = seed(&pool).await;
    let group = group_for(&env);
    env.store.insert_group(&group).await.unwrap();

    // Canonical outside the member list is rejected before any write.
    let stranger = Uuid::new_v4().to_string();
    let err = locdedup_pipeline::merger::execute_merge(
        &env.store,
        MergeRequest {
            group_id: group.id,
            chosen_canonical_id: stranger,
            chosen_name: None,
            executed_by: None,
            decision_context: None,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, PipelineError::CanonicalNotMember { .. }));
    assert!(!excluded_flag(&pool, env.absorbed).await);

    // Reverting a Pending group is a precondition failure.
    let err = locdedup_pipeline::reverser::execute_revert(&env.store, group.id)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidStatus { .. }));

    // Unknown group id.
    let err = locdedup_pipeline::reverser::execute_revert(&env.store, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::GroupNotFound(_)));
}

#[tokio::test]
async fn test_renaming_the_canonical_row() {
    let container = Postgres::default().start().await.unwrap();
    let host = container.get_host().await.unwrap().to_string();
    let port = container.get_host_port_ipv4(5432).await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    let pool = connect(&host, port).await;
    let env = seed(&pool).await;
    let group = group_for(&env);
    env.store.insert_group(&group).await.unwrap();

    locdedup_pipeline::merger::execute_merge(
        &env.store,
        MergeRequest {
            group_id: group.id,
            chosen_canonical_id: env.canonical.to_string(),
            chosen_name: Some("Jardim Aurora".to_string()),
            executed_by: None,
            decision_context: None,
        },
    )
    .await
    .unwrap();

    let nome: String = sqlx::query_scalar("SELECT nome FROM bairros WHERE id = $1")
        .bind(env.canonical)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(nome, "Jardim Aurora");
}
