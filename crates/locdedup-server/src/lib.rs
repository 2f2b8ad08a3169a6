//! HTTP surface for the location deduplication pipeline.
//!
//! The binary wires configuration, the Redis cache, the external resolvers,
//! the LLM validator and the Postgres store into one [`Pipeline`] and serves
//! the `/grupos`, `/scan`, `/stats` and `/relatorio` routes over axum.

pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;
pub mod views;

use config::Config;
use locdedup_cache::Cache;
use locdedup_llm::{ChatClient, Validator};
use locdedup_pipeline::{Enricher, GroupStore, Pipeline, PipelineSettings};
use locdedup_resolvers::{Geocoder, IbgeRegistry, Places, ViaCep};
use tracing::warn;

/// IBGE municipality lists are stable; cache them for 30 days.
const REGISTRY_TTL_SECONDS: u64 = 30 * 86_400;

/// Assemble the pipeline from configuration. The cache degrades to
/// disabled when Redis is absent or unreachable; resolvers and the
/// validator degrade individually when their credentials are missing.
pub async fn build_pipeline(config: &Config) -> locdedup_pipeline::Result<Pipeline> {
    let cache = match &config.redis_url {
        Some(url) => match Cache::connect(url).await {
            Ok(cache) => cache,
            Err(e) => {
                warn!("Redis indisponível, cache desabilitado: {e}");
                Cache::disabled()
            }
        },
        None => {
            warn!("REDIS_URL ausente, cache desabilitado");
            Cache::disabled()
        }
    };

    let store = GroupStore::connect(&config.database_url, config.max_db_connections).await?;

    let registry = IbgeRegistry::new(cache.clone(), REGISTRY_TTL_SECONDS);
    let viacep = ViaCep::new(cache.clone(), config.viacep_ttl_seconds());
    let geocoder = Geocoder::new(
        cache.clone(),
        config.google_maps_api_key.clone(),
        config.google_ttl_seconds(),
    );
    let places = Places::new(
        cache.clone(),
        config.google_maps_api_key.clone(),
        config.google_ttl_seconds(),
    );

    let chat_client = config.openai_api_key.as_ref().map(|key| {
        let client = ChatClient::new(key.clone());
        match &config.openai_model {
            Some(model) => client.with_model(model.clone()),
            None => client,
        }
    });
    let validator = Validator::new(chat_client, cache);

    let enricher = Enricher::new(
        store.clone(),
        registry,
        viacep,
        geocoder,
        places,
        config.viacep_max_ceps,
    );

    Ok(Pipeline::new(
        store,
        validator,
        enricher,
        PipelineSettings {
            similarity_threshold: config.similarity_threshold,
            pair_limit: config.pair_limit,
            enrichment_enabled: config.enrichment_enabled,
            auto_approve_confidence: config.llm_threshold,
        },
    ))
}
