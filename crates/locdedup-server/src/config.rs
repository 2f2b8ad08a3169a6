//! Environment configuration.
//!
//! Everything is optional except `DATABASE_URL`. A missing required value
//! or an unparseable optional one is a startup failure: the binary prints
//! the diagnostic and exits 1 rather than running half-configured.

use std::env;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("variável obrigatória ausente: {0}")]
    Missing(&'static str),

    #[error("variável {name} com valor inválido {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: Option<String>,
    pub port: u16,
    /// τ for the trigram detector.
    pub similarity_threshold: f64,
    /// Confidence floor for `/grupos/auto-aprovaveis`.
    pub llm_threshold: f64,
    /// L, max pairs per detection query.
    pub pair_limit: i64,
    pub enrichment_enabled: bool,
    /// K, context postal codes per neighborhood member.
    pub viacep_max_ceps: usize,
    pub viacep_ttl_days: u64,
    pub google_ttl_days: u64,
    pub max_db_connections: u32,
    pub openai_api_key: Option<String>,
    pub openai_model: Option<String>,
    pub google_maps_api_key: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            database_url: require("DATABASE_URL")?,
            redis_url: optional("REDIS_URL"),
            port: parse_or("PORT", 3002)?,
            similarity_threshold: parse_or("THRESHOLD_SIMILARIDADE", 0.4)?,
            llm_threshold: parse_or("THRESHOLD_LLM", 0.90)?,
            pair_limit: parse_or("LIMITE_PARES_POR_EXECUCAO", 200)?,
            enrichment_enabled: parse_bool_or("ENRIQUECIMENTO_HABILITADO", true)?,
            viacep_max_ceps: parse_or("VIACEP_MAX_CEPS_POR_MEMBRO", 10)?,
            viacep_ttl_days: parse_or("VIACEP_CACHE_TTL_DIAS", 7)?,
            google_ttl_days: parse_or("GOOGLE_CACHE_TTL_DIAS", 30)?,
            max_db_connections: parse_or("DATABASE_MAX_CONNECTIONS", 10)?,
            openai_api_key: optional("OPENAI_API_KEY"),
            openai_model: optional("OPENAI_MODEL"),
            google_maps_api_key: optional("GOOGLE_MAPS_API_KEY"),
        })
    }

    #[must_use]
    pub fn viacep_ttl_seconds(&self) -> u64 {
        self.viacep_ttl_days * 86_400
    }

    #[must_use]
    pub fn google_ttl_seconds(&self) -> u64 {
        self.google_ttl_days * 86_400
    }
}

fn require(name: &'static str) -> Result<String, ConfigError> {
    optional(name).ok_or(ConfigError::Missing(name))
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match optional(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            value: raw,
            reason: e.to_string(),
        }),
    }
}

fn parse_bool_or(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    match optional(name) {
        None => Ok(default),
        Some(raw) => match raw.trim().to_lowercase().as_str() {
            "true" | "1" | "sim" => Ok(true),
            "false" | "0" | "nao" | "não" => Ok(false),
            _ => Err(ConfigError::Invalid {
                name,
                value: raw,
                reason: "esperado true/false".to_string(),
            }),
        },
    }
}
