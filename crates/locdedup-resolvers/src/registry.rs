//! IBGE municipality registry.
//!
//! `GET /api/v1/localidades/estados/{uf}/municipios` returns the
//! authoritative list of municipalities for a state. The list is stable for
//! months, so it is cached with a long TTL and keyed per state.

use locdedup_cache::{Cache, CacheLookup};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const DEFAULT_BASE_URL: &str = "https://servicodados.ibge.gov.br";

/// One municipality as the registry reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Municipality {
    /// IBGE municipality code.
    pub id: i64,
    pub nome: String,
}

/// Registry adapter. Clone is cheap; the client and cache handle are shared.
#[derive(Clone)]
pub struct IbgeRegistry {
    client: reqwest::Client,
    cache: Cache,
    base_url: String,
    cache_ttl_seconds: u64,
}

impl IbgeRegistry {
    #[must_use]
    pub fn new(cache: Cache, cache_ttl_seconds: u64) -> Self {
        Self {
            client: crate::create_http_client(),
            cache,
            base_url: DEFAULT_BASE_URL.to_string(),
            cache_ttl_seconds,
        }
    }

    /// Override the endpoint, for tests against a local mock server.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Municipalities of a state, by its two-letter code. Empty on any
    /// failure; the enricher falls through to the next source.
    pub async fn municipalities(&self, uf: &str) -> Vec<Municipality> {
        let uf = uf.trim().to_lowercase();
        if uf.len() != 2 || !uf.chars().all(|c| c.is_ascii_alphabetic()) {
            return Vec::new();
        }

        let cache_key = format!("ibge:municipios:{uf}");
        match self.cache.get_json::<Vec<Municipality>>(&cache_key).await {
            CacheLookup::Hit(list) => return list,
            CacheLookup::Miss => return Vec::new(),
            CacheLookup::Absent => {}
        }

        let url = format!(
            "{}/api/v1/localidades/estados/{}/municipios",
            self.base_url, uf
        );
        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                // Transport error: degrade without caching.
                warn!("IBGE request failed for {}: {}", uf, e);
                return Vec::new();
            }
        };

        if !response.status().is_success() {
            warn!("IBGE returned {} for {}", response.status(), uf);
            self.cache.set_miss(&cache_key, self.cache_ttl_seconds).await;
            return Vec::new();
        }

        match response.json::<Vec<Municipality>>().await {
            Ok(list) => {
                debug!("IBGE resolved {} municipalities for {}", list.len(), uf);
                self.cache
                    .set_json(&cache_key, &list, self.cache_ttl_seconds)
                    .await;
                list
            }
            Err(e) => {
                warn!("IBGE payload for {} not parseable: {}", uf, e);
                Vec::new()
            }
        }
    }
}

impl std::fmt::Debug for IbgeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IbgeRegistry")
            .field("base_url", &self.base_url)
            .finish()
    }
}
