//! ViaCEP postal directory.
//!
//! `GET /ws/{cep}/json/` maps an 8-digit postal code to a full address.
//! Unknown codes come back as `200 {"erro": true}`, which is a cacheable
//! negative. Inputs are digit-stripped before use; anything that is not 8
//! digits is a miss without a network call.

use locdedup_cache::{Cache, CacheLookup};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const DEFAULT_BASE_URL: &str = "https://viacep.com.br";

/// Address fields of one postal code, as ViaCEP names them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CepAddress {
    /// Street name.
    #[serde(default)]
    pub logradouro: String,
    /// Neighborhood name.
    #[serde(default)]
    pub bairro: String,
    /// City name.
    #[serde(default)]
    pub localidade: String,
    /// State code.
    #[serde(default)]
    pub uf: String,
}

#[derive(Debug, Deserialize)]
struct ViaCepPayload {
    #[serde(default)]
    erro: bool,
    #[serde(flatten)]
    address: CepAddress,
}

/// ViaCEP adapter. Clone is cheap.
#[derive(Clone)]
pub struct ViaCep {
    client: reqwest::Client,
    cache: Cache,
    base_url: String,
    cache_ttl_seconds: u64,
}

impl ViaCep {
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

    /// Strip formatting from a postal code; `None` unless 8 digits remain.
    #[must_use]
    pub fn sanitize_cep(raw: &str) -> Option<String> {
        let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
        (digits.len() == 8).then_some(digits)
    }

    /// Resolve one postal code. `None` is a miss of any origin: malformed
    /// input, unknown code, upstream failure.
    pub async fn lookup(&self, raw_cep: &str) -> Option<CepAddress> {
        let cep = Self::sanitize_cep(raw_cep)?;

        let cache_key = format!("viacep:{cep}");
        match self.cache.get_json::<CepAddress>(&cache_key).await {
            CacheLookup::Hit(address) => return Some(address),
            CacheLookup::Miss => return None,
            CacheLookup::Absent => {}
        }

        let url = format!("{}/ws/{}/json/", self.base_url, cep);
        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("ViaCEP request failed for {}: {}", cep, e);
                return None;
            }
        };

        if !response.status().is_success() {
            warn!("ViaCEP returned {} for {}", response.status(), cep);
            self.cache.set_miss(&cache_key, self.cache_ttl_seconds).await;
            return None;
        }

        let payload = match response.json::<ViaCepPayload>().await {
            Ok(payload) => payload,
            Err(e) => {
                warn!("ViaCEP payload for {} not parseable: {}", cep, e);
                return None;
            }
        };

        if payload.erro {
            debug!("ViaCEP has no address for {}", cep);
            self.cache.set_miss(&cache_key, self.cache_ttl_seconds).await;
            return None;
        }

        self.cache
            .set_json(&cache_key, &payload.address, self.cache_ttl_seconds)
            .await;
        Some(payload.address)
    }
}

impl std::fmt::Debug for ViaCep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViaCep")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_cep_strips_formatting() {
        assert_eq!(ViaCep::sanitize_cep("74815-100"), Some("74815100".to_string()));
        assert_eq!(ViaCep::sanitize_cep(" 74.815.100 "), Some("74815100".to_string()));
    }

    #[test]
    fn test_sanitize_cep_rejects_bad_lengths() {
        assert_eq!(ViaCep::sanitize_cep("1234567"), None);
        assert_eq!(ViaCep::sanitize_cep("123456789"), None);
        assert_eq!(ViaCep::sanitize_cep(""), None);
        assert_eq!(ViaCep::sanitize_cep("abcdefgh"), None);
    }

    #[tokio::test]
    async fn test_malformed_cep_is_a_local_miss() {
        // Points at a closed port: a network attempt would error loudly, so
        // a None here proves the length check short-circuits.
        let viacep = ViaCep::new(Cache::disabled(), 60).with_base_url("http://127.0.0.1:1");
        assert_eq!(viacep.lookup("123").await, None);
    }

    #[test]
    fn test_payload_with_erro_flag() {
        let payload: ViaCepPayload = serde_json::from_str(r#"{"erro": true}"#).unwrap();
        assert!(payload.erro);
    }

    #[test]
    fn test_payload_address_fields() {
        let raw = r#"{
            "cep": "74815-100",
            "logradouro": "Rua 9",
            "bairro": "Setor Marista",
            "localidade": "Goiânia",
            "uf": "GO",
            "ibge": "5208707"
        }"#;
        let payload: ViaCepPayload = serde_json::from_str(raw).unwrap();
        assert!(!payload.erro);
        assert_eq!(payload.address.logradouro, "Rua 9");
        assert_eq!(payload.address.bairro, "Setor Marista");
        assert_eq!(payload.address.localidade, "Goiânia");
        assert_eq!(payload.address.uf, "GO");
    }
}
