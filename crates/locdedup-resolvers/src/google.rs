//! Google Geocoding and Places adapters.
//!
//! Both are keyed by the same credential and disabled when it is absent
//! (logged once, at construction). Queries are country-restricted to Brazil
//! and answered in pt-BR, matching the data they enrich. Cache keys use the
//! folded-and-hyphenated query text.

use locdedup_cache::{Cache, CacheLookup};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const DEFAULT_GEOCODE_URL: &str = "https://maps.googleapis.com/maps/api/geocode/json";
const DEFAULT_PLACES_URL: &str =
    "https://maps.googleapis.com/maps/api/place/findplacefromtext/json";

/// Structured fields extracted from one geocoder result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeocodeResult {
    pub bairro: Option<String>,
    pub rua: Option<String>,
    pub cidade: Option<String>,
    pub uf: Option<String>,
    pub formatted_address: Option<String>,
}

/// One Places find-by-text candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceHit {
    pub name: String,
    pub formatted_address: String,
}

#[derive(Debug, Deserialize)]
struct GeocodeEnvelope {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeEntry>,
}

#[derive(Debug, Deserialize)]
struct GeocodeEntry {
    #[serde(default)]
    address_components: Vec<AddressComponent>,
    #[serde(default)]
    formatted_address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AddressComponent {
    long_name: String,
    short_name: String,
    types: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PlacesEnvelope {
    status: String,
    #[serde(default)]
    candidates: Vec<PlaceCandidate>,
}

#[derive(Debug, Deserialize)]
struct PlaceCandidate {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    formatted_address: Option<String>,
}

fn extract_fields(entry: &GeocodeEntry) -> GeocodeResult {
    let mut out = GeocodeResult {
        formatted_address: entry.formatted_address.clone(),
        ..GeocodeResult::default()
    };

    for component in &entry.address_components {
        let types: Vec<&str> = component.types.iter().map(String::as_str).collect();
        if out.bairro.is_none()
            && (types.contains(&"sublocality") || types.contains(&"neighborhood"))
        {
            out.bairro = Some(component.long_name.clone());
        }
        if out.rua.is_none() && types.contains(&"route") {
            out.rua = Some(component.long_name.clone());
        }
        if out.cidade.is_none()
            && (types.contains(&"locality") || types.contains(&"administrative_area_level_2"))
        {
            out.cidade = Some(component.long_name.clone());
        }
        if out.uf.is_none() && types.contains(&"administrative_area_level_1") {
            out.uf = Some(component.short_name.clone());
        }
    }

    out
}

/// Geocoding adapter. Clone is cheap.
#[derive(Clone)]
pub struct Geocoder {
    client: reqwest::Client,
    cache: Cache,
    api_key: Option<String>,
    base_url: String,
    cache_ttl_seconds: u64,
}

impl Geocoder {
    #[must_use]
    pub fn new(cache: Cache, api_key: Option<String>, cache_ttl_seconds: u64) -> Self {
        if api_key.is_none() {
            warn!("GOOGLE_MAPS_API_KEY absent: geocoder disabled, lookups degrade to miss");
        }
        Self {
            client: crate::create_http_client(),
            cache,
            api_key,
            base_url: DEFAULT_GEOCODE_URL.to_string(),
            cache_ttl_seconds,
        }
    }

    /// Override the endpoint, for tests against a local mock server.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    /// Geocode free address text. `None` is a miss of any origin.
    pub async fn geocode(&self, address: &str) -> Option<GeocodeResult> {
        let api_key = self.api_key.as_ref()?;
        if address.trim().is_empty() {
            return None;
        }

        let cache_key = format!("geocode:{}", crate::normalize_query_key(address));
        match self.cache.get_json::<GeocodeResult>(&cache_key).await {
            CacheLookup::Hit(result) => return Some(result),
            CacheLookup::Miss => return None,
            CacheLookup::Absent => {}
        }

        let response = match self
            .client
            .get(&self.base_url)
            .query(&[
                ("address", address),
                ("components", "country:BR"),
                ("language", "pt-BR"),
                ("key", api_key.as_str()),
            ])
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("geocode request failed: {}", e);
                return None;
            }
        };

        if !response.status().is_success() {
            warn!("geocoder returned {}", response.status());
            self.cache.set_miss(&cache_key, self.cache_ttl_seconds).await;
            return None;
        }

        let envelope = match response.json::<GeocodeEnvelope>().await {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("geocode payload not parseable: {}", e);
                return None;
            }
        };

        if envelope.status != "OK" || envelope.results.is_empty() {
            debug!("geocoder status {} for {:?}", envelope.status, address);
            self.cache.set_miss(&cache_key, self.cache_ttl_seconds).await;
            return None;
        }

        let result = extract_fields(&envelope.results[0]);
        self.cache
            .set_json(&cache_key, &result, self.cache_ttl_seconds)
            .await;
        Some(result)
    }
}

impl std::fmt::Debug for Geocoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Geocoder")
            .field("enabled", &self.is_enabled())
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Places find-by-text adapter. Clone is cheap.
#[derive(Clone)]
pub struct Places {
    client: reqwest::Client,
    cache: Cache,
    api_key: Option<String>,
    base_url: String,
    cache_ttl_seconds: u64,
}

impl Places {
    #[must_use]
    pub fn new(cache: Cache, api_key: Option<String>, cache_ttl_seconds: u64) -> Self {
        if api_key.is_none() {
            warn!("GOOGLE_MAPS_API_KEY absent: places disabled, lookups degrade to miss");
        }
        Self {
            client: crate::create_http_client(),
            cache,
            api_key,
            base_url: DEFAULT_PLACES_URL.to_string(),
            cache_ttl_seconds,
        }
    }

    /// Override the endpoint, for tests against a local mock server.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    /// First candidate for a text query. `None` is a miss of any origin.
    pub async fn find_by_text(&self, query: &str) -> Option<PlaceHit> {
        let api_key = self.api_key.as_ref()?;
        if query.trim().is_empty() {
            return None;
        }

        let cache_key = format!("places:{}", crate::normalize_query_key(query));
        match self.cache.get_json::<PlaceHit>(&cache_key).await {
            CacheLookup::Hit(hit) => return Some(hit),
            CacheLookup::Miss => return None,
            CacheLookup::Absent => {}
        }

        let response = match self
            .client
            .get(&self.base_url)
            .query(&[
                ("input", query),
                ("inputtype", "textquery"),
                ("fields", "name,formatted_address"),
                ("language", "pt-BR"),
                ("key", api_key.as_str()),
            ])
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("places request failed: {}", e);
                return None;
            }
        };

        if !response.status().is_success() {
            warn!("places returned {}", response.status());
            self.cache.set_miss(&cache_key, self.cache_ttl_seconds).await;
            return None;
        }

        let envelope = match response.json::<PlacesEnvelope>().await {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("places payload not parseable: {}", e);
                return None;
            }
        };

        let hit = envelope.candidates.into_iter().find_map(|c| {
            let name = c.name?;
            let formatted_address = c.formatted_address.unwrap_or_default();
            Some(PlaceHit {
                name,
                formatted_address,
            })
        });

        match hit {
            Some(hit) if envelope.status == "OK" => {
                self.cache
                    .set_json(&cache_key, &hit, self.cache_ttl_seconds)
                    .await;
                Some(hit)
            }
            _ => {
                debug!("places status {} for {:?}", envelope.status, query);
                self.cache.set_miss(&cache_key, self.cache_ttl_seconds).await;
                None
            }
        }
    }
}

impl std::fmt::Debug for Places {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Places")
            .field("enabled", &self.is_enabled())
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_key_disables_geocoder() {
        let geocoder = Geocoder::new(Cache::disabled(), None, 60);
        assert!(!geocoder.is_enabled());
        assert_eq!(geocoder.geocode("Av Goiás, Goiânia").await, None);
    }

    #[tokio::test]
    async fn test_missing_key_disables_places() {
        let places = Places::new(Cache::disabled(), None, 60);
        assert!(!places.is_enabled());
        assert_eq!(places.find_by_text("Edifício Aurora").await, None);
    }

    #[test]
    fn test_extract_fields_maps_component_types() {
        let raw = r#"{
            "address_components": [
                {"long_name": "Rua 9", "short_name": "R. 9", "types": ["route"]},
                {"long_name": "Setor Marista", "short_name": "Marista", "types": ["sublocality_level_1", "sublocality"]},
                {"long_name": "Goiânia", "short_name": "Goiânia", "types": ["locality", "political"]},
                {"long_name": "Goiás", "short_name": "GO", "types": ["administrative_area_level_1", "political"]}
            ],
            "formatted_address": "Rua 9 - Setor Marista, Goiânia - GO, Brasil"
        }"#;
        let entry: GeocodeEntry = serde_json::from_str(raw).unwrap();
        let result = extract_fields(&entry);
        assert_eq!(result.rua.as_deref(), Some("Rua 9"));
        assert_eq!(result.bairro.as_deref(), Some("Setor Marista"));
        assert_eq!(result.cidade.as_deref(), Some("Goiânia"));
        assert_eq!(result.uf.as_deref(), Some("GO"));
        assert!(result
            .formatted_address
            .as_deref()
            .unwrap()
            .contains("Setor Marista"));
    }

    #[test]
    fn test_extract_fields_prefers_first_match() {
        let raw = r#"{
            "address_components": [
                {"long_name": "Cidade A", "short_name": "A", "types": ["locality"]},
                {"long_name": "Cidade B", "short_name": "B", "types": ["administrative_area_level_2"]}
            ]
        }"#;
        let entry: GeocodeEntry = serde_json::from_str(raw).unwrap();
        assert_eq!(extract_fields(&entry).cidade.as_deref(), Some("Cidade A"));
    }
}
