//! External reference resolvers.
//!
//! Thin HTTP adapters over the three sources the enricher consults, in
//! cascade order: the IBGE municipality registry, the ViaCEP postal
//! directory, and Google's Geocoding / Places APIs. Every adapter caches
//! positives and negatives (the negative through the cache's miss
//! sentinel), and every adapter degrades to a miss instead of propagating
//! failures: enrichment is optional, merges are not.
//!
//! HTTP error responses (4xx/5xx) are cached as misses; transport errors
//! (timeouts, refused connections) are not, so a flapping network does not
//! poison the cache.

mod google;
mod registry;
mod viacep;

pub use google::{GeocodeResult, Geocoder, PlaceHit, Places};
pub use registry::{IbgeRegistry, Municipality};
pub use viacep::{CepAddress, ViaCep};

use std::time::Duration;

pub(crate) const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub(crate) const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// HTTP client with the standard resolver timeouts.
pub(crate) fn create_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(HTTP_REQUEST_TIMEOUT)
        .connect_timeout(HTTP_CONNECT_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Cache key fragment for a free-text query: folded (lowercase, accents
/// stripped, whitespace collapsed) with spaces replaced by hyphens.
pub(crate) fn normalize_query_key(query: &str) -> String {
    locdedup::normalize::fold(query).replace(' ', "-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_query_key() {
        assert_eq!(
            normalize_query_key("Jardim América, Goiânia - GO"),
            "jardim-america,-goiania---go"
        );
        assert_eq!(normalize_query_key("  A  B "), "a-b");
    }

    #[test]
    fn test_http_client_builds() {
        let _client = create_http_client();
    }
}
