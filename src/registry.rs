//! Ordered catalog of geocoding providers.
//!
//! The registry owns every configured provider and decides, per query, the
//! order of the cascade:
//!
//! 1. credentialed high-accuracy providers,
//! 2. CEP lookup services, when the query carries a valid CEP,
//! 3. everything else (free and regional providers).
//!
//! Within a group providers run by ascending `priority`, Brazil-affine
//! providers first on ties. Providers that cannot work from the query
//! (CEP-only without a valid CEP, address-only without address text) are
//! left out.

use crate::config::ProviderConfig;
use crate::errors::AppError;
use crate::models::{AccuracyTier, GeocodeQuery};
use crate::providers::{
    AwesomeApiProvider, BrasilApiProvider, GeocodingProvider, GoogleProvider, NominatimProvider,
    OpenCageProvider, ProviderDescriptor, QueryKind,
};
use std::sync::Arc;

#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn GeocodingProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the registry from configuration. Providers whose credential
    /// is absent, or that are listed as disabled, are not registered.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, AppError> {
        let mut registry = Self::new();

        match (&config.google_api_key, config.is_disabled("google")) {
            (Some(key), false) => {
                registry.register(Arc::new(GoogleProvider::new(&config.google_base_url, key)?));
            }
            (None, false) => tracing::info!("GOOGLE_MAPS_API_KEY not set, google disabled"),
            _ => {}
        }
        match (&config.opencage_api_key, config.is_disabled("opencage")) {
            (Some(key), false) => {
                registry.register(Arc::new(OpenCageProvider::new(&config.opencage_base_url, key)?));
            }
            (None, false) => tracing::info!("OPENCAGE_API_KEY not set, opencage disabled"),
            _ => {}
        }
        if !config.is_disabled("brasilapi") {
            registry.register(Arc::new(BrasilApiProvider::new(&config.brasilapi_base_url)?));
        }
        if !config.is_disabled("awesomeapi") {
            registry.register(Arc::new(AwesomeApiProvider::new(&config.awesomeapi_base_url)?));
        }
        if !config.is_disabled("nominatim") {
            registry.register(Arc::new(NominatimProvider::new(
                &config.nominatim_base_url,
                &config.nominatim_user_agent,
            )?));
        }

        if registry.is_empty() {
            return Err(AppError::Configuration(
                "No geocoding provider is enabled".to_string(),
            ));
        }
        if config.require_credentialed && !registry.has_credentialed() {
            return Err(AppError::Configuration(
                "GEOCODE_REQUIRE_CREDENTIALED is set but no credentialed provider is configured"
                    .to_string(),
            ));
        }

        tracing::info!("Geocoding providers enabled: {}", registry.ids().join(", "));
        Ok(registry)
    }

    /// Adds a provider, replacing any provider with the same id.
    pub fn register(&mut self, provider: Arc<dyn GeocodingProvider>) -> &mut Self {
        self.providers.retain(|p| p.id() != provider.id());
        self.providers.push(provider);
        self
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.id().to_string()).collect()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ProviderDescriptor> {
        self.providers.iter().map(|p| p.descriptor())
    }

    pub fn has_credentialed(&self) -> bool {
        self.descriptors().any(|d| d.requires_credential)
    }

    /// Cascade order for a query.
    pub fn ordered_for(&self, query: &GeocodeQuery) -> Vec<Arc<dyn GeocodingProvider>> {
        let has_cep = query.valid_cep().is_some();
        let mut ordered: Vec<Arc<dyn GeocodingProvider>> = self
            .providers
            .iter()
            .filter(|p| p.descriptor().accepts(query))
            .cloned()
            .collect();
        ordered.sort_by_key(|p| sort_key(p.descriptor(), has_cep));
        ordered
    }

    /// Providers able to geocode free text, in cascade order. Used for the
    /// city-level fallback.
    pub fn address_capable(&self) -> Vec<Arc<dyn GeocodingProvider>> {
        let mut ordered: Vec<Arc<dyn GeocodingProvider>> = self
            .providers
            .iter()
            .filter(|p| p.descriptor().query_kind != QueryKind::PostalCode)
            .cloned()
            .collect();
        ordered.sort_by_key(|p| sort_key(p.descriptor(), false));
        ordered
    }
}

fn sort_key(descriptor: &ProviderDescriptor, has_cep: bool) -> (u8, u32, bool) {
    let group = if descriptor.requires_credential && descriptor.accuracy == AccuracyTier::Address {
        0
    } else if has_cep && descriptor.is_cep_specific() {
        1
    } else {
        2
    };
    let not_br = descriptor.region_affinity.as_deref() != Some("BR");
    (group, descriptor.priority, not_br)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderHit;
    use async_trait::async_trait;
    use std::time::Duration;

    struct Fake(ProviderDescriptor);

    #[async_trait]
    impl GeocodingProvider for Fake {
        fn descriptor(&self) -> &ProviderDescriptor {
            &self.0
        }

        async fn geocode(&self, _query: &GeocodeQuery) -> Result<Option<ProviderHit>, AppError> {
            Ok(None)
        }
    }

    fn fake(
        id: &str,
        priority: u32,
        accuracy: AccuracyTier,
        credential: bool,
        kind: QueryKind,
    ) -> Arc<dyn GeocodingProvider> {
        Arc::new(Fake(ProviderDescriptor {
            id: id.to_string(),
            priority,
            accuracy,
            region_affinity: None,
            requires_credential: credential,
            query_kind: kind,
            min_interval: Duration::ZERO,
            max_concurrency: 1,
            timeout: Duration::from_secs(1),
            min_confidence: None,
        }))
    }

    fn registry() -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        registry
            .register(fake("free", 5, AccuracyTier::Locality, false, QueryKind::Address))
            .register(fake("cep", 3, AccuracyTier::Street, false, QueryKind::PostalCode))
            .register(fake("paid", 1, AccuracyTier::Address, true, QueryKind::Both));
        registry
    }

    fn ids(providers: &[Arc<dyn GeocodingProvider>]) -> Vec<&str> {
        providers.iter().map(|p| p.id()).collect()
    }

    #[test]
    fn test_credentialed_first_then_cep_when_present() {
        let query = GeocodeQuery::new("RUA AUGUSTA 100").with_postal_code("01305-100");
        assert_eq!(ids(&registry().ordered_for(&query)), vec!["paid", "cep", "free"]);
    }

    #[test]
    fn test_cep_providers_skipped_for_address_only() {
        let query = GeocodeQuery::new("RUA AUGUSTA 100");
        assert_eq!(ids(&registry().ordered_for(&query)), vec!["paid", "free"]);
    }

    #[test]
    fn test_malformed_cep_disables_cep_providers_only() {
        let query = GeocodeQuery::new("RUA AUGUSTA 100").with_postal_code("123");
        assert_eq!(ids(&registry().ordered_for(&query)), vec!["paid", "free"]);
    }

    #[test]
    fn test_address_providers_skipped_for_cep_only() {
        let query = GeocodeQuery::new("").with_postal_code("01305100");
        assert_eq!(ids(&registry().ordered_for(&query)), vec!["paid", "cep"]);
    }

    #[test]
    fn test_register_replaces_same_id() {
        let mut registry = registry();
        registry.register(fake("free", 9, AccuracyTier::Locality, false, QueryKind::Address));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_from_config_without_keys_keeps_free_providers() {
        let registry = ProviderRegistry::from_config(&ProviderConfig::default()).unwrap();
        assert_eq!(registry.ids(), vec!["brasilapi", "awesomeapi", "nominatim"]);
        assert!(!registry.has_credentialed());
    }

    #[test]
    fn test_from_config_all_disabled_is_fatal() {
        let config = ProviderConfig {
            disabled: vec!["brasilapi".into(), "awesomeapi".into(), "nominatim".into()],
            ..ProviderConfig::default()
        };
        let err = ProviderRegistry::from_config(&config).err().unwrap();
        assert_eq!(err.kind(), "configuration");
    }

    #[test]
    fn test_require_credentialed() {
        let config = ProviderConfig {
            require_credentialed: true,
            ..ProviderConfig::default()
        };
        assert!(ProviderRegistry::from_config(&config).is_err());

        let config = ProviderConfig {
            require_credentialed: true,
            google_api_key: Some("key".into()),
            ..ProviderConfig::default()
        };
        let registry = ProviderRegistry::from_config(&config).unwrap();
        assert_eq!(registry.ids()[0], "google");
    }
}
