//! Reverse geocoding
//!
//! Two interchangeable providers turn a [`Coordinate`] into an [`Address`]:
//! - [`NominatimGeocoder`]: courtesy public geocoder, display address verbatim
//! - [`PositionstackGeocoder`]: commercial API, address assembled from structured fields
//!
//! Provider-specific field names stay inside the adapters.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::config::{GeocoderKind, GeocodingConfig};
use crate::error::ProviderError;
use crate::models::{Address, Coordinate};
use crate::{EnrichError, Result};

pub mod nominatim;
pub mod positionstack;

pub use nominatim::NominatimGeocoder;
pub use positionstack::PositionstackGeocoder;

/// Capability shared by every reverse geocoder
#[async_trait]
pub trait GeocodeProvider: Send + Sync {
    /// Short stable name, used to qualify cache keys
    fn name(&self) -> &str;

    /// One outbound attempt; retrying is the caller's job
    async fn resolve(
        &self,
        coordinate: Coordinate,
        language: &str,
    ) -> std::result::Result<Address, ProviderError>;
}

pub(crate) fn http_client(user_agent: &str, timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(user_agent)
        .build()
        .map_err(|e| EnrichError::config(format!("Failed to create HTTP client: {e}")))
}

/// Build the provider selected in the configuration
pub fn from_config(config: &GeocodingConfig) -> Result<Arc<dyn GeocodeProvider>> {
    let client = http_client(&config.user_agent, config.timeout())?;
    let provider: Arc<dyn GeocodeProvider> = match config.provider {
        GeocoderKind::Nominatim => Arc::new(NominatimGeocoder::new(
            client,
            config.base_url.clone(),
        )),
        GeocoderKind::Positionstack => {
            let api_key = config.api_key.clone().ok_or_else(|| {
                EnrichError::config("positionstack geocoding requires geocoding.api_key")
            })?;
            Arc::new(PositionstackGeocoder::new(
                client,
                api_key,
                config.base_url.clone(),
            ))
        }
    };
    Ok(provider)
}
