//! OpenStreetMap Nominatim reverse geocoder
//!
//! Usage policy allows roughly one request per second and requires a
//! descriptive user agent; pacing is enforced by the rate-limited client.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::instrument;

use super::GeocodeProvider;
use crate::client::json_body;
use crate::error::ProviderError;
use crate::models::{Address, Coordinate};

const DEFAULT_BASE_URL: &str = "https://nominatim.openstreetmap.org";

#[derive(Debug, Deserialize)]
struct ReverseResponse {
    display_name: Option<String>,
    /// Set instead of a place when nothing is known at the point
    error: Option<String>,
}

pub struct NominatimGeocoder {
    client: Client,
    base_url: String,
}

impl NominatimGeocoder {
    #[must_use]
    pub fn new(client: Client, base_url: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        }
    }
}

#[async_trait]
impl GeocodeProvider for NominatimGeocoder {
    fn name(&self) -> &str {
        "nominatim"
    }

    #[instrument(name = "nominatim_reverse", level = "debug", skip(self))]
    async fn resolve(
        &self,
        coordinate: Coordinate,
        language: &str,
    ) -> Result<Address, ProviderError> {
        let url = format!(
            "{}/reverse?format=jsonv2&lat={}&lon={}&accept-language={}",
            self.base_url,
            coordinate.latitude,
            coordinate.longitude,
            urlencoding::encode(language)
        );

        let response = self.client.get(&url).send().await?;
        let body: ReverseResponse = json_body(response).await?;

        if let Some(error) = body.error {
            tracing::debug!(%error, "Nominatim has no place at this point");
            return Err(ProviderError::NoData);
        }

        match body.display_name.map(|name| Address::from_text(&name)) {
            Some(address @ Address::Resolved(_)) => Ok(address),
            _ => Err(ProviderError::Transient(
                "response is missing display_name".to_string(),
            )),
        }
    }
}
