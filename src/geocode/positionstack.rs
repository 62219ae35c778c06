//! positionstack commercial reverse geocoder
//!
//! The response is structured, so the address is assembled from the
//! present fields in a fixed order, with the provider's `label` as fallback.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::instrument;

use super::GeocodeProvider;
use crate::client::json_body;
use crate::error::ProviderError;
use crate::models::{Address, Coordinate};

const DEFAULT_BASE_URL: &str = "http://api.positionstack.com/v1";

/// Fewer locality fields than this and the `label` is used instead
const MIN_JOINED_FIELDS: usize = 2;

#[derive(Debug, Deserialize)]
struct ReverseResponse {
    #[serde(default)]
    data: Vec<Place>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Place {
    name: Option<String>,
    #[serde(alias = "number")]
    house_number: Option<String>,
    street: Option<String>,
    region: Option<String>,
    postal_code: Option<String>,
    country: Option<String>,
    label: Option<String>,
}

fn present(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|value| !value.is_empty())
}

impl Place {
    /// Join present fields in order; `None` when neither join nor label is usable
    fn compose_address(&self) -> Option<String> {
        let locality: Vec<&str> = [
            &self.name,
            &self.house_number,
            &self.street,
            &self.region,
            &self.postal_code,
        ]
        .into_iter()
        .filter_map(present)
        .collect();

        // The country alone does not locate anything, so it does not count toward the minimum.
        if locality.len() >= MIN_JOINED_FIELDS {
            let mut parts = locality;
            parts.extend(present(&self.country));
            return Some(parts.join(", "));
        }

        present(&self.label).map(str::to_string)
    }
}

pub struct PositionstackGeocoder {
    client: Client,
    api_key: String,
    base_url: String,
}

impl PositionstackGeocoder {
    #[must_use]
    pub fn new(client: Client, api_key: String, base_url: Option<String>) -> Self {
        Self {
            client,
            api_key,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        }
    }
}

#[async_trait]
impl GeocodeProvider for PositionstackGeocoder {
    fn name(&self) -> &str {
        "positionstack"
    }

    #[instrument(name = "positionstack_reverse", level = "debug", skip(self))]
    async fn resolve(
        &self,
        coordinate: Coordinate,
        language: &str,
    ) -> Result<Address, ProviderError> {
        let url = format!(
            "{}/reverse?access_key={}&query={},{}&limit=1&language={}",
            self.base_url,
            urlencoding::encode(&self.api_key),
            coordinate.latitude,
            coordinate.longitude,
            urlencoding::encode(language)
        );

        let response = self.client.get(&url).send().await?;
        let body: ReverseResponse = json_body(response).await?;

        if let Some(error) = body.error {
            let detail = format!(
                "{}: {}",
                error.code.unwrap_or_default(),
                error.message.unwrap_or_default()
            );
            return Err(match detail.as_str() {
                d if d.contains("rate_limit") => ProviderError::Throttled(detail),
                d if d.contains("access_key") || d.contains("inactive_user") => {
                    ProviderError::Unavailable(detail)
                }
                _ => ProviderError::Rejected(detail),
            });
        }

        // An empty list goes back through the retry loop like any transient failure.
        let place = body.data.first().ok_or(ProviderError::EmptyResult)?;

        place
            .compose_address()
            .map(|text| Address::from_text(&text))
            .ok_or(ProviderError::NoData)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn place(fields: &[(&str, &str)]) -> Place {
        let mut place = Place::default();
        for (key, value) in fields {
            let value = Some((*value).to_string());
            match *key {
                "name" => place.name = value,
                "house_number" => place.house_number = value,
                "street" => place.street = value,
                "region" => place.region = value,
                "postal_code" => place.postal_code = value,
                "country" => place.country = value,
                "label" => place.label = value,
                other => panic!("unknown field {other}"),
            }
        }
        place
    }

    #[rstest]
    #[case(
        &[("name", "Hotel Krasnapolsky"), ("house_number", "9"), ("street", "Dam"),
          ("region", "North Holland"), ("postal_code", "1012 JS"), ("country", "Netherlands"),
          ("label", "ignored")],
        Some("Hotel Krasnapolsky, 9, Dam, North Holland, 1012 JS, Netherlands")
    )]
    #[case(
        &[("street", "Dam"), ("postal_code", "1012 JS"), ("country", "Netherlands")],
        Some("Dam, 1012 JS, Netherlands")
    )]
    #[case(
        &[("postal_code", "75001"), ("country", "France"), ("label", "75001 Paris, France")],
        Some("75001 Paris, France")
    )]
    #[case(&[("name", "Louvre"), ("label", "Louvre, Paris")], Some("Louvre, Paris"))]
    #[case(&[("street", "  "), ("region", ""), ("label", "Somewhere")], Some("Somewhere"))]
    #[case(&[("country", "France")], None)]
    #[case(&[], None)]
    fn test_compose_address(#[case] fields: &[(&str, &str)], #[case] expected: Option<&str>) {
        assert_eq!(place(fields).compose_address().as_deref(), expected);
    }

    fn geocoder(server: &MockServer) -> PositionstackGeocoder {
        let client = crate::geocode::http_client("geoenrich-test", Duration::from_secs(5)).unwrap();
        PositionstackGeocoder::new(client, "secret".into(), Some(server.uri()))
    }

    #[tokio::test]
    async fn test_country_and_postcode_fall_back_to_label() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/reverse"))
            .and(query_param("access_key", "secret"))
            .and(query_param("query", "48.8606,2.3376"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{
                    "name": null,
                    "number": null,
                    "street": null,
                    "region": null,
                    "postal_code": "75001",
                    "country": "France",
                    "label": "75001 Paris, France"
                }]
            })))
            .mount(&server)
            .await;

        let address = geocoder(&server)
            .resolve(Coordinate::from_degrees(48.8606, 2.3376), "en")
            .await
            .unwrap();
        assert_eq!(address, Address::Resolved("75001 Paris, France".into()));
    }

    #[tokio::test]
    async fn test_empty_result_list_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "data": [] })))
            .mount(&server)
            .await;

        let err = geocoder(&server)
            .resolve(Coordinate::from_degrees(0.0, 0.0), "en")
            .await
            .unwrap_err();
        assert_eq!(err, ProviderError::EmptyResult);
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_nothing_usable_is_no_data() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{ "country": "France", "label": null }]
            })))
            .mount(&server)
            .await;

        let err = geocoder(&server)
            .resolve(Coordinate::from_degrees(46.0, 2.0), "en")
            .await
            .unwrap_err();
        assert_eq!(err, ProviderError::NoData);
    }

    #[tokio::test]
    async fn test_key_error_payload_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": { "code": "invalid_access_key", "message": "You have not supplied a valid API Access Key." }
            })))
            .mount(&server)
            .await;

        let err = geocoder(&server)
            .resolve(Coordinate::from_degrees(46.0, 2.0), "en")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(detail) if detail.contains("invalid_access_key")));
    }

    #[tokio::test]
    async fn test_query_error_payload_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": { "code": "validation_error", "message": "Request failed with validation error" }
            })))
            .mount(&server)
            .await;

        let err = geocoder(&server)
            .resolve(Coordinate::from_degrees(46.0, 2.0), "en")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Rejected(detail) if detail.contains("validation_error")));
    }
}
