//! Weather lookups per query point
//!
//! Two call shapes:
//! - current + forecast: today and the following days as daily records
//! - historical: one record for a specific past calendar day

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::WeatherConfig;
use crate::error::ProviderError;
use crate::models::{Coordinate, DailyTemperatures};
use crate::{EnrichError, Result};

pub mod openweather;

pub use openweather::OpenWeatherClient;

/// Records returned by a current/forecast call: today plus five forecast days
pub const FORECAST_DAYS: usize = 6;

#[async_trait]
pub trait WeatherProvider: Send + Sync {
    /// Short stable name, used to qualify cache keys
    fn name(&self) -> &str;

    /// Today and the next five days, in date order
    async fn fetch_current_forecast(
        &self,
        at: Coordinate,
    ) -> std::result::Result<Vec<DailyTemperatures>, ProviderError>;

    /// The calendar day containing `unix_time`
    async fn fetch_historical(
        &self,
        at: Coordinate,
        unix_time: i64,
    ) -> std::result::Result<DailyTemperatures, ProviderError>;
}

/// Build the weather provider from configuration; the API key is mandatory
pub fn from_config(config: &WeatherConfig, user_agent: &str) -> Result<Arc<dyn WeatherProvider>> {
    let api_key = config
        .api_key
        .clone()
        .ok_or_else(|| EnrichError::config("weather enrichment requires weather.api_key"))?;
    let client = crate::geocode::http_client(user_agent, config.timeout())?;
    Ok(Arc::new(OpenWeatherClient::new(
        client,
        api_key,
        config.base_url.clone(),
    )))
}
