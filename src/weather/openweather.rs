//! OpenWeather One Call client
//!
//! Temperatures are requested in metric units. Calendar dates are local to
//! the queried point (`dt` shifted by `timezone_offset`).

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use reqwest::Client;
use tracing::instrument;

use super::{FORECAST_DAYS, WeatherProvider};
use crate::client::json_body;
use crate::error::ProviderError;
use crate::models::{Coordinate, DailyTemperatures};

pub struct OpenWeatherClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenWeatherClient {
    #[must_use]
    pub fn new(client: Client, api_key: String, base_url: String) -> Self {
        Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, url: String) -> Result<T, ProviderError> {
        let response = self.client.get(&url).send().await?;
        json_body(response).await
    }
}

fn local_date(dt: i64, timezone_offset: i64) -> Result<NaiveDate, ProviderError> {
    DateTime::from_timestamp(dt + timezone_offset, 0)
        .map(|timestamp| timestamp.date_naive())
        .ok_or_else(|| ProviderError::Transient(format!("invalid timestamp {dt}")))
}

#[async_trait]
impl WeatherProvider for OpenWeatherClient {
    fn name(&self) -> &str {
        "openweather"
    }

    #[instrument(name = "openweather_forecast", level = "debug", skip(self))]
    async fn fetch_current_forecast(
        &self,
        at: Coordinate,
    ) -> Result<Vec<DailyTemperatures>, ProviderError> {
        let url = format!(
            "{}/onecall?lat={}&lon={}&exclude=minutely,hourly,alerts&units=metric&appid={}",
            self.base_url,
            at.latitude,
            at.longitude,
            urlencoding::encode(&self.api_key)
        );
        let response: api::OneCallResponse = self.get(url).await?;
        response.into_daily()
    }

    #[instrument(name = "openweather_history", level = "debug", skip(self))]
    async fn fetch_historical(
        &self,
        at: Coordinate,
        unix_time: i64,
    ) -> Result<DailyTemperatures, ProviderError> {
        let url = format!(
            "{}/onecall/timemachine?lat={}&lon={}&dt={}&units=metric&appid={}",
            self.base_url,
            at.latitude,
            at.longitude,
            unix_time,
            urlencoding::encode(&self.api_key)
        );
        let response: api::TimeMachineResponse = self.get(url).await?;
        response.into_daily()
    }
}

/// OpenWeather response structures
mod api {
    use serde::Deserialize;

    use super::{FORECAST_DAYS, local_date};
    use crate::error::ProviderError;
    use crate::models::DailyTemperatures;

    #[derive(Debug, Deserialize)]
    pub struct OneCallResponse {
        #[serde(default)]
        pub timezone_offset: i64,
        pub daily: Option<Vec<Daily>>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Daily {
        pub dt: i64,
        pub temp: DailyTemp,
    }

    #[derive(Debug, Deserialize)]
    pub struct DailyTemp {
        pub day: f64,
        pub min: f64,
        pub max: f64,
    }

    #[derive(Debug, Deserialize)]
    pub struct TimeMachineResponse {
        #[serde(default)]
        pub timezone_offset: i64,
        pub current: Option<Sample>,
        #[serde(default)]
        pub hourly: Vec<Sample>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Sample {
        pub dt: i64,
        pub temp: f64,
    }

    impl OneCallResponse {
        pub fn into_daily(self) -> Result<Vec<DailyTemperatures>, ProviderError> {
            let daily = self.daily.unwrap_or_default();
            if daily.is_empty() {
                return Err(ProviderError::EmptyResult);
            }
            if daily.len() < FORECAST_DAYS {
                return Err(ProviderError::Transient(format!(
                    "expected {FORECAST_DAYS} daily records, got {}",
                    daily.len()
                )));
            }

            daily
                .into_iter()
                .take(FORECAST_DAYS)
                .map(|day| {
                    Ok(DailyTemperatures {
                        date: local_date(day.dt, self.timezone_offset)?,
                        day_temp: day.temp.day,
                        min_temp: day.temp.min,
                        max_temp: day.temp.max,
                    })
                })
                .collect()
        }
    }

    impl TimeMachineResponse {
        /// Min/max are extrema over the hourly samples of the day
        pub fn into_daily(self) -> Result<DailyTemperatures, ProviderError> {
            let current = self.current.ok_or_else(|| {
                ProviderError::Transient("response is missing current conditions".to_string())
            })?;

            let (min_temp, max_temp) = match self.hourly.split_first() {
                None => (current.temp, current.temp),
                Some((first, rest)) => rest
                    .iter()
                    .fold((first.temp, first.temp), |(min, max), sample| {
                        (min.min(sample.temp), max.max(sample.temp))
                    }),
            };

            Ok(DailyTemperatures {
                date: local_date(current.dt, self.timezone_offset)?,
                day_temp: current.temp,
                min_temp,
                max_temp,
            })
        }
    }
}
