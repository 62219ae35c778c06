//! Weather records and per-city collections

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::Coordinate;
use crate::error::FailureReason;

/// Provider-neutral temperatures for one calendar day
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DailyTemperatures {
    /// Calendar date local to the queried point
    pub date: NaiveDate,
    /// Representative day temperature in Celsius
    pub day_temp: f64,
    /// Minimum temperature in Celsius
    pub min_temp: f64,
    /// Maximum temperature in Celsius
    pub max_temp: f64,
}

/// One day of weather for a city, as handed to downstream consumers
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct WeatherObservation {
    pub date: NaiveDate,
    pub city: String,
    /// Query point the observation was fetched for (the city centroid)
    pub latitude: f64,
    pub longitude: f64,
    pub day_temp: f64,
    pub min_temp: f64,
    pub max_temp: f64,
}

impl WeatherObservation {
    #[must_use]
    pub fn new(city: &str, at: Coordinate, daily: &DailyTemperatures) -> Self {
        Self {
            date: daily.date,
            city: city.to_string(),
            latitude: at.latitude,
            longitude: at.longitude,
            day_temp: daily.day_temp,
            min_temp: daily.min_temp,
            max_temp: daily.max_temp,
        }
    }
}

/// All weather gathered for one city centroid
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CityWeather {
    pub city: String,
    pub centroid: Coordinate,
    /// Sorted by date, historical days first
    pub observations: Vec<WeatherObservation>,
    /// Requests for this city that did not produce data
    pub failures: Vec<FailureReason>,
}

impl CityWeather {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}
