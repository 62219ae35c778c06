//! Enrichment engine
//!
//! Owns the cache, one rate-limited client per provider and the two
//! dispatchers. Per-item failures come back as `Failed` results. Building
//! the engine fails on configuration or cache-opening problems, and a batch
//! fails with [`EnrichError::Api`] when its provider is unreachable or
//! refuses our credentials.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::cache::{Cache, MemoryCache, PersistentCache};
use crate::centroid::group_by_city;
use crate::client::RateLimitedClient;
use crate::config::EnrichConfig;
use crate::dispatch::{Dispatcher, Lookup};
use crate::error::FailureReason;
use crate::geocode::{self, GeocodeProvider};
use crate::models::{
    Address, CityCentroid, CityWeather, Coordinate, DailyTemperatures, EnrichedHotel,
    EnrichmentRequest, EnrichmentResult, EnrichmentStatus, HotelRow, RequestKind,
    WeatherObservation,
};
use crate::weather::{self, WeatherProvider};
use crate::{EnrichError, Result};

/// Tunables that do not belong to a single provider
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub geocode_workers: usize,
    pub weather_workers: usize,
    pub language: String,
    /// Preceding calendar days fetched per city
    pub history_days: u32,
    pub negative_results: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            geocode_workers: 10,
            weather_workers: 5,
            language: "en".to_string(),
            history_days: 5,
            negative_results: true,
        }
    }
}

impl EngineOptions {
    #[must_use]
    pub fn from_config(config: &EnrichConfig) -> Self {
        Self {
            geocode_workers: config.geocoding.workers,
            weather_workers: config.weather.workers,
            language: config.geocoding.language.clone(),
            history_days: config.weather.history_days,
            negative_results: config.cache.negative_results,
        }
    }
}

struct GeocodeLookup {
    provider: Arc<dyn GeocodeProvider>,
    client: RateLimitedClient,
    language: String,
}

#[async_trait]
impl Lookup for GeocodeLookup {
    type Output = Address;

    fn cache_key(&self, request: &EnrichmentRequest) -> String {
        request
            .coordinate
            .cache_key(&format!("{}:{}", self.provider.name(), self.language))
    }

    async fn lookup(&self, request: &EnrichmentRequest) -> std::result::Result<Address, FailureReason> {
        let coordinate = request.coordinate;
        self.client
            .execute(|| self.provider.resolve(coordinate, &self.language))
            .await
    }
}

/// Weather lookups for one batch; dates are relative to `reference`
struct WeatherLookup {
    provider: Arc<dyn WeatherProvider>,
    client: Arc<RateLimitedClient>,
    reference: DateTime<Utc>,
}

impl WeatherLookup {
    fn day(&self, days_back: u32) -> DateTime<Utc> {
        self.reference - TimeDelta::days(i64::from(days_back))
    }
}

#[async_trait]
impl Lookup for WeatherLookup {
    type Output = Vec<DailyTemperatures>;

    fn cache_key(&self, request: &EnrichmentRequest) -> String {
        let scope = match request.kind {
            RequestKind::WeatherHistorical(days_back) => {
                format!("history:{}", self.day(days_back).date_naive())
            }
            RequestKind::WeatherCurrent | RequestKind::Geocode => {
                format!("current:{}", self.reference.date_naive())
            }
        };
        request
            .coordinate
            .cache_key(&format!("{}:{scope}", self.provider.name()))
    }

    async fn lookup(
        &self,
        request: &EnrichmentRequest,
    ) -> std::result::Result<Vec<DailyTemperatures>, FailureReason> {
        let at = request.coordinate;
        match request.kind {
            RequestKind::WeatherCurrent => {
                self.client
                    .execute(|| self.provider.fetch_current_forecast(at))
                    .await
            }
            RequestKind::WeatherHistorical(days_back) => {
                let unix_time = self.day(days_back).timestamp();
                self.client
                    .execute(|| self.provider.fetch_historical(at, unix_time))
                    .await
                    .map(|day| vec![day])
            }
            RequestKind::Geocode => Err(FailureReason::Internal(
                "geocode request routed to weather lookup".to_string(),
            )),
        }
    }
}

pub struct EnrichmentEngine {
    cache: Arc<dyn Cache>,
    geocoding: Arc<GeocodeLookup>,
    weather: Arc<dyn WeatherProvider>,
    weather_client: Arc<RateLimitedClient>,
    geocode_dispatcher: Dispatcher,
    weather_dispatcher: Dispatcher,
    history_days: u32,
    cancel: CancellationToken,
    deadline: Option<Duration>,
}

/// The first fatal failure of a batch, as an engine error
fn abort_on_fatal<T>(results: &[EnrichmentResult<T>]) -> Result<()> {
    match results
        .iter()
        .filter_map(EnrichmentResult::failure)
        .find(|reason| reason.is_fatal())
    {
        Some(reason) => Err(EnrichError::api(reason.to_string())),
        None => Ok(()),
    }
}

fn config_error(err: anyhow::Error) -> EnrichError {
    match err.downcast::<EnrichError>() {
        Ok(err) => err,
        Err(err) => EnrichError::config(format!("{err:#}")),
    }
}

impl EnrichmentEngine {
    /// Build providers from the configuration and open the persistent cache
    pub fn from_config(config: &EnrichConfig) -> Result<Self> {
        config.require_credentials().map_err(config_error)?;
        let cache = PersistentCache::open(&config.cache.location)
            .map_err(|e| EnrichError::cache(format!("{e:#}")))?;
        Self::from_config_with_cache(config, Arc::new(cache))
    }

    /// Like [`Self::from_config`], without touching the disk
    pub fn in_memory(config: &EnrichConfig) -> Result<Self> {
        Self::from_config_with_cache(config, Arc::new(MemoryCache::new()))
    }

    pub fn from_config_with_cache(config: &EnrichConfig, cache: Arc<dyn Cache>) -> Result<Self> {
        config.require_credentials().map_err(config_error)?;
        let geocoder = geocode::from_config(&config.geocoding)?;
        let weather = weather::from_config(&config.weather, &config.geocoding.user_agent)?;

        let geocode_client =
            RateLimitedClient::from_config(geocoder.name(), &config.geocoding.pacing);
        let weather_client = RateLimitedClient::from_config(weather.name(), &config.weather.pacing);

        info!(
            geocoder = geocoder.name(),
            weather = weather.name(),
            "Enrichment engine configured"
        );

        Ok(Self::new(
            cache,
            geocoder,
            geocode_client,
            weather,
            weather_client,
            EngineOptions::from_config(config),
        ))
    }

    /// Assemble an engine from ready-made collaborators
    #[must_use]
    pub fn new(
        cache: Arc<dyn Cache>,
        geocoder: Arc<dyn GeocodeProvider>,
        geocode_client: RateLimitedClient,
        weather: Arc<dyn WeatherProvider>,
        weather_client: RateLimitedClient,
        options: EngineOptions,
    ) -> Self {
        Self {
            geocode_dispatcher: Dispatcher::new(
                Arc::clone(&cache),
                options.geocode_workers,
                options.negative_results,
            ),
            weather_dispatcher: Dispatcher::new(
                Arc::clone(&cache),
                options.weather_workers,
                options.negative_results,
            ),
            cache,
            geocoding: Arc::new(GeocodeLookup {
                provider: geocoder,
                client: geocode_client,
                language: options.language,
            }),
            weather,
            weather_client: Arc::new(weather_client),
            history_days: options.history_days,
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Every batch started afterwards gives up once `deadline` has elapsed
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Cancelling `token` fails in-flight and pending items as `Cancelled`
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Reverse-geocode a batch; one result per coordinate, in input order
    #[instrument(skip_all, fields(coordinates = coordinates.len()))]
    pub async fn geocode(&self, coordinates: &[Coordinate]) -> Result<Vec<EnrichmentResult<Address>>> {
        let requests = EnrichmentRequest::batch(coordinates, RequestKind::Geocode);
        let token = self.batch_token();
        let _guard = token.clone().drop_guard();

        let results = self
            .geocode_dispatcher
            .run(Arc::clone(&self.geocoding), requests, &token)
            .await;
        abort_on_fatal(&results)?;
        Ok(results)
    }

    /// Attach an address to every row; failed lookups become [`Address::Unresolved`]
    pub async fn enrich_hotels(&self, rows: Vec<HotelRow>) -> Result<Vec<EnrichedHotel>> {
        let coordinates: Vec<Coordinate> = rows.iter().map(|row| row.coordinate).collect();
        let results = self.geocode(&coordinates).await?;

        let mut unresolved = 0usize;
        let hotels: Vec<EnrichedHotel> = rows
            .into_iter()
            .zip(results)
            .map(|(row, result)| {
                let address = match result.into_result() {
                    Ok(address) => address,
                    Err(reason) => {
                        unresolved += 1;
                        warn!(hotel = row.id, %reason, "Address lookup failed");
                        Address::Unresolved
                    }
                };
                EnrichedHotel { row, address }
            })
            .collect();

        info!(hotels = hotels.len(), unresolved, "Hotel enrichment finished");
        Ok(hotels)
    }

    /// One centroid per (country, city), in order of first appearance
    #[must_use]
    pub fn city_centroids(&self, rows: &[HotelRow]) -> Vec<CityCentroid> {
        group_by_city(rows)
    }

    /// Current + forecast and the preceding days for every centroid
    #[instrument(skip_all, fields(cities = cities.len()))]
    pub async fn enrich_weather(&self, cities: &[CityCentroid]) -> Result<Vec<CityWeather>> {
        let lookup = Arc::new(WeatherLookup {
            provider: Arc::clone(&self.weather),
            client: Arc::clone(&self.weather_client),
            reference: Utc::now(),
        });

        let kinds: Vec<RequestKind> = std::iter::once(RequestKind::WeatherCurrent)
            .chain((1..=self.history_days).map(RequestKind::WeatherHistorical))
            .collect();

        let mut owners = Vec::with_capacity(cities.len() * kinds.len());
        let mut requests = Vec::with_capacity(cities.len() * kinds.len());
        for (city_index, city) in cities.iter().enumerate() {
            for kind in &kinds {
                requests.push(EnrichmentRequest::new(requests.len(), city.centroid, *kind));
                owners.push(city_index);
            }
        }

        let token = self.batch_token();
        let _guard = token.clone().drop_guard();
        let results = self.weather_dispatcher.run(lookup, requests, &token).await;
        abort_on_fatal(&results)?;

        let mut weather: Vec<CityWeather> = cities
            .iter()
            .map(|city| CityWeather {
                city: city.city.clone(),
                centroid: city.centroid,
                observations: Vec::new(),
                failures: Vec::new(),
            })
            .collect();

        for (owner, result) in owners.into_iter().zip(results) {
            let entry = &mut weather[owner];
            match result.status {
                EnrichmentStatus::Ok(days) => {
                    for day in &days {
                        let observation = WeatherObservation::new(&entry.city, entry.centroid, day);
                        entry.observations.push(observation);
                    }
                }
                EnrichmentStatus::Failed(reason) => {
                    warn!(city = %entry.city, %reason, "Weather lookup failed");
                    entry.failures.push(reason);
                }
            }
        }

        for entry in &mut weather {
            entry.observations.sort_by_key(|observation| observation.date);
        }

        info!(
            cities = weather.len(),
            incomplete = weather.iter().filter(|w| !w.is_complete()).count(),
            "Weather enrichment finished"
        );
        Ok(weather)
    }

    /// Flush the cache; call once all batches are done
    pub async fn shutdown(self) -> Result<()> {
        self.cache
            .flush()
            .await
            .map_err(|e| EnrichError::cache(format!("{e:#}")))?;
        info!("Enrichment engine shut down");
        Ok(())
    }

    /// Child of the engine token, cancelled by the deadline if one is set
    fn batch_token(&self) -> CancellationToken {
        let token = self.cancel.child_token();
        if let Some(deadline) = self.deadline {
            let timer = token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    () = tokio::time::sleep(deadline) => {
                        warn!(deadline_ms = deadline.as_millis() as u64, "Batch deadline exceeded");
                        timer.cancel();
                    }
                    () = timer.cancelled() => {}
                }
            });
        }
        token
    }
}
