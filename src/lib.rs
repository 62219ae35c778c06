//! `geoenrich` - concurrent reverse-geocoding and weather enrichment
//!
//! Turns batches of coordinates into addresses and multi-day weather
//! observations by calling rate-limited external APIs, with a persistent
//! cache in front and results returned in input order.

pub mod cache;
pub mod centroid;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod geocode;
pub mod logging;
pub mod models;
pub mod weather;

// Re-export core types for public API
pub use cache::{Cache, CacheEntry, MemoryCache, PersistentCache};
pub use centroid::{centroid, group_by_city};
pub use client::{Pacing, RateLimitedClient, RetryPolicy};
pub use config::EnrichConfig;
pub use dispatch::{Dispatcher, Lookup};
pub use engine::{EngineOptions, EnrichmentEngine};
pub use error::{EnrichError, FailureReason, ProviderError};
pub use geocode::{GeocodeProvider, NominatimGeocoder, PositionstackGeocoder};
pub use models::{
    Address, CityCentroid, CityWeather, Coordinate, DailyTemperatures, EnrichedHotel,
    EnrichmentRequest, EnrichmentResult, EnrichmentStatus, HotelRow, RequestKind,
    WeatherObservation,
};
pub use weather::{OpenWeatherClient, WeatherProvider};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Core result type used throughout the library
pub type Result<T> = std::result::Result<T, EnrichError>;
