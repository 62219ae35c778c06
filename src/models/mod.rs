//! Data models for the enrichment engine
//!
//! - Coordinate: exact-equality point type and cache-key encoding
//! - Address: reverse-geocoding outcome
//! - Weather: daily temperatures and per-city collections
//! - Request: dispatcher input and output
//! - Hotel: rows exchanged with upstream and downstream collaborators

pub mod address;
pub mod coordinate;
pub mod hotel;
pub mod request;
pub mod weather;

pub use address::Address;
pub use coordinate::Coordinate;
pub use hotel::{CityCentroid, EnrichedHotel, HotelRow};
pub use request::{EnrichmentRequest, EnrichmentResult, EnrichmentStatus, RequestKind};
pub use weather::{CityWeather, DailyTemperatures, WeatherObservation};
