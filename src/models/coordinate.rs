//! Coordinate value type and its cache-key encoding

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::EnrichError;

/// Fixed number of decimals used in cache keys, identical across processes
pub const KEY_PRECISION: usize = 7;

/// A point on Earth in decimal degrees.
///
/// Equality and hashing are exact on the bit patterns of both floats, no rounding.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Coordinate {
    /// Latitude in decimal degrees
    pub latitude: f64,
    /// Longitude in decimal degrees
    pub longitude: f64,
}

impl Coordinate {
    /// Create a coordinate, rejecting values outside the valid ranges
    pub fn new(latitude: f64, longitude: f64) -> crate::Result<Self> {
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(EnrichError::validation(format!(
                "latitude {latitude} outside [-90, 90]"
            )));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(EnrichError::validation(format!(
                "longitude {longitude} outside [-180, 180]"
            )));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    /// Create a coordinate without range checks (upstream already filtered it)
    #[must_use]
    pub const fn from_degrees(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Provider-qualified cache key, e.g. `nominatim:48.8566000,2.3522000`
    #[must_use]
    pub fn cache_key(&self, provider: &str) -> String {
        format!(
            "{provider}:{:.prec$},{:.prec$}",
            self.latitude,
            self.longitude,
            prec = KEY_PRECISION
        )
    }
}

impl PartialEq for Coordinate {
    fn eq(&self, other: &Self) -> bool {
        self.latitude.to_bits() == other.latitude.to_bits()
            && self.longitude.to_bits() == other.longitude.to_bits()
    }
}

impl Eq for Coordinate {}

impl Hash for Coordinate {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.latitude.to_bits().hash(state);
        self.longitude.to_bits().hash(state);
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.latitude, self.longitude)
    }
}
