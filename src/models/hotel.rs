//! Row shapes exchanged with the ingestion and persistence collaborators

use serde::{Deserialize, Serialize};

use super::{Address, Coordinate};
use crate::EnrichError;

/// A hotel row as produced by upstream ingestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotelRow {
    pub id: u64,
    pub name: String,
    /// Country code (ISO 3166-1 alpha-2)
    pub country: String,
    pub city: String,
    #[serde(flatten)]
    pub coordinate: Coordinate,
}

impl HotelRow {
    /// Reject rows whose coordinate is out of range or not a number
    pub fn validate(&self) -> crate::Result<()> {
        Coordinate::new(self.coordinate.latitude, self.coordinate.longitude)
            .map(|_| ())
            .map_err(|e| match e {
                EnrichError::Validation { message } => {
                    EnrichError::validation(format!("hotel {}: {message}", self.id))
                }
                other => other,
            })
    }
}

/// A hotel row with its reverse-geocoded address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedHotel {
    #[serde(flatten)]
    pub row: HotelRow,
    pub address: Address,
}

/// Query point for one city's weather
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityCentroid {
    pub country: String,
    pub city: String,
    pub centroid: Coordinate,
}
