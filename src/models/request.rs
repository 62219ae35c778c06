//! Requests flowing into the dispatcher and the results flowing out

use serde::{Deserialize, Serialize};

use super::Coordinate;
use crate::error::FailureReason;

/// What to look up for a coordinate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Geocode,
    WeatherCurrent,
    /// Whole days before the batch reference time (1 = yesterday)
    WeatherHistorical(u32),
}

/// One unit of work. `id` is the caller's position and is never reused.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentRequest {
    pub id: usize,
    pub coordinate: Coordinate,
    pub kind: RequestKind,
}

impl EnrichmentRequest {
    #[must_use]
    pub fn new(id: usize, coordinate: Coordinate, kind: RequestKind) -> Self {
        Self {
            id,
            coordinate,
            kind,
        }
    }

    /// Number the coordinates in input order
    #[must_use]
    pub fn batch(coordinates: &[Coordinate], kind: RequestKind) -> Vec<Self> {
        coordinates
            .iter()
            .enumerate()
            .map(|(id, coordinate)| Self::new(id, *coordinate, kind))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum EnrichmentStatus<T> {
    Ok(T),
    Failed(FailureReason),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentResult<T> {
    pub id: usize,
    pub status: EnrichmentStatus<T>,
}

impl<T> EnrichmentResult<T> {
    #[must_use]
    pub fn ok(id: usize, payload: T) -> Self {
        Self {
            id,
            status: EnrichmentStatus::Ok(payload),
        }
    }

    #[must_use]
    pub fn failed(id: usize, reason: FailureReason) -> Self {
        Self {
            id,
            status: EnrichmentStatus::Failed(reason),
        }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self.status, EnrichmentStatus::Ok(_))
    }

    #[must_use]
    pub fn payload(&self) -> Option<&T> {
        match &self.status {
            EnrichmentStatus::Ok(payload) => Some(payload),
            EnrichmentStatus::Failed(_) => None,
        }
    }

    #[must_use]
    pub fn failure(&self) -> Option<&FailureReason> {
        match &self.status {
            EnrichmentStatus::Ok(_) => None,
            EnrichmentStatus::Failed(reason) => Some(reason),
        }
    }

    pub fn into_result(self) -> Result<T, FailureReason> {
        match self.status {
            EnrichmentStatus::Ok(payload) => Ok(payload),
            EnrichmentStatus::Failed(reason) => Err(reason),
        }
    }
}
