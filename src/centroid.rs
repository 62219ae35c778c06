//! Per-city query points
//!
//! Coordinates are treated as planar; the mean is only meaningful for points
//! within one city.

use std::collections::HashMap;

use crate::models::{CityCentroid, Coordinate, HotelRow};

/// Arithmetic mean of `coordinates`.
///
/// The slice must not be empty; [`group_by_city`] never produces an empty group.
#[must_use]
pub fn centroid(coordinates: &[Coordinate]) -> Coordinate {
    debug_assert!(!coordinates.is_empty(), "centroid of an empty group");

    let count = coordinates.len() as f64;
    let (lat_sum, lon_sum) = coordinates
        .iter()
        .fold((0.0, 0.0), |(lat, lon), c| (lat + c.latitude, lon + c.longitude));

    Coordinate::from_degrees(lat_sum / count, lon_sum / count)
}

/// One centroid per (country, city), in order of first appearance
#[must_use]
pub fn group_by_city(rows: &[HotelRow]) -> Vec<CityCentroid> {
    let mut order: Vec<(&str, &str)> = Vec::new();
    let mut members: HashMap<(&str, &str), Vec<Coordinate>> = HashMap::new();

    for row in rows {
        let city = (row.country.as_str(), row.city.as_str());
        members
            .entry(city)
            .or_insert_with(|| {
                order.push(city);
                Vec::new()
            })
            .push(row.coordinate);
    }

    order
        .into_iter()
        .map(|(country, city)| CityCentroid {
            country: country.to_string(),
            city: city.to_string(),
            centroid: centroid(&members[&(country, city)]),
        })
        .collect()
}
