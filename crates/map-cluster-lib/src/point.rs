//! Listing points: raw candidates and validated, immutable points
//!
//! Candidates come straight from the listing source and may carry anything. The
//! builder turns them into [`Point`]s, silently dropping malformed ones and counting
//! them in a [`ValidationReport`].

use crate::utils;
use rayon::prelude::*;

#[cfg(feature = "serde")]
use serde::{Deserialize, Deserializer, Serialize, de::IgnoredAny};

/// A candidate point as supplied by the listing data source
///
/// Numeric fields that are missing, `null` or not numbers deserialize as NaN, so a
/// single broken record is rejected during validation instead of failing the load.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ListingPoint {
    /// Listing identifier
    #[cfg_attr(feature = "serde", serde(default))]
    pub id: String,
    /// Longitude in degrees
    #[cfg_attr(feature = "serde", serde(default = "missing", deserialize_with = "lenient"))]
    pub longitude: f64,
    /// Latitude in degrees
    #[cfg_attr(feature = "serde", serde(default = "missing", deserialize_with = "lenient"))]
    pub latitude: f64,
    /// Numeric attribute aggregated by clusters (price or similar)
    #[cfg_attr(feature = "serde", serde(default = "missing", deserialize_with = "lenient"))]
    pub payload: f64,
}

#[cfg(feature = "serde")]
#[derive(Deserialize)]
#[serde(untagged)]
enum MaybeNumber {
    Number(f64),
    Other(IgnoredAny),
}

#[cfg(feature = "serde")]
fn missing() -> f64 {
    f64::NAN
}

#[cfg(feature = "serde")]
fn lenient<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(match MaybeNumber::deserialize(deserializer)? {
        MaybeNumber::Number(value) => value,
        MaybeNumber::Other(_) => f64::NAN,
    })
}

impl ListingPoint {
    pub fn new(id: impl Into<String>, longitude: f64, latitude: f64, payload: f64) -> Self {
        Self {
            id: id.into(),
            longitude,
            latitude,
            payload,
        }
    }
}

/// A validated point. Coordinates are finite and inside the Web Mercator domain and
/// the payload is finite and non-negative.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct Point {
    id: String,
    longitude: f64,
    latitude: f64,
    payload: f64,
}

/// Why a candidate was excluded from the index
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("coordinates are not finite or outside the Web Mercator domain")]
    Coordinates,

    #[error("payload is not a finite non-negative number")]
    Payload,
}

/// Counts of accepted and excluded candidates for caller diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ValidationReport {
    /// Candidates that made it into the index
    pub accepted: usize,
    /// Candidates dropped for bad coordinates
    pub rejected_coordinates: usize,
    /// Candidates dropped for a bad payload
    pub rejected_payload: usize,
}

impl ValidationReport {
    /// Total number of excluded candidates
    #[inline]
    pub fn skipped(&self) -> usize {
        self.rejected_coordinates + self.rejected_payload
    }
}

impl TryFrom<&ListingPoint> for Point {
    type Error = Rejection;

    fn try_from(candidate: &ListingPoint) -> Result<Self, Self::Error> {
        if !utils::is_valid_wgs84(candidate.longitude, candidate.latitude) {
            return Err(Rejection::Coordinates);
        }
        if !candidate.payload.is_finite() || candidate.payload < 0.0 {
            return Err(Rejection::Payload);
        }

        Ok(Point {
            id: candidate.id.clone(),
            longitude: candidate.longitude,
            latitude: candidate.latitude,
            payload: candidate.payload,
        })
    }
}

impl Point {
    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[inline]
    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    #[inline]
    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    #[inline]
    pub fn payload(&self) -> f64 {
        self.payload
    }

    /// Location as a `geo::Point` (x = longitude, y = latitude)
    #[inline]
    pub fn location(&self) -> geo::Point<f64> {
        geo::Point::new(self.longitude, self.latitude)
    }
}

/// Validate all candidates in parallel, keeping the input order of accepted points
pub(crate) fn validate_all(candidates: &[ListingPoint]) -> (Vec<Point>, ValidationReport) {
    #[cfg(feature = "profiling")]
    profiling::scope!("point::validate_all");

    let results: Vec<std::result::Result<Point, Rejection>> =
        candidates.par_iter().map(Point::try_from).collect();

    let mut report = ValidationReport::default();
    let mut points = Vec::with_capacity(results.len());

    for (candidate, result) in candidates.iter().zip(results) {
        match result {
            Ok(point) => points.push(point),
            Err(reason) => {
                tracing::trace!("Skipping listing {:?}: {}", candidate.id, reason);
                match reason {
                    Rejection::Coordinates => report.rejected_coordinates += 1,
                    Rejection::Payload => report.rejected_payload += 1,
                }
            }
        }
    }
    report.accepted = points.len();

    if report.skipped() > 0 {
        tracing::warn!(
            "Excluded {} of {} listings ({} bad coordinates, {} bad payloads)",
            report.skipped(),
            candidates.len(),
            report.rejected_coordinates,
            report.rejected_payload
        );
    }

    (points, report)
}
