//! Geographic bounding boxes used for viewport queries

use crate::{ClusterError, utils};
use geo::{Coord, Rect};
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A `[west, south, east, north]` box in degrees.
///
/// Unlike `geo::Rect`, the edges are kept exactly as given: a box with
/// `west > east` (for example one crossing the antimeridian) or `south > north` is
/// *degenerate* and is not reordered or wrapped. Queries with a degenerate box return
/// no features; callers must split antimeridian-crossing views themselves.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BoundingBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl BoundingBox {
    /// Create a new bounding box from its four edges
    ///
    /// # Examples
    ///
    /// ```
    /// use map_cluster_lib::BoundingBox;
    ///
    /// let bbox = BoundingBox::new(-74.0, 40.7, -73.9, 40.8);
    /// assert!(!bbox.is_degenerate());
    /// ```
    pub const fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    /// The whole Web Mercator world
    pub const fn world() -> Self {
        Self::new(
            -utils::MAX_LONGITUDE,
            -utils::MAX_LATITUDE,
            utils::MAX_LONGITUDE,
            utils::MAX_LATITUDE,
        )
    }

    /// Build from a `[west, south, east, north]` array
    pub const fn from_array(edges: [f64; 4]) -> Self {
        Self::new(edges[0], edges[1], edges[2], edges[3])
    }

    pub const fn to_array(&self) -> [f64; 4] {
        [self.west, self.south, self.east, self.north]
    }

    /// A box spanning `pixels` screen pixels on every side of a location at a zoom level
    pub fn around(lon: f64, lat: f64, zoom: u8, pixels: f64) -> Self {
        Self::from_center(lon, lat, zoom, pixels * 2.0, pixels * 2.0)
    }

    /// The box seen by a `width_px` x `height_px` screen centered on a location
    pub fn from_center(lon: f64, lat: f64, zoom: u8, width_px: f64, height_px: f64) -> Self {
        let center = utils::project(lon, lat);
        let scale = utils::world_size(zoom);
        let half_w = width_px / 2.0 / scale;
        let half_h = height_px / 2.0 / scale;

        let min_x = (center.x - half_w).max(0.0);
        let max_x = (center.x + half_w).min(1.0);
        let min_y = (center.y - half_h).max(0.0);
        let max_y = (center.y + half_h).min(1.0);

        Self::new(
            utils::x_to_lon(min_x),
            utils::y_to_lat(max_y).max(-utils::MAX_LATITUDE),
            utils::x_to_lon(max_x),
            utils::y_to_lat(min_y).min(utils::MAX_LATITUDE),
        )
    }

    /// True when the box is not finite or its edges are out of order
    pub fn is_degenerate(&self) -> bool {
        let finite = self.west.is_finite()
            && self.south.is_finite()
            && self.east.is_finite()
            && self.north.is_finite();
        !finite || self.west > self.east || self.south > self.north
    }

    /// Check if a location is inside the box (inclusive)
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.west && lon <= self.east && lat >= self.south && lat <= self.north
    }

    /// Check whether another box lies entirely inside this one (inclusive)
    pub fn contains_box(&self, other: &BoundingBox) -> bool {
        other.west >= self.west
            && other.east <= self.east
            && other.south >= self.south
            && other.north <= self.north
    }

    /// Project into normalized Mercator space, or `None` for a degenerate box
    pub(crate) fn to_mercator(&self) -> Option<Rect<f64>> {
        if self.is_degenerate() {
            return None;
        }

        let west = self.west.clamp(-utils::MAX_LONGITUDE, utils::MAX_LONGITUDE);
        let east = self.east.clamp(-utils::MAX_LONGITUDE, utils::MAX_LONGITUDE);

        // y grows southwards, so the northern edge becomes the minimum
        Some(Rect::new(
            Coord {
                x: utils::lon_to_x(west),
                y: utils::lat_to_y(self.north),
            },
            Coord {
                x: utils::lon_to_x(east),
                y: utils::lat_to_y(self.south),
            },
        ))
    }
}

impl From<Rect<f64>> for BoundingBox {
    /// Convert a lon/lat `geo::Rect` (x = longitude, y = latitude)
    fn from(rect: Rect<f64>) -> Self {
        Self::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y)
    }
}

impl FromStr for BoundingBox {
    type Err = ClusterError;

    /// Parse `"west,south,east,north"`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let edges: Vec<f64> = s
            .split(',')
            .map(|part| part.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|e| ClusterError::InvalidBoundingBox(format!("{s:?}: {e}")))?;

        match edges.as_slice() {
            [west, south, east, north] => Ok(Self::new(*west, *south, *east, *north)),
            _ => Err(ClusterError::InvalidBoundingBox(format!(
                "{s:?}: expected 4 comma-separated numbers, got {}",
                edges.len()
            ))),
        }
    }
}
