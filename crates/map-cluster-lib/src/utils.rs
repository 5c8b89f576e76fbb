//! Utility functions for slippy-map projection and pixel-space distances
//!
//! All clustering happens in normalized Web Mercator coordinates: `x` and `y` both lie
//! in `[0, 1]`, `x` growing eastwards and `y` growing southwards (tile convention).
//! Multiplying by [`world_size`] gives pixel coordinates at a zoom level.

use geo::Coord;

/// Maximum latitude that can be represented in Web Mercator
pub const MAX_LATITUDE: f64 = 85.05112878;

/// Longitude bound (both signs)
pub const MAX_LONGITUDE: f64 = 180.0;

/// Side of a slippy-map tile in pixels
pub const TILE_SIZE: f64 = 256.0;

/// Deepest zoom level an index can be built for
pub const MAX_SUPPORTED_ZOOM: u8 = 24;

/// Precomputed constant: 1 / (4 * PI)
const INV_FOUR_PI: f64 = 1.0 / (4.0 * std::f64::consts::PI);

/// Convert a longitude in degrees to normalized Mercator x in `[0, 1]`
#[inline(always)]
pub fn lon_to_x(lon: f64) -> f64 {
    lon / 360.0 + 0.5
}

/// Convert a latitude in degrees to normalized Mercator y in `[0, 1]`
///
/// Latitudes beyond [`MAX_LATITUDE`] are clamped.
#[inline(always)]
pub fn lat_to_y(lat: f64) -> f64 {
    let sin = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians().sin();
    let y = 0.5 - ((1.0 + sin) / (1.0 - sin)).ln() * INV_FOUR_PI;
    y.clamp(0.0, 1.0)
}

/// Convert normalized Mercator x back to longitude in degrees
#[inline(always)]
pub fn x_to_lon(x: f64) -> f64 {
    (x - 0.5) * 360.0
}

/// Convert normalized Mercator y back to latitude in degrees
#[inline(always)]
pub fn y_to_lat(y: f64) -> f64 {
    let y2 = (180.0 - y * 360.0).to_radians();
    360.0 * y2.exp().atan() / std::f64::consts::PI - 90.0
}

/// Project WGS84 (lon, lat) into normalized Mercator coordinates
#[inline(always)]
pub fn project(lon: f64, lat: f64) -> Coord<f64> {
    Coord {
        x: lon_to_x(lon),
        y: lat_to_y(lat),
    }
}

/// Inverse of [`project`], returning (lon, lat)
#[inline(always)]
pub fn unproject(coord: Coord<f64>) -> (f64, f64) {
    (x_to_lon(coord.x), y_to_lat(coord.y))
}

/// Width (and height) of the whole world in pixels at the given zoom
#[inline(always)]
pub fn world_size(zoom: u8) -> f64 {
    TILE_SIZE * (1u64 << zoom) as f64
}

/// Squared distance in pixels between two normalized coordinates at a zoom level
#[inline(always)]
pub fn pixel_distance_sq(a: Coord<f64>, b: Coord<f64>, zoom: u8) -> f64 {
    let scale = world_size(zoom);
    let dx = (a.x - b.x) * scale;
    let dy = (a.y - b.y) * scale;
    dx * dx + dy * dy
}

/// Check that a coordinate pair is finite and inside the Web Mercator domain
#[inline(always)]
pub fn is_valid_wgs84(lon: f64, lat: f64) -> bool {
    lon.is_finite()
        && lat.is_finite()
        && (-MAX_LONGITUDE..=MAX_LONGITUDE).contains(&lon)
        && (-MAX_LATITUDE..=MAX_LATITUDE).contains(&lat)
}
