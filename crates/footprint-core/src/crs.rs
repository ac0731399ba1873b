//! Coordinate reference systems and reprojection.
//! All coordinate math uses f64.
//!
//! Three systems are supported, all on a spherical earth:
//!   - `Wgs84`: geographic lon/lat degrees (EPSG:4326).
//!   - `EqualArea`: Lambert cylindrical equal-area, standard parallel 30°,
//!     metres (EPSG:6933 layout). Buffers are stored and measured here.
//!   - `WebMercator`: spherical Mercator, metres (EPSG:3857).
//!
//! None of the projected grids is conformal and equal-area at once, so
//! ground-metre geometry (shifts, buffer radii) is laid out with
//! `offset_lonlat` in a local azimuthal equidistant frame and only then
//! projected.

use std::fmt;
use std::str::FromStr;

use geo::{Area, Coord, MapCoords};
use serde::{Deserialize, Serialize};

/// Authalic sphere radius of WGS84, so that cylindrical equal-area areas are exact.
const AUTHALIC_RADIUS_M: f64 = 6_371_007.181;
/// Standard parallel of the equal-area grid.
const STANDARD_PARALLEL_DEG: f64 = 30.0;
const WEB_MERCATOR_RADIUS_M: f64 = 6_378_137.0;
/// Latitude limit of the square Web Mercator world.
const MERCATOR_MAX_LAT: f64 = 85.051_128_779_806_59;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Crs {
    Wgs84,
    EqualArea,
    WebMercator,
}

impl Crs {
    pub fn epsg(self) -> u32 {
        match self {
            Crs::Wgs84 => 4326,
            Crs::EqualArea => 6933,
            Crs::WebMercator => 3857,
        }
    }

    pub fn is_geographic(self) -> bool {
        matches!(self, Crs::Wgs84)
    }

    /// Project geographic (lon, lat) degrees into this system.
    pub fn project(self, lon: f64, lat: f64) -> Coord<f64> {
        match self {
            Crs::Wgs84 => Coord { x: lon, y: lat },
            Crs::EqualArea => {
                let cos_s = STANDARD_PARALLEL_DEG.to_radians().cos();
                Coord {
                    x: AUTHALIC_RADIUS_M * lon.to_radians() * cos_s,
                    y: AUTHALIC_RADIUS_M * lat.to_radians().sin() / cos_s,
                }
            }
            Crs::WebMercator => {
                let lat = lat.clamp(-MERCATOR_MAX_LAT, MERCATOR_MAX_LAT).to_radians();
                Coord {
                    x: WEB_MERCATOR_RADIUS_M * lon.to_radians(),
                    y: WEB_MERCATOR_RADIUS_M * (std::f64::consts::FRAC_PI_4 + lat / 2.0).tan().ln(),
                }
            }
        }
    }

    /// Inverse of [`Crs::project`]: returns (lon, lat) degrees.
    pub fn unproject(self, c: Coord<f64>) -> (f64, f64) {
        match self {
            Crs::Wgs84 => (c.x, c.y),
            Crs::EqualArea => {
                let cos_s = STANDARD_PARALLEL_DEG.to_radians().cos();
                let lon = (c.x / (AUTHALIC_RADIUS_M * cos_s)).to_degrees();
                let sin_lat = (c.y * cos_s / AUTHALIC_RADIUS_M).clamp(-1.0, 1.0);
                (lon, sin_lat.asin().to_degrees())
            }
            Crs::WebMercator => {
                let lon = (c.x / WEB_MERCATOR_RADIUS_M).to_degrees();
                let lat = (2.0 * (c.y / WEB_MERCATOR_RADIUS_M).exp().atan()
                    - std::f64::consts::FRAC_PI_2)
                    .to_degrees();
                (lon, lat)
            }
        }
    }

    /// Move a coordinate from `self` into `to`.
    #[inline]
    pub fn transform(self, c: Coord<f64>, to: Crs) -> Coord<f64> {
        if self == to {
            return c;
        }
        let (lon, lat) = self.unproject(c);
        to.project(lon, lat)
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

impl FromStr for Crs {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_ascii_lowercase();
        match norm.trim_start_matches("epsg:") {
            "4326" | "wgs84" => Ok(Crs::Wgs84),
            "6933" | "equal-area" | "equalarea" => Ok(Crs::EqualArea),
            "3857" | "web-mercator" | "webmercator" => Ok(Crs::WebMercator),
            _ => Err(format!("unsupported CRS `{s}` (expected EPSG:4326, EPSG:6933 or EPSG:3857)")),
        }
    }
}

/// Point reached from (lon, lat) by moving `east_m` east and `north_m`
/// north in the site's local azimuthal equidistant frame on the authalic
/// sphere. Distance and bearing from the origin are preserved exactly.
pub fn offset_lonlat(lon: f64, lat: f64, east_m: f64, north_m: f64) -> (f64, f64) {
    let dist = east_m.hypot(north_m);
    if dist == 0.0 {
        return (lon, lat);
    }
    let c = dist / AUTHALIC_RADIUS_M;
    let bearing = east_m.atan2(north_m);
    let (phi0, lam0) = (lat.to_radians(), lon.to_radians());
    let sin_phi = (phi0.sin() * c.cos() + phi0.cos() * c.sin() * bearing.cos()).clamp(-1.0, 1.0);
    let phi = sin_phi.asin();
    let lam = lam0 + (bearing.sin() * c.sin() * phi0.cos()).atan2(c.cos() - phi0.sin() * sin_phi);
    let lon_deg = (lam.to_degrees() + 540.0).rem_euclid(360.0) - 180.0;
    (lon_deg, phi.to_degrees())
}

/// Great-circle distance in metres on the authalic sphere (haversine).
pub fn ground_distance_m(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    let (p1, p2) = (lat1.to_radians(), lat2.to_radians());
    let dp = p2 - p1;
    let dl = (lon2 - lon1).to_radians();
    let h = (dp / 2.0).sin().powi(2) + p1.cos() * p2.cos() * (dl / 2.0).sin().powi(2);
    2.0 * AUTHALIC_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Reproject any geo geometry between systems. A no-op clone when they match.
pub fn reproject<G>(geom: &G, from: Crs, to: Crs) -> G
where
    G: MapCoords<f64, f64, Output = G> + Clone,
{
    if from == to {
        return geom.clone();
    }
    geom.map_coords(|c| from.transform(c, to))
}

/// Planar area in km², measured on the equal-area grid.
pub fn area_km2<G>(geom: &G, crs: Crs) -> f64
where
    G: Area<f64> + MapCoords<f64, f64, Output = G> + Clone,
{
    let m2 = if crs == Crs::EqualArea {
        geom.unsigned_area()
    } else {
        reproject(geom, crs, Crs::EqualArea).unsigned_area()
    };
    m2 / 1e6
}
