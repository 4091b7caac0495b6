//! Geodesy helpers
//!
//! Positions are WGS84 degrees, distances metres, speeds m/s and courses
//! degrees clockwise from true north. Short-range geometry (CPA, gate
//! crossing, point-in-polygon) uses a flat local projection around a
//! reference point; distances use the haversine formula.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Conversion constants
pub const METERS_PER_DEGREE_LATITUDE: f64 = 60.0 * 1852.0; // 60 nautical miles
pub const NAUTICAL_MILE: f64 = 1852.0;
pub const KN_TO_MS: f64 = NAUTICAL_MILE / 3600.0;
pub const MS_TO_KN: f64 = 3600.0 / NAUTICAL_MILE;

/// Earth radius consistent with one minute of latitude being one nautical mile
pub const EARTH_RADIUS_METRES: f64 = METERS_PER_DEGREE_LATITUDE * 180.0 / PI;

/// Calculate meters per degree longitude at a given latitude
#[inline]
pub fn meters_per_degree_longitude(lat_deg: f64) -> f64 {
    METERS_PER_DEGREE_LATITUDE * lat_deg.to_radians().cos()
}

/// Normalize bearing to 0-360 range
pub fn normalize_bearing(bearing: f64) -> f64 {
    let mut b = bearing % 360.0;
    if b < 0.0 {
        b += 360.0;
    }
    b
}

/// Smallest angle between two bearings, 0-180 degrees
pub fn bearing_difference(a: f64, b: f64) -> f64 {
    let d = normalize_bearing(a - b);
    if d > 180.0 {
        360.0 - d
    } else {
        d
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatLong {
    pub lat: f64,
    pub lon: f64,
}

impl LatLong {
    pub fn new(lat: f64, lon: f64) -> Self {
        LatLong { lat, lon }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }

    /// Great-circle distance in metres
    pub fn distance_to(&self, other: &LatLong) -> f64 {
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let dlat = lat2 - lat1;
        let dlon = (other.lon - self.lon).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_METRES * a.sqrt().asin()
    }

    /// Initial great-circle bearing to `other`, 0-360 degrees
    pub fn bearing_to(&self, other: &LatLong) -> f64 {
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let dlon = (other.lon - self.lon).to_radians();
        let y = dlon.sin() * lat2.cos();
        let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
        normalize_bearing(y.atan2(x).to_degrees())
    }

    /// Offset of this position from `origin` as (east, north) metres in the
    /// local flat projection centred on `origin`.
    pub fn local_offset_from(&self, origin: &LatLong) -> (f64, f64) {
        let mut dlon = self.lon - origin.lon;
        if dlon > 180.0 {
            dlon -= 360.0;
        } else if dlon < -180.0 {
            dlon += 360.0;
        }
        let east = dlon * meters_per_degree_longitude(origin.lat);
        let north = (self.lat - origin.lat) * METERS_PER_DEGREE_LATITUDE;
        (east, north)
    }

    /// Inverse of [`LatLong::local_offset_from`]
    pub fn offset_by(&self, east: f64, north: f64) -> LatLong {
        let m_lon = meters_per_degree_longitude(self.lat);
        let lon = if m_lon.abs() > f64::EPSILON {
            self.lon + east / m_lon
        } else {
            self.lon
        };
        LatLong {
            lat: self.lat + north / METERS_PER_DEGREE_LATITUDE,
            lon,
        }
    }

    /// Position after travelling `metres` along `bearing`
    pub fn destination(&self, bearing: f64, metres: f64) -> LatLong {
        let b = bearing.to_radians();
        self.offset_by(metres * b.sin(), metres * b.cos())
    }
}

/// Speed and course, convertible to an (east, north) velocity vector
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Velocity {
    pub speed_mps: f64,
    pub course_degs: f64,
}

impl Velocity {
    pub fn new(speed_mps: f64, course_degs: f64) -> Self {
        Velocity {
            speed_mps,
            course_degs,
        }
    }

    /// (east, north) components in m/s
    pub fn components(&self) -> (f64, f64) {
        let c = self.course_degs.to_radians();
        (self.speed_mps * c.sin(), self.speed_mps * c.cos())
    }

    pub fn from_components(east: f64, north: f64) -> Self {
        let speed_mps = (east * east + north * north).sqrt();
        let course_degs = normalize_bearing(east.atan2(north).to_degrees());
        Velocity {
            speed_mps,
            course_degs,
        }
    }
}
