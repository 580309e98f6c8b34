//! Geographic helpers: coordinate parsing, great-circle distance and
//! geohash cells used to pick nearby relays.

use crate::envelope::Payload;
use crate::error::{DomainError, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const EARTH_RADIUS_M: f64 = 6_371_000.0;
const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Precision used for relay routing tags.
pub const RELAY_GEOHASH_PRECISION: usize = 5;

/// Why a payload's coordinates could not be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CoordinateError {
    #[error("coordinates missing")]
    Missing,

    #[error("coordinates malformed")]
    Malformed,

    #[error("coordinates out of range")]
    OutOfRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    /// Bounded constructor: latitude in [-90, 90], longitude in [-180, 180].
    pub fn new(lat: f64, lon: f64) -> std::result::Result<Self, CoordinateError> {
        if !lat.is_finite() || !lon.is_finite() {
            return Err(CoordinateError::Malformed);
        }
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(CoordinateError::OutOfRange);
        }
        Ok(Self { lat, lon })
    }

    /// Read `lat`/`lon` from a payload.
    ///
    /// Returns `Ok(None)` when neither field is present. One field without
    /// the other is `Missing`.
    pub fn from_payload(payload: &Payload) -> std::result::Result<Option<Self>, CoordinateError> {
        match (payload.get("lat"), payload.get("lon")) {
            (None, None) => Ok(None),
            (Some(lat), Some(lon)) => {
                let lat: f64 = lat.trim().parse().map_err(|_| CoordinateError::Malformed)?;
                let lon: f64 = lon.trim().parse().map_err(|_| CoordinateError::Malformed)?;
                Coordinates::new(lat, lon).map(Some)
            }
            _ => Err(CoordinateError::Missing),
        }
    }

    /// Haversine distance in meters.
    pub fn distance_m(&self, other: &Coordinates) -> f64 {
        let d_lat = (other.lat - self.lat).to_radians();
        let d_lon = (other.lon - self.lon).to_radians();
        let a = (d_lat / 2.0).sin().powi(2)
            + self.lat.to_radians().cos() * other.lat.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().min(1.0).asin()
    }

    pub fn geohash(&self, precision: usize) -> String {
        encode(*self, precision)
    }
}

/// Encode coordinates as a geohash of `precision` characters.
pub fn encode(coords: Coordinates, precision: usize) -> String {
    let mut lat_range = (-90.0f64, 90.0f64);
    let mut lon_range = (-180.0f64, 180.0f64);
    let mut hash = String::with_capacity(precision);
    let mut even = true;
    let mut bit = 0;
    let mut ch = 0usize;

    while hash.len() < precision {
        let (range, value) = if even {
            (&mut lon_range, coords.lon)
        } else {
            (&mut lat_range, coords.lat)
        };
        let mid = (range.0 + range.1) / 2.0;
        if value >= mid {
            ch = (ch << 1) | 1;
            range.0 = mid;
        } else {
            ch <<= 1;
            range.1 = mid;
        }
        even = !even;
        bit += 1;
        if bit == 5 {
            hash.push(BASE32[ch] as char);
            bit = 0;
            ch = 0;
        }
    }
    hash
}

/// Decode a geohash to the center of its cell.
pub fn decode(hash: &str) -> Result<Coordinates> {
    if hash.is_empty() {
        return Err(DomainError::InvalidGeohash(hash.to_string()));
    }
    let mut lat_range = (-90.0f64, 90.0f64);
    let mut lon_range = (-180.0f64, 180.0f64);
    let mut even = true;

    for c in hash.bytes() {
        let index = BASE32
            .iter()
            .position(|b| *b == c.to_ascii_lowercase())
            .ok_or_else(|| DomainError::InvalidGeohash(hash.to_string()))?;
        for shift in (0..5).rev() {
            let range = if even { &mut lon_range } else { &mut lat_range };
            let mid = (range.0 + range.1) / 2.0;
            if (index >> shift) & 1 == 1 {
                range.0 = mid;
            } else {
                range.1 = mid;
            }
            even = !even;
        }
    }

    Ok(Coordinates {
        lat: (lat_range.0 + lat_range.1) / 2.0,
        lon: (lon_range.0 + lon_range.1) / 2.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(pairs: &[(&str, &str)]) -> Payload {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_known_geohash() {
        // Widely published reference point near Aalborg, Denmark
        let coords = Coordinates::new(57.64911, 10.40744).unwrap();
        assert_eq!(encode(coords, 11), "u4pruydqqvj");
        assert_eq!(coords.geohash(RELAY_GEOHASH_PRECISION), "u4pru");
    }

    #[test]
    fn test_decode_lands_inside_cell() {
        let center = decode("u4pru").unwrap();
        assert_eq!(encode(center, 5), "u4pru");
        assert!((center.lat - 57.63).abs() < 0.05);
        assert!((center.lon - 10.39).abs() < 0.05);
        assert!(decode("u4pa!").is_err());
        assert!(decode("").is_err());
    }

    #[test]
    fn test_distance() {
        let sf = Coordinates::new(37.7749, -122.4194).unwrap();
        let la = Coordinates::new(34.0522, -118.2437).unwrap();
        let d = sf.distance_m(&la);
        assert!((d - 559_000.0).abs() < 5_000.0, "distance was {d}");
        assert_eq!(sf.distance_m(&sf), 0.0);
    }

    #[test]
    fn test_from_payload() {
        assert_eq!(Coordinates::from_payload(&payload(&[])), Ok(None));
        assert_eq!(
            Coordinates::from_payload(&payload(&[("lat", "45.5"), ("lon", "-122.6")])),
            Ok(Some(Coordinates {
                lat: 45.5,
                lon: -122.6
            }))
        );
        assert_eq!(
            Coordinates::from_payload(&payload(&[("lat", "45.5")])),
            Err(CoordinateError::Missing)
        );
        assert_eq!(
            Coordinates::from_payload(&payload(&[("lat", "north"), ("lon", "1")])),
            Err(CoordinateError::Malformed)
        );
        assert_eq!(
            Coordinates::from_payload(&payload(&[("lat", "91"), ("lon", "1")])),
            Err(CoordinateError::OutOfRange)
        );
        assert_eq!(
            Coordinates::from_payload(&payload(&[("lat", "NaN"), ("lon", "1")])),
            Err(CoordinateError::Malformed)
        );
    }
}
