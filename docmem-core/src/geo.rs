//! Geographic coordinate decoding and distance math.
//!
//! The pure pieces of the geospatial machinery live here: coordinate decoding
//! from stored values, geohash encoding, and the planar/spherical distance
//! functions. The stateful geo index that buckets documents by geohash builds
//! on top of these.

use bson::Bson;

use crate::value::as_number;

const GEOHASH_ALPHABET: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Geohash precision used for index bucketing (5 characters, ~5km cells).
pub const GEOHASH_PRECISION: usize = 5;

/// A decoded latitude/longitude pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Decodes a stored value into a coordinate pair.
    ///
    /// Accepts a 2-element numeric array `[lat, lon]` or a subdocument with
    /// `lat`/`lon` keys. Anything else is not a coordinate.
    pub fn from_bson(value: &Bson) -> Option<Self> {
        match value {
            Bson::Array(elements) if elements.len() == 2 => {
                let lat = as_number(&elements[0])?;
                let lon = as_number(&elements[1])?;
                Some(Self::new(lat, lon))
            }
            Bson::Document(doc) => {
                let lat = as_number(doc.get("lat")?)?;
                let lon = as_number(doc.get("lon")?)?;
                Some(Self::new(lat, lon))
            }
            _ => None,
        }
    }

    /// Planar distance `sqrt(dlat^2 + dlon^2)`, with no unit conversion.
    ///
    /// When one axis delta is zero the other delta's magnitude is returned
    /// directly, sidestepping the squaring round-trip.
    pub fn planar_distance(&self, other: &GeoPoint) -> f64 {
        let dlat = self.lat - other.lat;
        let dlon = self.lon - other.lon;

        if dlat == 0.0 {
            return dlon.abs();
        }
        if dlon == 0.0 {
            return dlat.abs();
        }

        (dlat * dlat + dlon * dlon).sqrt()
    }

    /// Great-circle distance on the unit sphere, in radians.
    ///
    /// Uses the spherical law of cosines; multiply by the Earth's radius to
    /// obtain meters.
    pub fn spherical_distance(&self, other: &GeoPoint) -> f64 {
        let lat_a = self.lat.to_radians();
        let lat_b = other.lat.to_radians();
        let dlon = (self.lon - other.lon).to_radians();

        let cosine = lat_a.sin() * lat_b.sin() + lat_a.cos() * lat_b.cos() * dlon.cos();

        // Clamp against floating point drift before acos.
        cosine.clamp(-1.0, 1.0).acos()
    }

    /// Encodes this point as a geohash string of the given precision.
    pub fn geohash(&self, precision: usize) -> String {
        let mut lat_range = (-90.0_f64, 90.0_f64);
        let mut lon_range = (-180.0_f64, 180.0_f64);
        let mut hash = String::with_capacity(precision);
        let mut bits = 0u8;
        let mut bit_count = 0u8;
        let mut even_bit = true;

        while hash.len() < precision {
            if even_bit {
                let mid = (lon_range.0 + lon_range.1) / 2.0;
                if self.lon >= mid {
                    bits = (bits << 1) | 1;
                    lon_range.0 = mid;
                } else {
                    bits <<= 1;
                    lon_range.1 = mid;
                }
            } else {
                let mid = (lat_range.0 + lat_range.1) / 2.0;
                if self.lat >= mid {
                    bits = (bits << 1) | 1;
                    lat_range.0 = mid;
                } else {
                    bits <<= 1;
                    lat_range.1 = mid;
                }
            }

            even_bit = !even_bit;
            bit_count += 1;

            if bit_count == 5 {
                hash.push(GEOHASH_ALPHABET[bits as usize] as char);
                bits = 0;
                bit_count = 0;
            }
        }

        hash
    }
}
