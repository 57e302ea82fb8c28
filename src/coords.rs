//! ECEF / geodetic / ENU coordinate transforms (§2 Time & Coordinates).
//!
//! Ported from the classical iterative ECEF->geodetic solver used across
//! the GNSS literature (Bowring's method), the same algorithm RTKLIB's
//! `ecef2pos()`/`pos2ecef()` implement.

use nalgebra::{Matrix3, Vector3};

/// WGS84 semi-major axis (m).
pub const WGS84_A: f64 = 6_378_137.0;
/// WGS84 flattening.
pub const WGS84_F: f64 = 1.0 / 298.257_223_563;
/// Earth angular velocity (rad/s), IS-GPS value.
pub const OMEGA_E: f64 = 7.292_115_146_7e-5;
/// Speed of light (m/s).
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

fn wgs84_e2() -> f64 {
    WGS84_F * (2.0 - WGS84_F)
}

/// Converts ECEF (m) to geodetic (lat, lon \[rad\], height \[m\]) using the
/// standard Newton iteration on WGS84. Converges to sub-mm accuracy in a
/// handful of iterations for any Earth-bound point.
pub fn ecef2geodetic(ecef: Vector3<f64>) -> Vector3<f64> {
    let (x, y, z) = (ecef.x, ecef.y, ecef.z);
    let e2 = wgs84_e2();
    let r2 = x * x + y * y;
    let mut v = WGS84_A;
    let mut z_k = z;
    let mut sinp;
    loop {
        let prev_z = z_k;
        sinp = z_k / (r2 + z_k * z_k).sqrt();
        v = WGS84_A / (1.0 - e2 * sinp * sinp).sqrt();
        z_k = z + v * e2 * sinp;
        if (z_k - prev_z).abs() < 1.0e-10 {
            break;
        }
    }
    let lat = if r2 < 1.0e-12 {
        (z.signum()) * std::f64::consts::FRAC_PI_2
    } else {
        z_k.atan2(r2.sqrt())
    };
    let lon = y.atan2(x);
    let height = (r2 + z_k * z_k).sqrt() - v;
    Vector3::new(lat, lon, height)
}

/// Converts geodetic (lat, lon \[rad\], height \[m\]) to ECEF (m).
pub fn geodetic2ecef(geodetic: Vector3<f64>) -> Vector3<f64> {
    let (lat, lon, h) = (geodetic.x, geodetic.y, geodetic.z);
    let e2 = wgs84_e2();
    let sin_lat = lat.sin();
    let cos_lat = lat.cos();
    let v = WGS84_A / (1.0 - e2 * sin_lat * sin_lat).sqrt();
    let x = (v + h) * cos_lat * lon.cos();
    let y = (v + h) * cos_lat * lon.sin();
    let z = (v * (1.0 - e2) + h) * sin_lat;
    Vector3::new(x, y, z)
}

/// Rotation matrix from ECEF-frame difference vectors to local ENU at the
/// given geodetic latitude/longitude (radians).
pub fn ecef2enu_matrix(lat: f64, lon: f64) -> Matrix3<f64> {
    let (sin_lat, cos_lat) = (lat.sin(), lat.cos());
    let (sin_lon, cos_lon) = (lon.sin(), lon.cos());
    Matrix3::new(
        -sin_lon,
        cos_lon,
        0.0,
        -sin_lat * cos_lon,
        -sin_lat * sin_lon,
        cos_lat,
        cos_lat * cos_lon,
        cos_lat * sin_lon,
        sin_lat,
    )
}

/// A receiver or apriori position, carrying both its ECEF and geodetic
/// representation so downstream components never need to re-derive one
/// from the other mid-iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    ecef: Vector3<f64>,
    geodetic: Vector3<f64>,
}

impl Position {
    pub fn from_ecef(ecef: Vector3<f64>) -> Self {
        Self {
            ecef,
            geodetic: ecef2geodetic(ecef),
        }
    }

    pub fn from_geodetic(geodetic: Vector3<f64>) -> Self {
        Self {
            ecef: geodetic2ecef(geodetic),
            geodetic,
        }
    }

    pub fn ecef(&self) -> Vector3<f64> {
        self.ecef
    }

    /// (lat, lon, height) in (rad, rad, m).
    pub fn geodetic(&self) -> Vector3<f64> {
        self.geodetic
    }

    pub fn enu_matrix(&self) -> Matrix3<f64> {
        ecef2enu_matrix(self.geodetic.x, self.geodetic.y)
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::from_ecef(Vector3::zeros())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ecef_geodetic_round_trip() {
        let cases = [
            Vector3::new(4_194_304.0, 171_5112.0, 4_646_891.0),
            Vector3::new(-2_694_043.0, -4_293_325.0, 3_857_958.0),
            Vector3::new(0.0, 0.0, WGS84_A * (1.0 - WGS84_F)),
        ];
        for ecef in cases {
            let geo = ecef2geodetic(ecef);
            let back = geodetic2ecef(geo);
            let delta = (back - ecef).norm();
            assert!(delta < 1.0e-4, "round trip delta {delta} for {ecef:?}");
        }
    }

    #[test]
    fn enu_matrix_is_orthonormal() {
        let m = ecef2enu_matrix(0.5, 1.0);
        let identity = m * m.transpose();
        for i in 0..3 {
            for j in 0..3 {
                let expect = if i == j { 1.0 } else { 0.0 };
                assert!((identity[(i, j)] - expect).abs() < 1.0e-9);
            }
        }
    }
}
