//! Line-of-sight geometry, DOP, and the Sagnac-corrected geometric range
//! (§4.3).

use nalgebra::{DMatrix, Vector3};
use thiserror::Error;

use crate::coords::{ecef2enu_matrix, OMEGA_E, SPEED_OF_LIGHT};

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum Error {
    #[error("fewer than {required} usable satellites ({available} available)")]
    InsufficientSatellites { required: usize, available: usize },
    #[error("GDOP {0} exceeds the rejection threshold")]
    GdopExceeded(f64),
    #[error("geometry matrix is singular or ill-conditioned")]
    IllConditioned,
}

/// Maximum tolerated GDOP before a solution is rejected outright (§4.3,
/// §7).
pub const MAX_GDOP: f64 = 30.0;

/// Line-of-sight unit vector and elevation/azimuth for one satellite as
/// seen from a receiver position (§4.3).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineOfSight {
    pub unit_vector_ecef: Vector3<f64>,
    pub elevation_rad: f64,
    pub azimuth_rad: f64,
    pub range_m: f64,
}

/// Computes the receiver-to-satellite line of sight, elevation, and
/// azimuth, given receiver position and its ENU rotation matrix (§4.3).
pub fn line_of_sight(
    receiver_ecef: Vector3<f64>,
    receiver_lat_rad: f64,
    receiver_lon_rad: f64,
    satellite_ecef: Vector3<f64>,
) -> LineOfSight {
    let delta = satellite_ecef - receiver_ecef;
    let range_m = delta.norm();
    let unit_vector_ecef = delta / range_m;

    let enu_rot = ecef2enu_matrix(receiver_lat_rad, receiver_lon_rad);
    let enu = enu_rot * delta;
    let horiz = (enu.x * enu.x + enu.y * enu.y).sqrt();
    let elevation_rad = enu.z.atan2(horiz);
    let azimuth_rad = enu.x.atan2(enu.y).rem_euclid(2.0 * std::f64::consts::PI);

    LineOfSight {
        unit_vector_ecef,
        elevation_rad,
        azimuth_rad,
        range_m,
    }
}

/// Geometric range corrected for Earth rotation during signal flight time
/// (Sagnac effect), per §4.3. `satellite_ecef` must be the satellite
/// position at transmission time (ECI-consistent with the receiver's ECEF
/// frame at reception time).
pub fn sagnac_corrected_range(receiver_ecef: Vector3<f64>, satellite_ecef: Vector3<f64>) -> f64 {
    let geometric = (satellite_ecef - receiver_ecef).norm();
    let correction =
        OMEGA_E * (satellite_ecef.x * receiver_ecef.y - satellite_ecef.y * receiver_ecef.x)
            / SPEED_OF_LIGHT;
    geometric + correction
}

/// Dilution-of-precision figures derived from the design/geometry matrix
/// `H` (one row per satellite: \[ENU line-of-sight, 1\]) (§4.3).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dop {
    pub gdop: f64,
    pub pdop: f64,
    pub hdop: f64,
    pub vdop: f64,
}

/// Computes DOP from a set of ENU-frame unit line-of-sight vectors,
/// rejecting configurations with fewer than 4 satellites or an
/// ill-conditioned geometry matrix (§4.3, §7).
pub fn compute_dop(enu_unit_vectors: &[Vector3<f64>]) -> Result<Dop, Error> {
    if enu_unit_vectors.len() < 4 {
        return Err(Error::InsufficientSatellites {
            required: 4,
            available: enu_unit_vectors.len(),
        });
    }

    let n = enu_unit_vectors.len();
    let mut h = DMatrix::<f64>::zeros(n, 4);
    for (row, los) in enu_unit_vectors.iter().enumerate() {
        h[(row, 0)] = los.x;
        h[(row, 1)] = los.y;
        h[(row, 2)] = los.z;
        h[(row, 3)] = 1.0;
    }

    let hth = h.transpose() * &h;
    let inv = hth.try_inverse().ok_or(Error::IllConditioned)?;

    let gdop = inv.trace().max(0.0).sqrt();
    let pdop = (inv[(0, 0)] + inv[(1, 1)] + inv[(2, 2)]).max(0.0).sqrt();
    let hdop = (inv[(0, 0)] + inv[(1, 1)]).max(0.0).sqrt();
    let vdop = inv[(2, 2)].max(0.0).sqrt();

    if gdop > MAX_GDOP || !gdop.is_finite() {
        return Err(Error::GdopExceeded(gdop));
    }

    Ok(Dop {
        gdop,
        pdop,
        hdop,
        vdop,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn overhead_satellite_has_elevation_near_90() {
        let receiver = Vector3::new(crate::coords::WGS84_A, 0.0, 0.0);
        let satellite = Vector3::new(crate::coords::WGS84_A + 20_000_000.0, 0.0, 0.0);
        let los = line_of_sight(receiver, 0.0, 0.0, satellite);
        assert!((los.elevation_rad - FRAC_PI_2).abs() < 1.0e-6);
    }

    #[test]
    fn dop_requires_four_satellites() {
        let vecs = vec![Vector3::new(0.0, 0.0, 1.0); 3];
        assert_eq!(
            compute_dop(&vecs),
            Err(Error::InsufficientSatellites {
                required: 4,
                available: 3
            })
        );
    }

    #[test]
    fn well_spread_geometry_yields_reasonable_dop() {
        let vecs = vec![
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(0.87, 0.0, 0.5),
            Vector3::new(-0.43, 0.75, 0.5),
            Vector3::new(-0.43, -0.75, 0.5),
        ];
        let dop = compute_dop(&vecs).expect("well conditioned");
        assert!(dop.gdop < 10.0, "gdop {}", dop.gdop);
        assert!(dop.pdop > 0.0 && dop.hdop > 0.0 && dop.vdop > 0.0);
    }

    #[test]
    fn degenerate_geometry_is_rejected() {
        let vecs = vec![Vector3::new(0.0, 0.0, 1.0); 4];
        assert_eq!(compute_dop(&vecs), Err(Error::IllConditioned));
    }
}
