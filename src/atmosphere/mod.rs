//! Atmospheric delay models (§4.2): broadcast Klobuchar ionosphere and
//! Saastamoinen troposphere, each returning a (delay, variance) pair so the
//! weighting stage never has to special-case "no model available".

mod klobuchar;
mod saastamoinen;

pub use klobuchar::{klobuchar_delay_m, KlobucharCoefficients};
pub use saastamoinen::{saastamoinen_delay_m, tropo_mapping_function};

/// A modeled delay along the line of sight, in meters, with an associated
/// variance (m^2) reflecting the model's own uncertainty (§4.2).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AtmosphereDelay {
    pub delay_m: f64,
    pub variance_m2: f64,
}

/// Elevation (radians) below which atmosphere model variance is inflated,
/// reflecting the rapidly degrading mapping-function accuracy near the
/// horizon (§4.2 edge cases).
pub const LOW_ELEVATION_THRESHOLD_RAD: f64 = 5.0_f64.to_radians();

pub(crate) fn inflate_low_elevation_variance(base_variance_m2: f64, elevation_rad: f64) -> f64 {
    if elevation_rad < LOW_ELEVATION_THRESHOLD_RAD {
        base_variance_m2.max(0.3 * 0.3)
    } else {
        base_variance_m2
    }
}
