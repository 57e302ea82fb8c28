//! Broadcast (Klobuchar) ionospheric delay model (§4.2).
//!
//! Single-frequency ionospheric correction using the eight broadcast
//! alpha/beta coefficients, evaluated at the ionospheric pierce point
//! (350 km shell height), per IS-GPS-200 20.3.3.5.2.5.

use super::{inflate_low_elevation_variance, AtmosphereDelay};
use crate::coords::SPEED_OF_LIGHT;

/// Broadcast Klobuchar coefficients, GPS navigation message subframe 4
/// page 18 (alpha0..3, beta0..3).
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct KlobucharCoefficients {
    pub alpha: [f64; 4],
    pub beta: [f64; 4],
}

/// Earth-centered angle (semicircles) from user to the ionospheric pierce
/// point, at 350 km shell height.
fn earth_centered_angle(elevation_semicircles: f64) -> f64 {
    0.0137 / (elevation_semicircles + 0.11) - 0.022
}

/// Computes the L1 slant ionospheric delay (meters) at the given user
/// geodetic position and line-of-sight elevation/azimuth, per the
/// Klobuchar broadcast model. Returns delay along with a fixed model
/// variance, inflated below 5 degrees elevation (§4.2).
pub fn klobuchar_delay_m(
    coeffs: &KlobucharCoefficients,
    lat_rad: f64,
    lon_rad: f64,
    elevation_rad: f64,
    azimuth_rad: f64,
    gps_tow_s: f64,
) -> AtmosphereDelay {
    let el = elevation_rad / std::f64::consts::PI;
    let az = azimuth_rad;
    let lat = lat_rad / std::f64::consts::PI;
    let lon = lon_rad / std::f64::consts::PI;

    let psi = earth_centered_angle(el);

    let mut phi_i = lat + psi * az.cos();
    phi_i = phi_i.clamp(-0.416, 0.416);

    let mut lambda_i = lon + psi * az.sin() / (phi_i * std::f64::consts::PI).cos();

    let phi_m = phi_i + 0.064 * ((lambda_i - 1.617) * std::f64::consts::PI).cos();

    let mut t = 43_200.0 * lambda_i + gps_tow_s;
    t -= (t / 86_400.0).floor() * 86_400.0;
    lambda_i %= 2.0;

    let amplitude = poly4(&coeffs.alpha, phi_m).max(0.0);
    let period = poly4(&coeffs.beta, phi_m).max(72_000.0);

    let x = 2.0 * std::f64::consts::PI * (t - 50_400.0) / period;

    let obliquity = 1.0 + 16.0 * (0.53 - el).powi(3);

    let delay_s = if x.abs() < 1.571 {
        obliquity * (5.0e-9 + amplitude * (1.0 - x * x / 2.0 + x.powi(4) / 24.0))
    } else {
        obliquity * 5.0e-9
    };

    AtmosphereDelay {
        delay_m: delay_s * SPEED_OF_LIGHT,
        variance_m2: inflate_low_elevation_variance(klobuchar_model_variance(), elevation_rad),
    }
}

fn poly4(coeffs: &[f64; 4], x: f64) -> f64 {
    coeffs[0] + x * (coeffs[1] + x * (coeffs[2] + x * coeffs[3]))
}

/// Residual error after applying the broadcast model, per the commonly
/// cited ~50% RMS reduction figure for the Klobuchar model (ICD / GPS SPS
/// performance standard).
fn klobuchar_model_variance() -> f64 {
    (5.0_f64).powi(2)
}
