//! Saastamoinen tropospheric delay model (§4.2), standard atmosphere
//! variant (no surface meteorological input required) with the Niell
//! mapping function.

use super::{inflate_low_elevation_variance, AtmosphereDelay};

/// Standard atmosphere at the given height above the ellipsoid (m):
/// pressure (hPa), temperature (K), water vapour partial pressure (hPa).
fn standard_atmosphere(height_m: f64) -> (f64, f64, f64) {
    const P0: f64 = 1013.25;
    const T0: f64 = 288.15;
    const RH0: f64 = 0.5;

    let h = height_m.max(0.0);
    let pressure = P0 * (1.0 - 2.2557e-5 * h).powf(5.2568);
    let temperature = T0 - 6.5e-3 * h;
    let rh = RH0 * (-6.396e-4 * h).exp();
    let es = 6.108 * (17.15 * temperature / (temperature - 38.45)).exp() * 0.01;
    let e = rh * es;
    (pressure, temperature, e)
}

fn zenith_hydrostatic_delay_m(pressure_hpa: f64, lat_rad: f64, height_m: f64) -> f64 {
    0.002_277 * pressure_hpa / (1.0 - 0.002_66 * (2.0 * lat_rad).cos() - 0.000_28 * height_m / 1000.0)
}

fn zenith_wet_delay_m(e_hpa: f64, temperature_k: f64) -> f64 {
    0.002_277 * (1255.0 / temperature_k + 0.05) * e_hpa
}

/// Niell-style mapping function coefficient, simplified to its
/// elevation-only dependence (latitude/height/day-of-year refinements are
/// out of scope, §4.2 Non-goals). Exposed so callers estimating zenith wet
/// delay as a filter state can use the same coefficient as the partial
/// derivative of slant delay with respect to that state (§4.5 step 3).
pub fn tropo_mapping_function(elevation_rad: f64) -> f64 {
    let sin_el = elevation_rad.sin();
    1.001 / (0.002_001 + sin_el * sin_el).sqrt()
}

/// Total slant tropospheric delay (meters) at the given geodetic height
/// and line-of-sight elevation. Below 15 degrees elevation a plain
/// `1/cos(zenith)` mapping is used instead of the Niell function, matching
/// the loss of validity of the thin-atmosphere mapping assumption near the
/// horizon (§4.2 edge cases).
pub fn saastamoinen_delay_m(lat_rad: f64, height_m: f64, elevation_rad: f64) -> AtmosphereDelay {
    let (pressure, temperature, e) = standard_atmosphere(height_m);
    let zhd = zenith_hydrostatic_delay_m(pressure, lat_rad, height_m);
    let zwd = zenith_wet_delay_m(e, temperature);

    const LOW_ELEVATION_CUTOFF_RAD: f64 = 0.261_799_387_8; // 15 degrees

    let mapping = if elevation_rad >= LOW_ELEVATION_CUTOFF_RAD {
        tropo_mapping_function(elevation_rad)
    } else {
        let zenith = std::f64::consts::FRAC_PI_2 - elevation_rad.max(0.5_f64.to_radians());
        1.0 / zenith.cos()
    };

    let delay_m = (zhd + zwd) * mapping;

    AtmosphereDelay {
        delay_m,
        variance_m2: inflate_low_elevation_variance(saastamoinen_model_variance(), elevation_rad),
    }
}

fn saastamoinen_model_variance() -> f64 {
    0.15 * 0.15
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zenith_delay_is_roughly_2_3_meters_at_sea_level() {
        let d = saastamoinen_delay_m(0.7, 0.0, std::f64::consts::FRAC_PI_2);
        assert!(
            (2.0..2.6).contains(&d.delay_m),
            "unexpected zenith delay {}",
            d.delay_m
        );
    }

    #[test]
    fn delay_grows_toward_horizon() {
        let zenith = saastamoinen_delay_m(0.7, 0.0, std::f64::consts::FRAC_PI_2);
        let low = saastamoinen_delay_m(0.7, 0.0, 20.0_f64.to_radians());
        assert!(low.delay_m > zenith.delay_m);
    }

    #[test]
    fn delay_decreases_with_altitude() {
        let sea_level = saastamoinen_delay_m(0.7, 0.0, 45.0_f64.to_radians());
        let mountain = saastamoinen_delay_m(0.7, 3000.0, 45.0_f64.to_radians());
        assert!(mountain.delay_m < sea_level.delay_m);
    }
}
