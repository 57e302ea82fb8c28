//! GLONASS broadcast ephemeris: position/velocity/acceleration state
//! vector integrated forward with a fixed-step RK4 (§4.1).
//!
//! Unlike the Keplerian systems, GLONASS broadcasts osculating state
//! (position, velocity, lunisolar acceleration) at `toe` rather than orbital
//! elements; propagation is numerical integration of the equations of
//! motion, not a closed-form solution.

use gnss::prelude::SV;
use hifitime::{Duration, Epoch};
use nalgebra::Vector3;

use super::{Error, SatelliteState};

extern crate gnss_rs as gnss;

/// Earth gravitational constant for PZ-90 (m^3/s^2).
const GM: f64 = 3.986_004_4e14;
/// Equatorial radius of the PZ-90 ellipsoid (m).
const AE: f64 = 6_378_136.0;
/// Second zonal harmonic.
const J2: f64 = 1.082_625_75e-3;
/// Earth angular velocity (rad/s).
const OMEGA_E: f64 = 7.292_115_0e-5;
/// RK4 fixed step (s), per §4.1.
const RK4_STEP_S: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlonassEphemeris {
    pub sv: SV,
    pub toe: Epoch,
    /// Position at toe, PZ-90 ECEF (m).
    pub pos: Vector3<f64>,
    /// Velocity at toe (m/s).
    pub vel: Vector3<f64>,
    /// Lunisolar gravitational acceleration at toe (m/s^2), held constant
    /// over the integration interval (§4.1).
    pub lunisolar_accel: Vector3<f64>,
    /// Clock bias (-tau_n) and relative frequency bias (+gamma_n).
    pub tau_n: f64,
    pub gamma_n: f64,
    pub freq_channel: i8,
    pub health: u8,
}

/// Equations of motion for the combined state (position, velocity),
/// including Earth oblateness (J2) and centrifugal/Coriolis terms from
/// the rotating PZ-90 frame, plus the constant lunisolar perturbation.
fn acceleration(pos: Vector3<f64>, vel: Vector3<f64>, lunisolar: Vector3<f64>) -> Vector3<f64> {
    let r = pos.norm();
    let r2 = r * r;
    let x_r = pos.x / r;
    let y_r = pos.y / r;
    let z_r = pos.z / r;
    let ae_r = AE / r;

    let common = -GM / r2 * (1.0 + 1.5 * J2 * ae_r * ae_r * (1.0 - 5.0 * z_r * z_r));

    let ax = common * x_r + OMEGA_E * OMEGA_E * pos.x + 2.0 * OMEGA_E * vel.y + lunisolar.x;
    let ay = common * y_r + OMEGA_E * OMEGA_E * pos.y - 2.0 * OMEGA_E * vel.x + lunisolar.y;
    let az = (-GM / r2 * (1.0 + 1.5 * J2 * ae_r * ae_r * (3.0 - 5.0 * z_r * z_r))) * z_r
        + lunisolar.z;

    Vector3::new(ax, ay, az)
}

fn rk4_step(
    pos: Vector3<f64>,
    vel: Vector3<f64>,
    lunisolar: Vector3<f64>,
    h: f64,
) -> (Vector3<f64>, Vector3<f64>) {
    let deriv = |p: Vector3<f64>, v: Vector3<f64>| (v, acceleration(p, v, lunisolar));

    let (k1_p, k1_v) = deriv(pos, vel);
    let (k2_p, k2_v) = deriv(pos + k1_p * (h / 2.0), vel + k1_v * (h / 2.0));
    let (k3_p, k3_v) = deriv(pos + k2_p * (h / 2.0), vel + k2_v * (h / 2.0));
    let (k4_p, k4_v) = deriv(pos + k3_p * h, vel + k3_v * h);

    let pos_next = pos + (k1_p + 2.0 * k2_p + 2.0 * k3_p + k4_p) * (h / 6.0);
    let vel_next = vel + (k1_v + 2.0 * k2_v + 2.0 * k3_v + k4_v) * (h / 6.0);
    (pos_next, vel_next)
}

impl GlonassEphemeris {
    /// Integrates the state from `toe` to `t` in fixed `RK4_STEP_S` steps,
    /// with a final short step covering the remainder (§4.1).
    fn orbit_at(&self, t: Epoch) -> (Vector3<f64>, Vector3<f64>) {
        let total = (t - self.toe).to_seconds();
        let direction = total.signum();
        let mut remaining = total.abs();
        let mut pos = self.pos;
        let mut vel = self.vel;

        while remaining > 0.0 {
            let h = remaining.min(RK4_STEP_S) * direction;
            let (p, v) = rk4_step(pos, vel, self.lunisolar_accel, h);
            pos = p;
            vel = v;
            remaining -= remaining.min(RK4_STEP_S);
        }

        (pos, vel)
    }

    fn clock_bias(&self, t: Epoch) -> f64 {
        let dt = (t - self.toe).to_seconds();
        -self.tau_n + self.gamma_n * dt
    }

    pub fn state_at(&self, t: Epoch) -> Result<SatelliteState, Error> {
        if self.health != 0 {
            return Err(Error::EphUnhealthy(self.sv));
        }
        let (position, velocity) = self.orbit_at(t);
        Ok(SatelliteState {
            position,
            velocity: Some(velocity),
            clock_bias_s: self.clock_bias(t),
            clock_drift_s_s: self.gamma_n,
            variance_m2: glonass_variance_m2(),
        })
    }
}

/// GLONASS broadcasts no per-satellite accuracy index comparable to
/// GPS/Galileo URA/SISA; a representative fixed value is used instead,
/// matching common RTKLIB-derived practice.
fn glonass_variance_m2() -> f64 {
    25.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use gnss::prelude::Constellation;
    use hifitime::Epoch;

    fn sample() -> GlonassEphemeris {
        GlonassEphemeris {
            sv: SV::new(Constellation::Glonass, 1),
            toe: Epoch::from_gregorian_utc_at_midnight(2022, 3, 1),
            pos: Vector3::new(10_000_000.0, 15_000_000.0, 18_000_000.0),
            vel: Vector3::new(-1_500.0, 1_000.0, -800.0),
            lunisolar_accel: Vector3::new(1.0e-7, -2.0e-7, 5.0e-8),
            tau_n: 1.0e-5,
            gamma_n: 1.0e-12,
            freq_channel: 3,
            health: 0,
        }
    }

    #[test]
    fn integration_is_stable_over_one_ephemeris_window() {
        let eph = sample();
        let t = eph.toe + Duration::from_seconds(900.0);
        let state = eph.state_at(t).expect("integrates");
        // Radius should remain within a plausible GLONASS orbital shell.
        let radius = state.position.norm();
        assert!((23_000_000.0..27_000_000.0).contains(&radius), "{radius}");
    }

    #[test]
    fn zero_duration_returns_initial_state() {
        let eph = sample();
        let state = eph.state_at(eph.toe).expect("integrates");
        assert!((state.position - eph.pos).norm() < 1.0e-6);
    }

    #[test]
    fn unhealthy_satellite_is_rejected() {
        let mut eph = sample();
        eph.health = 1;
        assert_eq!(eph.state_at(eph.toe), Err(Error::EphUnhealthy(eph.sv)));
    }
}
