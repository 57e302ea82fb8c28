//! Keplerian broadcast ephemeris (GPS/QZSS/Galileo/BeiDou/IRNSS), §4.1.

use gnss::prelude::{Constellation, SV};
use hifitime::{Duration, Epoch};
use nalgebra::{Matrix3, Vector3};

use super::{ura_index_to_variance, Error, SatelliteState};
use crate::coords::SPEED_OF_LIGHT;
use crate::time::week_reduce;

extern crate gnss_rs as gnss;

const MAX_KEPLER_ITER: usize = 30;
const KEPLER_TOLERANCE: f64 = 1.0e-14;

/// Earth gravitational constant, per system (WGS84 vs Galileo ICD vs
/// CGCS2000 differ in the last few significant digits).
fn gm(c: Constellation) -> f64 {
    match c {
        Constellation::Galileo => 3.986_004_418e14,
        Constellation::BeiDou => 3.986_004_418e14,
        _ => 3.986_005e14,
    }
}

/// Earth rotation rate used to propagate RAAN, per system (IS-GPS value
/// for GPS/QZSS/BeiDou, Galileo ICD value for Galileo).
fn omega_dot_e(c: Constellation) -> f64 {
    match c {
        Constellation::Galileo => 7.292_115_146_7e-5,
        _ => 7.292_115_146_7e-5,
    }
}

/// BeiDou GEO satellites use a distinct BDCS->ECEF definition and need an
/// extra frame rotation (§4.1, §9 open question (b)). PRNs 1-5 and 59-63
/// are the geostationary slots in the BeiDou constellation plan; the
/// rotation is retained only for those documented PRN ranges.
fn is_beidou_geo(prn: u8) -> bool {
    (1..=5).contains(&prn) || (59..=63).contains(&prn)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeplerianEphemeris {
    pub sv: SV,
    pub toe: Epoch,
    pub toc: Epoch,
    /// Time of week (s) of `toe`, carried separately because the RAAN
    /// propagation formula references it directly rather than re-deriving
    /// it from the epoch's time scale (§4.1).
    pub toe_tow_s: f64,
    pub sqrt_a: f64,
    pub e: f64,
    pub i0: f64,
    pub idot: f64,
    pub omega0: f64,
    pub omega_dot: f64,
    pub omega: f64,
    pub m0: f64,
    pub delta_n: f64,
    pub cuc: f64,
    pub cus: f64,
    pub crc: f64,
    pub crs: f64,
    pub cic: f64,
    pub cis: f64,
    pub af0: f64,
    pub af1: f64,
    pub af2: f64,
    pub tgd: [f64; 6],
    pub ura: u8,
    pub health: u8,
    pub iode: i32,
}

impl KeplerianEphemeris {
    fn kepler_eccentric_anomaly(&self, mk: f64) -> Result<f64, Error> {
        let mut e = mk;
        for _ in 0..MAX_KEPLER_ITER {
            let f = e - self.e * e.sin() - mk;
            let f_prime = 1.0 - self.e * e.cos();
            let delta = f / f_prime;
            e -= delta;
            if delta.abs() < KEPLER_TOLERANCE {
                return Ok(e);
            }
        }
        Err(Error::EphConverge(self.sv))
    }

    /// Orbital position/velocity at `t`, ignoring clock (used internally,
    /// and by the relativistic correction which needs both E and r).
    fn orbit_at(&self, t: Epoch) -> Result<(Vector3<f64>, Vector3<f64>, f64), Error> {
        let a = self.sqrt_a * self.sqrt_a;
        let mu = gm(self.sv.constellation);
        let n0 = (mu / (a * a * a)).sqrt();
        let n = n0 + self.delta_n;

        let tk = week_reduce(t - self.toe);
        let tk_s = tk.to_seconds();

        let mk = self.m0 + n * tk_s;
        let ek = self.kepler_eccentric_anomaly(mk)?;

        let sin_e = ek.sin();
        let cos_e = ek.cos();
        let nuk = ((1.0 - self.e * self.e).sqrt() * sin_e).atan2(cos_e - self.e);
        let phik = nuk + self.omega;

        let sin_2phi = (2.0 * phik).sin();
        let cos_2phi = (2.0 * phik).cos();

        let duk = self.cus * sin_2phi + self.cuc * cos_2phi;
        let drk = self.crs * sin_2phi + self.crc * cos_2phi;
        let dik = self.cis * sin_2phi + self.cic * cos_2phi;

        let uk = phik + duk;
        let rk = a * (1.0 - self.e * cos_e) + drk;
        let ik = self.i0 + self.idot * tk_s + dik;

        let xk = rk * uk.cos();
        let yk = rk * uk.sin();

        let omega_dot_earth = omega_dot_e(self.sv.constellation);
        let omk = if is_beidou_geo(self.sv.prn) {
            // GEO satellites keep RAAN fixed in the inertial frame that is
            // later rotated back into BDCS below.
            self.omega0 + self.omega_dot * tk_s - omega_dot_earth * self.toe_tow_s
        } else {
            self.omega0 + (self.omega_dot - omega_dot_earth) * tk_s
                - omega_dot_earth * self.toe_tow_s
        };

        let cos_omk = omk.cos();
        let sin_omk = omk.sin();
        let cos_ik = ik.cos();
        let sin_ik = ik.sin();

        let mut pos = Vector3::new(
            xk * cos_omk - yk * cos_ik * sin_omk,
            xk * sin_omk + yk * cos_ik * cos_omk,
            yk * sin_ik,
        );

        if is_beidou_geo(self.sv.prn) {
            let rx = Matrix3::new(
                1.0,
                0.0,
                0.0,
                0.0,
                (-5.0_f64).to_radians().cos(),
                (-5.0_f64).to_radians().sin(),
                0.0,
                -(-5.0_f64).to_radians().sin(),
                (-5.0_f64).to_radians().cos(),
            );
            let theta = omega_dot_earth * tk_s;
            let rz = Matrix3::new(
                theta.cos(),
                theta.sin(),
                0.0,
                -theta.sin(),
                theta.cos(),
                0.0,
                0.0,
                0.0,
                1.0,
            );
            pos = rz * rx * pos;
        }

        // velocity by numerical differentiation at +-0.5s is avoided;
        // derive analytically from the same elements.
        let ek_dot = n / (1.0 - self.e * cos_e);
        let phik_dot = ((1.0 - self.e * self.e).sqrt() * ek_dot) / (1.0 - self.e * cos_e);
        let uk_dot = phik_dot + 2.0 * (self.cus * cos_2phi - self.cuc * sin_2phi) * phik_dot;
        let rk_dot = a * self.e * sin_e * ek_dot
            + 2.0 * (self.crs * cos_2phi - self.crc * sin_2phi) * phik_dot;
        let ik_dot = self.idot + 2.0 * (self.cis * cos_2phi - self.cic * sin_2phi) * phik_dot;

        let xk_dot = rk_dot * uk.cos() - rk * uk.sin() * uk_dot;
        let yk_dot = rk_dot * uk.sin() + rk * uk.cos() * uk_dot;
        let omk_dot = if is_beidou_geo(self.sv.prn) {
            self.omega_dot
        } else {
            self.omega_dot - omega_dot_earth
        };

        let vel = Vector3::new(
            xk_dot * cos_omk
                - yk_dot * cos_ik * sin_omk
                + yk * sin_ik * sin_omk * ik_dot
                - pos.y * omk_dot,
            xk_dot * sin_omk
                + yk_dot * cos_ik * cos_omk
                - yk * sin_ik * cos_omk * ik_dot
                + pos.x * omk_dot,
            yk_dot * sin_ik + yk * cos_ik * ik_dot,
        );

        Ok((pos, vel, ek))
    }

    /// Relativistic eccentricity correction F*e*sqrt(A)*sin(E) (§4.1).
    fn relativistic_correction(&self, ek: f64) -> f64 {
        const F: f64 = -4.442_807_633e-10;
        F * self.e * self.sqrt_a * ek.sin()
    }

    fn clock_bias(&self, t: Epoch, ek: f64) -> f64 {
        let dt = (t - self.toc).to_seconds();
        self.af0 + self.af1 * dt + self.af2 * dt * dt + self.relativistic_correction(ek)
    }

    fn clock_drift(&self, t: Epoch) -> f64 {
        let dt = (t - self.toc).to_seconds();
        self.af1 + 2.0 * self.af2 * dt
    }

    pub fn state_at(&self, t: Epoch) -> Result<SatelliteState, Error> {
        if self.health != 0 {
            return Err(Error::EphUnhealthy(self.sv));
        }
        let (position, velocity, ek) = self.orbit_at(t)?;
        Ok(SatelliteState {
            position,
            velocity: Some(velocity),
            clock_bias_s: self.clock_bias(t, ek),
            clock_drift_s_s: self.clock_drift(t),
            variance_m2: ura_index_to_variance(self.ura),
        })
    }

    /// Solves for the signal transmission time given the receive time and
    /// pseudorange, back-substituting the satellite clock bias (§4.1).
    /// Two to three fixed-point iterations are sufficient given the
    /// relative magnitude of `dts` (microseconds) versus signal flight
    /// time (tens of milliseconds).
    pub fn transmission_time(&self, t_recv: Epoch, pseudorange_m: f64) -> Result<Epoch, Error> {
        let mut t_tx = t_recv - Duration::from_seconds(pseudorange_m / SPEED_OF_LIGHT);
        for _ in 0..3 {
            let state = self.state_at(t_tx)?;
            t_tx = t_recv
                - Duration::from_seconds(pseudorange_m / SPEED_OF_LIGHT)
                - Duration::from_seconds(state.clock_bias_s);
        }
        Ok(t_tx)
    }
}

/// Convenience for tests/fixtures: builds an Epoch from GPS week+tow, used
/// when constructing synthetic ephemerides.
pub fn epoch_from_gpst_week_tow(week: u32, tow: f64) -> Epoch {
    Epoch::from_gpst_seconds(week as f64 * 604_800.0 + tow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gnss::prelude::Constellation;

    fn sample_gps_ephemeris() -> KeplerianEphemeris {
        let toe = epoch_from_gpst_week_tow(2200, 259_200.0);
        KeplerianEphemeris {
            sv: SV::new(Constellation::GPS, 5),
            toe,
            toc: toe,
            toe_tow_s: 259_200.0,
            sqrt_a: 5153.7,
            e: 0.0081,
            i0: 0.9600,
            idot: 0.0,
            omega0: 1.20,
            omega_dot: -8.1e-9,
            omega: 0.70,
            m0: 0.30,
            delta_n: 4.3e-9,
            cuc: 1.0e-6,
            cus: 1.0e-6,
            crc: 200.0,
            crs: -10.0,
            cic: 1.0e-7,
            cis: 1.0e-7,
            af0: 1.0e-5,
            af1: 1.0e-11,
            af2: 0.0,
            tgd: [0.0; 6],
            ura: 1,
            health: 0,
            iode: 10,
        }
    }

    #[test]
    fn orbit_radius_is_gps_altitude_like() {
        let eph = sample_gps_ephemeris();
        let state = eph.state_at(eph.toe).expect("converges at toe");
        let radius = state.position.norm();
        assert!(
            (25_000_000.0..27_000_000.0).contains(&radius),
            "unexpected radius {radius}"
        );
    }

    #[test]
    fn unhealthy_satellite_is_rejected() {
        let mut eph = sample_gps_ephemeris();
        eph.health = 1;
        assert_eq!(eph.state_at(eph.toe), Err(Error::EphUnhealthy(eph.sv)));
    }

    #[test]
    fn beidou_geo_rotation_only_applies_to_documented_prns() {
        assert!(is_beidou_geo(1));
        assert!(is_beidou_geo(5));
        assert!(!is_beidou_geo(6));
        assert!(is_beidou_geo(60));
    }

    #[test]
    fn transmission_time_precedes_receive_time() {
        let eph = sample_gps_ephemeris();
        let t_recv = eph.toe + Duration::from_seconds(100.0);
        let t_tx = eph
            .transmission_time(t_recv, 22_000_000.0)
            .expect("solves");
        assert!(t_tx < t_recv);
        let dt = (t_recv - t_tx).to_seconds();
        assert!(dt > 0.0 && dt < 1.0);
    }
}
