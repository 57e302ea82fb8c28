//! Per-satellite processing state carried across epochs (§3 "Satellite
//! status"): geometry, per-frequency residuals, slip/lock/outage/reject
//! bookkeeping, and the geometry-free / Melbourne-Wübbena combinations used
//! by cycle-slip detection (§4.5).

use std::collections::HashMap;

use gnss::prelude::SV;
use hifitime::Epoch;

use crate::observation::Code;

extern crate gnss_rs as gnss;

/// Which slip test fired, in priority order (§4.5): an LLI flag is
/// authoritative and checked first, then the two linear-combination
/// tests, then the Doppler-predicted phase comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlipCause {
    Lli,
    GeometryFree,
    MelbourneWubbena,
    Doppler,
}

/// Threshold for the geometry-free epoch-to-epoch jump test, meters
/// (§4.5).
pub const GF_SLIP_THRESHOLD_M: f64 = 0.05;
/// Multiple of the running Melbourne-Wübbena standard deviation beyond
/// which a jump is flagged as a slip (§4.5).
pub const MW_SIGMA_MULTIPLIER: f64 = 5.0;
/// Threshold for the Doppler-predicted vs observed phase comparison,
/// meters (§4.5).
pub const DOPPLER_SLIP_THRESHOLD_M: f64 = 0.05;

/// Geometry-free combination L1*lambda1 - L2*lambda2, already expressed
/// in meters by the caller (§GLOSSARY GF).
pub fn geometry_free_combination_m(phase1_m: f64, phase2_m: f64) -> f64 {
    phase1_m - phase2_m
}

/// Melbourne-Wübbena combination (wide-lane phase minus narrow-lane
/// code), expressed in wide-lane cycles (§GLOSSARY MW). Both phases must
/// be in native cycles and both codes in meters.
pub fn melbourne_wubbena_cycles(
    phase1_cycles: f64,
    phase2_cycles: f64,
    code1_m: f64,
    code2_m: f64,
    f1_hz: f64,
    f2_hz: f64,
) -> f64 {
    let narrow_lane_code_m = (f1_hz * code1_m + f2_hz * code2_m) / (f1_hz + f2_hz);
    let wavelength_wl_m = crate::coords::SPEED_OF_LIGHT / (f1_hz - f2_hz).abs();
    (phase1_cycles - phase2_cycles) - narrow_lane_code_m / wavelength_wl_m
}

/// Running mean/variance of the Melbourne-Wübbena combination, updated
/// with Welford's online algorithm so the slip test never needs to
/// re-scan history.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct MwAccumulator {
    mean_cycles: f64,
    m2_cycles2: f64,
    count: u32,
}

impl MwAccumulator {
    fn update(&mut self, sample: f64) {
        self.count += 1;
        let delta = sample - self.mean_cycles;
        self.mean_cycles += delta / self.count as f64;
        let delta2 = sample - self.mean_cycles;
        self.m2_cycles2 += delta * delta2;
    }

    fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2_cycles2 / (self.count - 1) as f64
        }
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Per-satellite state tracked across a processing run (§3): elevation,
/// azimuth, residuals per code, slip/lock/outage/reject counters, and the
/// state needed by the cycle-slip tests.
#[derive(Debug, Clone, PartialEq)]
pub struct SatelliteStatus {
    pub sv: SV,
    pub elevation_rad: f64,
    pub azimuth_rad: f64,
    pub residuals_m: HashMap<Code, f64>,
    pub lock_count: u32,
    pub outage_count: u32,
    pub reject_count: u32,
    pub phase_windup_cycles: f64,
    previous_geometry_free_m: Option<f64>,
    mw: MwAccumulator,
    previous_primary_phase_m: Option<f64>,
    previous_epoch: Option<Epoch>,
}

impl SatelliteStatus {
    pub fn new(sv: SV) -> Self {
        Self {
            sv,
            elevation_rad: 0.0,
            azimuth_rad: 0.0,
            residuals_m: HashMap::new(),
            lock_count: 0,
            outage_count: 0,
            reject_count: 0,
            phase_windup_cycles: 0.0,
            previous_geometry_free_m: None,
            mw: MwAccumulator::default(),
            previous_primary_phase_m: None,
            previous_epoch: None,
        }
    }

    pub fn update_geometry(&mut self, elevation_rad: f64, azimuth_rad: f64) {
        self.elevation_rad = elevation_rad;
        self.azimuth_rad = azimuth_rad;
    }

    pub fn record_residual(&mut self, code: Code, residual_m: f64) {
        self.residuals_m.insert(code, residual_m);
    }

    pub fn mark_seen(&mut self) {
        self.lock_count += 1;
        self.outage_count = 0;
    }

    pub fn mark_missing(&mut self) {
        self.outage_count += 1;
        self.lock_count = 0;
    }

    pub fn mark_rejected(&mut self) {
        self.reject_count += 1;
    }

    /// Drops the ambiguity-tracking history, as required on slip or after
    /// a long outage before the ambiguity state is re-initialized (§3
    /// Invariants, §4.5).
    pub fn reset_ambiguity_tracking(&mut self) {
        self.lock_count = 0;
        self.previous_geometry_free_m = None;
        self.mw.reset();
        self.previous_primary_phase_m = None;
        self.previous_epoch = None;
    }

    /// Doppler-predicted vs. observed primary-phase delta since the last
    /// recorded epoch (§4.5, fourth slip test): the predicted delta comes
    /// from extrapolating the previous phase by the instantaneous Doppler,
    /// the observed delta from the actual phase difference. `None` until a
    /// previous (phase, epoch) pair has been recorded, or if the clock has
    /// not advanced.
    pub fn doppler_deltas_m(
        &self,
        t: Epoch,
        phase_m: f64,
        doppler_hz: f64,
        wavelength_m: f64,
    ) -> Option<(f64, f64)> {
        let prev_phase_m = self.previous_primary_phase_m?;
        let prev_epoch = self.previous_epoch?;
        let dt_s = (t - prev_epoch).to_seconds();
        if dt_s <= 0.0 {
            return None;
        }
        let predicted_delta_m = doppler_hz * wavelength_m * dt_s;
        let observed_delta_m = phase_m - prev_phase_m;
        Some((predicted_delta_m, observed_delta_m))
    }

    /// Records this epoch's primary-frequency phase as the reference for
    /// next epoch's Doppler slip test.
    pub fn record_primary_phase(&mut self, t: Epoch, phase_m: f64) {
        self.previous_primary_phase_m = Some(phase_m);
        self.previous_epoch = Some(t);
    }

    /// Runs the cycle-slip tests in priority order (§4.5), returning the
    /// first one that fires. Does not itself update the running
    /// combinations; call [Self::update_combinations] afterwards so a
    /// slipped epoch does not contaminate the reference used by the next
    /// test.
    pub fn detect_slip(
        &self,
        lli_slip: bool,
        geometry_free_m: Option<f64>,
        mw_cycles: Option<f64>,
        doppler_predicted_delta_m: Option<f64>,
        observed_delta_m: Option<f64>,
    ) -> Option<SlipCause> {
        if lli_slip {
            return Some(SlipCause::Lli);
        }

        if let (Some(gf), Some(prev)) = (geometry_free_m, self.previous_geometry_free_m) {
            if (gf - prev).abs() > GF_SLIP_THRESHOLD_M {
                return Some(SlipCause::GeometryFree);
            }
        }

        if let Some(mw) = mw_cycles {
            if self.mw.count >= 2 {
                let sigma = self.mw.variance().sqrt().max(1.0e-3);
                if (mw - self.mw.mean_cycles).abs() > MW_SIGMA_MULTIPLIER * sigma {
                    return Some(SlipCause::MelbourneWubbena);
                }
            }
        }

        if let (Some(predicted), Some(observed)) = (doppler_predicted_delta_m, observed_delta_m) {
            if (predicted - observed).abs() > DOPPLER_SLIP_THRESHOLD_M {
                return Some(SlipCause::Doppler);
            }
        }

        None
    }

    /// Feeds this epoch's combinations into the running statistics, once
    /// the slip tests above have already consulted the prior state.
    pub fn update_combinations(&mut self, geometry_free_m: Option<f64>, mw_cycles: Option<f64>) {
        if let Some(gf) = geometry_free_m {
            self.previous_geometry_free_m = Some(gf);
        }
        if let Some(mw) = mw_cycles {
            self.mw.update(mw);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gnss::prelude::Constellation;

    fn sv() -> SV {
        SV::new(Constellation::GPS, 5)
    }

    #[test]
    fn lli_flag_is_authoritative() {
        let status = SatelliteStatus::new(sv());
        assert_eq!(
            status.detect_slip(true, Some(0.0), None, None, None),
            Some(SlipCause::Lli)
        );
    }

    #[test]
    fn geometry_free_jump_flags_slip() {
        let mut status = SatelliteStatus::new(sv());
        status.update_combinations(Some(0.10), None);
        let cause = status.detect_slip(false, Some(0.10 + 1.0), None, None, None);
        assert_eq!(cause, Some(SlipCause::GeometryFree));
    }

    #[test]
    fn small_geometry_free_change_is_not_a_slip() {
        let mut status = SatelliteStatus::new(sv());
        status.update_combinations(Some(0.10), None);
        let cause = status.detect_slip(false, Some(0.11), None, None, None);
        assert_eq!(cause, None);
    }

    #[test]
    fn melbourne_wubbena_outlier_flags_slip_after_warm_up() {
        let mut status = SatelliteStatus::new(sv());
        for sample in [10.0, 10.1, 9.9, 10.05, 9.95] {
            status.update_combinations(None, Some(sample));
        }
        let cause = status.detect_slip(false, None, Some(25.0), None, None);
        assert_eq!(cause, Some(SlipCause::MelbourneWubbena));
    }

    #[test]
    fn reset_clears_history() {
        let mut status = SatelliteStatus::new(sv());
        status.update_combinations(Some(0.2), Some(5.0));
        status.reset_ambiguity_tracking();
        assert_eq!(status.previous_geometry_free_m, None);
        assert_eq!(status.mw.count, 0);
    }

    #[test]
    fn melbourne_wubbena_combination_is_geometry_independent_of_code_noise() {
        let f1 = 1.575_42e9;
        let f2 = 1.227_60e9;
        let a = melbourne_wubbena_cycles(100_000.0, 77_900.0, 20_000_000.0, 20_000_000.5, f1, f2);
        let b = melbourne_wubbena_cycles(100_000.0, 77_900.0, 20_000_000.3, 20_000_000.2, f1, f2);
        assert!((a - b).abs() < 0.01, "mw should be stable against small code noise: {a} {b}");
    }
}
