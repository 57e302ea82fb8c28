//! Processing configuration (§2.1, §6 CLI flags, §9 "process-wide
//! configuration installed once at startup").
//!
//! Mirrors the teacher's split between a top-level [Config] (run-wide
//! knobs: mode, mask angles, constellations in use) and a [Modeling]
//! sub-struct (which physical corrections are switched on), so an external
//! option-file loader can deserialize either independently.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

extern crate gnss_rs as gnss;
use gnss::prelude::Constellation;

/// Positioning method (§4.4, §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Mode {
    /// Single-point positioning, code observations only.
    #[default]
    Single,
    /// Relative kinematic positioning with double differences.
    Rtk,
    /// Undifferenced precise point positioning.
    Ppp,
}

/// Receiver dynamics carried in the filter state (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Dynamics {
    /// Position only, random walk.
    #[default]
    Static,
    /// Position + velocity.
    Kinematic,
    /// Position + velocity + acceleration.
    Dynamic,
}

impl Dynamics {
    pub fn carries_velocity(&self) -> bool {
        !matches!(self, Dynamics::Static)
    }

    pub fn carries_acceleration(&self) -> bool {
        matches!(self, Dynamics::Dynamic)
    }
}

/// Tropospheric parameter estimation mode (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TropoOpt {
    /// Saastamoinen only, not estimated.
    #[default]
    Off,
    /// Estimate zenith wet delay.
    Estimate,
    /// Estimate zenith wet delay plus N/E gradients.
    EstimateGradients,
}

/// Ionospheric correction mode (§4.2, §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum IonoOpt {
    /// Klobuchar broadcast model.
    #[default]
    Broadcast,
    /// Dual-frequency ionosphere-free combination.
    IonoFree,
    /// Per-satellite vertical delay estimated in the filter.
    Estimate,
}

/// Ambiguity resolution mode (§4.5, §9 open question (a)): the source's
/// `modear` magic integers are replaced with named variants, and the
/// comment describing `3`/`4` is taken as authoritative over the
/// inconsistent numbering it sat beside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AmbiguityResolution {
    /// Float solution only, no integer fixing.
    #[default]
    Off,
    /// Fix each epoch independently, no carry-over.
    Continuous,
    /// Fix-and-hold: once fixed, inject the integer as a soft measurement
    /// to anchor the filter across epochs.
    FixAndHold,
    /// Wide-lane / narrow-lane sequential fixing.
    WideNarrowLane,
}

/// Which physical corrections are applied, independent of the positioning
/// [Mode] (§4.1-§4.3, §9 "global mutable state... re-expressed as
/// process-wide configuration").
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Modeling {
    pub sv_clock_bias: bool,
    pub sv_total_group_delay: bool,
    pub relativistic_clock_correction: bool,
    pub earth_rotation: bool,
    pub tropo: TropoOpt,
    pub iono: IonoOpt,
}

impl Default for Modeling {
    fn default() -> Self {
        Self {
            sv_clock_bias: true,
            sv_total_group_delay: true,
            relativistic_clock_correction: true,
            earth_rotation: true,
            tropo: TropoOpt::default(),
            iono: IonoOpt::default(),
        }
    }
}

/// Run-wide processing configuration (§4.6, §6).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Config {
    pub mode: Mode,
    pub dynamics: Dynamics,
    /// Constellations admitted into the solution (§6 `-sys`).
    pub constellations: Vec<Constellation>,
    /// Number of frequencies to use per satellite (§6 `-f`).
    pub nfreq: usize,
    /// Elevation mask, radians (§6 `-m`).
    pub elevation_mask_rad: f64,
    /// Minimum SNR accepted, dBHz.
    pub snr_mask_db_hz: f64,
    /// Ambiguity ratio-test threshold (§4.5, §6 `-v`).
    pub ar_ratio_threshold: f64,
    /// Minimum number of consecutive fixed epochs before fix-and-hold
    /// engages (§4.5 `minfix`).
    pub minfix: u32,
    /// Minimum lock count before an ambiguity leaves `Warm` (§4.5
    /// `minlock`).
    pub minlock: u32,
    /// Epochs of missing data tolerated before an ambiguity/tropo/iono
    /// state is dropped and re-initialized (§4.5 `maxout`).
    pub maxout: u32,
    pub ambiguity_resolution: AmbiguityResolution,
    pub modeling: Modeling,
    /// Processing interval, seconds (§6 `-ti`); 0 means "every epoch
    /// present in the input".
    pub interval_s: f64,
    /// Variance (cycles^2) used when fix-and-hold injects the fixed
    /// integer back in as a soft measurement to anchor the filter across
    /// epochs (§4.5 step 5, `varholdamb`).
    pub ar_hold_variance_cycles2: f64,
    /// GDOP threshold for outright solution rejection (§4.3); wired
    /// through [Config] so a caller can tighten or loosen it without
    /// touching [crate::geometry::MAX_GDOP].
    pub max_gdop: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            dynamics: Dynamics::default(),
            constellations: vec![Constellation::GPS],
            nfreq: 1,
            elevation_mask_rad: 10.0_f64.to_radians(),
            snr_mask_db_hz: 30.0,
            ar_ratio_threshold: 3.0,
            minfix: 5,
            minlock: 5,
            maxout: 5,
            ambiguity_resolution: AmbiguityResolution::default(),
            modeling: Modeling::default(),
            interval_s: 30.0,
            ar_hold_variance_cycles2: 1.0e-6,
            max_gdop: crate::geometry::MAX_GDOP,
        }
    }
}

impl Config {
    /// Degrees-of-freedom-dependent chi-square rejection threshold at
    /// alpha=0.001, used by SPP acceptance (§4.4, §8).
    pub fn chi_square_threshold(&self, degrees_of_freedom: usize) -> f64 {
        chi2_table_0_001(degrees_of_freedom)
    }
}

/// Chi-square critical values at alpha=0.001 for small degrees of freedom
/// (§4.4). Degrees of freedom beyond the table use the Wilson-Hilferty
/// normal approximation.
fn chi2_table_0_001(dof: usize) -> f64 {
    const TABLE: [f64; 20] = [
        10.828, 13.816, 16.266, 18.467, 20.515, 22.458, 24.322, 26.125, 27.877, 29.588, 31.264,
        32.909, 34.528, 36.123, 37.697, 39.252, 40.790, 42.312, 43.820, 45.315,
    ];
    if dof == 0 {
        return 0.0;
    }
    if dof <= TABLE.len() {
        return TABLE[dof - 1];
    }
    let k = dof as f64;
    let z = 3.090_232_306_167_814; // standard normal quantile at 0.999
    let term = 1.0 - 2.0 / (9.0 * k) + z * (2.0 / (9.0 * k)).sqrt();
    k * term * term * term
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_gps_single_point() {
        let cfg = Config::default();
        assert_eq!(cfg.mode, Mode::Single);
        assert_eq!(cfg.constellations, vec![Constellation::GPS]);
    }

    #[test]
    fn chi_square_threshold_matches_known_value() {
        let cfg = Config::default();
        assert!((cfg.chi_square_threshold(4) - 18.467).abs() < 1.0e-3);
    }

    #[test]
    fn chi_square_extrapolates_beyond_table() {
        let cfg = Config::default();
        let v = cfg.chi_square_threshold(30);
        assert!(v > cfg.chi_square_threshold(20));
    }

    #[test]
    fn dynamics_flags_are_consistent() {
        assert!(!Dynamics::Static.carries_velocity());
        assert!(Dynamics::Kinematic.carries_velocity());
        assert!(!Dynamics::Kinematic.carries_acceleration());
        assert!(Dynamics::Dynamic.carries_acceleration());
    }
}
