//! Satellite position/clock computation from broadcast ephemerides (§4.1).

mod glonass;
mod keplerian;
mod store;

pub use glonass::GlonassEphemeris;
pub use keplerian::KeplerianEphemeris;
pub use store::NavStore;

use gnss::prelude::SV;
use hifitime::Epoch;
use nalgebra::Vector3;
use thiserror::Error;

extern crate gnss_rs as gnss;

/// Per-(satellite, time) evaluation failures (§4.1, §7).
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum Error {
    #[error("{0}: no ephemeris within tolerance at {1}")]
    EphMissing(SV, Epoch),
    #[error("{0}: sv health non-zero, rejected by policy")]
    EphUnhealthy(SV),
    #[error("{0}: kepler iteration failed to converge")]
    EphConverge(SV),
}

/// Result of evaluating an ephemeris at a given transmission time: the
/// satellite's ECEF position/velocity, clock bias/drift (s, s/s) and the
/// broadcast accuracy expressed as a variance in m^2 (§4.1).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SatelliteState {
    pub position: Vector3<f64>,
    pub velocity: Option<Vector3<f64>>,
    pub clock_bias_s: f64,
    pub clock_drift_s_s: f64,
    pub variance_m2: f64,
}

/// One broadcast ephemeris record, tagged by its kind (§9: the "nav"
/// union is decomposed into one independent store/variant per kind,
/// rather than a single tagged union mirroring the C source).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Ephemeris {
    Keplerian(KeplerianEphemeris),
    Glonass(GlonassEphemeris),
}

impl Ephemeris {
    pub fn sv(&self) -> SV {
        match self {
            Ephemeris::Keplerian(e) => e.sv,
            Ephemeris::Glonass(e) => e.sv,
        }
    }

    pub fn toe(&self) -> Epoch {
        match self {
            Ephemeris::Keplerian(e) => e.toe,
            Ephemeris::Glonass(e) => e.toe,
        }
    }

    pub fn healthy(&self) -> bool {
        match self {
            Ephemeris::Keplerian(e) => e.health == 0,
            Ephemeris::Glonass(e) => e.health == 0,
        }
    }

    /// Single-frequency (L1/E1/B1) total group delay, seconds. GLONASS
    /// broadcasts no TGD equivalent in this model, so it contributes 0.
    pub fn group_delay_s(&self) -> f64 {
        match self {
            Ephemeris::Keplerian(e) => e.tgd[0],
            Ephemeris::Glonass(_) => 0.0,
        }
    }

    /// Evaluates satellite position/velocity/clock at `t` (§4.1).
    pub fn state_at(&self, t: Epoch) -> Result<SatelliteState, Error> {
        match self {
            Ephemeris::Keplerian(e) => e.state_at(t),
            Ephemeris::Glonass(e) => e.state_at(t),
        }
    }
}

/// URA index -> variance (m^2) table (§4.1), identical to the GPS/Galileo
/// SISA/URA mapping used throughout the broadcast-ephemeris literature.
pub fn ura_index_to_variance(ura: u8) -> f64 {
    const TABLE: [f64; 16] = [
        2.4 * 2.4,
        3.4 * 3.4,
        4.85 * 4.85,
        6.85 * 6.85,
        9.65 * 9.65,
        13.65 * 13.65,
        24.0 * 24.0,
        48.0 * 48.0,
        96.0 * 96.0,
        192.0 * 192.0,
        384.0 * 384.0,
        768.0 * 768.0,
        1536.0 * 1536.0,
        3072.0 * 3072.0,
        6144.0 * 6144.0,
        8192.0 * 8192.0,
    ];
    TABLE[(ura as usize).min(TABLE.len() - 1)]
}
