//! Observation record data model (§3).

use bitflags::bitflags;
use gnss::prelude::SV;
use hifitime::Epoch;

extern crate gnss_rs as gnss;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

bitflags! {
    /// Loss-of-Lock Indicator bits, as carried verbatim from the RINEX/raw
    /// observation record (§3, §GLOSSARY).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub struct Lli: u8 {
        /// Cycle slip marked by the receiver/decoder.
        const SLIP = 0x01;
        /// Half-cycle ambiguity not resolved.
        const HALF_CYCLE = 0x02;
        /// BOC tracking of an MBOC signal.
        const BOC_TRACKING = 0x04;
    }
}

/// Carrier / tracking code identifier. Kept as a small closed enum (one
/// arm per signal actually used by the solver) rather than the full RINEX
/// code table, which belongs to the external RINEX I/O layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Code {
    L1,
    L2,
    L5,
    E1,
    E5a,
    E5b,
    B1,
    B2,
    G1,
    G2,
}

impl Code {
    /// Nominal carrier frequency in Hz (IS-GPS / Galileo ICD / BDS ICD).
    pub fn frequency_hz(&self) -> f64 {
        match self {
            Code::L1 | Code::E1 => 1.575_42e9,
            Code::L2 => 1.227_60e9,
            Code::L5 | Code::E5a => 1.176_45e9,
            Code::E5b | Code::B2 => 1.207_14e9,
            Code::B1 => 1.561_098e9,
            Code::G1 => 1.602_00e9,
            Code::G2 => 1.246_00e9,
        }
    }

    pub fn wavelength_m(&self) -> f64 {
        crate::coords::SPEED_OF_LIGHT / self.frequency_hz()
    }

    /// True for the "first" frequency of a dual-frequency pair, used by
    /// the geometry-free / Melbourne-Wübbena combinations (§4.5).
    pub fn is_primary(&self) -> bool {
        matches!(self, Code::L1 | Code::E1 | Code::B1 | Code::G1)
    }
}

/// Signal-to-noise ratio, stored at its native 0.001 dBHz resolution (§3).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Snr(pub f64);

impl Snr {
    pub fn db_hz(&self) -> f64 {
        self.0
    }
}

/// A single signal's worth of observables on one (satellite, frequency)
/// pair at one epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SignalObservation {
    pub code: Code,
    pub pseudorange_m: Option<f64>,
    pub carrier_phase_cycles: Option<f64>,
    pub doppler_hz: Option<f64>,
    pub snr: Option<Snr>,
    pub lli: Option<Lli>,
}

impl SignalObservation {
    pub fn new(code: Code) -> Self {
        Self {
            code,
            pseudorange_m: None,
            carrier_phase_cycles: None,
            doppler_hz: None,
            snr: None,
            lli: None,
        }
    }

    pub fn carrier_phase_m(&self) -> Option<f64> {
        self.carrier_phase_cycles
            .map(|cycles| cycles * self.code.wavelength_m())
    }

    pub fn has_slip_flag(&self) -> bool {
        self.lli
            .map(|lli| lli.contains(Lli::SLIP))
            .unwrap_or(false)
    }
}

/// Observation record for one satellite at one epoch (§3), carrying up to
/// NFREQ+NEXOBS signals as an owned, exact-size buffer per epoch.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Observation {
    pub t_recv: Epoch,
    pub sv: SV,
    pub signals: Vec<SignalObservation>,
}

impl Observation {
    pub fn new(t_recv: Epoch, sv: SV) -> Self {
        Self {
            t_recv,
            sv,
            signals: Vec::new(),
        }
    }

    pub fn with_signal(mut self, signal: SignalObservation) -> Self {
        self.signals.push(signal);
        self
    }

    pub fn signal(&self, code: Code) -> Option<&SignalObservation> {
        self.signals.iter().find(|s| s.code == code)
    }

    /// Preferred pseudorange: first primary-frequency code carrying a
    /// pseudorange, falling back to any signal that has one.
    pub fn preferred_pseudorange(&self) -> Option<(Code, f64)> {
        self.signals
            .iter()
            .filter(|s| s.code.is_primary())
            .chain(self.signals.iter())
            .find_map(|s| s.pseudorange_m.map(|pr| (s.code, pr)))
    }

    pub fn max_snr(&self) -> Option<Snr> {
        self.signals
            .iter()
            .filter_map(|s| s.snr)
            .reduce(|a, b| if b.0 > a.0 { b } else { a })
    }
}
