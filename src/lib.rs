//! Core positioning mathematics for a GNSS post-processing engine:
//! satellite position/clock evaluation from broadcast ephemerides,
//! per-epoch single-point positioning (SPP), and an RTK/PPP Kalman
//! filter with cycle-slip detection and LAMBDA integer ambiguity
//! resolution.
//!
//! This crate is the solver core only. RINEX/option-file parsing, KML/GPX
//! conversion, SBAS correction loading, NMEA formatting, and live
//! acquisition are external collaborators that sit on top of the types
//! exposed here ([pipeline::Pipeline], [cfg::Config], [solution::Solution]).
#![cfg_attr(docsrs, feature(doc_cfg))]

extern crate gnss_rs as gnss;

pub mod atmosphere;
pub mod cfg;
pub mod coords;
pub mod ephemeris;
pub mod filter;
pub mod geometry;
pub mod lambda;
pub mod observation;
pub mod pipeline;
pub mod sat;
pub mod solution;
pub mod spp;
pub mod time;

mod error;
pub use error::Error;

/// Re-exports the types an external driver needs to build and run a
/// [pipeline::Pipeline], without reaching into each module individually.
pub mod prelude {
    pub use crate::cfg::{AmbiguityResolution, Config, Dynamics, IonoOpt, Mode, Modeling, TropoOpt};
    pub use crate::ephemeris::{Ephemeris, NavStore};
    pub use crate::observation::{Code, Lli, Observation, SignalObservation};
    pub use crate::pipeline::{run_combined, should_process, Pipeline};
    pub use crate::solution::{Solution, Status};
    pub use crate::Error;

    pub use gnss::prelude::{Constellation, SV};
    pub use hifitime::{Duration, Epoch};
}
