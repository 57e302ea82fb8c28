//! Epoch-by-epoch pipeline driver (§4.6): ticks the processing clock, runs
//! SPP, routes into the filter for relative/precise modes, handles cycle
//! slips, and emits a [Solution] per tick. Forward/backward/combined passes
//! are supported by running [Pipeline::process_epoch] twice over the same
//! observation stream and merging by inverse-variance weighting.

use std::collections::HashMap;

use gnss::prelude::{Constellation, SV};
use hifitime::{Duration, Epoch};
use log::warn;
use nalgebra::Vector3;
use thiserror::Error;

extern crate gnss_rs as gnss;

use crate::atmosphere::{klobuchar_delay_m, saastamoinen_delay_m, tropo_mapping_function, KlobucharCoefficients};
use crate::cfg::{Config, IonoOpt, Mode, TropoOpt};
use crate::coords::{ecef2geodetic, SPEED_OF_LIGHT};
use crate::ephemeris::NavStore;
use crate::filter::{ArState, Filter, Measurement};
use crate::geometry::{line_of_sight, sagnac_corrected_range};
use crate::observation::{Code, Observation};
use crate::sat::{geometry_free_combination_m, melbourne_wubbena_cycles, SatelliteStatus};
use crate::solution::{Solution, Status};
use crate::spp;

/// Fatal, run-terminating failures (§7: "Config and Input errors are fatal
/// and terminate the run"). Per-epoch SPP/ephemeris/filter failures never
/// appear here; they degrade that epoch's [Status] instead.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("bad option: {0}")]
    Config(String),
    #[error("bad input: {0}")]
    Input(String),
}

/// Innovation gate width, in standard deviations, for filter measurement
/// updates (§4.5 step 3).
const GATE_SIGMA: f64 = 4.0;
/// Code-phase error ratio between code and carrier noise, used to scale the
/// code observation's variance relative to phase's (§4.5, "code-phase error
/// ratio from options").
const CODE_PHASE_ERROR_RATIO: f64 = 100.0;
/// Carrier-phase error factor terms, meters (§4.5 "error factor").
const PHASE_NOISE_A_M: f64 = 0.003;
const PHASE_NOISE_B_M: f64 = 0.003;

/// One station's observations for one epoch.
pub type StationEpoch<'a> = &'a [Observation];

/// Rejects configurations that cannot possibly produce a solution (§7
/// Config errors). Kept deliberately narrow: anything that is merely
/// unusual (e.g. an aggressive elevation mask) is left to degrade the
/// per-epoch status rather than abort the run.
fn validate_config(cfg: &Config) -> Result<(), Error> {
    if cfg.constellations.is_empty() {
        return Err(Error::Config("no constellation selected".to_string()));
    }
    if cfg.nfreq == 0 {
        return Err(Error::Config("nfreq must be at least 1".to_string()));
    }
    if !(0.0..=90.0_f64.to_radians()).contains(&cfg.elevation_mask_rad) {
        return Err(Error::Config(format!(
            "elevation mask {} rad is out of range [0, pi/2]",
            cfg.elevation_mask_rad
        )));
    }
    if cfg.interval_s < 0.0 {
        return Err(Error::Config("processing interval must be >= 0".to_string()));
    }
    Ok(())
}

/// The running pipeline state carried across epochs within a single pass
/// (§4.6, §5 "filter state is exclusive to one pipeline").
pub struct Pipeline {
    cfg: Config,
    nav: NavStore,
    klobuchar: Option<KlobucharCoefficients>,
    filter: Option<Filter>,
    last_position: Vector3<f64>,
    last_epoch: Option<Epoch>,
    held_ambiguities: HashMap<(SV, Code), f64>,
}

impl Pipeline {
    /// Validates `cfg` and builds a fresh pipeline ready for
    /// [Pipeline::process_epoch] (§4.6). Rejects configurations that can
    /// never produce a solution, per §7 ("Config ... errors are fatal and
    /// terminate the run").
    pub fn new(cfg: Config, nav: NavStore, klobuchar: Option<KlobucharCoefficients>) -> Result<Self, Error> {
        validate_config(&cfg)?;
        Ok(Self {
            cfg,
            nav,
            klobuchar,
            filter: None,
            last_position: Vector3::zeros(),
            last_epoch: None,
            held_ambiguities: HashMap::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Processes one epoch tick: rover observations, and (for relative
    /// modes) the base station's observations at the same tick (§4.6 step
    /// 1-2). Never returns `Err` for per-epoch failures; those are folded
    /// into a degraded [Solution].
    pub fn process_epoch(
        &mut self,
        t: Epoch,
        rover: StationEpoch,
        base: Option<(StationEpoch, Vector3<f64>)>,
    ) -> Solution {
        let age_s = self
            .last_epoch
            .map(|prev| (t - prev).abs().to_seconds())
            .unwrap_or(0.0);

        let apriori = if self.last_epoch.is_some() {
            self.last_position
        } else {
            Vector3::zeros()
        };

        let spp_result = spp::solve(t, rover, &self.nav, apriori, &self.cfg, self.klobuchar.as_ref());
        let spp_solution = match spp_result {
            Ok(s) => s,
            Err(e) => {
                warn!("spp failed at {t:?}: {e}");
                return Solution::none(t);
            }
        };

        self.last_position = spp_solution.position_ecef;
        self.last_epoch = Some(t);

        if self.cfg.mode == Mode::Single {
            return solution_from_spp(t, &spp_solution, age_s);
        }

        let filter = self
            .filter
            .get_or_insert_with(|| Filter::new(&self.cfg, spp_solution.position_ecef));

        let dt_s = if age_s > 0.0 { age_s } else { self.cfg.interval_s.max(1.0) };
        filter.predict(dt_s, &self.cfg);

        let measurements = match base {
            Some((base_obs, base_pos)) => build_double_difference_measurements(
                t,
                rover,
                base_obs,
                base_pos,
                filter,
                &self.nav,
                &self.cfg,
            ),
            None => build_undifferenced_measurements(
                t,
                rover,
                filter,
                &self.nav,
                &self.cfg,
                self.klobuchar.as_ref(),
            ),
        };

        let applied = filter
            .hold_fixed_ambiguities(&self.cfg, &self.held_ambiguities)
            .and_then(|_| filter.apply_epoch_with_recovery(&measurements, GATE_SIGMA));

        let applied = match applied {
            Ok(n) => n,
            Err(e) => {
                warn!("filter recovery failed at {t:?}: {e}, reinitializing from SPP");
                filter.reinitialize_from_spp(&self.cfg, spp_solution.position_ecef);
                self.held_ambiguities.clear();
                0
            }
        };

        let mut ratio = 0.0;
        if self.cfg.mode == Mode::Rtk && self.cfg.ambiguity_resolution != crate::cfg::AmbiguityResolution::Off {
            match filter.try_fix_ambiguities(&self.cfg) {
                Ok(Some(fix)) => {
                    ratio = fix.ratio;
                    if filter.ar_state == ArState::Hold {
                        self.held_ambiguities = fix.fixed;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("ambiguity resolution failed at {t:?}: {e}"),
            }
        }

        solution_from_filter(t, filter, &spp_solution, applied, age_s, ratio, &self.cfg)
    }

    /// Runs a full forward pass over a pre-sorted epoch stream, returning
    /// one [Solution] per tick (§4.6).
    pub fn run_forward<'a, I>(&mut self, epochs: I) -> Vec<Solution>
    where
        I: IntoIterator<Item = (Epoch, StationEpoch<'a>, Option<(StationEpoch<'a>, Vector3<f64>)>)>,
    {
        epochs
            .into_iter()
            .map(|(t, rover, base)| self.process_epoch(t, rover, base))
            .collect()
    }
}

fn solution_from_spp(t: Epoch, spp: &spp::SppSolution, age_s: f64) -> Solution {
    let mut sol = Solution::none(t);
    sol.rr[0] = spp.position_ecef.x;
    sol.rr[1] = spp.position_ecef.y;
    sol.rr[2] = spp.position_ecef.z;
    sol.qr[0] = 0.0;
    sol.qr[1] = 0.0;
    sol.qr[2] = 0.0;
    sol.status = Status::Single;
    sol.nsats = spp.contributions.len();
    sol.age_s = age_s;
    for (i, (_, bias)) in spp.clock_bias_s.iter().enumerate().take(6) {
        sol.dtr[i] = *bias;
    }
    sol
}

fn solution_from_filter(
    t: Epoch,
    filter: &Filter,
    spp: &spp::SppSolution,
    measurements_applied: usize,
    age_s: f64,
    ratio: f64,
    cfg: &Config,
) -> Solution {
    let mut sol = Solution::none(t);
    let pos = filter.position_ecef();
    sol.rr[0] = pos.x;
    sol.rr[1] = pos.y;
    sol.rr[2] = pos.z;
    if let Some(v) = filter.velocity_ecef() {
        sol.rr[3] = v.x;
        sol.rr[4] = v.y;
        sol.rr[5] = v.z;
    }
    let pcov = filter.position_covariance();
    sol.qr = [pcov[0][0], pcov[1][1], pcov[2][2], pcov[0][1], pcov[1][2], pcov[2][0]];
    sol.dtr[0] = filter.clock_bias_m(Constellation::GPS) / SPEED_OF_LIGHT;
    sol.nsats = spp.contributions.len();
    sol.age_s = age_s;
    sol.ratio = ratio;
    sol.status = match (cfg.mode, filter.ar_state) {
        (Mode::Ppp, _) => Status::Ppp,
        (Mode::Rtk, ArState::Fixed) | (Mode::Rtk, ArState::Hold) => Status::Fix,
        (Mode::Rtk, _) => Status::Float,
        (Mode::Single, _) => Status::Single,
    };
    if measurements_applied == 0 && sol.status != Status::Single {
        sol.status = Status::Float;
    }
    sol
}

/// Builds one undifferenced measurement per usable (satellite, signal),
/// running cycle-slip detection first and resetting the affected ambiguity
/// state on a detected slip (§4.5 "Measurement update", "Cycle-slip
/// detection").
fn build_undifferenced_measurements(
    t: Epoch,
    rover: StationEpoch,
    filter: &mut Filter,
    nav: &NavStore,
    cfg: &Config,
    klobuchar: Option<&KlobucharCoefficients>,
) -> Vec<Measurement> {
    let receiver_ecef = filter.position_ecef();
    let geodetic = ecef2geodetic(receiver_ecef);
    let (lat_rad, lon_rad, height_m) = (geodetic.x, geodetic.y, geodetic.z);

    let mut measurements = Vec::new();

    for obs in rover {
        let Ok(eph) = nav.select(obs.sv, t) else {
            continue;
        };
        let Ok(sat_state) = eph.state_at(t) else {
            continue;
        };
        let los = line_of_sight(receiver_ecef, lat_rad, lon_rad, sat_state.position);
        if los.elevation_rad < cfg.elevation_mask_rad {
            continue;
        }

        let primary = obs.signals.iter().find(|s| s.code.is_primary());
        let secondary = obs.signals.iter().find(|s| !s.code.is_primary());

        let gf = match (primary.and_then(|s| s.carrier_phase_m()), secondary.and_then(|s| s.carrier_phase_m())) {
            (Some(p1), Some(p2)) => Some(geometry_free_combination_m(p1, p2)),
            _ => None,
        };
        let mw = match (primary, secondary) {
            (Some(p1), Some(p2)) => match (p1.carrier_phase_cycles, p2.carrier_phase_cycles, p1.pseudorange_m, p2.pseudorange_m) {
                (Some(c1), Some(c2), Some(pr1), Some(pr2)) => Some(melbourne_wubbena_cycles(
                    c1, c2, pr1, pr2, p1.code.frequency_hz(), p2.code.frequency_hz(),
                )),
                _ => None,
            },
            _ => None,
        };
        let lli_slip = primary.map(|s| s.has_slip_flag()).unwrap_or(false);

        let slip_cause = {
            let status = filter
                .sat_status
                .entry(obs.sv)
                .or_insert_with(|| SatelliteStatus::new(obs.sv));
            status.update_geometry(los.elevation_rad, los.azimuth_rad);

            let (doppler_predicted_m, doppler_observed_m) = match primary {
                Some(p) => match (p.carrier_phase_m(), p.doppler_hz) {
                    (Some(phase_m), Some(doppler_hz)) => status
                        .doppler_deltas_m(t, phase_m, doppler_hz, p.code.wavelength_m())
                        .map_or((None, None), |(pred, obs)| (Some(pred), Some(obs))),
                    _ => (None, None),
                },
                None => (None, None),
            };

            let cause = status.detect_slip(lli_slip, gf, mw, doppler_predicted_m, doppler_observed_m);
            if cause.is_some() {
                status.reset_ambiguity_tracking();
            }
            cause
        };

        if let Some(cause) = slip_cause {
            warn!("slip on {:?}: {:?}", obs.sv, cause);
            for signal in &obs.signals {
                filter.remove_ambiguity(obs.sv, signal.code);
            }
        }

        let status = filter
            .sat_status
            .entry(obs.sv)
            .or_insert_with(|| SatelliteStatus::new(obs.sv));
        status.update_combinations(gf, mw);
        status.mark_seen();
        if let Some(phase_m) = primary.and_then(|p| p.carrier_phase_m()) {
            status.record_primary_phase(t, phase_m);
        }

        let range = if cfg.modeling.earth_rotation {
            sagnac_corrected_range(receiver_ecef, sat_state.position)
        } else {
            (sat_state.position - receiver_ecef).norm()
        };
        let tropo = saastamoinen_delay_m(lat_rad, height_m, los.elevation_rad);
        let clock_offset = filter.clock_bias_m(obs.sv.constellation);
        let clock_index = filter.clock_index(obs.sv.constellation);
        let tropo_partial = match cfg.modeling.tropo {
            TropoOpt::Off => None,
            TropoOpt::Estimate | TropoOpt::EstimateGradients => {
                filter.tropo_index().map(|idx| (idx, tropo_mapping_function(los.elevation_rad)))
            }
        };

        for signal in &obs.signals {
            let iono = match cfg.modeling.iono {
                IonoOpt::Estimate => {
                    filter.ensure_iono(obs.sv);
                    None
                }
                IonoOpt::Broadcast => klobuchar.map(|coeffs| {
                    klobuchar_delay_m(
                        coeffs, lat_rad, lon_rad, los.elevation_rad, los.azimuth_rad,
                        t.to_gpst_seconds().rem_euclid(604_800.0),
                    ).delay_m
                }),
                IonoOpt::IonoFree => Some(0.0),
            };
            let iono_delay_m = iono.unwrap_or(0.0);

            let sin_el = los.elevation_rad.sin().max(1.0e-3);
            let phase_noise2 = PHASE_NOISE_A_M * PHASE_NOISE_A_M
                + PHASE_NOISE_B_M * PHASE_NOISE_B_M / (sin_el * sin_el);

            if let Some(pr_m) = signal.pseudorange_m {
                let predicted = range + clock_offset - sat_state.clock_bias_s * SPEED_OF_LIGHT
                    + tropo.delay_m + iono_delay_m;
                let mut h_fixed = vec![0.0; filter.fixed_len()];
                h_fixed[0] = -los.unit_vector_ecef.x;
                h_fixed[1] = -los.unit_vector_ecef.y;
                h_fixed[2] = -los.unit_vector_ecef.z;
                h_fixed[clock_index] = 1.0;
                if let Some((idx, mapping)) = tropo_partial {
                    h_fixed[idx] = mapping;
                }
                measurements.push(Measurement {
                    h_fixed,
                    iono: if cfg.modeling.iono == IonoOpt::Estimate { Some((obs.sv, 1.0)) } else { None },
                    ambiguity: None,
                    residual: pr_m - predicted,
                    variance: phase_noise2 * CODE_PHASE_ERROR_RATIO * CODE_PHASE_ERROR_RATIO,
                });
            }

            if let Some(phase_m) = signal.carrier_phase_m() {
                if !filter.has_ambiguity(obs.sv, signal.code) {
                    let initial_cycles = (phase_m - (range + clock_offset
                        - sat_state.clock_bias_s * SPEED_OF_LIGHT + tropo.delay_m - iono_delay_m))
                        / signal.code.wavelength_m();
                    filter.ensure_ambiguity(obs.sv, signal.code, initial_cycles);
                }
                let predicted = range + clock_offset - sat_state.clock_bias_s * SPEED_OF_LIGHT
                    + tropo.delay_m - iono_delay_m
                    + filter.ambiguity_value(obs.sv, signal.code).unwrap_or(0.0) * signal.code.wavelength_m();
                let mut h_fixed = vec![0.0; filter.fixed_len()];
                h_fixed[0] = -los.unit_vector_ecef.x;
                h_fixed[1] = -los.unit_vector_ecef.y;
                h_fixed[2] = -los.unit_vector_ecef.z;
                h_fixed[clock_index] = 1.0;
                if let Some((idx, mapping)) = tropo_partial {
                    h_fixed[idx] = mapping;
                }
                measurements.push(Measurement {
                    h_fixed,
                    iono: if cfg.modeling.iono == IonoOpt::Estimate { Some((obs.sv, -1.0)) } else { None },
                    ambiguity: Some((obs.sv, signal.code, signal.code.wavelength_m())),
                    residual: phase_m - predicted,
                    variance: phase_noise2,
                });
            }
        }
    }

    measurements
}

/// Builds double-differenced measurements for RTK (§4.5): a per-
/// constellation reference satellite (highest elevation) is subtracted from
/// every other tracked satellite's undifferenced equation, cancelling the
/// receiver clock terms on both ends.
fn build_double_difference_measurements(
    t: Epoch,
    rover: StationEpoch,
    base: StationEpoch,
    base_ecef: Vector3<f64>,
    filter: &mut Filter,
    nav: &NavStore,
    cfg: &Config,
) -> Vec<Measurement> {
    let receiver_ecef = filter.position_ecef();
    let geodetic = ecef2geodetic(receiver_ecef);
    let (lat_rad, lon_rad, _height_m) = (geodetic.x, geodetic.y, geodetic.z);

    struct Row {
        sv: SV,
        code: Code,
        elevation_rad: f64,
        rover_range: f64,
        base_range: f64,
        rover_pr: Option<f64>,
        base_pr: Option<f64>,
        rover_phase: Option<f64>,
        base_phase: Option<f64>,
        los: crate::geometry::LineOfSight,
    }

    let mut rows: HashMap<Constellation, Vec<Row>> = HashMap::new();

    for robs in rover {
        let Some(bobs) = base.iter().find(|b| b.sv == robs.sv) else {
            continue;
        };
        let Ok(eph) = nav.select(robs.sv, t) else {
            continue;
        };
        let Ok(sat_state) = eph.state_at(t) else {
            continue;
        };
        let los = line_of_sight(receiver_ecef, lat_rad, lon_rad, sat_state.position);
        if los.elevation_rad < cfg.elevation_mask_rad {
            continue;
        }
        let rover_range = if cfg.modeling.earth_rotation {
            sagnac_corrected_range(receiver_ecef, sat_state.position)
        } else {
            (sat_state.position - receiver_ecef).norm()
        };
        let base_range = if cfg.modeling.earth_rotation {
            sagnac_corrected_range(base_ecef, sat_state.position)
        } else {
            (sat_state.position - base_ecef).norm()
        };

        for code in [Code::L1, Code::L2, Code::E1, Code::E5a] {
            let r = robs.signal(code);
            let b = bobs.signal(code);
            if r.is_none() && b.is_none() {
                continue;
            }
            rows.entry(robs.sv.constellation).or_default().push(Row {
                sv: robs.sv,
                code,
                elevation_rad: los.elevation_rad,
                rover_range,
                base_range,
                rover_pr: r.and_then(|s| s.pseudorange_m),
                base_pr: b.and_then(|s| s.pseudorange_m),
                rover_phase: r.and_then(|s| s.carrier_phase_m()),
                base_phase: b.and_then(|s| s.carrier_phase_m()),
                los,
            });
        }
    }

    let mut measurements = Vec::new();

    for (_, mut system_rows) in rows {
        system_rows.sort_by(|a, b| b.elevation_rad.partial_cmp(&a.elevation_rad).unwrap());
        let Some((reference, others)) = system_rows.split_first() else {
            continue;
        };
        if reference.rover_pr.is_none() && reference.rover_phase.is_none() {
            continue;
        }

        for row in others {
            if row.code != reference.code {
                continue;
            }
            let sin_el = row.elevation_rad.sin().max(1.0e-3);
            let phase_noise2 =
                2.0 * (PHASE_NOISE_A_M * PHASE_NOISE_A_M + PHASE_NOISE_B_M * PHASE_NOISE_B_M / (sin_el * sin_el));

            let mut h_fixed = vec![0.0; filter.fixed_len()];
            h_fixed[0] = -(row.los.unit_vector_ecef.x - reference.los.unit_vector_ecef.x);
            h_fixed[1] = -(row.los.unit_vector_ecef.y - reference.los.unit_vector_ecef.y);
            h_fixed[2] = -(row.los.unit_vector_ecef.z - reference.los.unit_vector_ecef.z);

            if let (Some(r_pr), Some(b_pr), Some(ref_r_pr), Some(ref_b_pr)) =
                (row.rover_pr, row.base_pr, reference.rover_pr, reference.base_pr)
            {
                let dd_observed = (r_pr - b_pr) - (ref_r_pr - ref_b_pr);
                let dd_predicted = (row.rover_range - row.base_range)
                    - (reference.rover_range - reference.base_range);
                measurements.push(Measurement {
                    h_fixed: h_fixed.clone(),
                    iono: None,
                    ambiguity: None,
                    residual: dd_observed - dd_predicted,
                    variance: phase_noise2 * CODE_PHASE_ERROR_RATIO * CODE_PHASE_ERROR_RATIO,
                });
            }

            if let (Some(r_ph), Some(b_ph), Some(ref_r_ph), Some(ref_b_ph)) =
                (row.rover_phase, row.base_phase, reference.rover_phase, reference.base_phase)
            {
                let dd_observed = (r_ph - b_ph) - (ref_r_ph - ref_b_ph);
                let dd_geometric = (row.rover_range - row.base_range)
                    - (reference.rover_range - reference.base_range);

                if !filter.has_ambiguity(row.sv, row.code) {
                    let initial_cycles = (dd_observed - dd_geometric) / row.code.wavelength_m();
                    filter.ensure_ambiguity(row.sv, row.code, initial_cycles);
                }
                let predicted = dd_geometric
                    + filter.ambiguity_value(row.sv, row.code).unwrap_or(0.0) * row.code.wavelength_m();

                measurements.push(Measurement {
                    h_fixed,
                    iono: None,
                    ambiguity: Some((row.sv, row.code, row.code.wavelength_m())),
                    residual: dd_observed - predicted,
                    variance: phase_noise2,
                });
            }
        }
    }

    measurements
}

/// Merges a forward-pass and a backward-pass solution for the same epoch by
/// inverse-variance weighting of the diagonal position covariance, per
/// §4.6: `C = (P_f^-1 + P_b^-1)^-1`.
pub fn merge_forward_backward(forward: &Solution, backward: &Solution) -> Solution {
    let mut merged = forward.clone();
    for i in 0..3 {
        let pf = forward.qr[i].max(1.0e-9);
        let pb = backward.qr[i].max(1.0e-9);
        let wf = 1.0 / pf;
        let wb = 1.0 / pb;
        let pc = 1.0 / (wf + wb);
        merged.rr[i] = pc * (forward.rr[i] * wf + backward.rr[i] * wb);
        merged.qr[i] = pc;
    }
    merged.age_s = forward.age_s.min(backward.age_s);
    merged.nsats = forward.nsats.max(backward.nsats);
    merged
}

/// Runs a backward pass by time-reversing a pre-collected forward-pass
/// epoch list and re-running [Pipeline::process_epoch] with a fresh
/// pipeline, then merges the two per-epoch with [merge_forward_backward]
/// (§4.6 "Forward/backward/combined solutions").
pub fn run_combined<'a>(
    cfg: Config,
    nav: NavStore,
    klobuchar: Option<KlobucharCoefficients>,
    epochs: &[(Epoch, StationEpoch<'a>, Option<(StationEpoch<'a>, Vector3<f64>)>)],
) -> Result<Vec<Solution>, Error> {
    let mut forward_pipeline = Pipeline::new(cfg.clone(), nav.clone(), klobuchar.clone())?;
    let forward: Vec<Solution> = epochs
        .iter()
        .map(|(t, rover, base)| forward_pipeline.process_epoch(*t, rover, *base))
        .collect();

    let mut backward_pipeline = Pipeline::new(cfg, nav, klobuchar)?;
    let mut backward: Vec<Solution> = epochs
        .iter()
        .rev()
        .map(|(t, rover, base)| backward_pipeline.process_epoch(*t, rover, *base))
        .collect();
    backward.reverse();

    Ok(forward
        .iter()
        .zip(backward.iter())
        .map(|(f, b)| merge_forward_backward(f, b))
        .collect())
}

/// Snaps `t` to the nearest processing tick and reports whether this epoch
/// should be processed at all (§4.6: "for each epoch tick ... snapped to
/// multiples of `ti` within tolerance DTTOL").
pub fn should_process(t: Epoch, origin: Epoch, cfg: &Config) -> Option<Epoch> {
    crate::time::snap_to_tick(t, origin, Duration::from_seconds(cfg.interval_s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ephemeris::{Ephemeris, KeplerianEphemeris};
    use crate::observation::SignalObservation;
    use gnss::prelude::Constellation;

    fn epoch(week: u32, tow: f64) -> Epoch {
        Epoch::from_gpst_seconds(week as f64 * 604_800.0 + tow)
    }

    fn sample_ephemeris(sv: SV, toe: Epoch) -> Ephemeris {
        Ephemeris::Keplerian(KeplerianEphemeris {
            sv,
            toe,
            toc: toe,
            toe_tow_s: 0.0,
            sqrt_a: 5153.7,
            e: 0.01,
            i0: 0.95,
            idot: 0.0,
            omega0: 0.0,
            omega_dot: -8.0e-9,
            omega: 0.0,
            m0: 0.0,
            delta_n: 0.0,
            cuc: 0.0,
            cus: 0.0,
            crc: 0.0,
            crs: 0.0,
            cic: 0.0,
            cis: 0.0,
            af0: 0.0,
            af1: 0.0,
            af2: 0.0,
            tgd: [0.0; 6],
            ura: 0,
            health: 0,
            iode: 1,
        })
    }

    fn build_obs(t: Epoch, sv: SV) -> Observation {
        let mut o = Observation::new(t, sv);
        let mut s = SignalObservation::new(Code::L1);
        s.pseudorange_m = Some(22_000_000.0);
        o = o.with_signal(s);
        o
    }

    #[test]
    fn single_mode_with_too_few_satellites_reports_none_status() {
        let t = epoch(2200, 100.0);
        let nav = NavStore::new();
        let cfg = Config::default();
        let mut pipeline = Pipeline::new(cfg, nav, None).expect("valid config");
        let obs = vec![build_obs(t, SV::new(Constellation::GPS, 1))];
        let sol = pipeline.process_epoch(t, &obs, None);
        assert_eq!(sol.status, Status::None);
    }

    #[test]
    fn rejects_config_with_no_constellations() {
        let mut cfg = Config::default();
        cfg.constellations.clear();
        let nav = NavStore::new();
        assert!(Pipeline::new(cfg, nav, None).is_err());
    }

    #[test]
    fn merge_forward_backward_reduces_or_matches_variance() {
        let t = epoch(2200, 0.0);
        let mut f = Solution::none(t);
        f.rr = [100.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        f.qr = [4.0, 1.0, 1.0, 0.0, 0.0, 0.0];
        let mut b = Solution::none(t);
        b.rr = [102.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        b.qr = [4.0, 1.0, 1.0, 0.0, 0.0, 0.0];

        let merged = merge_forward_backward(&f, &b);
        assert!(merged.qr[0] <= f.qr[0]);
        assert!(merged.qr[0] <= b.qr[0]);
        assert!((merged.rr[0] - 101.0).abs() < 1.0e-9);
    }

    #[test]
    fn unusable_base_pair_falls_back_to_empty_dd_measurements_without_panicking() {
        let t = epoch(2200, 100.0);
        let mut nav = NavStore::new();
        let sv = SV::new(Constellation::GPS, 3);
        nav.insert(sample_ephemeris(sv, t));
        let cfg = Config::default();
        let mut filter = Filter::new(&cfg, Vector3::new(0.0, 0.0, 0.0));
        let rover = vec![build_obs(t, sv)];
        let base = vec![build_obs(t, sv)];
        let measurements = build_double_difference_measurements(
            t, &rover, &base, Vector3::new(10.0, 0.0, 0.0), &mut filter, &nav, &cfg,
        );
        assert!(measurements.is_empty(), "a single tracked satellite has no other row to pair with the reference");
    }
}
