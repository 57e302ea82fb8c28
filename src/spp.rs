//! Single-point positioning: per-epoch iterated weighted least squares
//! over pseudoranges (§4.4).

use std::collections::HashMap;

use gnss::prelude::{Constellation, SV};
use hifitime::{Duration, Epoch};
use nalgebra::{DMatrix, DVector, Vector3};
use thiserror::Error;

extern crate gnss_rs as gnss;

use crate::atmosphere::{klobuchar_delay_m, saastamoinen_delay_m, KlobucharCoefficients};
use crate::cfg::{Config, IonoOpt};
use crate::coords::{ecef2geodetic, SPEED_OF_LIGHT};
use crate::ephemeris::{Ephemeris, NavStore, SatelliteState};
use crate::geometry::{self, line_of_sight, sagnac_corrected_range, Dop};
use crate::observation::{Code, Observation};

const MAX_ITERATIONS: usize = 10;
const CONVERGENCE_M: f64 = 1.0e-4;

/// Per-epoch failures that degrade the solution to a worse [crate::solution::Status]
/// rather than aborting the run (§4.4, §7).
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum Error {
    #[error("only {available} usable satellite(s), need at least {required}")]
    TooFewSats { available: usize, required: usize },
    #[error("least squares did not converge within {0} iterations")]
    DivergedLS(usize),
    #[error("residual chi-square {chi2} exceeds the threshold {threshold} for {dof} degrees of freedom")]
    Chi2Reject { chi2: f64, threshold: f64, dof: usize },
    #[error("geometry: {0}")]
    Geometry(#[from] geometry::Error),
}

/// One satellite's contribution to the normal equations, retained after
/// solving so the caller can inspect per-satellite residuals (§3
/// "Satellite status").
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SatelliteContribution {
    pub sv: SV,
    pub elevation_rad: f64,
    pub azimuth_rad: f64,
    pub residual_m: f64,
    pub variance_m2: f64,
}

/// Result of a converged, accepted SPP fix (§4.4).
#[derive(Debug, Clone, PartialEq)]
pub struct SppSolution {
    pub position_ecef: Vector3<f64>,
    /// Receiver clock bias per constellation actually used, seconds.
    pub clock_bias_s: HashMap<Constellation, f64>,
    pub dop: Dop,
    pub contributions: Vec<SatelliteContribution>,
    pub iterations: usize,
}

/// Solves for the signal-transmission time by iterating the range
/// equation with the satellite clock bias folded back in (§4.1), uniform
/// across ephemeris kinds.
fn transmission_time(eph: &Ephemeris, t_recv: Epoch, pseudorange_m: f64) -> Result<SatelliteState, crate::ephemeris::Error> {
    let mut t_tx = t_recv - Duration::from_seconds(pseudorange_m / SPEED_OF_LIGHT);
    let mut state = eph.state_at(t_tx)?;
    for _ in 0..3 {
        t_tx = t_recv
            - Duration::from_seconds(pseudorange_m / SPEED_OF_LIGHT)
            - Duration::from_seconds(state.clock_bias_s);
        state = eph.state_at(t_tx)?;
    }
    Ok(state)
}

/// Measurement noise model combining the broadcast ephemeris variance,
/// the applicable atmosphere model variance, and an elevation/SNR-
/// dependent code-noise term (§4.4 step 2).
fn measurement_variance_m2(
    elevation_rad: f64,
    eph_variance_m2: f64,
    atmosphere_variance_m2: f64,
    snr_db_hz: Option<f64>,
) -> f64 {
    const CODE_NOISE_A_M: f64 = 0.3;
    const CODE_NOISE_B_M: f64 = 0.3;
    let sin_el = elevation_rad.sin().max(1.0e-3);
    let elevation_term = CODE_NOISE_A_M * CODE_NOISE_A_M + CODE_NOISE_B_M * CODE_NOISE_B_M / (sin_el * sin_el);
    let snr_term = match snr_db_hz {
        Some(snr) if snr < 30.0 => (30.0 - snr).powi(2) * 0.01,
        _ => 0.0,
    };
    eph_variance_m2 + atmosphere_variance_m2 + elevation_term + snr_term
}

/// One satellite's observation equation ingredients, recomputed every
/// iteration since the apriori position (and therefore elevation,
/// transmission time, and every model) moves (§4.4 step 1-3).
struct Candidate {
    sv: SV,
    code: Code,
    pseudorange_m: f64,
    snr_db_hz: Option<f64>,
}

fn gather_candidates(observations: &[Observation]) -> Vec<Candidate> {
    observations
        .iter()
        .filter_map(|obs| {
            let (code, pr) = obs.preferred_pseudorange()?;
            Some(Candidate {
                sv: obs.sv,
                code,
                pseudorange_m: pr,
                snr_db_hz: obs.max_snr().map(|s| s.db_hz()),
            })
        })
        .collect()
}

/// Iterated weighted least squares single-point fix for one epoch (§4.4).
///
/// `apriori_ecef` seeds the iteration (any position within a few hundred
/// km of truth converges); `klobuchar` supplies broadcast ionosphere
/// coefficients when [crate::cfg::IonoOpt::Broadcast] is configured.
pub fn solve(
    t: Epoch,
    observations: &[Observation],
    nav: &NavStore,
    apriori_ecef: Vector3<f64>,
    cfg: &Config,
    klobuchar: Option<&KlobucharCoefficients>,
) -> Result<SppSolution, Error> {
    let raw_candidates = gather_candidates(observations);

    let mut systems: Vec<Constellation> = Vec::new();
    for c in &raw_candidates {
        if !systems.contains(&c.sv.constellation) {
            systems.push(c.sv.constellation);
        }
    }
    systems.sort_by_key(|c| format!("{c:?}"));

    let nsys = systems.len().max(1);
    let nx = 3 + nsys;
    let mut state = DVector::<f64>::zeros(nx);
    state[0] = apriori_ecef.x;
    state[1] = apriori_ecef.y;
    state[2] = apriori_ecef.z;

    let mut contributions = Vec::new();
    let mut iterations = 0;

    for iter in 0..MAX_ITERATIONS {
        iterations = iter + 1;
        contributions.clear();

        let receiver_ecef = Vector3::new(state[0], state[1], state[2]);
        let geodetic = ecef2geodetic(receiver_ecef);
        let (lat_rad, lon_rad, height_m) = (geodetic.x, geodetic.y, geodetic.z);

        let mut rows: Vec<(DVector<f64>, f64, f64)> = Vec::new();

        for cand in &raw_candidates {
            let Ok(eph) = nav.select(cand.sv, t) else {
                continue;
            };
            let Ok(sat_state) = transmission_time(eph, t, cand.pseudorange_m) else {
                continue;
            };

            let los = line_of_sight(receiver_ecef, lat_rad, lon_rad, sat_state.position);
            if los.elevation_rad < cfg.elevation_mask_rad {
                continue;
            }
            if let Some(snr) = cand.snr_db_hz {
                if snr < cfg.snr_mask_db_hz {
                    continue;
                }
            }

            // Saastamoinen is always applied as the baseline correction;
            // `Modeling::tropo` only controls whether the filter (§4.5)
            // additionally estimates a residual zenith delay on top.
            let tropo = saastamoinen_delay_m(lat_rad, height_m, los.elevation_rad);

            let iono = match cfg.modeling.iono {
                IonoOpt::Broadcast => klobuchar
                    .map(|coeffs| {
                        klobuchar_delay_m(
                            coeffs,
                            lat_rad,
                            lon_rad,
                            los.elevation_rad,
                            los.azimuth_rad,
                            t.to_gpst_seconds().rem_euclid(604_800.0),
                        )
                    })
                    .unwrap_or(crate::atmosphere::AtmosphereDelay {
                        delay_m: 0.0,
                        variance_m2: (5.0_f64).powi(2),
                    }),
                IonoOpt::IonoFree | IonoOpt::Estimate => crate::atmosphere::AtmosphereDelay {
                    delay_m: 0.0,
                    variance_m2: 0.01,
                },
            };

            let range = if cfg.modeling.earth_rotation {
                sagnac_corrected_range(receiver_ecef, sat_state.position)
            } else {
                (sat_state.position - receiver_ecef).norm()
            };

            let sys_idx = systems.iter().position(|s| *s == cand.sv.constellation).unwrap_or(0);
            let clock_bias_rx_s = state[3 + sys_idx.min(nsys - 1)];

            // Broadcast clock polynomials are referenced to L1/E1/B1;
            // the group delay shifts that reference when the flag is
            // cleared (§4.1, single-frequency TGD correction).
            let group_delay_m = if cfg.modeling.sv_total_group_delay {
                SPEED_OF_LIGHT * eph.group_delay_s()
            } else {
                0.0
            };

            let sat_clock_bias_s = if cfg.modeling.sv_clock_bias { sat_state.clock_bias_s } else { 0.0 };

            let predicted = range + SPEED_OF_LIGHT * (clock_bias_rx_s - sat_clock_bias_s)
                + group_delay_m
                + tropo.delay_m
                + iono.delay_m;
            let residual = cand.pseudorange_m - predicted;

            let variance = measurement_variance_m2(
                los.elevation_rad,
                sat_state.variance_m2,
                tropo.variance_m2 + iono.variance_m2,
                cand.snr_db_hz,
            );

            let mut h_row = DVector::<f64>::zeros(nx);
            h_row[0] = -los.unit_vector_ecef.x;
            h_row[1] = -los.unit_vector_ecef.y;
            h_row[2] = -los.unit_vector_ecef.z;
            h_row[3 + sys_idx.min(nsys - 1)] = 1.0;

            rows.push((h_row, residual, variance));

            contributions.push(SatelliteContribution {
                sv: cand.sv,
                elevation_rad: los.elevation_rad,
                azimuth_rad: los.azimuth_rad,
                residual_m: residual,
                variance_m2: variance,
            });
        }

        // §4.4 acceptance criterion: >= 4+Nsys observations, i.e. one more
        // than the `nx = 3+Nsys` unknowns so the chi-square test below
        // always has at least one degree of freedom.
        let required = 4 + nsys;
        if rows.len() < required {
            return Err(Error::TooFewSats { available: rows.len(), required });
        }

        let n = rows.len();
        let mut h = DMatrix::<f64>::zeros(n, nx);
        let mut y = DVector::<f64>::zeros(n);
        let mut w = DVector::<f64>::zeros(n);
        for (i, (row, residual, variance)) in rows.iter().enumerate() {
            h.set_row(i, &row.transpose());
            y[i] = *residual;
            w[i] = 1.0 / variance;
        }

        let wh = {
            let mut scaled = h.clone();
            for i in 0..n {
                for j in 0..nx {
                    scaled[(i, j)] *= w[i];
                }
            }
            scaled
        };
        let hth = h.transpose() * &wh;
        let hty = h.transpose() * DVector::from_iterator(n, (0..n).map(|i| w[i] * y[i]));

        let chol = nalgebra::Cholesky::new(hth.clone());
        let Some(chol) = chol else {
            return Err(Error::DivergedLS(iterations));
        };
        let delta = chol.solve(&hty);

        state += &delta;

        let pos_delta = (delta[0] * delta[0] + delta[1] * delta[1] + delta[2] * delta[2]).sqrt();
        if pos_delta < CONVERGENCE_M {
            let enu_vectors: Vec<Vector3<f64>> = contributions
                .iter()
                .map(|c| {
                    let cos_el = c.elevation_rad.cos();
                    Vector3::new(
                        cos_el * c.azimuth_rad.sin(),
                        cos_el * c.azimuth_rad.cos(),
                        c.elevation_rad.sin(),
                    )
                })
                .collect();
            let dop = geometry::compute_dop(&enu_vectors)?;

            let dof = n.saturating_sub(nx);
            let chi2: f64 = rows
                .iter()
                .map(|(_, residual, variance)| residual * residual / variance)
                .sum();
            let threshold = cfg.chi_square_threshold(dof.max(1));
            if chi2 > threshold {
                return Err(Error::Chi2Reject { chi2, threshold, dof });
            }

            let mut clock_bias_s = HashMap::new();
            for (idx, sys) in systems.iter().enumerate() {
                clock_bias_s.insert(*sys, state[3 + idx] / SPEED_OF_LIGHT);
            }
            if systems.is_empty() {
                clock_bias_s.insert(Constellation::GPS, state[3] / SPEED_OF_LIGHT);
            }

            return Ok(SppSolution {
                position_ecef: Vector3::new(state[0], state[1], state[2]),
                clock_bias_s,
                dop,
                contributions,
                iterations,
            });
        }
    }

    Err(Error::DivergedLS(MAX_ITERATIONS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ephemeris::KeplerianEphemeris;
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

    #[test]
    fn group_delay_is_zero_for_glonass_and_tgd_l1_for_keplerian() {
        let sv = SV::new(Constellation::GPS, 1);
        let mut eph = sample_ephemeris(sv, epoch(2200, 0.0));
        if let Ephemeris::Keplerian(ref mut k) = eph {
            k.tgd = [1.2e-8, 0.0, 0.0, 0.0, 0.0, 0.0];
        }
        assert!((eph.group_delay_s() - 1.2e-8).abs() < 1.0e-12);

        let glonass = Ephemeris::Glonass(crate::ephemeris::GlonassEphemeris {
            sv: SV::new(Constellation::Glonass, 1),
            toe: epoch(2200, 0.0),
            pos: Vector3::new(1.0, 0.0, 0.0),
            vel: Vector3::zeros(),
            lunisolar_accel: Vector3::zeros(),
            tau_n: 0.0,
            gamma_n: 0.0,
            freq_channel: 0,
            health: 0,
        });
        assert_eq!(glonass.group_delay_s(), 0.0);
    }

    #[test]
    fn too_few_candidates_is_reported() {
        let t = epoch(2200, 100.0);
        let nav = NavStore::new();
        let cfg = Config::default();
        let result = solve(t, &[], &nav, Vector3::new(0.0, 0.0, 0.0), &cfg, None);
        assert!(matches!(result, Err(Error::TooFewSats { .. })));
    }

    #[test]
    fn rejects_with_too_few_satellites_even_with_ephemerides_present() {
        let t = epoch(2200, 100.0);
        let mut nav = NavStore::new();
        let mut obs = Vec::new();
        for prn in 1..3 {
            let sv = SV::new(Constellation::GPS, prn);
            nav.insert(sample_ephemeris(sv, t));
            let mut o = Observation::new(t, sv);
            let mut signal = SignalObservation::new(Code::L1);
            signal.pseudorange_m = Some(22_000_000.0);
            o = o.with_signal(signal);
            obs.push(o);
        }
        let cfg = Config::default();
        let result = solve(t, &obs, &nav, Vector3::new(0.0, 0.0, 0.0), &cfg, None);
        assert!(matches!(result, Err(Error::TooFewSats { .. })));
    }
}
