//! RTK/PPP extended Kalman filter (§4.5): dynamic state layout, time
//! update, measurement update with outlier gating, and LAMBDA-backed
//! ambiguity fixing with fix-and-hold.
//!
//! The state vector is split into a small fixed block (position, and
//! optionally velocity/acceleration, one receiver clock per constellation,
//! optionally troposphere parameters) and a variable-length block of
//! per-satellite slots (ionosphere delay, carrier ambiguities) that grow
//! and shrink as satellites rise, set, or slip. [Layout] describes the
//! fixed block; [Filter::dynamic_slots] tracks the variable one.

use std::collections::HashMap;

use gnss::prelude::{Constellation, SV};
use nalgebra::{DMatrix, DVector};
use thiserror::Error;

extern crate gnss_rs as gnss;

use crate::cfg::{AmbiguityResolution, Config, Dynamics, TropoOpt};
use crate::lambda::{self, lambda};
use crate::observation::Code;
use crate::sat::SatelliteStatus;

/// Initial position variance, m^2, applied to a freshly (re)initialized
/// filter (§4.5 step 1).
const INITIAL_POSITION_VARIANCE_M2: f64 = 100.0 * 100.0;
/// Initial velocity/acceleration variance for a newly engaged dynamic term.
const INITIAL_KINEMATIC_VARIANCE: f64 = 10.0 * 10.0;
/// Initial per-constellation clock bias variance, m^2.
const INITIAL_CLOCK_VARIANCE_M2: f64 = 1.0e8;
/// Initial zenith wet delay variance, m^2.
const INITIAL_TROPO_VARIANCE_M2: f64 = 0.3 * 0.3;
/// Initial slant ionosphere delay variance, m^2.
const INITIAL_IONO_VARIANCE_M2: f64 = 10.0 * 10.0;
/// Initial ambiguity variance before any measurement has touched it: (60 m)^2
/// converted to cycles^2 by the caller supplying a wavelength (§4.5 step 1).
const INITIAL_AMBIGUITY_BASE_VARIANCE_M2: f64 = 60.0 * 60.0;
/// Variance an ambiguity collapses to once fixed (§4.5 step 4).
const FIXED_AMBIGUITY_VARIANCE_CYCLES2: f64 = 1.0e-6;
/// Consecutive non-positive-definite covariance updates tolerated before the
/// filter reports [Error::NonPositiveDefinite] for the caller to reinitialize
/// (§7).
const MAX_CONSECUTIVE_NON_PD: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum Error {
    #[error("covariance update {0} failed positive-definiteness")]
    NonPositiveDefinite(u32),
    #[error("state/measurement dimension mismatch")]
    DimensionMismatch,
    #[error("ambiguity resolution: {0}")]
    Ambiguity(#[from] lambda::Error),
}

/// Ambiguity-resolution lifecycle of the filter as a whole (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArState {
    /// Just (re)initialized, no ambiguities have enough lock yet.
    #[default]
    Reset,
    /// Ambiguities are accumulating lock count toward `minlock`.
    Warm,
    /// Float solution only; search is attempted but has not met the ratio
    /// threshold for `minfix` consecutive epochs.
    Float,
    /// Ambiguities fixed this epoch.
    Fixed,
    /// Fixed and held: the integer is injected as a soft measurement across
    /// epochs ([AmbiguityResolution::FixAndHold]).
    Hold,
}

/// Layout of the fixed-length part of the state vector (§4.5 step 1).
#[derive(Debug, Clone, PartialEq)]
struct Layout {
    dynamics: Dynamics,
    clocks: Vec<Constellation>,
    tropo: TropoOpt,
}

impl Layout {
    fn new(cfg: &Config) -> Self {
        let mut clocks = cfg.constellations.clone();
        if clocks.is_empty() {
            clocks.push(Constellation::GPS);
        }
        Self {
            dynamics: cfg.dynamics,
            clocks,
            tropo: cfg.modeling.tropo,
        }
    }

    fn tropo_params(&self) -> usize {
        match self.tropo {
            TropoOpt::Off => 0,
            TropoOpt::Estimate => 1,
            TropoOpt::EstimateGradients => 3,
        }
    }

    fn velocity_offset(&self) -> usize {
        3
    }

    fn acceleration_offset(&self) -> usize {
        self.velocity_offset() + if self.dynamics.carries_velocity() { 3 } else { 0 }
    }

    fn clock_offset(&self) -> usize {
        self.acceleration_offset() + if self.dynamics.carries_acceleration() { 3 } else { 0 }
    }

    fn tropo_offset(&self) -> usize {
        self.clock_offset() + self.clocks.len()
    }

    fn fixed_len(&self) -> usize {
        self.tropo_offset() + self.tropo_params()
    }

    fn clock_index(&self, c: Constellation) -> usize {
        self.clock_offset()
            + self
                .clocks
                .iter()
                .position(|k| *k == c)
                .unwrap_or(0)
    }
}

/// A slot in the variable-length part of the state vector, keyed by what it
/// represents rather than by position (positions shift as slots come and
/// go) (§4.5 step 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum DynamicKey {
    Iono(SV),
    Ambiguity(SV, Code),
}

/// Result of a LAMBDA fix attempt that cleared the ratio test (§4.5 step 4).
#[derive(Debug, Clone, PartialEq)]
pub struct FixResult {
    pub fixed: HashMap<(SV, Code), f64>,
    pub ratio: f64,
}

/// A single scalar measurement row against the filter state, already
/// linearized (§4.5 step 3). Undifferenced vs. double-differenced
/// observation formation lives with the caller; this type is agnostic to
/// where the row came from.
pub struct Measurement {
    /// Partial derivatives with respect to the fixed state block (length
    /// must equal [Filter::fixed_len]).
    pub h_fixed: Vec<f64>,
    /// Partial derivative with respect to a per-satellite ionosphere slot,
    /// ensured present via [Filter::ensure_iono] before this is built.
    pub iono: Option<(SV, f64)>,
    /// Partial derivative with respect to a carrier ambiguity slot, ensured
    /// present via [Filter::ensure_ambiguity] before this is built.
    pub ambiguity: Option<(SV, Code, f64)>,
    /// Observed minus computed, in the measurement's native unit.
    pub residual: f64,
    /// Measurement noise variance.
    pub variance: f64,
}

/// The RTK/PPP extended Kalman filter state (§4.5).
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    layout: Layout,
    x: DVector<f64>,
    p: DMatrix<f64>,
    dynamic_slots: Vec<DynamicKey>,
    index_of: HashMap<DynamicKey, usize>,
    pub sat_status: HashMap<SV, SatelliteStatus>,
    pub ar_state: ArState,
    fixed_consecutive: u32,
    consecutive_non_pd: u32,
}

impl Filter {
    /// Builds a fresh filter seeded at `seed_position` (ECEF meters), with
    /// all dynamic/clock/tropo terms at zero and large initial variances
    /// (§4.5 step 1).
    pub fn new(cfg: &Config, seed_position: nalgebra::Vector3<f64>) -> Self {
        let layout = Layout::new(cfg);
        let n = layout.fixed_len();
        let mut x = DVector::<f64>::zeros(n);
        x[0] = seed_position.x;
        x[1] = seed_position.y;
        x[2] = seed_position.z;

        let mut p = DMatrix::<f64>::zeros(n, n);
        for i in 0..3 {
            p[(i, i)] = INITIAL_POSITION_VARIANCE_M2;
        }
        if layout.dynamics.carries_velocity() {
            let off = layout.velocity_offset();
            for i in 0..3 {
                p[(off + i, off + i)] = INITIAL_KINEMATIC_VARIANCE;
            }
        }
        if layout.dynamics.carries_acceleration() {
            let off = layout.acceleration_offset();
            for i in 0..3 {
                p[(off + i, off + i)] = INITIAL_KINEMATIC_VARIANCE;
            }
        }
        for i in 0..layout.clocks.len() {
            let idx = layout.clock_offset() + i;
            p[(idx, idx)] = INITIAL_CLOCK_VARIANCE_M2;
        }
        for i in 0..layout.tropo_params() {
            let idx = layout.tropo_offset() + i;
            p[(idx, idx)] = INITIAL_TROPO_VARIANCE_M2;
        }

        Self {
            layout,
            x,
            p,
            dynamic_slots: Vec::new(),
            index_of: HashMap::new(),
            sat_status: HashMap::new(),
            ar_state: ArState::Reset,
            fixed_consecutive: 0,
            consecutive_non_pd: 0,
        }
    }

    pub fn fixed_len(&self) -> usize {
        self.layout.fixed_len()
    }

    pub fn position_ecef(&self) -> nalgebra::Vector3<f64> {
        nalgebra::Vector3::new(self.x[0], self.x[1], self.x[2])
    }

    pub fn velocity_ecef(&self) -> Option<nalgebra::Vector3<f64>> {
        if self.layout.dynamics.carries_velocity() {
            let off = self.layout.velocity_offset();
            Some(nalgebra::Vector3::new(self.x[off], self.x[off + 1], self.x[off + 2]))
        } else {
            None
        }
    }

    pub fn clock_bias_m(&self, c: Constellation) -> f64 {
        self.x[self.layout.clock_index(c)]
    }

    /// State-vector index of the receiver clock bias for `c`, so a
    /// measurement builder can set that column's partial to `+1.0` (§4.5
    /// step 3: the receiver clock is an estimated state, not folded into
    /// the residual).
    pub fn clock_index(&self, c: Constellation) -> usize {
        self.layout.clock_index(c)
    }

    /// State-vector index of the (first) estimated zenith wet delay term,
    /// when [TropoOpt::Estimate] or [TropoOpt::EstimateGradients] is
    /// active; `None` when the troposphere is not a filter state.
    pub fn tropo_index(&self) -> Option<usize> {
        if self.layout.tropo_params() > 0 {
            Some(self.layout.tropo_offset())
        } else {
            None
        }
    }

    pub fn position_covariance(&self) -> [[f64; 3]; 3] {
        let mut out = [[0.0; 3]; 3];
        for i in 0..3 {
            for j in 0..3 {
                out[i][j] = self.p[(i, j)];
            }
        }
        out
    }

    fn total_len(&self) -> usize {
        self.layout.fixed_len() + self.dynamic_slots.len()
    }

    /// Time update: propagates the fixed kinematic/clock/tropo block by
    /// `dt_s` with a constant-velocity/acceleration transition, and adds
    /// per-term process noise (§4.5 step 2). Dynamic slots (ionosphere,
    /// ambiguities) are carried with no process noise beyond ionosphere's
    /// elevation-scaled random walk, since they are differenced quantities
    /// that do not otherwise evolve between epochs.
    pub fn predict(&mut self, dt_s: f64, cfg: &Config) {
        if dt_s <= 0.0 {
            return;
        }
        let n = self.total_len();
        let mut phi = DMatrix::<f64>::identity(n, n);

        if self.layout.dynamics.carries_velocity() {
            let v_off = self.layout.velocity_offset();
            for i in 0..3 {
                phi[(i, v_off + i)] = dt_s;
            }
        }
        if self.layout.dynamics.carries_acceleration() {
            let v_off = self.layout.velocity_offset();
            let a_off = self.layout.acceleration_offset();
            for i in 0..3 {
                phi[(i, a_off + i)] = 0.5 * dt_s * dt_s;
                phi[(v_off + i, a_off + i)] = dt_s;
            }
        }

        self.x = &phi * &self.x;
        self.p = &phi * &self.p * phi.transpose();

        let mut q = DMatrix::<f64>::zeros(n, n);
        match self.layout.dynamics {
            Dynamics::Static => {
                const SIGMA_POS_RW_M: f64 = 1.0e-3;
                for i in 0..3 {
                    q[(i, i)] = SIGMA_POS_RW_M * SIGMA_POS_RW_M * dt_s;
                }
            }
            Dynamics::Kinematic => {
                const SIGMA_VEL_RW_M_S: f64 = 1.0;
                let v_off = self.layout.velocity_offset();
                for i in 0..3 {
                    q[(v_off + i, v_off + i)] = SIGMA_VEL_RW_M_S * SIGMA_VEL_RW_M_S * dt_s;
                }
            }
            Dynamics::Dynamic => {
                const SIGMA_ACC_RW_M_S2: f64 = 1.0;
                let a_off = self.layout.acceleration_offset();
                for i in 0..3 {
                    q[(a_off + i, a_off + i)] = SIGMA_ACC_RW_M_S2 * SIGMA_ACC_RW_M_S2 * dt_s;
                }
            }
        }

        const SIGMA_CLOCK_RW_M: f64 = 10.0;
        for i in 0..self.layout.clocks.len() {
            let idx = self.layout.clock_offset() + i;
            q[(idx, idx)] = SIGMA_CLOCK_RW_M * SIGMA_CLOCK_RW_M * dt_s;
        }

        const SIGMA_TROPO_RW_M: f64 = 1.0e-4;
        for i in 0..self.layout.tropo_params() {
            let idx = self.layout.tropo_offset() + i;
            q[(idx, idx)] = SIGMA_TROPO_RW_M * SIGMA_TROPO_RW_M * dt_s;
        }

        const SIGMA_IONO_RW_M_PER_SQRT_S: f64 = 1.0e-2;
        for (slot, key) in self.dynamic_slots.iter().enumerate() {
            if let DynamicKey::Iono(sv) = key {
                let idx = self.layout.fixed_len() + slot;
                let elevation = self
                    .sat_status
                    .get(sv)
                    .map(|s| s.elevation_rad.sin().max(0.1))
                    .unwrap_or(1.0);
                let sigma = SIGMA_IONO_RW_M_PER_SQRT_S / elevation;
                q[(idx, idx)] = sigma * sigma * dt_s;
            }
        }

        self.p += q;
        self.symmetrize();
        let _ = cfg;
    }

    fn symmetrize(&mut self) {
        let n = self.p.nrows();
        for i in 0..n {
            for j in (i + 1)..n {
                let avg = 0.5 * (self.p[(i, j)] + self.p[(j, i)]);
                self.p[(i, j)] = avg;
                self.p[(j, i)] = avg;
            }
        }
    }

    fn is_positive_semidefinite(&self) -> bool {
        nalgebra::Cholesky::new(self.p.clone()).is_some()
    }

    /// Appends a new dynamic slot with the given value/variance, leaving all
    /// existing indices untouched (new slots are always appended at the
    /// end) (§4.5 step 1).
    fn append_dynamic(&mut self, key: DynamicKey, value: f64, variance: f64) {
        if self.index_of.contains_key(&key) {
            return;
        }
        let old_n = self.total_len();
        let new_n = old_n + 1;

        let mut x = DVector::<f64>::zeros(new_n);
        x.rows_mut(0, old_n).copy_from(&self.x);
        x[old_n] = value;

        let mut p = DMatrix::<f64>::zeros(new_n, new_n);
        p.view_mut((0, 0), (old_n, old_n)).copy_from(&self.p);
        p[(old_n, old_n)] = variance;

        self.x = x;
        self.p = p;
        self.index_of.insert(key, old_n);
        self.dynamic_slots.push(key);
    }

    /// Removes a dynamic slot, rebuilding the state/covariance around the
    /// gap and recomputing every remaining slot's index (§4.5 step 1, "drop
    /// after `maxout` missed epochs").
    fn remove_dynamic(&mut self, key: DynamicKey) {
        let Some(&slot_index) = self.index_of.get(&key) else {
            return;
        };
        let old_n = self.total_len();
        let new_n = old_n - 1;

        let keep: Vec<usize> = (0..old_n).filter(|&i| i != slot_index).collect();
        let mut x = DVector::<f64>::zeros(new_n);
        let mut p = DMatrix::<f64>::zeros(new_n, new_n);
        for (new_i, &old_i) in keep.iter().enumerate() {
            x[new_i] = self.x[old_i];
            for (new_j, &old_j) in keep.iter().enumerate() {
                p[(new_i, new_j)] = self.p[(old_i, old_j)];
            }
        }

        self.x = x;
        self.p = p;
        self.dynamic_slots.retain(|k| *k != key);
        self.index_of.clear();
        for (i, k) in self.dynamic_slots.iter().enumerate() {
            self.index_of.insert(*k, self.layout.fixed_len() + i);
        }
    }

    /// Ensures a carrier ambiguity slot exists for `(sv, code)`, seeding it
    /// with `initial_cycles` if it does not (§4.5 step 1: "(60 m)^2
    /// converted to cycles" via the code's wavelength).
    pub fn ensure_ambiguity(&mut self, sv: SV, code: Code, initial_cycles: f64) {
        let wavelength_m = code.wavelength_m();
        let variance_cycles2 =
            INITIAL_AMBIGUITY_BASE_VARIANCE_M2 / (wavelength_m * wavelength_m);
        self.append_dynamic(DynamicKey::Ambiguity(sv, code), initial_cycles, variance_cycles2);
    }

    pub fn remove_ambiguity(&mut self, sv: SV, code: Code) {
        self.remove_dynamic(DynamicKey::Ambiguity(sv, code));
    }

    pub fn has_ambiguity(&self, sv: SV, code: Code) -> bool {
        self.index_of.contains_key(&DynamicKey::Ambiguity(sv, code))
    }

    pub fn ambiguity_value(&self, sv: SV, code: Code) -> Option<f64> {
        self.index_of
            .get(&DynamicKey::Ambiguity(sv, code))
            .map(|&i| self.x[i])
    }

    pub fn ensure_iono(&mut self, sv: SV) {
        self.append_dynamic(DynamicKey::Iono(sv), 0.0, INITIAL_IONO_VARIANCE_M2);
    }

    pub fn remove_iono(&mut self, sv: SV) {
        self.remove_dynamic(DynamicKey::Iono(sv));
    }

    fn build_h(&self, m: &Measurement) -> Result<DVector<f64>, Error> {
        if m.h_fixed.len() != self.layout.fixed_len() {
            return Err(Error::DimensionMismatch);
        }
        let mut h = DVector::<f64>::zeros(self.total_len());
        for (i, v) in m.h_fixed.iter().enumerate() {
            h[i] = *v;
        }
        if let Some((sv, coeff)) = m.iono {
            if let Some(&idx) = self.index_of.get(&DynamicKey::Iono(sv)) {
                h[idx] = coeff;
            }
        }
        if let Some((sv, code, coeff)) = m.ambiguity {
            if let Some(&idx) = self.index_of.get(&DynamicKey::Ambiguity(sv, code)) {
                h[idx] = coeff;
            }
        }
        Ok(h)
    }

    /// Applies one scalar measurement with a chi-square innovation gate,
    /// returning `Ok(false)` (state untouched) when the innovation is
    /// rejected as an outlier rather than an error (§4.5 step 3).
    pub fn apply_measurement(&mut self, gate_sigma: f64, m: &Measurement) -> Result<bool, Error> {
        let h = self.build_h(m)?;
        let ph = &self.p * &h;
        let s = (h.transpose() * &ph)[(0, 0)] + m.variance;
        if s <= 0.0 || !s.is_finite() {
            return Err(Error::DimensionMismatch);
        }
        if m.residual.abs() / s.sqrt() > gate_sigma {
            return Ok(false);
        }

        let k = &ph / s;
        self.x += &k * m.residual;

        let n = self.total_len();
        let identity = DMatrix::<f64>::identity(n, n);
        let ikh = &identity - &k * h.transpose();
        self.p = &ikh * &self.p * ikh.transpose() + &k * m.variance * k.transpose();
        self.symmetrize();
        Ok(true)
    }

    /// Applies a batch of measurements, rolling the whole epoch back to its
    /// pre-update state if the resulting covariance fails positive-
    /// definiteness for [MAX_CONSECUTIVE_NON_PD] epochs running (§7).
    /// Returns the number of measurements actually applied (not rejected by
    /// the gate).
    pub fn apply_epoch_with_recovery(
        &mut self,
        measurements: &[Measurement],
        gate_sigma: f64,
    ) -> Result<usize, Error> {
        let x0 = self.x.clone();
        let p0 = self.p.clone();

        let mut applied = 0;
        for m in measurements {
            if self.apply_measurement(gate_sigma, m)? {
                applied += 1;
            }
        }

        if self.is_positive_semidefinite() {
            self.consecutive_non_pd = 0;
            return Ok(applied);
        }

        self.x = x0;
        self.p = p0;
        self.symmetrize();
        self.consecutive_non_pd += 1;
        if self.consecutive_non_pd >= MAX_CONSECUTIVE_NON_PD {
            return Err(Error::NonPositiveDefinite(self.consecutive_non_pd));
        }
        Ok(0)
    }

    /// Discards the dynamic state and resets the fixed block around a fresh
    /// SPP-derived position, for recovery after repeated covariance failure
    /// (§7).
    pub fn reinitialize_from_spp(&mut self, cfg: &Config, position: nalgebra::Vector3<f64>) {
        let fresh = Self::new(cfg, position);
        let sat_status = std::mem::take(&mut self.sat_status);
        *self = fresh;
        self.sat_status = sat_status;
    }

    /// Attempts to resolve the current ambiguity set via LAMBDA, returning
    /// `Ok(None)` when there are fewer than 2 ambiguities to search or the
    /// ratio test fails (§4.5 step 4).
    pub fn try_fix_ambiguities(&mut self, cfg: &Config) -> Result<Option<FixResult>, Error> {
        let ambiguity_keys: Vec<(usize, SV, Code)> = self
            .dynamic_slots
            .iter()
            .enumerate()
            .filter_map(|(i, k)| match k {
                DynamicKey::Ambiguity(sv, code) => {
                    Some((self.layout.fixed_len() + i, *sv, *code))
                }
                _ => None,
            })
            .collect();

        if ambiguity_keys.len() < 2 {
            self.ar_state = ArState::Warm;
            return Ok(None);
        }

        let na = ambiguity_keys.len();
        let mut a = DVector::<f64>::zeros(na);
        let mut q = DMatrix::<f64>::zeros(na, na);
        for (row, (idx_i, ..)) in ambiguity_keys.iter().enumerate() {
            a[row] = self.x[*idx_i];
            for (col, (idx_j, ..)) in ambiguity_keys.iter().enumerate() {
                q[(row, col)] = self.p[(*idx_i, *idx_j)];
            }
        }

        let result = lambda(&a, &q)?;
        if result.ratio() < cfg.ar_ratio_threshold {
            self.ar_state = ArState::Float;
            self.fixed_consecutive = 0;
            return Ok(None);
        }

        let other_indices: Vec<usize> = (0..self.total_len())
            .filter(|i| !ambiguity_keys.iter().any(|(idx, ..)| idx == i))
            .collect();
        let ambiguity_indices: Vec<usize> = ambiguity_keys.iter().map(|(i, ..)| *i).collect();

        let delta_a = &a - &result.best;

        let q_oa = {
            let mut m = DMatrix::<f64>::zeros(other_indices.len(), na);
            for (r, &oi) in other_indices.iter().enumerate() {
                for (c, &ai) in ambiguity_indices.iter().enumerate() {
                    m[(r, c)] = self.p[(oi, ai)];
                }
            }
            m
        };
        let q_aa_inv = q
            .clone()
            .try_inverse()
            .ok_or(lambda::Error::SingularTransform)?;
        let gain = &q_oa * &q_aa_inv;

        for (r, &oi) in other_indices.iter().enumerate() {
            self.x[oi] -= (gain.row(r) * &delta_a)[(0, 0)];
        }
        for (r, &ai) in ambiguity_indices.iter().enumerate() {
            self.x[ai] = result.best[r];
        }

        let mut p_oo_update = DMatrix::<f64>::zeros(other_indices.len(), other_indices.len());
        let schur = &gain * q_oa.transpose();
        for (r, &oi) in other_indices.iter().enumerate() {
            for (c, &oj) in other_indices.iter().enumerate() {
                p_oo_update[(r, c)] = schur[(r, c)];
                self.p[(oi, oj)] -= schur[(r, c)];
            }
        }
        for &oi in &other_indices {
            for &ai in &ambiguity_indices {
                self.p[(oi, ai)] = 0.0;
                self.p[(ai, oi)] = 0.0;
            }
        }
        for (r, &ai) in ambiguity_indices.iter().enumerate() {
            for (c, &aj) in ambiguity_indices.iter().enumerate() {
                self.p[(ai, aj)] = if r == c { FIXED_AMBIGUITY_VARIANCE_CYCLES2 } else { 0.0 };
            }
        }
        self.symmetrize();

        self.fixed_consecutive += 1;
        self.ar_state = if self.fixed_consecutive >= cfg.minfix
            && cfg.ambiguity_resolution == AmbiguityResolution::FixAndHold
        {
            ArState::Hold
        } else {
            ArState::Fixed
        };

        let mut fixed = HashMap::new();
        for (row, (_, sv, code)) in ambiguity_keys.iter().enumerate() {
            fixed.insert((*sv, *code), result.best[row]);
        }
        Ok(Some(FixResult { fixed, ratio: result.ratio() }))
    }

    /// Injects previously-fixed ambiguities back in as tight soft
    /// measurements, anchoring the float solution across epochs while
    /// `ArState::Hold` is active (§4.5 step 5, `varholdamb`).
    pub fn hold_fixed_ambiguities(
        &mut self,
        cfg: &Config,
        held: &HashMap<(SV, Code), f64>,
    ) -> Result<(), Error> {
        if self.ar_state != ArState::Hold {
            return Ok(());
        }
        for (&(sv, code), &value) in held {
            let Some(&idx) = self.index_of.get(&DynamicKey::Ambiguity(sv, code)) else {
                continue;
            };
            let residual = value - self.x[idx];
            let m = Measurement {
                h_fixed: vec![0.0; self.layout.fixed_len()],
                iono: None,
                ambiguity: Some((sv, code, 1.0)),
                residual,
                variance: cfg.ar_hold_variance_cycles2,
            };
            self.apply_measurement(1.0e9, &m)?;
        }
        Ok(())
    }

    pub fn advance_warm_state(&mut self, min_lock_satisfied: bool) {
        if self.ar_state == ArState::Reset && min_lock_satisfied {
            self.ar_state = ArState::Warm;
        }
    }
}
