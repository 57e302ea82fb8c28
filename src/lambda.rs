//! LAMBDA integer ambiguity reduction and search (§4.5, §GLOSSARY LAMBDA).
//!
//! Implements Teunissen's Least-squares AMBiguity Decorrelation Adjustment:
//! an LtDL factorization of the float ambiguity covariance, an integer
//! Gauss/permutation reduction that decorrelates it behind a unimodular
//! transform `Z`, and a bounded (shrinking-ellipsoid) integer least-squares
//! search over the decorrelated ambiguities. This module's structure
//! follows the widely used reference formulation of the method (the same
//! three-stage LD / reduction / search split RTKLIB's `lambda.c` is built
//! around), re-expressed without any particular implementation's variable
//! names or comments.

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum Error {
    #[error("ambiguity covariance is not positive definite")]
    NotPositiveDefinite,
    #[error("reduction produced a singular transform")]
    SingularTransform,
    #[error("need at least 2 ambiguities to search, got {0}")]
    TooFewAmbiguities(usize),
}

/// Two best integer candidate vectors from an ambiguity search, in the
/// original (undecorrelated) ambiguity ordering, plus their squared
/// residual norms (§4.5 step 3).
#[derive(Debug, Clone, PartialEq)]
pub struct AmbiguitySearchResult {
    pub best: DVector<f64>,
    pub second_best: DVector<f64>,
    pub best_norm2: f64,
    pub second_best_norm2: f64,
}

impl AmbiguitySearchResult {
    /// Ratio test statistic used to accept a fix (§4.5 step 4): second
    /// best over best squared norm, `+inf` if the best candidate is an
    /// exact fit.
    pub fn ratio(&self) -> f64 {
        if self.best_norm2 <= 0.0 {
            f64::INFINITY
        } else {
            self.second_best_norm2 / self.best_norm2
        }
    }
}

/// LtDL factorization: `q = l * diag(d) * l^T` with `l` unit lower
/// triangular, computed bottom-up column by column.
fn ld_factorize(q: &DMatrix<f64>) -> Result<(DMatrix<f64>, DVector<f64>), Error> {
    let n = q.nrows();
    let mut a = q.clone();
    let mut l = DMatrix::<f64>::zeros(n, n);
    let mut d = DVector::<f64>::zeros(n);

    for i in (0..n).rev() {
        let dii = a[(i, i)];
        if dii <= 0.0 {
            return Err(Error::NotPositiveDefinite);
        }
        d[i] = dii;
        let sqrt_d = dii.sqrt();
        for j in 0..=i {
            l[(i, j)] = a[(i, j)] / sqrt_d;
        }
        for j in 0..i {
            for k in 0..=j {
                a[(j, k)] -= l[(i, k)] * l[(i, j)];
            }
        }
        for j in 0..=i {
            l[(i, j)] /= l[(i, i)];
        }
    }
    Ok((l, d))
}

/// Integer Gauss transformation eliminating `l[(i, j)]` by subtracting a
/// rounded multiple of column `i` from column `j`, tracking the same
/// elementary operation in the accumulated transform `z`.
fn gauss_eliminate(n: usize, l: &mut DMatrix<f64>, z: &mut DMatrix<f64>, i: usize, j: usize) {
    let mu = l[(i, j)].round();
    if mu != 0.0 {
        for k in i..n {
            l[(k, j)] -= mu * l[(k, i)];
        }
        for k in 0..n {
            z[(k, j)] -= mu * z[(k, i)];
        }
    }
}

/// Swaps the decorrelation order of adjacent ambiguities `j`/`j+1` when
/// doing so shrinks the conditional variance, per the standard LAMBDA
/// permutation step.
fn permute(n: usize, l: &mut DMatrix<f64>, d: &mut DVector<f64>, j: usize, delta: f64, z: &mut DMatrix<f64>) {
    let eta = d[j] / delta;
    let lam = d[j + 1] * l[(j + 1, j)] / delta;
    d[j] = eta * d[j + 1];
    d[j + 1] = delta;

    for k in 0..j {
        let a0 = l[(j, k)];
        let a1 = l[(j + 1, k)];
        l[(j, k)] = -l[(j + 1, j)] * a0 + a1;
        l[(j + 1, k)] = eta * a0 + lam * a1;
    }
    l[(j + 1, j)] = lam;

    for k in (j + 2)..n {
        let tmp = l[(k, j)];
        l[(k, j)] = l[(k, j + 1)];
        l[(k, j + 1)] = tmp;
    }
    for k in 0..n {
        let tmp = z[(k, j)];
        z[(k, j)] = z[(k, j + 1)];
        z[(k, j + 1)] = tmp;
    }
}

/// Decorrelates `(l, d)` in place via repeated Gauss elimination and
/// adjacent permutation, returning the accumulated unimodular integer
/// transform `Z` (§4.5 step 2; §8 testable property: `Z` integer, `|det
/// Z| = 1`).
fn reduce(l: &mut DMatrix<f64>, d: &mut DVector<f64>) -> DMatrix<f64> {
    let n = l.nrows();
    let mut z = DMatrix::<f64>::identity(n, n);
    if n < 2 {
        return z;
    }

    let mut j = n as isize - 2;
    while j >= 0 {
        let jj = j as usize;
        for i in (jj + 1)..n {
            gauss_eliminate(n, l, &mut z, i, jj);
        }
        let delta = d[jj] + l[(jj + 1, jj)].powi(2) * d[jj + 1];
        if delta + 1.0e-9 < d[jj + 1] {
            permute(n, l, d, jj, delta, &mut z);
            j = n as isize - 2;
        } else {
            j -= 1;
        }
    }
    z
}

/// Bounded depth-first search of the integer lattice for the `m` best
/// candidates under the decorrelated metric (the "shrinking ellipsoid"
/// enumeration of §4.5 step 3), following the standard LAMBDA search
/// control flow: descend levels rounding each conditional mean to the
/// nearest integer, backtrack and step outward when a branch's partial
/// distance exceeds the current worst kept candidate.
fn search(l: &DMatrix<f64>, d: &DVector<f64>, float_decorrelated: &DVector<f64>, m: usize) -> (Vec<DVector<f64>>, Vec<f64>) {
    let n = float_decorrelated.len();
    const LOOP_MAX: usize = 10_000_000;

    let mut dist = vec![0.0_f64; n];
    let mut cond_mean = vec![0.0_f64; n];
    let mut cand = vec![0.0_f64; n];
    let mut step_dir = vec![0.0_f64; n];
    let mut partial_sum = DMatrix::<f64>::zeros(n, n);

    let mut kept: Vec<DVector<f64>> = Vec::new();
    let mut kept_norm2: Vec<f64> = Vec::new();
    let mut worst_idx = 0usize;
    let mut max_dist = f64::MAX;

    let mut k = n - 1;
    cond_mean[k] = float_decorrelated[k];
    cand[k] = cond_mean[k].round();
    let mut y = cond_mean[k] - cand[k];
    step_dir[k] = y.signum();

    for _ in 0..LOOP_MAX {
        let new_dist = dist[k] + y * y / d[k];
        if new_dist < max_dist {
            if k != 0 {
                k -= 1;
                dist[k] = new_dist;
                for i in 0..=k {
                    partial_sum[(k, i)] = partial_sum[(k + 1, i)] + (cand[k + 1] - cond_mean[k + 1]) * l[(k + 1, i)];
                }
                cond_mean[k] = float_decorrelated[k] + partial_sum[(k, k)];
                cand[k] = cond_mean[k].round();
                y = cond_mean[k] - cand[k];
                step_dir[k] = y.signum();
            } else {
                if kept.len() < m {
                    if kept.is_empty() || new_dist > kept_norm2[worst_idx] {
                        worst_idx = kept.len();
                    }
                    kept.push(DVector::from_vec(cand.clone()));
                    kept_norm2.push(new_dist);
                    if kept.len() == m {
                        worst_idx = (0..m)
                            .max_by(|&a, &b| kept_norm2[a].partial_cmp(&kept_norm2[b]).unwrap())
                            .unwrap();
                        max_dist = kept_norm2[worst_idx];
                    }
                } else if new_dist < kept_norm2[worst_idx] {
                    kept[worst_idx] = DVector::from_vec(cand.clone());
                    kept_norm2[worst_idx] = new_dist;
                    worst_idx = (0..m)
                        .max_by(|&a, &b| kept_norm2[a].partial_cmp(&kept_norm2[b]).unwrap())
                        .unwrap();
                    max_dist = kept_norm2[worst_idx];
                }
                cand[0] += step_dir[0];
                y = cond_mean[0] - cand[0];
                step_dir[0] = -step_dir[0] - step_dir[0].signum();
            }
        } else if k == n - 1 {
            break;
        } else {
            k += 1;
            cand[k] += step_dir[k];
            y = cond_mean[k] - cand[k];
            step_dir[k] = -step_dir[k] - step_dir[k].signum();
        }
    }

    let mut order: Vec<usize> = (0..kept.len()).collect();
    order.sort_by(|&a, &b| kept_norm2[a].partial_cmp(&kept_norm2[b]).unwrap());
    let sorted_cand = order.iter().map(|&i| kept[i].clone()).collect();
    let sorted_norm = order.iter().map(|&i| kept_norm2[i]).collect();
    (sorted_cand, sorted_norm)
}

/// Runs the full LAMBDA reduction and search, returning the two best
/// integer ambiguity candidates in the caller's original ambiguity
/// ordering (§4.5).
pub fn lambda(float_ambiguities: &DVector<f64>, covariance: &DMatrix<f64>) -> Result<AmbiguitySearchResult, Error> {
    let n = float_ambiguities.len();
    if n < 2 {
        return Err(Error::TooFewAmbiguities(n));
    }

    let (mut l, mut d) = ld_factorize(covariance)?;
    let z = reduce(&mut l, &mut d);

    let decorrelated = z.transpose() * float_ambiguities;
    let (candidates, norms) = search(&l, &d, &decorrelated, 2);
    if candidates.len() < 2 {
        return Err(Error::TooFewAmbiguities(candidates.len()));
    }

    let z_inv = z.clone().try_inverse().ok_or(Error::SingularTransform)?;
    let back_transform = z_inv.transpose();

    Ok(AmbiguitySearchResult {
        best: &back_transform * &candidates[0],
        second_best: &back_transform * &candidates[1],
        best_norm2: norms[0],
        second_best_norm2: norms[1],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ld_factorization_reconstructs_covariance() {
        let q = DMatrix::from_row_slice(3, 3, &[
            4.0, 2.0, 1.0,
            2.0, 5.0, 2.0,
            1.0, 2.0, 6.0,
        ]);
        let (l, d) = ld_factorize(&q).expect("pd");
        let reconstructed = &l * DMatrix::from_diagonal(&d) * l.transpose();
        for i in 0..3 {
            for j in 0..3 {
                assert!((reconstructed[(i, j)] - q[(i, j)]).abs() < 1.0e-9);
            }
        }
    }

    #[test]
    fn non_positive_definite_covariance_is_rejected() {
        let q = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]);
        assert_eq!(ld_factorize(&q), Err(Error::NotPositiveDefinite));
    }

    #[test]
    fn reduction_yields_unimodular_integer_transform() {
        let q = DMatrix::from_row_slice(3, 3, &[
            6.290, 5.978, 0.544,
            5.978, 6.292, 2.340,
            0.544, 2.340, 6.270,
        ]);
        let (mut l, mut d) = ld_factorize(&q).expect("pd");
        let z = reduce(&mut l, &mut d);

        for i in 0..3 {
            for j in 0..3 {
                let v = z[(i, j)];
                assert!((v - v.round()).abs() < 1.0e-6, "non-integer Z entry {v}");
            }
        }
        let det = z.determinant();
        assert!((det.abs() - 1.0).abs() < 1.0e-6, "|det Z| should be 1, got {det}");
    }

    #[test]
    fn exact_integer_float_vector_resolves_to_itself() {
        let q = DMatrix::from_row_slice(2, 2, &[0.01, 0.002, 0.002, 0.015]);
        let a = DVector::from_vec(vec![3.0, -2.0]);
        let result = lambda(&a, &q).expect("search succeeds");
        assert!((result.best[0] - 3.0).abs() < 1.0e-6);
        assert!((result.best[1] - (-2.0)).abs() < 1.0e-6);
        assert!(result.best_norm2 < 1.0e-6);
        assert!(result.ratio() > 1.0);
    }

    #[test]
    fn noisy_float_vector_rounds_to_nearest_integer_with_small_covariance() {
        let q = DMatrix::from_row_slice(2, 2, &[0.004, 0.0005, 0.0005, 0.004]);
        let a = DVector::from_vec(vec![5.12, -1.95]);
        let result = lambda(&a, &q).expect("search succeeds");
        assert!((result.best[0] - 5.0).abs() < 1.0e-6);
        assert!((result.best[1] - (-2.0)).abs() < 1.0e-6);
    }

    #[test]
    fn too_few_ambiguities_is_rejected() {
        let q = DMatrix::from_row_slice(1, 1, &[0.01]);
        let a = DVector::from_vec(vec![1.0]);
        assert_eq!(lambda(&a, &q), Err(Error::TooFewAmbiguities(1)));
    }
}
