//! Natural cubic spline basis
//! R equivalent: splines::ns()
//!
//! The basis is built from cubic B-splines on the augmented knot vector,
//! extended linearly beyond the boundary knots and projected onto the null
//! space of the second-derivative constraints at both boundary knots.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::bspline::{augmented_knots, spline_design_row, CUBIC_ORDER};
use crate::error::{Result, SplineDeError};

/// How interior knots are chosen from the data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum KnotPlacement {
    /// Use these interior knots as given
    Explicit(Vec<f64>),
    /// `n` interior knots at equally spaced quantiles of the data
    Quantiles(usize),
}

impl Default for KnotPlacement {
    /// Three basis columns without intercept
    fn default() -> Self {
        KnotPlacement::Quantiles(2)
    }
}

impl KnotPlacement {
    /// Quantile placement yielding `df` basis columns
    /// R equivalent: ns(x, df = df, intercept = intercept)
    pub fn from_df(df: usize, intercept: bool) -> Result<Self> {
        let fixed = 1 + usize::from(intercept);
        if df < fixed {
            return Err(SplineDeError::InvalidSpline {
                reason: format!("df = {} is too small (minimum {})", df, fixed),
            });
        }
        Ok(KnotPlacement::Quantiles(df - fixed))
    }
}

/// Natural cubic spline definition. Evaluating the same value on the same
/// inputs always yields the same matrix, so a spline stored at fit time
/// reproduces the model basis exactly on any grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NaturalSpline {
    knots: Vec<f64>,
    boundary_knots: (f64, f64),
    intercept: bool,
}

impl NaturalSpline {
    pub fn new(mut knots: Vec<f64>, boundary_knots: (f64, f64), intercept: bool) -> Result<Self> {
        let (lo, hi) = boundary_knots;
        if !lo.is_finite() || !hi.is_finite() || lo >= hi {
            return Err(SplineDeError::InvalidSpline {
                reason: format!("invalid boundary knots ({}, {})", lo, hi),
            });
        }
        if let Some(k) = knots.iter().find(|&&k| !k.is_finite() || k <= lo || k >= hi) {
            return Err(SplineDeError::InvalidSpline {
                reason: format!(
                    "interior knot {} must lie strictly inside ({}, {})",
                    k, lo, hi
                ),
            });
        }
        knots.sort_by(|a, b| a.total_cmp(b));

        Ok(Self {
            knots,
            boundary_knots,
            intercept,
        })
    }

    /// Spline with boundary knots at the data range and interior knots per `placement`
    pub fn from_data(x: &[f64], placement: &KnotPlacement, intercept: bool) -> Result<Self> {
        if x.iter().any(|v| !v.is_finite()) {
            return Err(SplineDeError::InvalidSpline {
                reason: "timepoints contain non-finite values".to_string(),
            });
        }
        let mut sorted = x.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let distinct = {
            let mut d = sorted.clone();
            d.dedup();
            d.len()
        };
        if distinct < 2 {
            return Err(SplineDeError::InvalidSpline {
                reason: format!("need at least two distinct timepoints, got {}", distinct),
            });
        }

        let boundary = (sorted[0], sorted[sorted.len() - 1]);
        let knots = match placement {
            KnotPlacement::Explicit(k) => k.clone(),
            KnotPlacement::Quantiles(n) => (1..=*n)
                .map(|i| quantile_type7(&sorted, i as f64 / (*n + 1) as f64))
                .collect(),
        };
        log::debug!(
            "Natural spline knots {:?}, boundary ({}, {}), intercept {}",
            knots,
            boundary.0,
            boundary.1,
            intercept
        );

        Self::new(knots, boundary, intercept)
    }

    pub fn knots(&self) -> &[f64] {
        &self.knots
    }

    pub fn boundary_knots(&self) -> (f64, f64) {
        self.boundary_knots
    }

    pub fn intercept(&self) -> bool {
        self.intercept
    }

    /// Number of basis columns: interior knots + 1 + intercept
    pub fn n_basis(&self) -> usize {
        self.knots.len() + 1 + usize::from(self.intercept)
    }

    /// Basis column names `<prefix>1 .. <prefix>K`
    pub fn column_names(&self, prefix: &str) -> Vec<String> {
        (1..=self.n_basis()).map(|k| format!("{}{}", prefix, k)).collect()
    }

    /// Basis matrix (rows = `x`, columns = basis functions)
    pub fn basis(&self, x: &[f64]) -> Result<Array2<f64>> {
        self.evaluate(x, 0)
    }

    /// Derivative of the basis matrix (`deriv` = 1 or 2)
    pub fn derivative(&self, x: &[f64], deriv: usize) -> Result<Array2<f64>> {
        self.evaluate(x, deriv)
    }

    fn aknots(&self) -> Vec<f64> {
        augmented_knots(self.boundary_knots, &self.knots, CUBIC_ORDER)
    }

    /// B-spline row without the dropped intercept column
    fn raw_row(&self, aknots: &[f64], x: f64, deriv: usize) -> Result<Vec<f64>> {
        let mut row = spline_design_row(aknots, CUBIC_ORDER, x, deriv)?;
        if !self.intercept {
            row.remove(0);
        }
        Ok(row)
    }

    /// B-spline row with linear continuation beyond the boundary knots
    fn extended_row(&self, aknots: &[f64], x: f64, deriv: usize) -> Result<Vec<f64>> {
        let (lo, hi) = self.boundary_knots;
        let pivot = if x < lo {
            lo
        } else if x > hi {
            hi
        } else {
            return self.raw_row(aknots, x, deriv);
        };

        match deriv {
            0 => {
                let value = self.raw_row(aknots, pivot, 0)?;
                let slope = self.raw_row(aknots, pivot, 1)?;
                Ok(value
                    .iter()
                    .zip(&slope)
                    .map(|(v, s)| v + (x - pivot) * s)
                    .collect())
            }
            1 => self.raw_row(aknots, pivot, 1),
            _ => Ok(vec![0.0; aknots.len() - CUBIC_ORDER - usize::from(!self.intercept)]),
        }
    }

    fn evaluate(&self, x: &[f64], deriv: usize) -> Result<Array2<f64>> {
        if let Some(v) = x.iter().find(|v| !v.is_finite()) {
            return Err(SplineDeError::InvalidSpline {
                reason: format!("cannot evaluate basis at {}", v),
            });
        }

        let aknots = self.aknots();
        let (lo, hi) = self.boundary_knots;

        // Second-derivative constraints at both boundaries, as columns
        let at_lo = self.raw_row(&aknots, lo, 2)?;
        let at_hi = self.raw_row(&aknots, hi, 2)?;
        let n_raw = at_lo.len();
        let mut constraints = Array2::<f64>::zeros((n_raw, 2));
        for j in 0..n_raw {
            constraints[[j, 0]] = at_lo[j];
            constraints[[j, 1]] = at_hi[j];
        }
        let qr = HouseholderQr::decompose(constraints);

        let n_basis = self.n_basis();
        let mut basis = Array2::<f64>::zeros((x.len(), n_basis));
        for (i, &xi) in x.iter().enumerate() {
            let mut row = self.extended_row(&aknots, xi, deriv)?;
            qr.apply_qt(&mut row);
            for (j, &v) in row[2..].iter().enumerate() {
                basis[[i, j]] = v;
            }
        }
        Ok(basis)
    }
}

/// Householder QR without pivoting, reflectors stored LINPACK style
/// (below-diagonal part of `qr` plus the leading element in `qraux`)
struct HouseholderQr {
    qr: Array2<f64>,
    qraux: Vec<f64>,
}

impl HouseholderQr {
    fn decompose(mut x: Array2<f64>) -> Self {
        let (n, p) = x.dim();
        let mut qraux = vec![0.0; p];

        for l in 0..n.min(p) {
            if l + 1 == n {
                break;
            }
            let mut norm = (l..n).map(|i| x[[i, l]] * x[[i, l]]).sum::<f64>().sqrt();
            if norm == 0.0 {
                continue;
            }
            if x[[l, l]] != 0.0 {
                norm = norm.copysign(x[[l, l]]);
            }
            for i in l..n {
                x[[i, l]] /= norm;
            }
            x[[l, l]] += 1.0;

            for j in (l + 1)..p {
                let dot: f64 = (l..n).map(|i| x[[i, l]] * x[[i, j]]).sum();
                let t = -dot / x[[l, l]];
                for i in l..n {
                    x[[i, j]] += t * x[[i, l]];
                }
            }

            qraux[l] = x[[l, l]];
            x[[l, l]] = -norm;
        }

        Self { qr: x, qraux }
    }

    /// y <- Q' y
    fn apply_qt(&self, y: &mut [f64]) {
        let (n, p) = self.qr.dim();
        for j in 0..p.min(n.saturating_sub(1)) {
            let lead = self.qraux[j];
            if lead == 0.0 {
                continue;
            }
            let dot = lead * y[j] + ((j + 1)..n).map(|i| self.qr[[i, j]] * y[i]).sum::<f64>();
            let t = -dot / lead;
            y[j] += t * lead;
            for i in (j + 1)..n {
                y[i] += t * self.qr[[i, j]];
            }
        }
    }
}

/// R's default quantile (type 7) on sorted data
fn quantile_type7(sorted_x: &[f64], p: f64) -> f64 {
    let n = sorted_x.len();
    if n == 1 {
        return sorted_x[0];
    }
    let h = (n as f64 - 1.0) * p;
    let lo = (h.floor() as usize).min(n - 1);
    let hi = (h.ceil() as usize).min(n - 1);
    if lo == hi {
        sorted_x[lo]
    } else {
        sorted_x[lo] + (h - lo as f64) * (sorted_x[hi] - sorted_x[lo])
    }
}
