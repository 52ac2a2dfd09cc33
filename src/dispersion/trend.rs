//! Dispersion trend fitting

use std::str::FromStr;

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SplineDeError};

/// Method for fitting the dispersion-mean trend
/// R equivalent: fitType parameter in estimateDispersionsFit() in core.R
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TrendFitMethod {
    /// dispersion = a0 + a1/mean, falling back to Mean if the fit fails
    #[default]
    Parametric,
    /// Trimmed mean of gene-wise dispersions (no trend)
    Mean,
}

impl FromStr for TrendFitMethod {
    type Err = SplineDeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "parametric" => Ok(Self::Parametric),
            "mean" => Ok(Self::Mean),
            _ => Err(SplineDeError::InvalidInput {
                reason: format!("unknown fit type '{}' (use parametric or mean)", s),
            }),
        }
    }
}

/// Fitted trend: value per gene plus the parametric coefficients when used
#[derive(Debug, Clone)]
pub struct DispersionTrend {
    pub trended: Array1<f64>,
    /// (asymptDisp, extraPois) of the parametric fit
    pub coefficients: Option<(f64, f64)>,
    pub method: TrendFitMethod,
}

/// Fit a trend to gene-wise dispersions as a function of mean expression
/// R equivalent: estimateDispersionsFit() in core.R
pub fn fit_dispersion_trend(
    means: &Array1<f64>,
    dispersions: &Array1<f64>,
    method: TrendFitMethod,
    min_disp: f64,
) -> Result<DispersionTrend> {
    if method == TrendFitMethod::Parametric {
        match fit_parametric_trend(means, dispersions, min_disp) {
            Ok((a0, a1)) => {
                log::info!("Dispersion trend: {:.4} + {:.4} / mean", a0, a1);
                let trended = means.mapv(|m| if m > 0.0 { a0 + a1 / m } else { a0 });
                return Ok(DispersionTrend {
                    trended,
                    coefficients: Some((a0, a1)),
                    method,
                });
            }
            Err(e) => {
                log::warn!("Parametric dispersion fit failed ({}), using the mean dispersion", e);
            }
        }
    }

    let mean_disp = trimmed_mean_dispersion(dispersions, min_disp)?;
    log::info!("Dispersion trend: constant {:.4}", mean_disp);
    Ok(DispersionTrend {
        trended: Array1::from_elem(dispersions.len(), mean_disp),
        coefficients: None,
        method: TrendFitMethod::Mean,
    })
}

/// Mean of dispersions above 10 * min_disp, trimming 0.1% at each end
fn trimmed_mean_dispersion(dispersions: &Array1<f64>, min_disp: f64) -> Result<f64> {
    let mut valid: Vec<f64> = dispersions
        .iter()
        .filter(|&&d| d.is_finite() && d > 10.0 * min_disp)
        .copied()
        .collect();
    if valid.is_empty() {
        return Err(SplineDeError::TrendFittingFailed {
            reason: "all gene-wise dispersions are at the lower bound".to_string(),
        });
    }
    valid.sort_by(|a, b| a.total_cmp(b));
    let trim = (valid.len() as f64 * 0.001).floor() as usize;
    let kept = &valid[trim..valid.len() - trim];
    Ok(kept.iter().sum::<f64>() / kept.len() as f64)
}

/// Parametric trend a0 + a1/mean with iterative residual filtering.
/// R equivalent: parametricDispersionFit() in core.R
fn fit_parametric_trend(
    means: &Array1<f64>,
    dispersions: &Array1<f64>,
    min_disp: f64,
) -> Result<(f64, f64)> {
    let data: Vec<(f64, f64)> = means
        .iter()
        .zip(dispersions.iter())
        .filter(|(&m, &d)| m > 0.0 && d.is_finite() && d > 100.0 * min_disp)
        .map(|(&m, &d)| (m, d))
        .collect();
    if data.len() < 3 {
        return Err(SplineDeError::TrendFittingFailed {
            reason: "Not enough valid data points for trend fitting".to_string(),
        });
    }

    let mut coefs = (0.1_f64, 1.0_f64);
    for iter in 0..11 {
        let old = coefs;
        let good: Vec<(f64, f64)> = data
            .iter()
            .filter(|&&(m, d)| {
                let fitted = coefs.0 + coefs.1 / m;
                fitted > 0.0 && {
                    let residual = d / fitted;
                    residual > 1e-4 && residual < 15.0
                }
            })
            .copied()
            .collect();
        if good.len() < 3 {
            return Err(SplineDeError::TrendFittingFailed {
                reason: "Not enough good residuals for parametric fit".to_string(),
            });
        }

        let (next, glm_converged) = fit_gamma_glm_identity(&good, coefs);
        coefs = next;
        log::debug!(
            "Parametric fit iter {}: {} genes, a0={:.6}, a1={:.6}",
            iter + 1,
            good.len(),
            coefs.0,
            coefs.1
        );

        if coefs.0 <= 0.0 || coefs.1 <= 0.0 {
            return Err(SplineDeError::TrendFittingFailed {
                reason: format!(
                    "coefficients not positive (a0={:.4}, a1={:.4})",
                    coefs.0, coefs.1
                ),
            });
        }
        let log_change = (coefs.0 / old.0).ln().powi(2) + (coefs.1 / old.1).ln().powi(2);
        if log_change < 1e-6 && glm_converged {
            return Ok(coefs);
        }
    }

    Err(SplineDeError::TrendFittingFailed {
        reason: "dispersion fit did not converge".to_string(),
    })
}

/// Gamma GLM with identity link, disp ~ a0 + a1 * (1/mean).
/// Returns ((a0, a1), converged)
fn fit_gamma_glm_identity(data: &[(f64, f64)], start: (f64, f64)) -> ((f64, f64), bool) {
    let deviance = |a0: f64, a1: f64| -> f64 {
        data.iter()
            .map(|&(m, d)| {
                let mu = (a0 + a1 / m).max(1e-8);
                2.0 * (-(d / mu).ln() + (d - mu) / mu)
            })
            .sum()
    };

    let (mut a0, mut a1) = start;
    let mut dev_old = deviance(a0, a1);
    for _ in 0..25 {
        let (mut sw, mut swx, mut swz, mut swxx, mut swxz) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for &(m, d) in data {
            let x = 1.0 / m;
            let mu = (a0 + a1 * x).max(1e-8);
            let w = 1.0 / (mu * mu);
            sw += w;
            swx += w * x;
            swz += w * d;
            swxx += w * x * x;
            swxz += w * x * d;
        }
        let det = sw * swxx - swx * swx;
        if det.abs() < 1e-10 {
            break;
        }
        a0 = (swxx * swz - swx * swxz) / det;
        a1 = (sw * swxz - swx * swz) / det;

        let dev = deviance(a0, a1);
        if (dev_old - dev).abs() / (0.1 + dev.abs()) < 1e-8 {
            return ((a0, a1), true);
        }
        dev_old = dev;
    }
    ((a0, a1), false)
}
