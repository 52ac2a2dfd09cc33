//! Size factor estimation using the median of ratios method

use std::str::FromStr;

use ndarray::{Array1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SplineDeError};
use crate::stats::median;

/// Method for size factor estimation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SizeFactorMethod {
    /// Standard median of ratios (DESeq2 default)
    #[default]
    Ratio,
    /// Geometric means over positive counts only, for genes with zeros
    PosCounts,
}

impl FromStr for SizeFactorMethod {
    type Err = SplineDeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "ratio" => Ok(Self::Ratio),
            "poscounts" => Ok(Self::PosCounts),
            _ => Err(SplineDeError::InvalidInput {
                reason: format!("unknown size factor method '{}' (use ratio or poscounts)", s),
            }),
        }
    }
}

/// Estimate per-sample size factors
/// R equivalent: estimateSizeFactorsForMatrix() in core.R
///
/// Accounts for both sequencing depth and RNA composition: each sample's
/// factor is the median ratio of its counts to the per-gene geometric mean.
pub fn estimate_size_factors(
    counts: ArrayView2<f64>,
    method: SizeFactorMethod,
) -> Result<Array1<f64>> {
    let (n_genes, n_samples) = counts.dim();
    if n_genes == 0 || n_samples == 0 {
        return Err(SplineDeError::EmptyData {
            reason: "Count matrix is empty".to_string(),
        });
    }

    // Geometric mean per usable gene
    let mut reference: Vec<(usize, f64)> = Vec::with_capacity(n_genes);
    for (i, row) in counts.axis_iter(Axis(0)).enumerate() {
        let usable = match method {
            SizeFactorMethod::Ratio => row.iter().all(|&x| x > 0.0),
            SizeFactorMethod::PosCounts => row.iter().any(|&x| x > 0.0),
        };
        if usable {
            // poscounts divides by all samples, not just the positive ones
            let log_sum: f64 = row.iter().filter(|&&x| x > 0.0).map(|&x| x.ln()).sum();
            reference.push((i, (log_sum / n_samples as f64).exp()));
        }
    }

    if reference.is_empty() {
        return Err(SplineDeError::SizeFactorFailed {
            reason: match method {
                SizeFactorMethod::Ratio => {
                    "every gene contains at least one zero; use the poscounts method".to_string()
                }
                SizeFactorMethod::PosCounts => "no gene has a positive count".to_string(),
            },
        });
    }

    let mut size_factors = Array1::zeros(n_samples);
    for j in 0..n_samples {
        let mut ratios: Vec<f64> = reference
            .iter()
            .filter_map(|&(i, geo_mean)| {
                let count = counts[[i, j]];
                (count > 0.0 && geo_mean > 0.0).then(|| count / geo_mean)
            })
            .collect();
        size_factors[j] = if ratios.is_empty() {
            match method {
                SizeFactorMethod::Ratio => {
                    return Err(SplineDeError::SizeFactorFailed {
                        reason: format!("No valid ratios for sample {}", j),
                    })
                }
                SizeFactorMethod::PosCounts => 1.0,
            }
        } else {
            median(&mut ratios)
        };
    }

    if method == SizeFactorMethod::PosCounts {
        // Rescale to geometric mean 1
        let log_mean = size_factors.iter().map(|s: &f64| s.ln()).sum::<f64>() / n_samples as f64;
        size_factors.mapv_inplace(|s| s / log_mean.exp());
    }

    if size_factors.iter().any(|&x| x <= 0.0 || !x.is_finite()) {
        return Err(SplineDeError::SizeFactorFailed {
            reason: "Invalid size factors computed".to_string(),
        });
    }

    log::debug!("Size factors: {:?}", size_factors.to_vec());
    Ok(size_factors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_ratio_recovers_depth() {
        // Second sample sequenced twice as deep
        let counts = array![[10.0, 20.0], [50.0, 100.0], [7.0, 14.0]];
        let sf = estimate_size_factors(counts.view(), SizeFactorMethod::Ratio).unwrap();
        assert_abs_diff_eq!(sf[1] / sf[0], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(sf[0] * sf[1], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_ratio_ignores_genes_with_zeros() {
        let counts = array![[10.0, 20.0], [0.0, 500.0], [7.0, 14.0]];
        let sf = estimate_size_factors(counts.view(), SizeFactorMethod::Ratio).unwrap();
        assert_abs_diff_eq!(sf[1] / sf[0], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_all_zero_genes_need_poscounts() {
        let counts = array![[0.0, 20.0], [5.0, 0.0]];
        assert!(estimate_size_factors(counts.view(), SizeFactorMethod::Ratio).is_err());
        let sf = estimate_size_factors(counts.view(), SizeFactorMethod::PosCounts).unwrap();
        assert!(sf.iter().all(|s| s.is_finite() && *s > 0.0));
    }

    #[test]
    fn test_method_from_str() {
        assert_eq!("PosCounts".parse::<SizeFactorMethod>().unwrap(), SizeFactorMethod::PosCounts);
        assert!("iterate".parse::<SizeFactorMethod>().is_err());
    }
}
