//! Likelihood ratio test between nested NB GLM fits
//!
//! stat = 2 * (logLike_full - logLike_reduced)
//! pvalue = pchisq(stat, df = ncol(full) - ncol(reduced), lower.tail = FALSE)

use statrs::distribution::{ChiSquared, ContinuousCDF};

use crate::error::{Result, SplineDeError};
use crate::glm::GlmFitResult;

/// Statistic and p-value for one gene
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LrtOutcome {
    pub stat: f64,
    pub pvalue: f64,
}

/// LRT statistic, with tiny negative values from round-off clamped to zero
pub fn lrt_statistic(ll_full: f64, ll_reduced: f64) -> f64 {
    if !ll_full.is_finite() || !ll_reduced.is_finite() {
        return f64::NAN;
    }
    (2.0 * (ll_full - ll_reduced)).max(0.0)
}

/// Per-gene LRT over paired full and reduced fits.
/// R equivalent: nbinomLRT() in core.R
pub fn likelihood_ratio_test(
    full: &[GlmFitResult],
    reduced: &[GlmFitResult],
    df: usize,
) -> Result<Vec<LrtOutcome>> {
    if full.len() != reduced.len() {
        return Err(SplineDeError::DimensionMismatch {
            expected: format!("{} reduced fits", full.len()),
            got: format!("{} reduced fits", reduced.len()),
        });
    }
    if df == 0 {
        return Err(SplineDeError::InvalidDesignMatrix {
            reason: "full model must have more coefficients than the reduced model".to_string(),
        });
    }
    let chi2 = ChiSquared::new(df as f64).map_err(|e| SplineDeError::InvalidInput {
        reason: format!("Invalid degrees of freedom {}: {}", df, e),
    })?;

    Ok(full
        .iter()
        .zip(reduced)
        .map(|(f, r)| {
            let stat = lrt_statistic(f.log_likelihood, r.log_likelihood);
            let pvalue = if stat.is_finite() { chi2.sf(stat) } else { f64::NAN };
            LrtOutcome { stat, pvalue }
        })
        .collect())
}
