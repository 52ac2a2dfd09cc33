//! Dispersion estimation for negative binomial models

mod gene_wise;
mod line_search;
mod map;
mod trend;

pub use gene_wise::{estimate_dispersion_gene, estimate_gene_dispersions, max_dispersion};
pub use map::{estimate_map_dispersions, estimate_prior_variance, fit_map_dispersion};
pub use trend::{fit_dispersion_trend, DispersionTrend, TrendFitMethod};

use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SplineDeError};
use crate::glm::GlmFitParams;

/// Configurable parameters for dispersion estimation.
/// R equivalent: parameters of estimateDispersionsGeneEst() and estimateDispersionsMAP() in core.R
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispersionParams {
    /// Minimum dispersion value. R: estimateDispersionsGeneEst(minDisp=1e-8)
    pub min_disp: f64,
    /// Convergence tolerance on the log posterior. R: dispTol=1e-6
    pub disp_tol: f64,
    /// Initial step size for line search. R: kappa_0=1
    pub kappa_0: f64,
    /// Maximum line search iterations. R: maxit=100
    pub maxit: usize,
    /// Outlier SD threshold for MAP shrinkage. R: estimateDispersionsMAP(outlierSD=2)
    pub outlier_sd: f64,
}

impl Default for DispersionParams {
    fn default() -> Self {
        Self {
            min_disp: 1e-8,
            disp_tol: 1e-6,
            kappa_0: 1.0,
            maxit: 100,
            outlier_sd: 2.0,
        }
    }
}

/// Every stage of the dispersion pipeline, one entry per gene
#[derive(Debug, Clone)]
pub struct DispersionEstimates {
    pub gene_wise: Array1<f64>,
    pub trended: Array1<f64>,
    /// Final dispersions used for the GLM fits
    pub map: Array1<f64>,
    /// Fitted means at the gene-wise starting dispersion
    pub mu: Array2<f64>,
    pub trend: TrendFitMethod,
    pub trend_coefficients: Option<(f64, f64)>,
    pub prior_var: f64,
    pub outliers: Vec<bool>,
}

/// Estimate gene-wise, trended and MAP dispersions
/// R equivalent: `estimateDispersions()` in methods.R
pub fn estimate_dispersions(
    counts: ArrayView2<f64>,
    size_factors: &Array1<f64>,
    design: &Array2<f64>,
    base_means: &Array1<f64>,
    fit_type: TrendFitMethod,
    params: &DispersionParams,
    glm_params: &GlmFitParams,
) -> Result<DispersionEstimates> {
    let (n_genes, n_samples) = counts.dim();
    if n_genes == 0 {
        return Err(SplineDeError::EmptyData {
            reason: "no genes for dispersion estimation".to_string(),
        });
    }
    if size_factors.len() != n_samples {
        return Err(SplineDeError::DimensionMismatch {
            expected: format!("{} size factors", n_samples),
            got: format!("{} size factors", size_factors.len()),
        });
    }
    if design.nrows() != n_samples {
        return Err(SplineDeError::DimensionMismatch {
            expected: format!("{} design rows", n_samples),
            got: format!("{} design rows", design.nrows()),
        });
    }
    // R: checkForExperimentalReplicates
    if n_samples <= design.ncols() {
        return Err(SplineDeError::DispersionEstimationFailed {
            reason: format!(
                "design has {} coefficients for {} samples; no replicates for dispersion estimation",
                design.ncols(),
                n_samples
            ),
        });
    }

    log::info!("Estimating gene-wise dispersions for {} genes", n_genes);
    let (gene_wise, mu) = estimate_gene_dispersions(counts, size_factors, design, params, glm_params);

    let trend = fit_dispersion_trend(base_means, &gene_wise, fit_type, params.min_disp)?;

    log::info!("Estimating MAP dispersions");
    let (map, outliers, prior_var) =
        estimate_map_dispersions(counts, design, &mu, &gene_wise, &trend.trended, params);

    if map.iter().all(|d| !d.is_finite()) {
        return Err(SplineDeError::DispersionEstimationFailed {
            reason: "no finite dispersion estimates".to_string(),
        });
    }

    Ok(DispersionEstimates {
        gene_wise,
        trended: trend.trended,
        map,
        mu,
        trend: trend.method,
        trend_coefficients: trend.coefficients,
        prior_var,
        outliers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_requires_replicates() {
        let counts = Array2::from_elem((3, 2), 10.0);
        let sf = Array1::ones(2);
        let design = Array2::ones((2, 2));
        let means = Array1::from_elem(3, 10.0);
        let err = estimate_dispersions(
            counts.view(),
            &sf,
            &design,
            &means,
            TrendFitMethod::Parametric,
            &DispersionParams::default(),
            &GlmFitParams::default(),
        );
        assert!(matches!(err, Err(SplineDeError::DispersionEstimationFailed { .. })));
    }

    #[test]
    fn test_pipeline_produces_finite_dispersions() {
        let n_samples = 8;
        let n_genes = 12;
        let counts = Array2::from_shape_fn((n_genes, n_samples), |(i, j)| {
            let base = 20.0 * (i + 1) as f64;
            let wobble = [0.7, 1.3, 0.9, 1.1, 1.4, 0.6, 1.0, 1.05][j];
            (base * wobble).round()
        });
        let sf = Array1::ones(n_samples);
        let design = Array2::ones((n_samples, 1));
        let means = counts.mean_axis(ndarray::Axis(1)).unwrap();
        let est = estimate_dispersions(
            counts.view(),
            &sf,
            &design,
            &means,
            TrendFitMethod::Parametric,
            &DispersionParams::default(),
            &GlmFitParams::default(),
        )
        .unwrap();
        assert_eq!(est.map.len(), n_genes);
        assert!(est.map.iter().all(|d| d.is_finite() && *d > 0.0));
        assert!(est.prior_var >= 0.25);
        assert_eq!(est.mu.dim(), (n_genes, n_samples));
    }
}
