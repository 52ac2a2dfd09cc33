//! MAP dispersion estimation
//!
//! Empirical Bayes shrinkage of gene-wise dispersions toward the fitted
//! trend, using a log-normal prior centered on the trend.

use ndarray::{Array1, Array2, ArrayView2};
use rayon::prelude::*;

use super::gene_wise::max_dispersion;
use super::line_search::{grid_search, line_search};
use super::DispersionParams;
use crate::stats::{mad_squared, trigamma};

/// Floor on the prior variance of log dispersions
const MIN_PRIOR_VAR: f64 = 0.25;

/// Prior variance for dispersion shrinkage.
/// R equivalent: estimateDispersionsPriorVar() in core.R
///
/// Residuals are taken over genes whose gene-wise estimate is above
/// 100 * min_disp. Returns (dispPriorVar, varLogDispEsts); the second value
/// drives the outlier rule.
pub fn estimate_prior_variance(
    gene_dispersions: &[f64],
    trended_dispersions: &[f64],
    n_samples: usize,
    n_coef: usize,
    min_disp: f64,
) -> (f64, f64) {
    let mut log_residuals: Vec<f64> = gene_dispersions
        .iter()
        .zip(trended_dispersions)
        .filter(|(&g, &t)| g.is_finite() && t.is_finite() && g >= 100.0 * min_disp && t > 0.0)
        .map(|(&g, &t)| g.ln() - t.ln())
        .collect();

    if log_residuals.len() < 3 {
        return (MIN_PRIOR_VAR, MIN_PRIOR_VAR);
    }

    let var_log_disp_ests = mad_squared(&mut log_residuals);
    if n_samples <= n_coef {
        return (MIN_PRIOR_VAR, var_log_disp_ests);
    }

    let df = (n_samples - n_coef) as f64;
    let expected = trigamma(df / 2.0);
    let prior_var = (var_log_disp_ests - expected).max(MIN_PRIOR_VAR);
    log::debug!(
        "Prior var: df={}, varLogDispEsts={:.4}, expected={:.4}, dispPriorVar={:.4}",
        df,
        var_log_disp_ests,
        expected,
        prior_var
    );
    (prior_var, var_log_disp_ests)
}

/// Posterior mode of one gene's dispersion under the log-normal prior.
/// R equivalent: the fitDisp call in estimateDispersionsMAP() in core.R
pub fn fit_map_dispersion(
    counts: &[f64],
    design: &Array2<f64>,
    mu: &[f64],
    gene_disp: f64,
    trend_disp: f64,
    prior_var: f64,
    params: &DispersionParams,
) -> f64 {
    if !trend_disp.is_finite() || trend_disp <= 0.0 {
        return f64::NAN;
    }
    if !gene_disp.is_finite() {
        return trend_disp;
    }

    let min_disp = params.min_disp;
    let max_disp = max_dispersion(counts.len());
    let prior = Some((trend_disp.ln(), prior_var));

    // Very low gene-wise estimates start from the trend
    let start = if gene_disp > 0.1 * trend_disp {
        gene_disp
    } else {
        trend_disp
    };

    let search = line_search(counts, design, mu, start, prior, params);
    let alpha = if search.converged {
        search.log_alpha.exp()
    } else {
        grid_search(counts, design, mu, min_disp, max_disp, prior)
    };
    alpha.clamp(min_disp, max_disp)
}

/// MAP dispersions for every gene plus the upper-outlier flags.
/// R equivalent: estimateDispersionsMAP() in core.R
///
/// A gene whose gene-wise estimate exceeds the trend by more than
/// `outlier_sd` standard deviations on the log scale keeps its gene-wise
/// value.
pub fn estimate_map_dispersions(
    counts: ArrayView2<f64>,
    design: &Array2<f64>,
    mu: &Array2<f64>,
    gene_dispersions: &Array1<f64>,
    trended_dispersions: &Array1<f64>,
    params: &DispersionParams,
) -> (Array1<f64>, Vec<bool>, f64) {
    let (n_genes, n_samples) = counts.dim();
    let gene_vec = gene_dispersions.to_vec();
    let trend_vec = trended_dispersions.to_vec();
    let (prior_var, var_log_disp_ests) =
        estimate_prior_variance(&gene_vec, &trend_vec, n_samples, design.ncols(), params.min_disp);
    log::info!("Dispersion prior variance: {:.4}", prior_var);

    let map: Vec<f64> = (0..n_genes)
        .into_par_iter()
        .map(|i| {
            let row = counts.row(i).to_vec();
            let mu_row = mu.row(i).to_vec();
            fit_map_dispersion(
                &row,
                design,
                &mu_row,
                gene_vec[i],
                trend_vec[i],
                prior_var,
                params,
            )
        })
        .collect();

    let threshold = params.outlier_sd * var_log_disp_ests.sqrt();
    let outliers: Vec<bool> = gene_vec
        .iter()
        .zip(&trend_vec)
        .map(|(&g, &t)| g.is_finite() && g > 0.0 && t > 0.0 && g.ln() - t.ln() > threshold)
        .collect();

    let final_disp: Array1<f64> = map
        .iter()
        .zip(&outliers)
        .zip(&gene_vec)
        .map(|((&m, &outlier), &g)| if outlier { g } else { m })
        .collect();

    log::debug!(
        "Dispersion upper outliers: {} (threshold={:.4})",
        outliers.iter().filter(|&&o| o).count(),
        threshold
    );
    (final_disp, outliers, prior_var)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prior_variance_floor() {
        let gene = [0.1, 0.11, 0.09, 0.1, 0.105];
        let trend = [0.1; 5];
        let (prior_var, var_log) = estimate_prior_variance(&gene, &trend, 16, 4, 1e-8);
        assert_eq!(prior_var, 0.25);
        assert!(var_log < 0.25);
    }

    #[test]
    fn test_prior_variance_too_few_genes() {
        let (prior_var, var_log) = estimate_prior_variance(&[0.1, 1e-8], &[0.1, 0.1], 10, 2, 1e-8);
        assert_eq!((prior_var, var_log), (0.25, 0.25));
    }

    #[test]
    fn test_map_lies_between_gene_and_trend() {
        let counts = [40.0, 95.0, 60.0, 150.0, 70.0, 30.0, 110.0, 85.0];
        let mu = [80.0; 8];
        let design = Array2::ones((8, 1));
        let params = DispersionParams::default();
        let gene_disp = 0.2;
        let trend_disp = 0.02;
        let map = fit_map_dispersion(&counts, &design, &mu, gene_disp, trend_disp, 0.25, &params);
        assert!(map > trend_disp && map < gene_disp, "map = {}", map);
    }

    #[test]
    fn test_upper_outlier_keeps_gene_estimate() {
        let counts = ndarray::array![
            [40.0, 95.0, 60.0, 150.0, 70.0, 30.0, 110.0, 85.0],
            [100.0, 98.0, 103.0, 101.0, 99.0, 100.0, 102.0, 97.0],
            [90.0, 110.0, 95.0, 105.0, 88.0, 112.0, 100.0, 100.0],
            [80.0, 120.0, 85.0, 115.0, 90.0, 110.0, 95.0, 105.0],
        ];
        let mu = Array2::from_elem((4, 8), 100.0);
        let design = Array2::ones((8, 1));
        let gene = ndarray::array![5.0, 0.011, 0.009, 0.01];
        let trend = Array1::from_elem(4, 0.01);
        let (map, outliers, _) = estimate_map_dispersions(
            counts.view(),
            &design,
            &mu,
            &gene,
            &trend,
            &DispersionParams::default(),
        );
        assert_eq!(outliers, vec![true, false, false, false]);
        assert_eq!(map[0], 5.0);
    }
}
