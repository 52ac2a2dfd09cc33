//! Gene-wise dispersion estimation (Cox-Reid adjusted MLE)

use ndarray::{Array1, Array2, ArrayView2};
use rayon::prelude::*;

use super::line_search::{grid_search, line_search};
use super::DispersionParams;
use crate::glm::{fit_single_gene, GlmFitParams};
use crate::stats::{solve_symmetric, weighted_crossprod};

/// Largest admissible dispersion: max(n_samples, 10)
pub fn max_dispersion(n_samples: usize) -> f64 {
    (n_samples as f64).max(10.0)
}

/// Fitted values of an ordinary least squares fit of `y` on `design`.
/// R equivalent: linearModelMu()
fn linear_model_mu(y: &[f64], design: &Array2<f64>) -> Vec<f64> {
    let ones = vec![1.0; y.len()];
    let xtx = weighted_crossprod(design, &ones);
    let xty: Vec<f64> = (0..design.ncols())
        .map(|j| (0..y.len()).map(|i| design[[i, j]] * y[i]).sum())
        .collect();
    match solve_symmetric(&xtx, &xty) {
        Some(beta) => (0..y.len())
            .map(|i| beta.iter().enumerate().map(|(j, b)| design[[i, j]] * b).sum())
            .collect(),
        None => {
            let mean = y.iter().sum::<f64>() / y.len() as f64;
            vec![mean; y.len()]
        }
    }
}

/// Moment estimate from residuals of a linear fit on normalized counts.
/// R equivalent: roughDispEstimate() in core.R
fn rough_disp_estimate(normalized: &[f64], design: &Array2<f64>) -> f64 {
    let n = normalized.len();
    let p = design.ncols();
    if n <= p {
        return f64::INFINITY;
    }
    let mu = linear_model_mu(normalized, design);
    let sum: f64 = normalized
        .iter()
        .zip(&mu)
        .map(|(&y, &m)| {
            let m = m.max(1.0);
            ((y - m).powi(2) - m) / (m * m)
        })
        .sum();
    (sum / (n - p) as f64).max(0.0)
}

/// (variance - xim * mean) / mean^2 on normalized counts.
/// R equivalent: momentsDispEstimate() in core.R
fn moments_disp_estimate(normalized: &[f64], xim: f64) -> f64 {
    let n = normalized.len() as f64;
    let mean = normalized.iter().sum::<f64>() / n;
    if mean <= 1e-10 || n < 2.0 {
        return f64::INFINITY;
    }
    let var = normalized.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (var - xim * mean) / (mean * mean)
}

/// Estimate the dispersion of one gene.
/// R equivalent: estimateDispersionsGeneEst() in core.R
///
/// Returns (dispersion, mu) where mu is the NB GLM fit at the starting
/// dispersion; MAP estimation reuses it.
pub fn estimate_dispersion_gene(
    counts: &[f64],
    size_factors: &[f64],
    design: &Array2<f64>,
    xim: f64,
    params: &DispersionParams,
    glm_params: &GlmFitParams,
) -> (f64, Vec<f64>) {
    let n_samples = counts.len();
    if counts.iter().all(|&c| c == 0.0) {
        return (f64::NAN, vec![0.0; n_samples]);
    }

    let min_disp = params.min_disp;
    let max_disp = max_dispersion(n_samples);

    let normalized: Vec<f64> = counts
        .iter()
        .zip(size_factors)
        .map(|(&c, &s)| c / s)
        .collect();
    let rough = rough_disp_estimate(&normalized, design);
    let moments = moments_disp_estimate(&normalized, xim);
    let alpha_init = rough.min(moments).clamp(min_disp, max_disp);

    let fit = fit_single_gene(
        Array1::from(counts.to_vec()).view(),
        design,
        Array1::from(size_factors.to_vec()).view(),
        alpha_init,
        glm_params,
    );
    let mu = fit.mu;

    let search = line_search(counts, design, &mu, alpha_init, None, params);

    // No meaningful improvement: keep the starting value
    let no_increase = search.final_lp < search.initial_lp + search.initial_lp.abs() / 1e6;
    let mut alpha = if no_increase {
        alpha_init
    } else {
        search.log_alpha.exp()
    };

    let search_converged = search.iterations < params.maxit && search.iterations != 1;
    if !search_converged && alpha > min_disp * 10.0 {
        alpha = grid_search(counts, design, &mu, min_disp, max_disp, None);
    }

    (alpha.clamp(min_disp, max_disp), mu)
}

/// Gene-wise dispersions and the fitted means they were estimated at
pub fn estimate_gene_dispersions(
    counts: ArrayView2<f64>,
    size_factors: &Array1<f64>,
    design: &Array2<f64>,
    params: &DispersionParams,
    glm_params: &GlmFitParams,
) -> (Array1<f64>, Array2<f64>) {
    let (n_genes, n_samples) = counts.dim();
    let sf = size_factors.to_vec();
    let xim = sf.iter().map(|&s| 1.0 / s).sum::<f64>() / n_samples as f64;

    let results: Vec<(f64, Vec<f64>)> = (0..n_genes)
        .into_par_iter()
        .map(|i| {
            let row = counts.row(i).to_vec();
            estimate_dispersion_gene(&row, &sf, design, xim, params, glm_params)
        })
        .collect();

    let mut dispersions = Array1::zeros(n_genes);
    let mut mu = Array2::zeros((n_genes, n_samples));
    for (i, (d, m)) in results.into_iter().enumerate() {
        dispersions[i] = d;
        for (j, v) in m.into_iter().enumerate() {
            mu[[i, j]] = v;
        }
    }
    (dispersions, mu)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_moments_estimate() {
        // mean 80, variance 1521.43, xim 1
        let normalized = [40.0, 95.0, 60.0, 150.0, 70.0, 30.0, 110.0, 85.0];
        let est = moments_disp_estimate(&normalized, 1.0);
        let expected = (10650.0 / 7.0 - 80.0) / 6400.0;
        assert!((est - expected).abs() < 1e-12);
    }

    #[test]
    fn test_poisson_like_gene_has_small_dispersion() {
        let counts = [100.0, 98.0, 103.0, 101.0, 99.0, 100.0, 102.0, 97.0];
        let sf = [1.0; 8];
        let design = Array2::ones((8, 1));
        let (alpha, mu) = estimate_dispersion_gene(
            &counts,
            &sf,
            &design,
            1.0,
            &DispersionParams::default(),
            &GlmFitParams::default(),
        );
        assert!(alpha < 1e-3);
        assert!((mu[0] - 100.0).abs() < 1e-3);
    }

    #[test]
    fn test_overdispersed_gene() {
        let counts = [40.0, 95.0, 60.0, 150.0, 70.0, 30.0, 110.0, 85.0];
        let sf = [1.0; 8];
        let design = Array2::ones((8, 1));
        let (alpha, _) = estimate_dispersion_gene(
            &counts,
            &sf,
            &design,
            1.0,
            &DispersionParams::default(),
            &GlmFitParams::default(),
        );
        assert!(alpha > 0.1 && alpha < 0.5, "alpha = {}", alpha);
    }

    #[test]
    fn test_all_zero_gene_is_nan() {
        let design = Array2::ones((4, 1));
        let (alpha, _) = estimate_dispersion_gene(
            &[0.0; 4],
            &[1.0; 4],
            &design,
            1.0,
            &DispersionParams::default(),
            &GlmFitParams::default(),
        );
        assert!(alpha.is_nan());
    }
}
