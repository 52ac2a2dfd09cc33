//! Negative binomial distribution utilities

use ndarray::Array2;
use statrs::function::gamma::{digamma, ln_gamma};

use crate::stats::{invert_symmetric, log_det_symmetric, weighted_crossprod};

/// Minimum mu value during GLM fitting (DESeq2's minmu parameter)
pub const MIN_MU: f64 = 0.5;

/// Maximum absolute natural-log coefficient before IRLS gives up.
/// DESeq2 uses 'large' = 30 in fitBeta
pub const MAX_LFC_BETA: f64 = 30.0;

/// Maximum eta value to prevent overflow (exp(700) ≈ 1e304)
pub const MAX_ETA: f64 = 700.0;

/// mu = size_factor * exp(eta)
pub fn nb_mean(eta: f64, size_factor: f64) -> f64 {
    size_factor * eta.clamp(-MAX_ETA, MAX_ETA).exp()
}

/// IRLS weight W = mu / (1 + alpha * mu)
pub fn nb_weight(mu: f64, alpha: f64) -> f64 {
    mu / (1.0 + alpha * mu)
}

/// Log-likelihood of one observation.
/// R equivalent: dnbinom(y, size = 1/alpha, mu = mu, log = TRUE)
pub fn nb_log_likelihood(y: f64, mu: f64, alpha: f64) -> f64 {
    if alpha <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if y == 0.0 && mu == 0.0 {
        return 0.0;
    }
    if mu <= 0.0 {
        return f64::NEG_INFINITY;
    }

    let size = 1.0 / alpha;
    ln_gamma(y + size) - ln_gamma(size) - ln_gamma(y + 1.0)
        + size * (size / (size + mu)).ln()
        + y * (mu / (size + mu)).ln()
}

/// Normal prior on log(alpha): (mean, variance)
pub type LogAlphaPrior = (f64, f64);

/// Cox-Reid adjusted profile log-likelihood of log(alpha) at fixed mu,
/// optionally with a normal prior on log(alpha).
/// R equivalent: DESeq2 C++ log_posterior
pub fn dispersion_log_posterior(
    counts: &[f64],
    design: &Array2<f64>,
    mu: &[f64],
    log_alpha: f64,
    prior: Option<LogAlphaPrior>,
) -> f64 {
    let alpha = log_alpha.exp();
    let alpha_inv = 1.0 / alpha;

    let mut ll_part = 0.0;
    let mut weights = Vec::with_capacity(counts.len());
    for (&y, &m) in counts.iter().zip(mu) {
        let m = m.max(1e-10);
        ll_part += ln_gamma(y + alpha_inv) - ln_gamma(alpha_inv)
            - y * (m + alpha_inv).ln()
            - alpha_inv * (1.0 + m * alpha).ln();
        weights.push(1.0 / (1.0 / m + alpha));
    }

    let cr_term = log_det_symmetric(&weighted_crossprod(design, &weights))
        .map(|d| -0.5 * d)
        .unwrap_or(0.0);

    let prior_part = prior
        .map(|(mean, var)| -0.5 * (log_alpha - mean).powi(2) / var)
        .unwrap_or(0.0);

    ll_part + cr_term + prior_part
}

/// Derivative of [`dispersion_log_posterior`] with respect to log(alpha)
/// R equivalent: DESeq2 C++ dlog_posterior
pub fn dispersion_log_posterior_deriv(
    counts: &[f64],
    design: &Array2<f64>,
    mu: &[f64],
    log_alpha: f64,
    prior: Option<LogAlphaPrior>,
) -> f64 {
    let alpha = log_alpha.exp();
    let alpha_sq = alpha * alpha;
    let alpha_inv = 1.0 / alpha;

    let mut dll = 0.0;
    let mut weights = Vec::with_capacity(counts.len());
    let mut dweights = Vec::with_capacity(counts.len());
    for (&y, &m) in counts.iter().zip(mu) {
        let m = m.max(1e-10);
        dll += (digamma(alpha_inv) + (1.0 + m * alpha).ln() - m * alpha / (1.0 + m * alpha)
            - digamma(y + alpha_inv)
            + y / (m + alpha_inv))
            / alpha_sq;
        let w = 1.0 / (1.0 / m + alpha);
        weights.push(w);
        dweights.push(-w * w);
    }

    // d/dalpha of -0.5 log|X'WX| = -0.5 tr((X'WX)^-1 X' dW X)
    let dcr = invert_symmetric(&weighted_crossprod(design, &weights))
        .map(|inv| {
            let db = weighted_crossprod(design, &dweights);
            -0.5 * (&inv * &db).sum()
        })
        .unwrap_or(0.0);

    let prior_part = prior
        .map(|(mean, var)| -(log_alpha - mean) / var)
        .unwrap_or(0.0);

    (dll + dcr) * alpha + prior_part
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_nb_mean_and_weight() {
        assert_abs_diff_eq!(nb_mean(2.0, 1.0), 2.0f64.exp(), epsilon = 1e-10);
        assert_abs_diff_eq!(nb_weight(10.0, 0.1), 5.0, epsilon = 1e-10);
    }

    #[test]
    fn test_nb_log_likelihood_poisson_limit() {
        // Poisson(5) at 5: 5 ln 5 - 5 - ln 120
        let poisson = 5.0 * 5.0f64.ln() - 5.0 - 120.0f64.ln();
        assert_abs_diff_eq!(nb_log_likelihood(5.0, 5.0, 1e-8), poisson, epsilon = 1e-5);
        assert_eq!(nb_log_likelihood(0.0, 0.0, 0.1), 0.0);
        assert_eq!(nb_log_likelihood(3.0, 0.0, 0.1), f64::NEG_INFINITY);
    }

    #[test]
    fn test_posterior_derivative_matches_finite_difference() {
        let design = array![[1.0, 0.0], [1.0, 0.0], [1.0, 1.0], [1.0, 1.0], [1.0, 1.0]];
        let counts = [12.0, 30.0, 55.0, 20.0, 41.0];
        let mu = [20.0, 20.0, 38.0, 38.0, 38.0];
        let prior = Some((0.1f64.ln(), 1.0));
        for prior in [None, prior] {
            let la = -1.5;
            let h = 1e-5;
            let numeric = (dispersion_log_posterior(&counts, &design, &mu, la + h, prior)
                - dispersion_log_posterior(&counts, &design, &mu, la - h, prior))
                / (2.0 * h);
            let analytic = dispersion_log_posterior_deriv(&counts, &design, &mu, la, prior);
            assert_abs_diff_eq!(analytic, numeric, epsilon = 1e-5);
        }
    }
}
