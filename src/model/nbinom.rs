//! Negative binomial GLM with a likelihood ratio test

use std::f64::consts::LN_2;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::{CoefficientTable, ModelFit, ModelFitter};
use crate::data::{CountMatrix, SampleMetadata};
use crate::dispersion::{estimate_dispersions, DispersionParams, TrendFitMethod};
use crate::error::{Result, SplineDeError};
use crate::glm::{create_design_matrix, fit_glm, Formula, GlmFitParams, GlmFitResult};
use crate::io::LrtResults;
use crate::normalization::{base_means, estimate_size_factors, normalized_counts, SizeFactorMethod};
use crate::testing::{benjamini_hochberg, likelihood_ratio_test};

/// Default fitter: size factors, dispersion shrinkage, IRLS, LRT.
/// R equivalent: DESeq(dds, test = "LRT", reduced = ...)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NbinomLrt {
    pub size_factor_method: SizeFactorMethod,
    pub fit_type: TrendFitMethod,
    pub dispersion: DispersionParams,
    pub glm: GlmFitParams,
}

impl ModelFitter for NbinomLrt {
    fn fit(
        &self,
        counts: &CountMatrix,
        covariates: &SampleMetadata,
        full: &Formula,
        reduced: &Formula,
    ) -> Result<ModelFit> {
        if counts.sample_ids() != covariates.sample_ids() {
            return Err(SplineDeError::InvalidMetadata {
                reason: "sample ids of counts and covariates differ".to_string(),
            });
        }

        let (full_matrix, full_design) = create_design_matrix(covariates, full)?;
        let (reduced_matrix, reduced_design) = create_design_matrix(covariates, reduced)?;
        let df = full_matrix
            .ncols()
            .checked_sub(reduced_matrix.ncols())
            .filter(|&df| df > 0)
            .ok_or_else(|| SplineDeError::InvalidDesignMatrix {
                reason: format!(
                    "full model '{}' has {} coefficients, reduced model '{}' has {}",
                    full,
                    full_matrix.ncols(),
                    reduced,
                    reduced_matrix.ncols()
                ),
            })?;
        log::info!(
            "Full model {} ({} coefficients) vs reduced {} ({}), df = {}",
            full,
            full_matrix.ncols(),
            reduced,
            reduced_matrix.ncols(),
            df
        );

        let raw = counts.counts();
        if raw.iter().any(|&c| c.fract() != 0.0) {
            log::warn!("Count matrix contains non-integer values");
        }

        let size_factors = estimate_size_factors(raw, self.size_factor_method)?;
        log::debug!("Size factors: {:?}", size_factors.to_vec());
        let means = base_means(&normalized_counts(raw, &size_factors));

        let dispersions = estimate_dispersions(
            raw,
            &size_factors,
            &full_matrix,
            &means,
            self.fit_type,
            &self.dispersion,
            &self.glm,
        )?;

        log::info!("Fitting full and reduced models for {} genes", counts.n_genes());
        let full_fits = fit_glm(raw, &full_matrix, &size_factors, &dispersions.map, &self.glm);
        let reduced_fits = fit_glm(raw, &reduced_matrix, &size_factors, &dispersions.map, &self.glm);

        let all_zero: Vec<bool> = (0..counts.n_genes())
            .map(|i| counts.gene_counts(i).iter().all(|&c| c == 0.0))
            .collect();
        for (i, gene_id) in counts.gene_ids().iter().enumerate() {
            if all_zero[i] {
                continue;
            }
            check_fit(gene_id, "full", &full_fits[i])?;
            check_fit(gene_id, "reduced", &reduced_fits[i])?;
        }

        let mut outcomes = likelihood_ratio_test(&full_fits, &reduced_fits, df)?;
        for (outcome, &zero) in outcomes.iter_mut().zip(&all_zero) {
            if zero {
                outcome.stat = f64::NAN;
                outcome.pvalue = f64::NAN;
            }
        }

        let n_genes = counts.n_genes();
        let n_coefs = full_matrix.ncols();
        let mut coef_values = Array2::from_elem((n_genes, n_coefs), f64::NAN);
        let mut results = LrtResults::new(
            counts.gene_ids().to_vec(),
            full.to_string(),
            reduced.to_string(),
        );
        for i in 0..n_genes {
            results.base_means[i] = means[i];
            results.dispersions[i] = dispersions.map[i];
            if all_zero[i] {
                continue;
            }
            for (j, &b) in full_fits[i].coefficients.iter().enumerate() {
                coef_values[[i, j]] = b / LN_2;
            }
            results.log2_fold_changes[i] = coef_values[[i, n_coefs - 1]];
            results.stat[i] = outcomes[i].stat;
            results.pvalues[i] = outcomes[i].pvalue;
            results.converged[i] = full_fits[i].converged && reduced_fits[i].converged;
        }
        results.padj = benjamini_hochberg(&results.pvalues);

        let not_converged: Vec<&str> = (0..n_genes)
            .filter(|&i| !all_zero[i] && !results.converged[i])
            .map(|i| results.gene_ids[i].as_str())
            .collect();
        if !not_converged.is_empty() {
            log::warn!(
                "{} genes did not converge: {}",
                not_converged.len(),
                not_converged.join(", ")
            );
        }

        let coefficients = CoefficientTable::new(
            counts.gene_ids().to_vec(),
            full_design.coef_names.clone(),
            coef_values,
        )?;

        Ok(ModelFit {
            coefficients,
            results,
            full_design,
            full_matrix,
            reduced_design,
            size_factors,
            dispersions,
        })
    }
}

/// Non-finite estimates fail the whole run
fn check_fit(gene_id: &str, model: &str, fit: &GlmFitResult) -> Result<()> {
    if fit.coefficients.iter().any(|b| !b.is_finite()) {
        return Err(SplineDeError::GlmConvergenceFailed {
            gene_id: gene_id.to_string(),
            reason: format!("non-finite coefficients in the {} model", model),
        });
    }
    if !fit.log_likelihood.is_finite() {
        return Err(SplineDeError::GlmConvergenceFailed {
            gene_id: gene_id.to_string(),
            reason: format!("non-finite log-likelihood in the {} model", model),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn two_group_experiment() -> (CountMatrix, SampleMetadata) {
        let n_samples = 8;
        let groups = ["a", "a", "a", "a", "b", "b", "b", "b"];
        let noise = [0.8, 1.2, 1.0, 0.9, 1.15, 0.85, 1.1, 0.95];
        let scale = [1.0, 1.0, 4.0, 0.25, 1.0, 1.0];
        let counts = Array2::from_shape_fn((6, n_samples), |(i, j)| {
            let base = 50.0 * (i + 1) as f64 * noise[(i + j) % 8];
            let effect = if groups[j] == "b" { scale[i] } else { 1.0 };
            (base * effect).round()
        });
        let gene_ids = (0..6).map(|i| format!("g{}", i)).collect();
        let sample_ids: Vec<String> = (0..n_samples).map(|j| format!("s{}", j)).collect();
        let matrix = CountMatrix::new(counts, gene_ids, sample_ids.clone()).unwrap();
        let mut meta = SampleMetadata::new(sample_ids);
        meta.add_condition("group", groups.iter().map(|g| g.to_string()).collect())
            .unwrap();
        (matrix, meta)
    }

    #[test]
    fn test_group_effect_detected() {
        let (counts, meta) = two_group_experiment();
        let full: Formula = "~ group".parse().unwrap();
        let reduced: Formula = "~ 1".parse().unwrap();
        let fit = NbinomLrt::default().fit(&counts, &meta, &full, &reduced).unwrap();

        assert_eq!(fit.coefficients.terms(), &["Intercept", "group_b_vs_a"]);
        assert!(fit.results.pvalues[2] < 1e-6);
        assert!(fit.results.pvalues[3] < 1e-6);
        assert!(fit.results.pvalues[0] > 0.01);
        assert!((fit.results.log2_fold_changes[2] - 2.0).abs() < 0.3);
        assert!((fit.results.log2_fold_changes[3] + 2.0).abs() < 0.3);
        assert!(fit.results.converged.iter().all(|&c| c));
    }

    #[test]
    fn test_reduced_must_be_smaller() {
        let (counts, meta) = two_group_experiment();
        let full: Formula = "~ group".parse().unwrap();
        let err = NbinomLrt::default().fit(&counts, &meta, &full, &full);
        assert!(matches!(err, Err(SplineDeError::InvalidDesignMatrix { .. })));
    }

    #[test]
    fn test_mismatched_samples_rejected() {
        let (counts, meta) = two_group_experiment();
        let other = meta.subset(&[0, 1, 2, 3, 4, 5, 7, 6]).unwrap();
        let full: Formula = "~ group".parse().unwrap();
        let reduced: Formula = "~ 1".parse().unwrap();
        let err = NbinomLrt::default().fit(&counts, &other, &full, &reduced);
        assert!(matches!(err, Err(SplineDeError::InvalidMetadata { .. })));
    }
}
