//! Likelihood ratio test results and significance ranking

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Per-gene results of the full vs reduced likelihood ratio test
/// R equivalent: results(dds) after nbinomLRT(), as a DESeqResults table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LrtResults {
    /// Gene identifiers
    pub gene_ids: Vec<String>,
    /// Mean of normalized counts across all samples
    pub base_means: Vec<f64>,
    /// Last coefficient of the full model, log2 scale
    pub log2_fold_changes: Vec<f64>,
    /// 2 * (logLike_full - logLike_reduced)
    pub stat: Vec<f64>,
    pub pvalues: Vec<f64>,
    /// Benjamini-Hochberg adjusted p-values
    pub padj: Vec<f64>,
    /// Final (MAP) dispersion used for both fits
    pub dispersions: Vec<f64>,
    /// Both IRLS fits converged
    pub converged: Vec<bool>,
    pub full_formula: String,
    pub reduced_formula: String,
}

impl LrtResults {
    /// Results with every value missing, for `n` genes
    pub fn new(gene_ids: Vec<String>, full_formula: String, reduced_formula: String) -> Self {
        let n = gene_ids.len();
        Self {
            gene_ids,
            base_means: vec![f64::NAN; n],
            log2_fold_changes: vec![f64::NAN; n],
            stat: vec![f64::NAN; n],
            pvalues: vec![f64::NAN; n],
            padj: vec![f64::NAN; n],
            dispersions: vec![f64::NAN; n],
            converged: vec![false; n],
            full_formula,
            reduced_formula,
        }
    }

    pub fn n_genes(&self) -> usize {
        self.gene_ids.len()
    }

    /// Row index of a gene
    pub fn gene_index(&self, gene_id: &str) -> Option<usize> {
        self.gene_ids.iter().position(|g| g == gene_id)
    }

    /// Description of the test, as printed in the header of R's results table
    pub fn description(&self) -> String {
        format!(
            "LRT p-value: '{}' vs '{}'",
            self.full_formula, self.reduced_formula
        )
    }

    pub fn summary(&self, alpha: f64) -> ResultsSummary {
        ResultsSummary {
            total_genes: self.n_genes(),
            genes_tested: self.pvalues.iter().filter(|p| p.is_finite()).count(),
            significant: self
                .padj
                .iter()
                .filter(|p| p.is_finite() && **p < alpha)
                .count(),
            not_converged: self.converged.iter().filter(|c| !**c).count(),
            alpha,
        }
    }
}

/// One row of the significance-ranked table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedGene {
    pub gene_id: String,
    #[serde(rename = "baseMean")]
    pub base_mean: f64,
    #[serde(rename = "log2FoldChange")]
    pub log2_fold_change: f64,
    pub stat: f64,
    pub pvalue: f64,
    pub padj: f64,
}

/// Genes with finite padj below `alpha`, by ascending raw p-value.
/// Equal p-values are ordered by gene id.
pub fn rank_significant(results: &LrtResults, alpha: f64) -> Vec<RankedGene> {
    let mut ranked: Vec<RankedGene> = (0..results.n_genes())
        .filter(|&i| results.padj[i].is_finite() && results.padj[i] < alpha)
        .map(|i| RankedGene {
            gene_id: results.gene_ids[i].clone(),
            base_mean: results.base_means[i],
            log2_fold_change: results.log2_fold_changes[i],
            stat: results.stat[i],
            pvalue: results.pvalues[i],
            padj: results.padj[i],
        })
        .collect();

    ranked.sort_by(|a, b| {
        a.pvalue
            .partial_cmp(&b.pvalue)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.gene_id.cmp(&b.gene_id))
    });
    ranked
}

/// Summary of an LRT run
/// R equivalent: summary(res) output in results.R
#[derive(Debug, Clone)]
pub struct ResultsSummary {
    pub total_genes: usize,
    pub genes_tested: usize,
    pub significant: usize,
    pub not_converged: usize,
    pub alpha: f64,
}

impl std::fmt::Display for ResultsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Spline LRT Summary")?;
        writeln!(f, "==================")?;
        writeln!(f, "Total genes: {}", self.total_genes)?;
        writeln!(f, "Genes tested: {}", self.genes_tested)?;
        writeln!(f, "Significant (padj < {}): {}", self.alpha, self.significant)?;
        writeln!(f, "Not converged: {}", self.not_converged)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::benjamini_hochberg;

    fn results_with_pvalues(pvalues: &[f64]) -> LrtResults {
        let ids = (0..pvalues.len()).map(|i| format!("gene{}", i)).collect();
        let mut res = LrtResults::new(ids, "~ donor + donor:fun1".into(), "~ donor + fun1".into());
        res.pvalues = pvalues.to_vec();
        res.padj = benjamini_hochberg(pvalues);
        res.converged = vec![true; pvalues.len()];
        res
    }

    #[test]
    fn test_rank_keeps_only_adjusted_significant() {
        let res = results_with_pvalues(&[0.02, 0.001, 0.5, 0.009]);
        let ranked = rank_significant(&res, 0.01);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].gene_id, "gene1");
        assert_eq!(ranked[0].pvalue, 0.001);
    }

    #[test]
    fn test_rank_sorted_by_raw_pvalue() {
        let mut res = results_with_pvalues(&[0.003, 0.001, 0.002, 0.5]);
        res.padj = vec![0.04, 0.04, 0.04, 0.9];
        let ranked = rank_significant(&res, 0.05);
        let ids: Vec<&str> = ranked.iter().map(|r| r.gene_id.as_str()).collect();
        assert_eq!(ids, vec!["gene1", "gene2", "gene0"]);
    }

    #[test]
    fn test_rank_ties_by_gene_id_and_nan_padj_dropped() {
        let mut res = results_with_pvalues(&[0.001, 0.001, f64::NAN]);
        res.gene_ids = vec!["b".into(), "a".into(), "c".into()];
        let ranked = rank_significant(&res, 0.1);
        let ids: Vec<&str> = ranked.iter().map(|r| r.gene_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_summary_counts() {
        let mut res = results_with_pvalues(&[0.02, 0.001, f64::NAN, 0.009]);
        res.converged[3] = false;
        let summary = res.summary(0.05);
        assert_eq!(summary.genes_tested, 3);
        assert_eq!(summary.significant, 3);
        assert_eq!(summary.not_converged, 1);
        assert!(summary.to_string().contains("Not converged: 1"));
    }
}
