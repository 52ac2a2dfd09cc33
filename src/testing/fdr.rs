//! Multiple testing correction

use std::cmp::Ordering;

/// Apply Benjamini-Hochberg FDR correction to p-values
/// R equivalent: p.adjust(method="BH") via pvalueAdjustment() in results.R
///
/// NaN p-values stay NaN and do not count towards the number of tests.
pub fn benjamini_hochberg(pvalues: &[f64]) -> Vec<f64> {
    let n = pvalues.len();
    let m = pvalues.iter().filter(|p| p.is_finite()).count();
    if m == 0 {
        return vec![f64::NAN; n];
    }

    let mut finite: Vec<usize> = (0..n).filter(|&i| pvalues[i].is_finite()).collect();
    finite.sort_by(|&a, &b| pvalues[a].partial_cmp(&pvalues[b]).unwrap_or(Ordering::Equal));

    let mut padj = vec![f64::NAN; n];
    let mut cummin = f64::INFINITY;
    for (rank, &i) in finite.iter().enumerate().rev() {
        let adj = (pvalues[i] * m as f64 / (rank + 1) as f64).min(1.0);
        cummin = cummin.min(adj);
        padj[i] = cummin;
    }
    padj
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_bh_matches_p_adjust() {
        // p.adjust(c(0.02, 0.001, 0.5, 0.009), "BH")
        let padj = benjamini_hochberg(&[0.02, 0.001, 0.5, 0.009]);
        assert_relative_eq!(padj[0], 0.08 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(padj[1], 0.004, epsilon = 1e-12);
        assert_relative_eq!(padj[2], 0.5, epsilon = 1e-12);
        assert_relative_eq!(padj[3], 0.018, epsilon = 1e-12);
    }

    #[test]
    fn test_bh_monotone_after_sorting() {
        let pvalues = [0.01, 0.04, 0.03, 0.02, 0.9];
        let padj = benjamini_hochberg(&pvalues);
        for (p, adj) in pvalues.iter().zip(&padj) {
            assert!(adj >= p && *adj <= 1.0);
        }
        assert_relative_eq!(padj[1], 0.05, epsilon = 1e-12);
        assert_relative_eq!(padj[0], 0.05, epsilon = 1e-12);
    }

    #[test]
    fn test_bh_with_nan() {
        let padj = benjamini_hochberg(&[0.01, f64::NAN, 0.03]);
        assert_relative_eq!(padj[0], 0.02, epsilon = 1e-12);
        assert!(padj[1].is_nan());
        assert_relative_eq!(padj[2], 0.03, epsilon = 1e-12);
    }

    #[test]
    fn test_bh_empty() {
        assert!(benjamini_hochberg(&[]).is_empty());
    }
}
