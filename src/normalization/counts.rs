//! Normalized counts and per-gene expression summaries

use ndarray::{Array1, Array2, ArrayView2, Axis};

/// Counts divided by the per-sample size factors
/// R equivalent: counts(dds, normalized = TRUE)
pub fn normalized_counts(counts: ArrayView2<f64>, size_factors: &Array1<f64>) -> Array2<f64> {
    let mut normalized = counts.to_owned();
    for (mut column, &sf) in normalized.axis_iter_mut(Axis(1)).zip(size_factors) {
        column.mapv_inplace(|c| c / sf);
    }
    normalized
}

/// Mean of normalized counts per gene (baseMean)
pub fn base_means(normalized: &Array2<f64>) -> Array1<f64> {
    normalized
        .mean_axis(Axis(1))
        .unwrap_or_else(|| Array1::zeros(normalized.nrows()))
}

/// log2(normalized + pseudocount), the scale observed points are plotted on
pub fn log2_normalized(normalized: &Array2<f64>, pseudocount: f64) -> Array2<f64> {
    normalized.mapv(|v| (v + pseudocount).log2())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_normalized_counts_and_base_mean() {
        let counts = array![[10.0, 40.0], [3.0, 8.0]];
        let sf = array![0.5, 2.0];
        let normalized = normalized_counts(counts.view(), &sf);
        assert_eq!(normalized, array![[20.0, 20.0], [6.0, 4.0]]);
        assert_eq!(base_means(&normalized), array![20.0, 5.0]);
    }

    #[test]
    fn test_log2_pseudocount() {
        let normalized = array![[0.0, 1.5]];
        assert_eq!(log2_normalized(&normalized, 0.5), array![[-1.0, 1.0]]);
    }
}
