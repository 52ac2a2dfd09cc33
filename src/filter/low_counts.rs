//! Low-count gene filtering

use serde::{Deserialize, Serialize};

use crate::data::CountMatrix;
use crate::error::{Result, SplineDeError};

/// Read-support filter applied before model fitting.
///
/// A gene is kept iff at least `min_samples` samples have a raw count of
/// at least `min_count`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CountFilter {
    pub min_count: f64,
    pub min_samples: usize,
}

impl Default for CountFilter {
    fn default() -> Self {
        Self {
            min_count: 10.0,
            min_samples: 5,
        }
    }
}

impl CountFilter {
    pub fn new(min_count: f64, min_samples: usize) -> Self {
        Self {
            min_count,
            min_samples,
        }
    }

    /// Whether a single gene's counts pass the filter
    pub fn passes<'a, I>(&self, counts: I) -> bool
    where
        I: IntoIterator<Item = &'a f64>,
    {
        counts.into_iter().filter(|&&c| c >= self.min_count).count() >= self.min_samples
    }

    /// Indices of genes passing the filter
    pub fn passing_genes(&self, counts: &CountMatrix) -> Vec<usize> {
        (0..counts.n_genes())
            .filter(|&i| self.passes(counts.gene_counts(i).iter()))
            .collect()
    }

    /// Return a new matrix restricted to passing genes (original order kept)
    pub fn apply(&self, counts: &CountMatrix) -> Result<CountMatrix> {
        let keep = self.passing_genes(counts);
        log::info!(
            "Count filter (>= {} reads in >= {} samples): kept {} of {} genes",
            self.min_count,
            self.min_samples,
            keep.len(),
            counts.n_genes()
        );
        if keep.is_empty() {
            return Err(SplineDeError::EmptyData {
                reason: format!(
                    "no gene has >= {} reads in >= {} samples",
                    self.min_count, self.min_samples
                ),
            });
        }
        counts.subset_genes(&keep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn matrix() -> CountMatrix {
        let counts = array![
            [12.0, 0.0, 0.0, 15.0, 20.0, 9.0],
            [12.0, 11.0, 15.0, 20.0, 9.0, 10.0],
            [100.0, 200.0, 150.0, 120.0, 90.0, 80.0]
        ];
        let genes = vec!["sparse".to_string(), "edge".to_string(), "high".to_string()];
        let samples = (1..=6).map(|i| format!("s{}", i)).collect();
        CountMatrix::new(counts, genes, samples).unwrap()
    }

    #[test]
    fn test_sparse_gene_dropped() {
        // Only three samples reach 10 reads
        let filter = CountFilter::default();
        assert!(!filter.passes([12.0, 0.0, 0.0, 15.0, 20.0, 9.0].iter()));
    }

    #[test]
    fn test_gene_at_threshold_kept() {
        // Five of six samples reach 10 reads
        let filter = CountFilter::default();
        assert!(filter.passes([12.0, 11.0, 15.0, 20.0, 9.0, 10.0].iter()));
    }

    #[test]
    fn test_apply_keeps_order() {
        let filtered = CountFilter::default().apply(&matrix()).unwrap();
        assert_eq!(filtered.gene_ids(), &["edge", "high"]);
        assert_eq!(filtered.n_samples(), 6);
    }

    #[test]
    fn test_empty_result_is_error() {
        let err = CountFilter::new(1000.0, 5).apply(&matrix()).unwrap_err();
        assert!(matches!(err, SplineDeError::EmptyData { .. }));
    }
}
