//! Genes x samples read counts

use std::collections::{HashMap, HashSet};

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

use crate::error::{Result, SplineDeError};

/// Repeated gene ids get `_1`, `_2`, ... in order of appearance
fn make_unique(ids: Vec<String>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::with_capacity(ids.len());
    ids.into_iter()
        .map(|id| {
            let n = seen.entry(id.clone()).or_insert(0);
            *n += 1;
            if *n == 1 {
                return id;
            }
            let renamed = format!("{}_{}", id, *n - 1);
            log::warn!("Duplicate gene id '{}' renamed to '{}'", id, renamed);
            renamed
        })
        .collect()
}

fn check_indices(indices: &[usize], len: usize, what: &str) -> Result<()> {
    match indices.iter().find(|&&i| i >= len) {
        Some(&i) => Err(SplineDeError::DimensionMismatch {
            expected: format!("{} index < {}", what, len),
            got: i.to_string(),
        }),
        None => Ok(()),
    }
}

/// Read counts of one experiment. Immutable: filtering and subsetting
/// return new matrices.
#[derive(Debug, Clone)]
pub struct CountMatrix {
    counts: Array2<f64>,
    gene_ids: Vec<String>,
    sample_ids: Vec<String>,
    gene_lookup: HashMap<String, usize>,
}

impl CountMatrix {
    pub fn new(counts: Array2<f64>, gene_ids: Vec<String>, sample_ids: Vec<String>) -> Result<Self> {
        let (n_genes, n_samples) = counts.dim();
        if gene_ids.len() != n_genes {
            return Err(SplineDeError::DimensionMismatch {
                expected: format!("{} gene ids", n_genes),
                got: format!("{} gene ids", gene_ids.len()),
            });
        }
        if sample_ids.len() != n_samples {
            return Err(SplineDeError::DimensionMismatch {
                expected: format!("{} sample ids", n_samples),
                got: format!("{} sample ids", sample_ids.len()),
            });
        }
        let mut distinct = HashSet::with_capacity(n_samples);
        if let Some(dup) = sample_ids.iter().find(|id| !distinct.insert(id.as_str())) {
            return Err(SplineDeError::InvalidCountMatrix {
                reason: format!("sample id '{}' appears more than once", dup),
            });
        }
        if let Some(bad) = counts.iter().find(|&&c| !(c.is_finite() && c >= 0.0)) {
            return Err(SplineDeError::InvalidCountMatrix {
                reason: format!("counts must be finite and non-negative, found {}", bad),
            });
        }

        let gene_ids = make_unique(gene_ids);
        let gene_lookup = gene_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();

        Ok(Self {
            counts,
            gene_ids,
            sample_ids,
            gene_lookup,
        })
    }

    pub fn n_genes(&self) -> usize {
        self.counts.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.counts.ncols()
    }

    pub fn counts(&self) -> ArrayView2<'_, f64> {
        self.counts.view()
    }

    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn gene_counts(&self, gene_idx: usize) -> ArrayView1<'_, f64> {
        self.counts.row(gene_idx)
    }

    pub fn gene_index(&self, gene_id: &str) -> Option<usize> {
        self.gene_lookup.get(gene_id).copied()
    }

    /// Samples in the given order
    pub fn subset_samples(&self, sample_indices: &[usize]) -> Result<Self> {
        check_indices(sample_indices, self.n_samples(), "sample")?;
        let sample_ids = sample_indices.iter().map(|&j| self.sample_ids[j].clone()).collect();
        Self::new(
            self.counts.select(Axis(1), sample_indices),
            self.gene_ids.clone(),
            sample_ids,
        )
    }

    /// Genes in the given order
    pub fn subset_genes(&self, gene_indices: &[usize]) -> Result<Self> {
        check_indices(gene_indices, self.n_genes(), "gene")?;
        let gene_ids = gene_indices.iter().map(|&i| self.gene_ids[i].clone()).collect();
        Self::new(
            self.counts.select(Axis(0), gene_indices),
            gene_ids,
            self.sample_ids.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn samples(n: usize) -> Vec<String> {
        (0..n).map(|j| format!("GSM{}", j)).collect()
    }

    #[test]
    fn test_lookup_and_dims() {
        let m = CountMatrix::new(
            array![[10.0, 20.0, 30.0], [5.0, 15.0, 25.0]],
            vec!["IL6".into(), "CXCL8".into()],
            samples(3),
        )
        .unwrap();
        assert_eq!((m.n_genes(), m.n_samples()), (2, 3));
        assert_eq!(m.gene_index("CXCL8"), Some(1));
        assert_eq!(m.gene_index("TNF"), None);
        assert_eq!(m.gene_counts(1).to_vec(), vec![5.0, 15.0, 25.0]);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let genes = vec!["a".to_string(), "b".to_string()];
        assert!(CountMatrix::new(array![[1.0, -5.0], [5.0, 1.0]], genes.clone(), samples(2)).is_err());
        assert!(CountMatrix::new(array![[1.0, f64::NAN], [5.0, 1.0]], genes.clone(), samples(2)).is_err());
        let err = CountMatrix::new(array![[1.0, 2.0], [5.0, 1.0]], genes, samples(3)).unwrap_err();
        assert!(matches!(err, SplineDeError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_duplicate_ids() {
        let m = CountMatrix::new(
            array![[1.0], [2.0], [3.0]],
            vec!["a".into(), "a".into(), "b".into()],
            samples(1),
        )
        .unwrap();
        assert_eq!(m.gene_ids(), &["a", "a_1", "b"]);
        assert_eq!(m.gene_index("a_1"), Some(1));

        let err = CountMatrix::new(array![[1.0, 2.0]], vec!["a".into()], vec!["s".into(), "s".into()]);
        assert!(matches!(err, Err(SplineDeError::InvalidCountMatrix { .. })));
    }

    #[test]
    fn test_subsets() {
        let m = CountMatrix::new(
            array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]],
            vec!["a".into(), "b".into()],
            samples(3),
        )
        .unwrap();
        let sub = m.subset_samples(&[2, 0]).unwrap();
        assert_eq!(sub.sample_ids(), &["GSM2", "GSM0"]);
        assert_eq!(sub.counts()[[1, 0]], 6.0);

        let genes = m.subset_genes(&[1]).unwrap();
        assert_eq!(genes.gene_ids(), &["b"]);
        assert_eq!(genes.gene_index("b"), Some(0));
        assert!(m.subset_genes(&[5]).is_err());
    }
}
