//! Per-gene coefficient table

use ndarray::{Array2, ArrayView1};

use crate::error::{Result, SplineDeError};

/// Genes x model terms, log2 scale
/// R equivalent: coef(dds)
#[derive(Debug, Clone)]
pub struct CoefficientTable {
    gene_ids: Vec<String>,
    terms: Vec<String>,
    values: Array2<f64>,
}

impl CoefficientTable {
    pub fn new(gene_ids: Vec<String>, terms: Vec<String>, values: Array2<f64>) -> Result<Self> {
        if values.dim() != (gene_ids.len(), terms.len()) {
            return Err(SplineDeError::DimensionMismatch {
                expected: format!("{} x {} coefficients", gene_ids.len(), terms.len()),
                got: format!("{} x {} coefficients", values.nrows(), values.ncols()),
            });
        }
        Ok(Self {
            gene_ids,
            terms,
            values,
        })
    }

    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn n_genes(&self) -> usize {
        self.gene_ids.len()
    }

    pub fn gene_index(&self, gene_id: &str) -> Result<usize> {
        self.gene_ids
            .iter()
            .position(|g| g == gene_id)
            .ok_or_else(|| SplineDeError::UnknownGene {
                gene_id: gene_id.to_string(),
            })
    }

    pub fn term_index(&self, term: &str) -> Result<usize> {
        self.terms
            .iter()
            .position(|t| t == term)
            .ok_or_else(|| SplineDeError::TermMismatch {
                reason: format!("no coefficient named '{}'", term),
            })
    }

    /// All coefficients of one gene, in term order
    pub fn gene(&self, gene_id: &str) -> Result<ArrayView1<'_, f64>> {
        Ok(self.values.row(self.gene_index(gene_id)?))
    }

    pub fn get(&self, gene_id: &str, term: &str) -> Result<f64> {
        Ok(self.values[[self.gene_index(gene_id)?, self.term_index(term)?]])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn table() -> CoefficientTable {
        CoefficientTable::new(
            vec!["g1".into(), "g2".into()],
            vec!["Intercept".into(), "donor_B_vs_A".into()],
            array![[2.0, 0.5], [7.0, -1.0]],
        )
        .unwrap()
    }

    #[test]
    fn test_lookup_by_gene_and_term() {
        let t = table();
        assert_eq!(t.get("g2", "donor_B_vs_A").unwrap(), -1.0);
        assert_eq!(t.gene("g1").unwrap().to_vec(), vec![2.0, 0.5]);
    }

    #[test]
    fn test_unknown_names() {
        let t = table();
        assert!(matches!(t.get("g3", "Intercept"), Err(SplineDeError::UnknownGene { .. })));
        assert!(matches!(t.get("g1", "fun1"), Err(SplineDeError::TermMismatch { .. })));
    }

    #[test]
    fn test_shape_checked() {
        let err = CoefficientTable::new(vec!["g1".into()], vec!["Intercept".into()], array![[1.0, 2.0]]);
        assert!(matches!(err, Err(SplineDeError::DimensionMismatch { .. })));
    }
}
