//! Differential expression model fitting
//!
//! The pipeline only needs a coefficient table and a per-gene test table
//! from a fit, so the statistical model sits behind [`ModelFitter`].

mod coefficients;
mod nbinom;

pub use coefficients::CoefficientTable;
pub use nbinom::NbinomLrt;

use ndarray::{Array1, Array2};

use crate::data::{CountMatrix, SampleMetadata};
use crate::dispersion::DispersionEstimates;
use crate::error::Result;
use crate::glm::{DesignInfo, Formula};
use crate::io::LrtResults;

/// Everything a fit produces for downstream ranking and plotting
#[derive(Debug, Clone)]
pub struct ModelFit {
    /// Full-model coefficients, log2 scale
    pub coefficients: CoefficientTable,
    pub results: LrtResults,
    pub full_design: DesignInfo,
    /// Full model matrix, samples x coefficients
    pub full_matrix: Array2<f64>,
    pub reduced_design: DesignInfo,
    pub size_factors: Array1<f64>,
    pub dispersions: DispersionEstimates,
}

/// A count model tested by comparing a full and a reduced formula
pub trait ModelFitter {
    fn fit(
        &self,
        counts: &CountMatrix,
        covariates: &SampleMetadata,
        full: &Formula,
        reduced: &Formula,
    ) -> Result<ModelFit>;
}
