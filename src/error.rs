//! Error types for spline_deseq

use thiserror::Error;

/// Main error type for spline time-course analysis
#[derive(Error, Debug)]
pub enum SplineDeError {
    #[error("Invalid count matrix: {reason}")]
    InvalidCountMatrix { reason: String },

    #[error("Invalid metadata: {reason}")]
    InvalidMetadata { reason: String },

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: String, got: String },

    #[error("Invalid formula '{formula}': {reason}")]
    InvalidFormula { formula: String, reason: String },

    #[error("Invalid design matrix: {reason}")]
    InvalidDesignMatrix { reason: String },

    #[error("Invalid spline: {reason}")]
    InvalidSpline { reason: String },

    #[error("Spline basis mismatch: {reason}")]
    BasisMismatch { reason: String },

    #[error("Model terms do not match the curve layout: {reason}")]
    TermMismatch { reason: String },

    #[error("Unknown gene '{gene_id}'")]
    UnknownGene { gene_id: String },

    #[error("Unknown group '{level}' for factor '{factor}'")]
    UnknownGroup { factor: String, level: String },

    #[error("GLM fit failed for gene {gene_id}: {reason}")]
    GlmConvergenceFailed { gene_id: String, reason: String },

    #[error("Dispersion estimation failed: {reason}")]
    DispersionEstimationFailed { reason: String },

    #[error("Size factor estimation failed: {reason}")]
    SizeFactorFailed { reason: String },

    #[error("Trend fitting failed: {reason}")]
    TrendFittingFailed { reason: String },

    #[error("Empty data: {reason}")]
    EmptyData { reason: String },

    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("Plotting failed: {reason}")]
    Plot { reason: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Result type alias for spline_deseq operations
pub type Result<T> = std::result::Result<T, SplineDeError>;
