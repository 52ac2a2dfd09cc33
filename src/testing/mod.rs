//! Statistical testing for differential expression

mod fdr;
mod lrt;

pub use fdr::benjamini_hochberg;
pub use lrt::{likelihood_ratio_test, lrt_statistic, LrtOutcome};
