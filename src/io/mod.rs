//! Reading experiments and writing result tables

mod csv;
mod results;

pub use self::csv::{
    align_samples, read_count_matrix, read_experiment_bundle, read_sample_table,
    write_coefficients, write_ranked, write_results, ExperimentBundle,
};
pub use results::{rank_significant, LrtResults, RankedGene, ResultsSummary};
