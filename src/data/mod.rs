//! Data structures for time-course experiments

mod count_matrix;
mod metadata;
mod title;

pub use count_matrix::CountMatrix;
pub use metadata::SampleMetadata;
pub use title::{
    annotate_samples, parse_sample_title, MissingTitlePolicy, SampleTitle, DONOR_COLUMN,
    TIME_COLUMN, TITLE_COLUMN,
};
