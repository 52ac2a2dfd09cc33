//! Gene filtering before model fitting

mod low_counts;

pub use low_counts::CountFilter;
