//! Spline bases for continuous time covariates

mod bspline;
mod natural;

pub use bspline::{augmented_knots, spline_design_row, CUBIC_ORDER};
pub use natural::{KnotPlacement, NaturalSpline};

use crate::data::SampleMetadata;
use crate::error::{Result, SplineDeError};

/// Evaluate `spline` on a numeric metadata column and append the basis as
/// numeric columns `<prefix>1..<prefix>K`. Returns the new column names.
pub fn append_basis_columns(
    metadata: &mut SampleMetadata,
    spline: &NaturalSpline,
    source_column: &str,
    prefix: &str,
) -> Result<Vec<String>> {
    let x = metadata
        .continuous(source_column)
        .ok_or_else(|| SplineDeError::InvalidMetadata {
            reason: format!("numeric column '{}' not found", source_column),
        })?
        .clone();
    let basis = spline.basis(&x)?;
    let names = spline.column_names(prefix);
    for (j, name) in names.iter().enumerate() {
        if metadata.has_condition(name) || metadata.has_continuous(name) {
            return Err(SplineDeError::InvalidMetadata {
                reason: format!("basis column '{}' already exists", name),
            });
        }
        metadata.add_continuous(name, basis.column(j).to_vec())?;
    }
    Ok(names)
}

/// `n` equally spaced points from `lo` to `hi` inclusive
pub fn linspace(lo: f64, hi: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![lo],
        _ => {
            let step = (hi - lo) / (n - 1) as f64;
            (0..n)
                .map(|i| if i == n - 1 { hi } else { lo + step * i as f64 })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_basis_columns() {
        let times = vec![0.0, 4.0, 8.0, 16.0, 24.0, 0.0, 8.0, 24.0];
        let ids = (0..times.len()).map(|i| format!("s{}", i)).collect();
        let mut meta = SampleMetadata::new(ids);
        meta.add_continuous("time", times.clone()).unwrap();

        let spline = NaturalSpline::from_data(&times, &KnotPlacement::default(), false).unwrap();
        let names = append_basis_columns(&mut meta, &spline, "time", "fun").unwrap();
        assert_eq!(names, vec!["fun1", "fun2", "fun3"]);

        let basis = spline.basis(&times).unwrap();
        assert_eq!(meta.continuous("fun2").unwrap(), &basis.column(1).to_vec());

        // Existing columns are never overwritten
        assert!(append_basis_columns(&mut meta, &spline, "time", "fun").is_err());
    }

    #[test]
    fn test_linspace_endpoints() {
        let grid = linspace(0.0, 24.0, 97);
        assert_eq!(grid.len(), 97);
        assert_eq!(grid[0], 0.0);
        assert_eq!(grid[96], 24.0);
        assert_eq!(grid[4], 1.0);
    }
}
