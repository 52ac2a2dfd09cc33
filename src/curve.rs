//! Fitted expression curves from group x spline coefficients
//!
//! For a model `~ group + group:b1 + ... + group:bK` the log2 expression of
//! group `g` at time `t` is
//!
//! ```text
//! Intercept + group_g_vs_ref (unless g is the reference) + sum_k group{g}.bk * B_k(t)
//! ```
//!
//! where `B` is the natural spline basis used at fit time. The layout keeps
//! that spline; evaluating with any other spline is a `BasisMismatch`.

use std::collections::BTreeMap;

use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SplineDeError};
use crate::glm::DesignInfo;
use crate::model::CoefficientTable;
use crate::spline::NaturalSpline;

/// Positions of the curve terms within a model's coefficient vector
#[derive(Debug, Clone, PartialEq)]
pub struct CurveLayout {
    group: String,
    reference: String,
    /// Spline that produced the basis columns of the model
    spline: NaturalSpline,
    basis_names: Vec<String>,
    coef_names: Vec<String>,
    intercept: usize,
    /// Non-reference level -> offset column
    offsets: BTreeMap<String, usize>,
    /// Level -> one column per basis function, in basis order
    slopes: BTreeMap<String, Vec<usize>>,
}

impl CurveLayout {
    /// Derive the layout from a fitted model matrix.
    ///
    /// Fails with `TermMismatch` unless the columns are exactly an intercept,
    /// one offset per non-reference level of `group`, and one
    /// `group:basis` slope per level and basis column. `spline` must be the
    /// spline whose columns are named `basis_names`.
    pub fn from_model(
        design: &DesignInfo,
        group: &str,
        spline: &NaturalSpline,
        basis_names: &[String],
    ) -> Result<Self> {
        if spline.n_basis() != basis_names.len() {
            return Err(SplineDeError::BasisMismatch {
                reason: format!(
                    "spline has {} basis functions, {} basis names given",
                    spline.n_basis(),
                    basis_names.len()
                ),
            });
        }
        let mismatch = |reason: String| SplineDeError::TermMismatch { reason };

        let reference = design
            .reference_levels
            .get(group)
            .cloned()
            .ok_or_else(|| mismatch(format!("model has no factor '{}'", group)))?;

        let mut intercept = None;
        let mut offsets = BTreeMap::new();
        let mut slope_cols: BTreeMap<String, Vec<Option<usize>>> = BTreeMap::new();

        for (j, column) in design.columns.iter().enumerate() {
            if column.is_intercept() {
                intercept = Some(j);
                continue;
            }
            let level = match column.levels.as_slice() {
                [] => None,
                [(factor, level)] if factor == group => Some(level.clone()),
                _ => return Err(mismatch(format!("unexpected term '{}'", column.name))),
            };
            match (level, column.covariates.as_slice()) {
                (Some(level), []) => {
                    if level == reference {
                        return Err(mismatch(format!(
                            "indicator for reference level '{}'",
                            column.name
                        )));
                    }
                    offsets.insert(level, j);
                }
                (Some(level), [covariate]) => {
                    let k = basis_names
                        .iter()
                        .position(|b| b == covariate)
                        .ok_or_else(|| mismatch(format!("unexpected term '{}'", column.name)))?;
                    slope_cols
                        .entry(level)
                        .or_insert_with(|| vec![None; basis_names.len()])[k] = Some(j);
                }
                _ => return Err(mismatch(format!("unexpected term '{}'", column.name))),
            }
        }

        let intercept = intercept.ok_or_else(|| mismatch("model has no intercept".to_string()))?;
        if !slope_cols.contains_key(&reference) {
            return Err(mismatch(format!(
                "no spline terms for reference level '{}'",
                reference
            )));
        }

        let mut slopes = BTreeMap::new();
        for (level, cols) in slope_cols {
            let cols: Option<Vec<usize>> = cols.into_iter().collect();
            let cols = cols.ok_or_else(|| {
                mismatch(format!("level '{}' lacks some of {:?}", level, basis_names))
            })?;
            if level != reference && !offsets.contains_key(&level) {
                return Err(mismatch(format!("level '{}' has no offset term", level)));
            }
            slopes.insert(level, cols);
        }
        if let Some(level) = offsets.keys().find(|l| !slopes.contains_key(*l)) {
            return Err(mismatch(format!("level '{}' has no spline terms", level)));
        }

        Ok(Self {
            group: group.to_string(),
            reference,
            spline: spline.clone(),
            basis_names: basis_names.to_vec(),
            coef_names: design.coef_names.clone(),
            intercept,
            offsets,
            slopes,
        })
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Every level of the group, sorted
    pub fn levels(&self) -> Vec<String> {
        self.slopes.keys().cloned().collect()
    }

    /// Fit-time spline
    pub fn spline(&self) -> &NaturalSpline {
        &self.spline
    }

    pub fn basis_names(&self) -> &[String] {
        &self.basis_names
    }

    /// Linear predictor of `level` for every row of `basis`
    pub fn predict(
        &self,
        coefficients: ArrayView1<f64>,
        level: &str,
        basis: &Array2<f64>,
    ) -> Result<Vec<f64>> {
        if coefficients.len() != self.coef_names.len() {
            return Err(SplineDeError::TermMismatch {
                reason: format!(
                    "expected {} coefficients, got {}",
                    self.coef_names.len(),
                    coefficients.len()
                ),
            });
        }
        if basis.ncols() != self.basis_names.len() {
            return Err(SplineDeError::BasisMismatch {
                reason: format!(
                    "basis has {} columns, model has {} spline terms",
                    basis.ncols(),
                    self.basis_names.len()
                ),
            });
        }
        let slopes = self
            .slopes
            .get(level)
            .ok_or_else(|| SplineDeError::UnknownGroup {
                factor: self.group.clone(),
                level: level.to_string(),
            })?;

        let mut base = coefficients[self.intercept];
        if let Some(&j) = self.offsets.get(level) {
            base += coefficients[j];
        }
        Ok(basis
            .rows()
            .into_iter()
            .map(|row| {
                base + row
                    .iter()
                    .zip(slopes)
                    .map(|(b, &j)| b * coefficients[j])
                    .sum::<f64>()
            })
            .collect())
    }
}

/// Fitted log2 expression of one gene and group over a time grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedCurve {
    pub gene_id: String,
    pub level: String,
    pub times: Vec<f64>,
    pub log2_expression: Vec<f64>,
}

/// Reconstruct the fitted curve of `gene_id` for one group level.
///
/// `spline` must equal the fit-time spline held by `layout`: same interior
/// knots, boundary knots and intercept flag.
pub fn reconstruct_curve(
    coefficients: &CoefficientTable,
    layout: &CurveLayout,
    spline: &NaturalSpline,
    gene_id: &str,
    level: &str,
    times: &[f64],
) -> Result<FittedCurve> {
    if spline != &layout.spline {
        return Err(SplineDeError::BasisMismatch {
            reason: format!(
                "spline (knots {:?}, boundary {:?}, intercept {}) differs from the fit-time \
                 spline (knots {:?}, boundary {:?}, intercept {})",
                spline.knots(),
                spline.boundary_knots(),
                spline.intercept(),
                layout.spline.knots(),
                layout.spline.boundary_knots(),
                layout.spline.intercept()
            ),
        });
    }
    if coefficients.terms() != layout.coef_names.as_slice() {
        return Err(SplineDeError::TermMismatch {
            reason: "coefficient table was not produced by this model".to_string(),
        });
    }
    let row = coefficients.gene(gene_id)?;
    let basis = spline.basis(times)?;
    let log2_expression = layout.predict(row, level, &basis)?;
    Ok(FittedCurve {
        gene_id: gene_id.to_string(),
        level: level.to_string(),
        times: times.to_vec(),
        log2_expression,
    })
}

/// One curve per group level, in sorted level order
pub fn reconstruct_all_curves(
    coefficients: &CoefficientTable,
    layout: &CurveLayout,
    spline: &NaturalSpline,
    gene_id: &str,
    times: &[f64],
) -> Result<Vec<FittedCurve>> {
    layout
        .levels()
        .iter()
        .map(|level| reconstruct_curve(coefficients, layout, spline, gene_id, level, times))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SampleMetadata;
    use crate::glm::{create_design_matrix, Formula};
    use crate::spline::{append_basis_columns, KnotPlacement};
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array1};

    const TIMES: [f64; 8] = [0.0, 2.0, 4.0, 6.0, 8.0, 12.0, 16.0, 24.0];

    fn basis_names() -> Vec<String> {
        vec!["fun1".into(), "fun2".into(), "fun3".into()]
    }

    /// Two donors over the same eight timepoints, with basis columns
    fn experiment() -> (SampleMetadata, NaturalSpline, Vec<String>) {
        let times: Vec<f64> = TIMES.iter().chain(TIMES.iter()).copied().collect();
        let donors: Vec<String> = (0..16)
            .map(|i| if i < 8 { "1741_006" } else { "1741_007" }.to_string())
            .collect();
        let mut meta = SampleMetadata::new((0..16).map(|i| format!("s{}", i)).collect());
        meta.add_condition("donor", donors).unwrap();
        meta.add_continuous("time", times.clone()).unwrap();
        let spline = NaturalSpline::from_data(&times, &KnotPlacement::default(), false).unwrap();
        let names = append_basis_columns(&mut meta, &spline, "time", "fun").unwrap();
        (meta, spline, names)
    }

    fn synthetic_layout() -> (CurveLayout, CoefficientTable) {
        let (meta, spline, names) = experiment();
        let formula = Formula::group_trends("donor", &names).unwrap();
        let (_, design) = create_design_matrix(&meta, &formula).unwrap();
        let layout = CurveLayout::from_model(&design, "donor", &spline, &names).unwrap();
        let values = Array2::from_shape_fn((1, design.n_coefs()), |(_, j)| 0.25 * j as f64 - 0.5);
        let table = CoefficientTable::new(vec!["g1".into()], design.coef_names.clone(), values)
            .unwrap();
        (layout, table)
    }

    #[test]
    fn test_layout_from_group_trend_model() {
        let (layout, table) = synthetic_layout();
        assert_eq!(
            table.terms(),
            &[
                "Intercept",
                "donor_1741_007_vs_1741_006",
                "donor1741_006.fun1",
                "donor1741_007.fun1",
                "donor1741_006.fun2",
                "donor1741_007.fun2",
                "donor1741_006.fun3",
                "donor1741_007.fun3",
            ]
        );
        assert_eq!(layout.reference(), "1741_006");
        assert_eq!(layout.levels(), vec!["1741_006", "1741_007"]);
    }

    #[test]
    fn test_known_coefficients_give_exact_value() {
        let (layout, _) = synthetic_layout();
        // Intercept 2.0, offset 0.5, donor 1741_007 basis coefficients [1, 0, 0]
        let mut coefs = Array1::zeros(8);
        coefs[0] = 2.0;
        coefs[1] = 0.5;
        coefs[3] = 1.0;
        let basis = array![[1.0, 0.0, 0.0]];
        let eta = layout.predict(coefs.view(), "1741_007", &basis).unwrap();
        assert_eq!(eta, vec![3.5]);
        // The reference donor gets neither the offset nor the other donor's slopes
        let eta_ref = layout.predict(coefs.view(), "1741_006", &basis).unwrap();
        assert_eq!(eta_ref, vec![2.0]);
    }

    #[test]
    fn test_curve_matches_linear_predictor_at_samples() {
        let (meta, spline, names) = experiment();
        let formula = Formula::group_trends("donor", &names).unwrap();
        let (x, design) = create_design_matrix(&meta, &formula).unwrap();
        let layout = CurveLayout::from_model(&design, "donor", &spline, &names).unwrap();
        let beta = Array1::from_iter((0..design.n_coefs()).map(|j| ((j * 7 % 5) as f64 - 2.0) * 0.3));
        let table = CoefficientTable::new(
            vec!["g1".into()],
            design.coef_names.clone(),
            beta.clone().insert_axis(ndarray::Axis(0)),
        )
        .unwrap();

        let eta = x.dot(&beta);
        let donors = meta.condition("donor").unwrap();
        let times = meta.continuous("time").unwrap();
        for i in 0..meta.n_samples() {
            let curve = reconstruct_curve(&table, &layout, &spline, "g1", &donors[i], &[times[i]]).unwrap();
            assert_abs_diff_eq!(curve.log2_expression[0], eta[i], epsilon = 1e-12);
        }
    }

    #[test]
    fn test_shared_trend_model_rejected() {
        let (meta, spline, names) = experiment();
        let formula = Formula::shared_trend("donor", &names).unwrap();
        let (_, design) = create_design_matrix(&meta, &formula).unwrap();
        let err = CurveLayout::from_model(&design, "donor", &spline, &names);
        assert!(matches!(err, Err(SplineDeError::TermMismatch { .. })));
    }

    #[test]
    fn test_missing_basis_term_rejected() {
        let (meta, spline, names) = experiment();
        let formula = Formula::group_trends("donor", &names[..2]).unwrap();
        let (_, design) = create_design_matrix(&meta, &formula).unwrap();
        let err = CurveLayout::from_model(&design, "donor", &spline, &names);
        assert!(matches!(err, Err(SplineDeError::TermMismatch { .. })));
        let err = CurveLayout::from_model(&design, "donor", &spline, &names[..2]);
        assert!(matches!(err, Err(SplineDeError::BasisMismatch { .. })));
    }

    #[test]
    fn test_respline_with_same_column_count_rejected() {
        let (layout, table) = synthetic_layout();
        let (_, spline, _) = experiment();
        let grid = crate::spline::linspace(0.0, 24.0, 5);

        // Rebuilt on the plotting grid: same three columns, different knots
        let regridded = NaturalSpline::from_data(&grid, &KnotPlacement::Quantiles(2), false).unwrap();
        assert_eq!(regridded.n_basis(), spline.n_basis());
        assert_ne!(regridded.knots(), spline.knots());
        assert!(matches!(
            reconstruct_curve(&table, &layout, &regridded, "g1", "1741_006", &grid),
            Err(SplineDeError::BasisMismatch { .. })
        ));

        // Intercept basis with one knot fewer: also three columns
        let with_intercept =
            NaturalSpline::from_data(&TIMES, &KnotPlacement::Quantiles(1), true).unwrap();
        assert_eq!(with_intercept.n_basis(), spline.n_basis());
        assert!(matches!(
            reconstruct_all_curves(&table, &layout, &with_intercept, "g1", &grid),
            Err(SplineDeError::BasisMismatch { .. })
        ));

        // A copy of the fit-time spline is accepted
        let same = NaturalSpline::from_data(
            &TIMES.iter().chain(TIMES.iter()).copied().collect::<Vec<_>>(),
            &KnotPlacement::default(),
            false,
        )
        .unwrap();
        assert_eq!(&same, layout.spline());
        assert!(reconstruct_curve(&table, &layout, &same, "g1", "1741_006", &grid).is_ok());
    }

    #[test]
    fn test_reconstruction_errors() {
        let (layout, table) = synthetic_layout();
        let (_, spline, _) = experiment();
        let other = NaturalSpline::from_data(&TIMES, &KnotPlacement::Quantiles(3), false).unwrap();
        assert!(matches!(
            reconstruct_curve(&table, &layout, &other, "g1", "1741_006", &[1.0]),
            Err(SplineDeError::BasisMismatch { .. })
        ));
        assert!(matches!(
            reconstruct_curve(&table, &layout, &spline, "g1", "9999_001", &[1.0]),
            Err(SplineDeError::UnknownGroup { .. })
        ));
        assert!(matches!(
            reconstruct_curve(&table, &layout, &spline, "g2", "1741_006", &[1.0]),
            Err(SplineDeError::UnknownGene { .. })
        ));
    }

    #[test]
    fn test_all_curves_on_dense_grid() {
        let (layout, table) = synthetic_layout();
        let (_, spline, _) = experiment();
        let grid = crate::spline::linspace(0.0, 24.0, 50);
        let curves = reconstruct_all_curves(&table, &layout, &spline, "g1", &grid).unwrap();
        assert_eq!(curves.len(), 2);
        assert!(curves.iter().all(|c| c.log2_expression.len() == 50));
    }
}
