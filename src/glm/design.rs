//! Design matrix creation for GLM

use ndarray::Array2;
use std::collections::HashMap;

use super::Formula;
use crate::data::SampleMetadata;
use crate::error::{Result, SplineDeError};

/// One column of a model matrix
#[derive(Debug, Clone, PartialEq)]
pub struct DesignColumn {
    pub name: String,
    /// Factor levels this column indicates, as (factor, level)
    pub levels: Vec<(String, String)>,
    /// Numeric covariates multiplied into this column
    pub covariates: Vec<String>,
}

impl DesignColumn {
    pub fn is_intercept(&self) -> bool {
        self.levels.is_empty() && self.covariates.is_empty()
    }
}

/// Information about the design matrix
/// R equivalent: attributes of model.matrix() (assign, contrasts)
#[derive(Debug, Clone)]
pub struct DesignInfo {
    pub formula: Formula,
    /// Names of the coefficients
    pub coef_names: Vec<String>,
    pub columns: Vec<DesignColumn>,
    /// Reference level of every factor in the formula
    pub reference_levels: HashMap<String, String>,
}

impl DesignInfo {
    pub fn n_coefs(&self) -> usize {
        self.columns.len()
    }
}

/// How one variable enters a given term
enum Coding {
    /// Non-reference levels only
    Contrast(Vec<String>),
    /// One indicator per level
    Indicator(Vec<String>),
    Numeric,
}

/// Create a design matrix from a formula and sample metadata
/// R equivalent: model.matrix() in stats package
///
/// Factors use treatment contrasts. A factor inside a term is contrast-coded
/// when the term without that factor is also in the model (the intercept
/// counting as the empty term), otherwise it gets one column per level. So in
/// `~ donor + donor:fun1` the interaction has a `fun1` slope for every donor.
pub fn create_design_matrix(
    metadata: &SampleMetadata,
    formula: &Formula,
) -> Result<(Array2<f64>, DesignInfo)> {
    let n_samples = metadata.n_samples();
    let invalid = |reason: String| SplineDeError::InvalidFormula {
        formula: formula.to_string(),
        reason,
    };

    let mut reference_levels = HashMap::new();
    let mut factor_levels: HashMap<String, Vec<String>> = HashMap::new();
    for var in formula.variables() {
        if let Some(levels) = metadata.levels(&var) {
            let reference = metadata
                .reference_level(&var)
                .ok_or_else(|| invalid(format!("factor '{}' has no levels", var)))?;
            if levels.len() < 2 {
                log::warn!("Factor '{}' has only one level ('{}')", var, reference);
            }
            reference_levels.insert(var.clone(), reference);
            factor_levels.insert(var, levels);
        } else if !metadata.has_continuous(&var) {
            return Err(invalid(format!("variable '{}' not found in sample metadata", var)));
        }
    }

    let mut columns = Vec::new();
    if formula.has_intercept() {
        columns.push(DesignColumn {
            name: "Intercept".to_string(),
            levels: Vec::new(),
            covariates: Vec::new(),
        });
    }

    for term in formula.terms() {
        let codings: Vec<(&String, Coding)> = term
            .iter()
            .map(|var| {
                let coding = match factor_levels.get(var) {
                    None => Coding::Numeric,
                    Some(levels) => {
                        let margin: Vec<String> =
                            term.iter().filter(|v| *v != var).cloned().collect();
                        if formula.contains_term(&margin) {
                            let reference = &reference_levels[var];
                            Coding::Contrast(
                                levels.iter().filter(|l| *l != reference).cloned().collect(),
                            )
                        } else {
                            Coding::Indicator(levels.clone())
                        }
                    }
                };
                (var, coding)
            })
            .collect();

        // Cartesian product over factor levels, first factor varying fastest
        let mut combos: Vec<Vec<(String, String)>> = vec![Vec::new()];
        for (var, coding) in &codings {
            let levels = match coding {
                Coding::Contrast(l) | Coding::Indicator(l) => l,
                Coding::Numeric => continue,
            };
            let mut next = Vec::with_capacity(combos.len() * levels.len());
            for level in levels {
                for combo in &combos {
                    let mut c = combo.clone();
                    c.push(((*var).clone(), level.clone()));
                    next.push(c);
                }
            }
            combos = next;
        }

        let covariates: Vec<String> = codings
            .iter()
            .filter(|(_, c)| matches!(c, Coding::Numeric))
            .map(|(v, _)| (*v).clone())
            .collect();

        for combo in combos {
            let name = column_name(term, &codings, &combo, &reference_levels);
            columns.push(DesignColumn {
                name,
                levels: combo,
                covariates: covariates.clone(),
            });
        }
    }

    let mut design = Array2::zeros((n_samples, columns.len()));
    for (j, column) in columns.iter().enumerate() {
        for i in 0..n_samples {
            let mut value = 1.0;
            for (factor, level) in &column.levels {
                if metadata.condition(factor).map(|v| &v[i]) != Some(level) {
                    value = 0.0;
                    break;
                }
            }
            if value != 0.0 {
                for cov in &column.covariates {
                    value *= metadata.continuous(cov).map(|v| v[i]).unwrap_or(f64::NAN);
                }
            }
            design[[i, j]] = value;
        }
    }

    let info = DesignInfo {
        formula: formula.clone(),
        coef_names: columns.iter().map(|c| c.name.clone()).collect(),
        columns,
        reference_levels,
    };

    log::debug!("Design {} has columns {:?}", formula, info.coef_names);
    check_full_rank(&design)?;
    Ok((design, info))
}

/// `Intercept`, `factor_level_vs_ref`, `factorlevel`, `covariate`, or the
/// `.`-joined parts of an interaction (`donor1741_006.fun1`)
fn column_name(
    term: &[String],
    codings: &[(&String, Coding)],
    combo: &[(String, String)],
    reference_levels: &HashMap<String, String>,
) -> String {
    if term.len() == 1 {
        return match (&codings[0].1, combo.first()) {
            (Coding::Contrast(_), Some((factor, level))) => {
                format!("{}_{}_vs_{}", factor, level, reference_levels[factor])
            }
            (Coding::Indicator(_), Some((factor, level))) => format!("{}{}", factor, level),
            _ => term[0].clone(),
        };
    }
    term.iter()
        .map(|var| match combo.iter().find(|(f, _)| f == var) {
            Some((factor, level)) => format!("{}{}", factor, level),
            None => var.clone(),
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Check if a design matrix is full rank using QR decomposition with column pivoting.
/// R equivalent: checkFullRank() in DESeq2 (via modelMatrixType)
pub fn check_full_rank(matrix: &Array2<f64>) -> Result<()> {
    let (nrow, ncol) = matrix.dim();
    if nrow == 0 || ncol == 0 {
        return Err(SplineDeError::InvalidDesignMatrix {
            reason: "Design matrix has zero rows or columns".to_string(),
        });
    }
    if matrix.iter().any(|v| !v.is_finite()) {
        return Err(SplineDeError::InvalidDesignMatrix {
            reason: "Design matrix contains non-finite values".to_string(),
        });
    }

    if qr_rank(matrix) < ncol {
        let has_zero_column = (0..ncol).any(|j| matrix.column(j).iter().all(|&v| v == 0.0));
        let reason = if has_zero_column {
            "the model matrix is not full rank: levels or combinations of levels \
             without any samples give column(s) of zeros"
        } else {
            "the model matrix is not full rank: one or more terms are linear \
             combinations of the others"
        };
        return Err(SplineDeError::InvalidDesignMatrix {
            reason: reason.to_string(),
        });
    }
    Ok(())
}

/// Numerical rank by Householder QR with column pivoting.
///
/// Counts diagonal elements of R whose absolute value exceeds
/// `max(nrow, ncol) * f64::EPSILON * max(|diag(R)|)`.
fn qr_rank(matrix: &Array2<f64>) -> usize {
    let (nrow, ncol) = matrix.dim();
    let k = nrow.min(ncol);
    let mut r = matrix.to_owned();
    let mut col_norms_sq: Vec<f64> = (0..ncol)
        .map(|j| r.column(j).iter().map(|&v| v * v).sum())
        .collect();

    for step in 0..k {
        let best_col = (step..ncol)
            .max_by(|&a, &b| col_norms_sq[a].total_cmp(&col_norms_sq[b]))
            .unwrap_or(step);
        if best_col != step {
            for i in 0..nrow {
                r.swap([i, step], [i, best_col]);
            }
            col_norms_sq.swap(step, best_col);
        }

        let mut alpha = (step..nrow).map(|i| r[[i, step]].powi(2)).sum::<f64>().sqrt();
        if alpha < f64::EPSILON * 1e3 {
            break;
        }
        if r[[step, step]] > 0.0 {
            alpha = -alpha;
        }

        let v0 = r[[step, step]] - alpha;
        r[[step, step]] = alpha;
        let v_norm_sq = v0 * v0 + ((step + 1)..nrow).map(|i| r[[i, step]].powi(2)).sum::<f64>();
        if v_norm_sq < f64::MIN_POSITIVE {
            continue;
        }
        let tau = 2.0 / v_norm_sq;

        for j in (step + 1)..ncol {
            let dot = v0 * r[[step, j]]
                + ((step + 1)..nrow).map(|i| r[[i, step]] * r[[i, j]]).sum::<f64>();
            let scale = tau * dot;
            r[[step, j]] -= scale * v0;
            for i in (step + 1)..nrow {
                r[[i, j]] -= scale * r[[i, step]];
            }
            col_norms_sq[j] = (col_norms_sq[j] - r[[step, j]].powi(2)).max(0.0);
        }
    }

    let max_abs_diag = (0..k).map(|i| r[[i, i]].abs()).fold(0.0f64, f64::max);
    let tol = nrow.max(ncol) as f64 * f64::EPSILON * max_abs_diag;
    (0..k).filter(|&i| r[[i, i]].abs() > tol).count()
}
