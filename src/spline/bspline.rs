//! B-spline evaluation on an arbitrary (possibly repeated) knot vector
//! R equivalent: splines::splineDesign()

use crate::error::{Result, SplineDeError};

/// Cubic B-splines
pub const CUBIC_ORDER: usize = 4;

/// Knot vector with each boundary knot repeated `order` times around the
/// interior knots.
pub fn augmented_knots(boundary: (f64, f64), interior: &[f64], order: usize) -> Vec<f64> {
    let mut knots = Vec::with_capacity(interior.len() + 2 * order);
    knots.extend(std::iter::repeat(boundary.0).take(order));
    knots.extend_from_slice(interior);
    knots.extend(std::iter::repeat(boundary.1).take(order));
    knots
}

/// Index `j` of the non-degenerate interval `[t_j, t_{j+1})` containing `x`.
/// The right end of the knot vector belongs to the last non-degenerate interval.
fn find_interval(knots: &[f64], x: f64) -> Option<usize> {
    let last = *knots.last()?;
    if x < knots[0] || x > last {
        return None;
    }
    if x == last {
        return (0..knots.len() - 1).rev().find(|&j| knots[j] < knots[j + 1]);
    }
    (0..knots.len() - 1).find(|&j| knots[j] <= x && x < knots[j + 1])
}

/// All B-splines of `order` at `x` (Cox-de Boor recursion)
fn values(knots: &[f64], order: usize, x: f64, span: usize) -> Vec<f64> {
    let m = knots.len();
    let mut b = vec![0.0; m - 1];
    b[span] = 1.0;

    for p in 2..=order {
        let mut next = vec![0.0; m - p];
        for (i, value) in next.iter_mut().enumerate() {
            let mut v = 0.0;
            let left = knots[i + p - 1] - knots[i];
            if left > 0.0 {
                v += (x - knots[i]) / left * b[i];
            }
            let right = knots[i + p] - knots[i + 1];
            if right > 0.0 {
                v += (knots[i + p] - x) / right * b[i + 1];
            }
            *value = v;
        }
        b = next;
    }
    b
}

/// `deriv`-th derivative of all B-splines of `order` at `x`
fn derivatives(knots: &[f64], order: usize, x: f64, span: usize, deriv: usize) -> Vec<f64> {
    if deriv == 0 {
        return values(knots, order, x, span);
    }
    let m = knots.len();
    if order == 1 {
        return vec![0.0; m - 1];
    }

    let lower = derivatives(knots, order - 1, x, span, deriv - 1);
    let scale = (order - 1) as f64;
    (0..m - order)
        .map(|i| {
            let mut v = 0.0;
            let left = knots[i + order - 1] - knots[i];
            if left > 0.0 {
                v += lower[i] / left;
            }
            let right = knots[i + order] - knots[i + 1];
            if right > 0.0 {
                v -= lower[i + 1] / right;
            }
            scale * v
        })
        .collect()
}

/// Row of the B-spline design matrix (or of its `deriv`-th derivative) at `x`.
///
/// Returns `knots.len() - order` values. `x` must lie within the knot range.
pub fn spline_design_row(knots: &[f64], order: usize, x: f64, deriv: usize) -> Result<Vec<f64>> {
    if order == 0 || knots.len() <= order {
        return Err(SplineDeError::InvalidSpline {
            reason: format!("{} knots cannot support order {}", knots.len(), order),
        });
    }
    if knots.windows(2).any(|w| w[1] < w[0]) {
        return Err(SplineDeError::InvalidSpline {
            reason: "knot vector must be non-decreasing".to_string(),
        });
    }
    let span = find_interval(knots, x).ok_or_else(|| SplineDeError::InvalidSpline {
        reason: format!(
            "x = {} outside knot range [{}, {}]",
            x,
            knots[0],
            knots[knots.len() - 1]
        ),
    })?;
    Ok(derivatives(knots, order, x, span, deriv))
}
