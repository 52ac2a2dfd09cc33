//! Statistical utility functions shared across modules
//!
//! Small dense linear algebra on symmetric positive definite systems plus
//! robust scale estimates used by dispersion shrinkage.

use ndarray::Array2;

/// Lower Cholesky factor of a symmetric positive definite matrix.
/// Returns None if the matrix is not numerically positive definite.
pub fn cholesky(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                if sum <= 0.0 || !sum.is_finite() {
                    return None;
                }
                l[[i, j]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }
    Some(l)
}

fn cholesky_solve(l: &Array2<f64>, b: &[f64]) -> Vec<f64> {
    let n = l.nrows();
    let mut y = vec![0.0; n];
    for i in 0..n {
        let sum: f64 = (0..i).fold(b[i], |acc, j| acc - l[[i, j]] * y[j]);
        y[i] = sum / l[[i, i]];
    }
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let sum: f64 = ((i + 1)..n).fold(y[i], |acc, j| acc - l[[j, i]] * x[j]);
        x[i] = sum / l[[i, i]];
    }
    x
}

/// Solve `A x = b` for symmetric positive definite `A`
pub fn solve_symmetric(a: &Array2<f64>, b: &[f64]) -> Option<Vec<f64>> {
    cholesky(a).map(|l| cholesky_solve(&l, b))
}

/// Inverse of a symmetric positive definite matrix
pub fn invert_symmetric(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    let l = cholesky(a)?;
    let mut inv = Array2::<f64>::zeros((n, n));
    let mut e = vec![0.0; n];
    for col in 0..n {
        e.iter_mut().for_each(|v| *v = 0.0);
        e[col] = 1.0;
        for (row, v) in cholesky_solve(&l, &e).into_iter().enumerate() {
            inv[[row, col]] = v;
        }
    }
    Some(inv)
}

/// log|A| for symmetric positive definite `A`
pub fn log_det_symmetric(a: &Array2<f64>) -> Option<f64> {
    cholesky(a).map(|l| 2.0 * (0..l.nrows()).map(|i| l[[i, i]].ln()).sum::<f64>())
}

/// `X' diag(w) X`
pub fn weighted_crossprod(x: &Array2<f64>, w: &[f64]) -> Array2<f64> {
    let (n, p) = x.dim();
    let mut out = Array2::<f64>::zeros((p, p));
    for i in 0..n {
        for j in 0..p {
            let xij = w[i] * x[[i, j]];
            if xij == 0.0 {
                continue;
            }
            for k in 0..=j {
                out[[j, k]] += xij * x[[i, k]];
            }
        }
    }
    for j in 0..p {
        for k in 0..j {
            out[[k, j]] = out[[j, k]];
        }
    }
    out
}

/// Median of finite values (sorts in place)
pub fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    if n % 2 == 0 {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    } else {
        values[n / 2]
    }
}

/// Squared median absolute deviation, scaled for consistency with the
/// normal distribution. R equivalent: mad(x)^2
pub fn mad_squared(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let center = median(values);
    let mut abs_devs: Vec<f64> = values.iter().map(|&x| (x - center).abs()).collect();
    let mad = median(&mut abs_devs) * 1.4826;
    mad * mad
}

/// Trigamma function (derivative of digamma)
pub fn trigamma(x: f64) -> f64 {
    if x < 0.5 {
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).powi(2) - trigamma(1.0 - x);
    }

    let mut result = 0.0;
    let mut z = x;
    while z < 8.0 {
        result += 1.0 / (z * z);
        z += 1.0;
    }
    let z2 = z * z;
    result + 1.0 / z + 0.5 / z2 + 1.0 / (6.0 * z2 * z) - 1.0 / (30.0 * z2 * z2 * z)
        + 1.0 / (42.0 * z2 * z2 * z2 * z)
}
