use crate::error::LinalgError;
use crate::linalg::{from_dvector, lstsq_dmatrix, to_dmatrix, to_dvector};

use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, ArrayView1, ArrayView2};

/// Non-negative least squares `min |a x - b|, x >= 0`
///
/// Lawson-Hanson active set method: variables are moved one at a time from the active set (fixed
/// at zero) to the passive set (unconstrained least squares) while the gradient of the residual
/// points into the feasible region, and are moved back whenever the unconstrained solution leaves
/// it.
pub fn nnls(a: ArrayView2<f64>, b: ArrayView1<f64>) -> Result<Array1<f64>, LinalgError> {
    let (nrows, ncols) = a.dim();
    if nrows != b.len() {
        return Err(LinalgError::DimensionMismatch {
            rows: nrows,
            rhs: b.len(),
        });
    }
    let a = to_dmatrix(a);
    let b = to_dvector(b);

    let norm1 = a
        .column_iter()
        .map(|column| column.iter().map(|x| x.abs()).sum::<f64>())
        .fold(0.0, f64::max);
    let tol = 10.0 * f64::EPSILON * norm1 * (nrows.max(ncols) as f64);
    let max_iter = 30 * ncols.max(1);

    let mut x = DVector::zeros(ncols);
    let mut passive = vec![false; ncols];
    let mut iter = 0;
    loop {
        let w = a.tr_mul(&(&b - &a * &x));
        let candidate = (0..ncols)
            .filter(|&j| !passive[j])
            .max_by(|&i, &j| w[i].total_cmp(&w[j]));
        match candidate {
            Some(j) if w[j] > tol => passive[j] = true,
            _ => break,
        }

        loop {
            iter += 1;
            if iter > max_iter {
                return Err(LinalgError::NnlsNoConvergence(max_iter));
            }
            let s = passive_lstsq(&a, &b, &passive)?;
            let infeasible: Vec<_> = (0..ncols).filter(|&i| passive[i] && s[i] <= 0.0).collect();
            if infeasible.is_empty() {
                x = s;
                break;
            }
            let alpha = infeasible
                .iter()
                .map(|&i| x[i] / (x[i] - s[i]))
                .fold(f64::INFINITY, f64::min);
            x += (s - &x) * alpha;
            for (i, is_passive) in passive.iter_mut().enumerate() {
                if *is_passive && x[i] <= tol {
                    *is_passive = false;
                    x[i] = 0.0;
                }
            }
        }
    }
    Ok(from_dvector(&x))
}

/// Unconstrained least squares over the passive columns, zero elsewhere
fn passive_lstsq(
    a: &DMatrix<f64>,
    b: &DVector<f64>,
    passive: &[bool],
) -> Result<DVector<f64>, LinalgError> {
    let columns: Vec<_> = (0..passive.len()).filter(|&j| passive[j]).collect();
    let sub = DMatrix::from_fn(a.nrows(), columns.len(), |i, k| a[(i, columns[k])]);
    let sub_solution = lstsq_dmatrix(sub, b)?;
    let mut s = DVector::zeros(passive.len());
    for (k, &j) in columns.iter().enumerate() {
        s[j] = sub_solution[k];
    }
    Ok(s)
}
