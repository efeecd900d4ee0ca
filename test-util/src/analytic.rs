use ndarray::Array2;

/// Steady-state impedance matrix (MOhm) of a passive chain with leak conductances `g_l` and a
/// uniform coupling conductance `g_c`
///
/// The conductance matrix is tridiagonal, its inverse follows from the leading and trailing
/// continuants `theta` and `phi`: `Z[i, j] = g_c^(j - i) theta[i - 1] phi[j + 1] / theta[n]` for
/// `i <= j` with one-based indices.
pub fn chain_steady_state_impedance(g_l: &[f64], g_c: f64) -> Array2<f64> {
    let n = g_l.len();
    let diag: Vec<f64> = (0..n)
        .map(|i| {
            let neighbours = usize::from(i > 0) + usize::from(i + 1 < n);
            g_l[i] + g_c * neighbours as f64
        })
        .collect();

    let mut theta = vec![1.0; n + 1];
    for i in 1..=n {
        theta[i] = diag[i - 1] * theta[i - 1];
        if i >= 2 {
            theta[i] -= g_c * g_c * theta[i - 2];
        }
    }
    let mut phi = vec![1.0; n + 2];
    for i in (1..=n).rev() {
        phi[i] = diag[i - 1] * phi[i + 1];
        if i + 2 <= n + 1 {
            phi[i] -= g_c * g_c * phi[i + 2];
        }
    }

    Array2::from_shape_fn((n, n), |(i, j)| {
        let (lo, hi) = if i <= j { (i + 1, j + 1) } else { (j + 1, i + 1) };
        g_c.powi((hi - lo) as i32) * theta[lo - 1] * phi[hi + 1] / theta[n]
    })
}
