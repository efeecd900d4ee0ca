use crate::config::LinearSolver;
use crate::error::FitError;
use crate::linalg::{lstsq, nnls};
use crate::types::{FreqMatrices, StructureTensor};

use ndarray::{Array1, Array2, ArrayView2, ArrayView3, Axis, s};
use num_complex::Complex64;
use num_traits::Zero;

/// Linear least-squares problem `feature . params ~ target` of one or more fits
#[derive(Clone, Debug, PartialEq)]
pub struct FitMatrices {
    pub feature: Array2<Complex64>,
    pub target: Array1<Complex64>,
}

impl FitMatrices {
    pub fn new(feature: Array2<Complex64>, target: Array1<Complex64>) -> Result<Self, FitError> {
        if feature.nrows() != target.len() {
            return Err(FitError::TargetMismatch {
                feature: feature.nrows(),
                target: target.len(),
            });
        }
        Ok(Self { feature, target })
    }

    /// Real-valued problem
    pub fn from_real(feature: ArrayView2<f64>, target: Array1<f64>) -> Result<Self, FitError> {
        Self::new(
            feature.mapv(|x| Complex64::new(x, 0.0)),
            target.mapv(|x| Complex64::new(x, 0.0)),
        )
    }

    /// Contract impedance samples with a structure tensor
    ///
    /// `z_mat` has shape `(n_freqs, n, n)` and `g_struct` shape `(n_freqs, n, n, n_params)`, both
    /// in tree indexing. Row `f * n * n + i * n + j` of the feature matrix is
    /// `sum_l Z[f, i, l] G[f, l, j, ..]` and the target is `I - Z . Y_known` for the known part
    /// `y_known` of the system matrix. Rows of frequency `f` are scaled by `w_freqs[f]`.
    pub fn from_impedance(
        z_mat: ArrayView3<Complex64>,
        g_struct: &StructureTensor,
        y_known: Option<&FreqMatrices>,
        w_freqs: Option<&Array1<f64>>,
    ) -> Result<Self, FitError> {
        let (n_freqs, n, _, n_params) = g_struct.dim();
        if z_mat.dim() != (n_freqs, n, n) {
            return Err(FitError::ImpedanceShape {
                actual: z_mat.dim(),
                freqs: n_freqs,
                size: n,
            });
        }
        if let Some(y_known) = y_known {
            if y_known.dim() != (n_freqs, n, n) {
                return Err(FitError::ImpedanceShape {
                    actual: y_known.dim(),
                    freqs: n_freqs,
                    size: n,
                });
            }
        }
        if let Some(w_freqs) = w_freqs {
            if w_freqs.len() != n_freqs {
                return Err(FitError::LengthMismatch {
                    what: "frequency weights",
                    expected: n_freqs,
                    actual: w_freqs.len(),
                });
            }
        }

        let block = n * n;
        let mut feature = Array2::<Complex64>::zeros((n_freqs * block, n_params));
        let mut target = Array1::<Complex64>::zeros(n_freqs * block);
        for (f, z) in z_mat.outer_iter().enumerate() {
            let w = Complex64::new(w_freqs.map_or(1.0, |w_freqs| w_freqs[f]), 0.0);
            let rows = f * block..(f + 1) * block;
            for k in 0..n_params {
                let zg = z.dot(&g_struct.slice(s![f, .., .., k]));
                feature
                    .slice_mut(s![rows.clone(), k])
                    .iter_mut()
                    .zip(zg.iter())
                    .for_each(|(x, &zg)| *x = w * zg);
            }
            let mut residual = Array2::<Complex64>::eye(n);
            if let Some(y_known) = y_known {
                residual -= &z.dot(&y_known.index_axis(Axis(0), f));
            }
            target
                .slice_mut(s![rows])
                .iter_mut()
                .zip(residual.iter())
                .for_each(|(x, &r)| *x = w * r);
        }
        Ok(Self { feature, target })
    }

    /// Number of rows
    pub fn n_samples(&self) -> usize {
        self.target.len()
    }

    /// Number of unknowns
    pub fn n_params(&self) -> usize {
        self.feature.ncols()
    }

    /// Both sides multiplied by `factor`
    pub fn scaled(mut self, factor: f64) -> Self {
        let factor = Complex64::new(factor, 0.0);
        self.feature.mapv_inplace(|x| x * factor);
        self.target.mapv_inplace(|x| x * factor);
        self
    }

    /// Vertical stack of problems sharing their unknowns
    pub fn concatenate(parts: &[FitMatrices]) -> Result<Self, FitError> {
        let Some(first) = parts.first() else {
            return Err(FitError::NoConditions);
        };
        let n_params = first.n_params();
        if let Some(part) = parts.iter().find(|part| part.n_params() != n_params) {
            return Err(FitError::LengthMismatch {
                what: "number of unknowns",
                expected: n_params,
                actual: part.n_params(),
            });
        }
        let n_samples = parts.iter().map(FitMatrices::n_samples).sum();
        let mut feature = Array2::<Complex64>::zeros((n_samples, n_params));
        let mut target = Array1::<Complex64>::zeros(n_samples);
        let mut offset = 0;
        for part in parts {
            let rows = offset..offset + part.n_samples();
            feature.slice_mut(s![rows.clone(), ..]).assign(&part.feature);
            target.slice_mut(s![rows]).assign(&part.target);
            offset += part.n_samples();
        }
        Ok(Self { feature, target })
    }

    /// Real unknowns best explaining the complex problem
    ///
    /// Real and imaginary parts are stacked into one real problem; the imaginary block is left out
    /// when the problem is real.
    pub fn solve(&self, solver: LinearSolver) -> Result<Array1<f64>, FitError> {
        let is_real = self.feature.iter().all(|x| x.im.is_zero())
            && self.target.iter().all(|x| x.im.is_zero());
        let n_blocks = if is_real { 1 } else { 2 };
        let (m, n) = self.feature.dim();
        let a = Array2::from_shape_fn((n_blocks * m, n), |(row, k)| {
            let x = self.feature[[row % m, k]];
            if row < m { x.re } else { x.im }
        });
        let b = Array1::from_shape_fn(n_blocks * m, |row| {
            let y = self.target[row % m];
            if row < m { y.re } else { y.im }
        });
        log::debug!(
            "solving {} x {} system with {:?} solver",
            a.nrows(),
            a.ncols(),
            solver
        );
        let params = match solver {
            LinearSolver::NonNegative => nnls(a.view(), b.view())?,
            LinearSolver::LeastSquares => lstsq(a.view(), b.view())?,
        };
        Ok(params)
    }

    /// Residual `target - feature . params`
    pub fn residual(&self, params: &Array1<f64>) -> Array1<Complex64> {
        let params = params.mapv(|p| Complex64::new(p, 0.0));
        &self.target - &self.feature.dot(&params)
    }
}
