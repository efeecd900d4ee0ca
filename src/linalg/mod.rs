//! Dense linear algebra on top of [nalgebra] for arrays stored as [ndarray] values

use crate::error::LinalgError;

use nalgebra::{ComplexField, DMatrix, DVector, Scalar, SymmetricEigen};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

mod nnls;
pub use nnls::nnls;

pub(crate) fn to_dmatrix<T: Scalar + Copy>(a: ArrayView2<T>) -> DMatrix<T> {
    let (nrows, ncols) = a.dim();
    DMatrix::from_fn(nrows, ncols, |i, j| a[[i, j]])
}

pub(crate) fn to_dvector<T: Scalar + Copy>(b: ArrayView1<T>) -> DVector<T> {
    DVector::from_iterator(b.len(), b.iter().copied())
}

pub(crate) fn from_dmatrix<T: Scalar + Copy>(m: &DMatrix<T>) -> Array2<T> {
    Array2::from_shape_fn(m.shape(), |(i, j)| m[(i, j)])
}

pub(crate) fn from_dvector<T: Scalar + Copy>(v: &DVector<T>) -> Array1<T> {
    v.iter().copied().collect()
}

/// Inverse of a square matrix through LU decomposition
pub fn invert<T>(a: ArrayView2<T>) -> Result<Array2<T>, LinalgError>
where
    T: ComplexField + Copy,
{
    to_dmatrix(a)
        .try_inverse()
        .map(|inv| from_dmatrix(&inv))
        .ok_or(LinalgError::Singular)
}

/// Solution of the square system `a x = b`
pub fn solve(a: ArrayView2<f64>, b: ArrayView1<f64>) -> Result<Array1<f64>, LinalgError> {
    if a.nrows() != b.len() {
        return Err(LinalgError::DimensionMismatch {
            rows: a.nrows(),
            rhs: b.len(),
        });
    }
    to_dmatrix(a)
        .lu()
        .solve(&to_dvector(b))
        .map(|x| from_dvector(&x))
        .ok_or(LinalgError::Singular)
}

/// Eigenvalues and column eigenvectors of a real symmetric matrix
pub fn symmetric_eigen(a: ArrayView2<f64>) -> (Array1<f64>, Array2<f64>) {
    let eigen = SymmetricEigen::new(to_dmatrix(a));
    (
        from_dvector(&eigen.eigenvalues),
        from_dmatrix(&eigen.eigenvectors),
    )
}

/// Minimum-norm least-squares solution of `a x = b` through SVD
pub fn lstsq(a: ArrayView2<f64>, b: ArrayView1<f64>) -> Result<Array1<f64>, LinalgError> {
    if a.nrows() != b.len() {
        return Err(LinalgError::DimensionMismatch {
            rows: a.nrows(),
            rhs: b.len(),
        });
    }
    lstsq_dmatrix(to_dmatrix(a), &to_dvector(b)).map(|x| from_dvector(&x))
}

pub(crate) fn lstsq_dmatrix(a: DMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>, LinalgError> {
    let (nrows, ncols) = a.shape();
    if ncols == 0 || nrows == 0 {
        return Ok(DVector::zeros(ncols));
    }
    let svd = a.svd(true, true);
    let sv_max = svd.singular_values.iter().copied().fold(0.0, f64::max);
    let eps = sv_max * (nrows.max(ncols) as f64) * f64::EPSILON;
    svd.solve(b, eps).map_err(LinalgError::LeastSquares)
}
