use ndarray::{Array1, Array2, Array3, Array4};
use num_complex::Complex64;

/// Complex frequencies `s` in 1/s
pub type Freqs = Array1<Complex64>;

/// Frequency-resolved square matrices with shape `(n_freqs, n, n)`
pub type FreqMatrices = Array3<Complex64>;

/// Coefficients `G[f, i, j, k]` of parameter `k` in system-matrix entry `(i, j)` at frequency `f`
pub type StructureTensor = Array4<Complex64>;

/// Time series per location with shape `(n_locs, n_times)`
pub type Traces = Array2<f64>;

/// Name of the leak current present in every node
pub const LEAK: &str = "L";
