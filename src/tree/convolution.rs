use crate::error::{FitError, LinalgError};
use crate::linalg::symmetric_eigen;
use crate::tree::{CompartmentTree, Indexing};

use ndarray::{Array1, Array2, Array4, ArrayView3, Axis, s};

/// Modes of the passive system `C^{-1} G`
///
/// The impulse response of the voltage at node `l` to a current at node `k` is
/// `sum_n phimat[l, n] * exp(alphas[n] * t) * phimat_inv[n, k]` in mV / (nA ms) with `t` in ms.
#[derive(Clone, Debug, PartialEq)]
pub struct EigenSystem {
    /// Decay rates, 1/ms, all negative for a connected tree with leak
    pub alphas: Array1<f64>,
    /// Eigenvectors as columns
    pub phimat: Array2<f64>,
    /// Inverse eigenvector matrix scaled by the inverse capacitances, 1/(µF ms)
    pub phimat_inv: Array2<f64>,
}

impl CompartmentTree {
    /// Eigen decomposition of the passive (leak and coupling) system divided by capacitance
    ///
    /// The decomposition goes through the symmetric matrix `C^{-1/2} G C^{-1/2}`, so it always
    /// exists with a real spectrum for positive capacitances.
    pub fn calc_eigenvalues(&self, indexing: Indexing) -> Result<EigenSystem, FitError> {
        let g_mat = self.passive_conductance_matrix()?;
        let ca: Array1<f64> = self.iter().map(|node| node.ca).collect();
        if let Some((index, &ca)) = ca.iter().enumerate().find(|&(_, &ca)| ca <= 0.0) {
            return Err(LinalgError::NonPositiveCapacitance { index, ca }.into());
        }
        let sqrt_ca = ca.mapv(f64::sqrt);
        let sym = Array2::from_shape_fn(g_mat.dim(), |(i, j)| {
            g_mat[[i, j]] / (sqrt_ca[i] * sqrt_ca[j])
        });
        let (lambdas, u) = symmetric_eigen(sym.view());

        let phimat = Array2::from_shape_fn(u.dim(), |(i, n)| u[[i, n]] / sqrt_ca[i]);
        let phimat_inv =
            Array2::from_shape_fn(u.dim(), |(n, j)| u[[j, n]] * sqrt_ca[j] / (ca[j] * 1e3));
        let alphas = lambdas.mapv(|lambda| -lambda / 1e3);

        let (phimat, phimat_inv) = match indexing {
            Indexing::Tree => (phimat, phimat_inv),
            Indexing::Locs => {
                let tree_inds = self.tree_inds();
                (
                    phimat.select(Axis(0), &tree_inds),
                    phimat_inv.select(Axis(1), &tree_inds),
                )
            }
        };
        Ok(EigenSystem {
            alphas,
            phimat,
            phimat_inv,
        })
    }

    /// Cached eigen system in tree indexing
    pub fn eigen_system(&mut self) -> Result<&EigenSystem, FitError> {
        let eigen = match self.eigen_cache.take() {
            Some(eigen) => eigen,
            None => self.calc_eigenvalues(Indexing::Tree)?,
        };
        Ok(&*self.eigen_cache.insert(eigen))
    }

    /// Voltage responses (mV) at every node to sampled inputs (nA) at every node
    ///
    /// `inputs` has shape `(n_sites, n_channels, n_times)` in tree indexing with samples `dt` ms
    /// apart; the result has shape `(n_sites_out, n_sites_in, n_channels, n_times)`. Inputs are
    /// interpolated linearly between samples and the system starts at the steady state of the
    /// first sample, which makes the result exact for piecewise-linear inputs.
    pub fn calc_convolution(
        &mut self,
        dt: f64,
        inputs: ArrayView3<f64>,
    ) -> Result<Array4<f64>, FitError> {
        let n = self.len();
        let (n_sites, n_channels, n_times) = inputs.dim();
        if n_sites != n {
            return Err(FitError::LengthMismatch {
                what: "convolution input sites",
                expected: n,
                actual: n_sites,
            });
        }
        let eigen = self.eigen_system()?;

        let p0 = eigen.alphas.mapv(|a| f64::exp(a * dt));
        let p1 = Array1::from_shape_fn(n, |m| {
            let a = eigen.alphas[m];
            -1.0 / a + (p0[m] - 1.0) / (a * a * dt)
        });
        let p2 = Array1::from_shape_fn(n, |m| {
            let a = eigen.alphas[m];
            p0[m] / a - (p0[m] - 1.0) / (a * a * dt)
        });
        let p_steady = eigen.alphas.mapv(|a| -1.0 / a);

        let mut result = Array4::<f64>::zeros((n, n_sites, n_channels, n_times));
        let mut state = Array1::<f64>::zeros(n_times);
        for k in 0..n_sites {
            for c in 0..n_channels {
                let input = inputs.slice(s![k, c, ..]);
                for m in 0..n {
                    let w = eigen.phimat_inv[[m, k]];
                    if n_times > 0 {
                        state[0] = p_steady[m] * w * input[0];
                    }
                    for t in 1..n_times {
                        state[t] = p0[m] * state[t - 1]
                            + w * (p1[m] * input[t] + p2[m] * input[t - 1]);
                    }
                    for l in 0..n {
                        let phi = eigen.phimat[[l, m]];
                        result
                            .slice_mut(s![l, k, c, ..])
                            .scaled_add(phi, &state);
                    }
                }
            }
        }
        Ok(result)
    }
}
