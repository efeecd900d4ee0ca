use crate::config::NewtonCapacitanceSolver;
use crate::error::FitError;
use crate::fit::{Capacitance, FitAction, FitMatrices};
use crate::linalg::solve;
use crate::tree::CompartmentTree;

use conv::ConvUtil;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

/// Outcome of [CompartmentTree::compute_c_newton]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NewtonReport {
    pub iterations: usize,
    /// Whether the last relative update was below the tolerance
    pub converged: bool,
    /// Largest relative update of an inverse capacitance in the last iteration
    pub max_update: f64,
}

impl CompartmentTree {
    /// Fit capacitances so that `modes` become eigenmodes of the passive system with decay rates
    /// `alphas`
    ///
    /// `alphas` are in 1/ms, `modes` has shape `(n_modes, n)` in location indexing. Each mode
    /// contributes `n` equations `1e3 * alpha * ca_i * phi_i = -(G phi)_i`, weighted by
    /// `weights`. Capacitances are bounded below by `g_L / (-alpha_slowest * tau_eps)`, which
    /// keeps every membrane time constant a factor `tau_eps` under the slowest mode.
    pub fn compute_c_from_modes(
        &mut self,
        alphas: ArrayView1<f64>,
        modes: ArrayView2<f64>,
        tau_eps: f64,
        weights: Option<ArrayView1<f64>>,
        action: FitAction,
    ) -> Result<Option<FitMatrices>, FitError> {
        let n = self.len();
        let n_modes = alphas.len();
        if modes.dim() != (n_modes, n) {
            return Err(FitError::LengthMismatch {
                what: "mode matrix rows",
                expected: n_modes * n,
                actual: modes.len(),
            });
        }
        let weights = match weights {
            Some(weights) if weights.len() != n_modes => {
                return Err(FitError::LengthMismatch {
                    what: "mode weights",
                    expected: n_modes,
                    actual: weights.len(),
                });
            }
            Some(weights) => weights.to_owned(),
            None => Array1::ones(n_modes),
        };

        let modes = modes.select(Axis(1), &self.loc_inds());
        let g_neg = -self.passive_conductance_matrix()?;
        let alpha_slowest = alphas.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let lower: Array1<f64> = if alpha_slowest < 0.0 {
            self.iter()
                .map(|node| node.g_l() * 1e-3 / (-alpha_slowest * tau_eps))
                .collect()
        } else {
            Array1::zeros(n)
        };

        let mut feature = Array2::<f64>::zeros((n * n_modes, n));
        let mut target = Array1::<f64>::zeros(n * n_modes);
        for (a, (phi, (&alpha, &w))) in modes
            .outer_iter()
            .zip(alphas.iter().zip(&weights))
            .enumerate()
        {
            let g_phi = g_neg.dot(&phi);
            for i in 0..n {
                let row = i * n_modes + a;
                let coef = 1e3 * alpha * phi[i];
                feature[[row, i]] = coef * w;
                target[row] = (g_phi[i] - coef * lower[i]) * w;
            }
        }
        let matrices = FitMatrices::from_real(feature.view(), target)?;
        self.fit_res_action(action, Capacitance { lower }.into(), matrices, 1.0)
    }

    /// Set the capacitances so that the passive system has the membrane time constants `taus`
    /// (ms)
    ///
    /// Newton iteration on the inverse capacitances `c` matching the power sums
    /// `tr((diag(c) G)^k)` with the power sums of the target eigenvalues for `k = 1..n`, starting
    /// from the current capacitances. Reaching the iteration cap only emits a warning and keeps
    /// the last iterate.
    pub fn compute_c_newton(
        &mut self,
        taus: ArrayView1<f64>,
        solver: &NewtonCapacitanceSolver,
    ) -> Result<NewtonReport, FitError> {
        let n = self.len();
        if taus.len() != n {
            return Err(FitError::LengthMismatch {
                what: "membrane time constants",
                expected: n,
                actual: taus.len(),
            });
        }
        let g_neg = -self.passive_conductance_matrix()?;
        let lambdas = taus.mapv(|tau| -1e3 / tau);
        let scale = lambdas.iter().fold(0.0_f64, |acc, l| acc.max(l.abs()));
        let scale = if scale > 0.0 { scale } else { 1.0 };
        let target: Array1<f64> = (1..=n)
            .map(|k| lambdas.iter().map(|l| (l / scale).powi(power(k))).sum())
            .collect();

        let mut c: Array1<f64> = self.iter().map(|node| 1.0 / node.ca).collect();
        let mut report = NewtonReport {
            iterations: 0,
            converged: false,
            max_update: f64::INFINITY,
        };
        while report.iterations < solver.max_iter {
            let (residual, jacobian) = power_sums(&c, &g_neg, scale, &target);
            let delta = solve(jacobian.view(), (-residual).view())?;
            c += &delta;
            if let Some((index, &value)) = c.iter().enumerate().find(|&(_, &c)| c <= 0.0) {
                return Err(FitError::NewtonDiverged { index, value });
            }
            report.iterations += 1;
            report.max_update = delta
                .iter()
                .zip(&c)
                .fold(0.0_f64, |acc, (d, c)| acc.max((d / c).abs()));
            log::debug!(
                "Newton iteration {}: maximal relative update {:e}",
                report.iterations,
                report.max_update
            );
            if report.max_update < solver.rtol {
                report.converged = true;
                break;
            }
        }
        if !report.converged {
            log::warn!(
                "capacitance Newton iteration stopped after {} iterations with relative update {:e}",
                report.iterations,
                report.max_update
            );
        }
        for (node, &c) in self.nodes_mut().iter_mut().zip(&c) {
            node.ca = 1.0 / c;
        }
        Ok(report)
    }
}

fn power(k: usize) -> i32 {
    k.value_as::<i32>().unwrap_or(i32::MAX)
}

/// Residuals `tr(M^k) / s^k - target_k` and their Jacobian for `M = diag(c) G`
fn power_sums(
    c: &Array1<f64>,
    g_neg: &Array2<f64>,
    scale: f64,
    target: &Array1<f64>,
) -> (Array1<f64>, Array2<f64>) {
    let n = c.len();
    let m = Array2::from_shape_fn((n, n), |(i, j)| c[i] * g_neg[[i, j]] / scale);
    let g_scaled = g_neg / scale;
    let mut residual = Array1::zeros(n);
    let mut jacobian = Array2::zeros((n, n));
    // M^{k-1}, starting at the identity
    let mut m_pow = Array2::<f64>::eye(n);
    for k in 1..=n {
        let g_m = g_scaled.dot(&m_pow);
        let k_f = k.value_as::<f64>().unwrap_or(f64::INFINITY);
        for col in 0..n {
            jacobian[[k - 1, col]] = k_f * g_m[[col, col]];
        }
        m_pow = m_pow.dot(&m);
        residual[k - 1] = m_pow.diag().sum() - target[k - 1];
    }
    (residual, jacobian)
}
