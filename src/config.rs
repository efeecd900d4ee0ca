use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Linear solver applied to stacked feature matrices
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum LinearSolver {
    /// Non-negative least squares, used for physical conductances, capacitances and gains
    #[default]
    NonNegative,
    /// Ordinary least squares with minimum-norm solution
    LeastSquares,
}

/// Tree-level fitting configuration
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct FitConfig {
    /// Solver used by fits executed immediately and by [crate::CompartmentTree::run_fit]
    pub solver: LinearSolver,
    /// Smallest membrane time constant (ms) the linear capacitance fit may produce
    pub tau_min: f64,
    /// Leak conductance (µS) used when a target membrane time constant cannot be reached
    pub g_l_min: f64,
}

impl FitConfig {
    /// Create a new [FitConfig].
    ///
    /// # Arguments
    /// - `solver`: linear solver for the stacked least-squares problems
    /// - `tau_min`: lower bound of `ca / g_L` in ms, zero disables the bound
    /// - `g_l_min`: fallback leak conductance in µS, must be positive
    pub fn new(solver: LinearSolver, tau_min: f64, g_l_min: f64) -> Self {
        assert!(tau_min >= 0.0, "tau_min must be non-negative");
        assert!(g_l_min > 0.0, "g_l_min must be positive");
        Self {
            solver,
            tau_min,
            g_l_min,
        }
    }

    #[inline]
    pub fn default_solver() -> LinearSolver {
        LinearSolver::NonNegative
    }

    #[inline]
    pub fn default_tau_min() -> f64 {
        0.0
    }

    #[inline]
    pub fn default_g_l_min() -> f64 {
        1e-10
    }
}

impl Default for FitConfig {
    fn default() -> Self {
        Self::new(
            Self::default_solver(),
            Self::default_tau_min(),
            Self::default_g_l_min(),
        )
    }
}

/// Newton iteration settings of the eigenvalue-matching capacitance solver
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct NewtonCapacitanceSolver {
    /// Stop when every inverse capacitance changes by less than this relative amount
    pub rtol: f64,
    pub max_iter: usize,
}

impl NewtonCapacitanceSolver {
    pub fn new(rtol: f64, max_iter: usize) -> Self {
        assert!(rtol > 0.0, "rtol must be positive");
        assert!(max_iter > 0, "max_iter must be positive");
        Self { rtol, max_iter }
    }

    #[inline]
    pub fn default_rtol() -> f64 {
        1e-10
    }

    #[inline]
    pub fn default_max_iter() -> usize {
        100
    }
}

impl Default for NewtonCapacitanceSolver {
    fn default() -> Self {
        Self::new(Self::default_rtol(), Self::default_max_iter())
    }
}
