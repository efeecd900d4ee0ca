use crate::error::TreeError;

use enum_dispatch::enum_dispatch;
use itertools::izip;
use ndarray::{Array1, Zip};
use num_complex::Complex64;

/// Ion-channel model linearised around an operating point
///
/// State variables `x` follow `dx/dt = f(v, x) = (x_inf(v) - x) / tau(v)` with rates in 1/ms,
/// frequencies are in 1/s.
#[enum_dispatch]
pub trait IonChannelTrait {
    /// Ion carrying the channel current, empty for an unspecific current
    fn ion(&self) -> &str;

    /// Ions whose concentration modulates the channel
    fn concentrations(&self) -> &[String];

    fn n_statevars(&self) -> usize;

    /// Steady-state values of the state variables at potential `v`
    fn statevars_inf(&self, v: f64) -> Array1<f64>;

    /// Time scales of the state variables at potential `v`, ms
    fn taus_inf(&self, v: f64) -> Array1<f64>;

    /// Open probability for explicit state variables
    fn open_probability_at(&self, v: f64, statevars: &Array1<f64>) -> f64;

    fn dp_dx(&self, v: f64, statevars: &Array1<f64>) -> Array1<f64>;

    fn df_dv(&self, v: f64, statevars: &Array1<f64>) -> Array1<f64>;

    fn df_dx(&self, v: f64, statevars: &Array1<f64>) -> Array1<f64>;

    fn df_dc(&self, v: f64, statevars: &Array1<f64>, ion: &str) -> Array1<f64>;

    /// Open probability, at steady state when `statevars` is `None`
    fn open_probability(&self, v: f64, statevars: Option<&Array1<f64>>) -> Result<f64, TreeError> {
        match statevars {
            Some(sv) => {
                self.check_statevars(sv)?;
                Ok(self.open_probability_at(v, sv))
            }
            None => Ok(self.open_probability_at(v, &self.statevars_inf(v))),
        }
    }

    /// Explicit state variables must hold one value per gate
    fn check_statevars(&self, statevars: &Array1<f64>) -> Result<(), TreeError> {
        if statevars.len() != self.n_statevars() {
            return Err(TreeError::ShapeMismatch {
                expected: self.n_statevars(),
                actual: statevars.len(),
            });
        }
        Ok(())
    }

    /// Frequency-domain transfer from a voltage perturbation to the open probability
    fn linear(
        &self,
        v: f64,
        freqs: &Array1<Complex64>,
        statevars: Option<&Array1<f64>>,
    ) -> Array1<Complex64> {
        let sv = statevars.cloned().unwrap_or_else(|| self.statevars_inf(v));
        let dp_dx = self.dp_dx(v, &sv);
        let df_dv = self.df_dv(v, &sv);
        let df_dx = self.df_dx(v, &sv);
        let mut lin = Array1::zeros(freqs.len());
        for (&dp, &dfv, &dfx) in izip!(&dp_dx, &df_dv, &df_dx) {
            Zip::from(&mut lin)
                .and(freqs)
                .for_each(|l, &s| *l += dp * dfv * 1e3 / (s - dfx * 1e3));
        }
        lin
    }

    /// Frequency-domain transfer from a perturbation of the `ion` concentration to the open
    /// probability
    fn linear_conc(
        &self,
        v: f64,
        freqs: &Array1<Complex64>,
        ion: &str,
        statevars: Option<&Array1<f64>>,
    ) -> Array1<Complex64> {
        let sv = statevars.cloned().unwrap_or_else(|| self.statevars_inf(v));
        let dp_dx = self.dp_dx(v, &sv);
        let df_dc = self.df_dc(v, &sv, ion);
        let df_dx = self.df_dx(v, &sv);
        let mut lin = Array1::zeros(freqs.len());
        for (&dp, &dfc, &dfx) in izip!(&dp_dx, &df_dc, &df_dx) {
            Zip::from(&mut lin)
                .and(freqs)
                .for_each(|l, &s| *l += dp * dfc * 1e3 / (s - dfx * 1e3));
        }
        lin
    }

    /// `(e_rev - v) * linear - p_open`, minus the per-unit-conductance admittance of the channel
    fn linearized_admittance(
        &self,
        v: f64,
        freqs: &Array1<Complex64>,
        e_rev: f64,
        statevars: Option<&Array1<f64>>,
    ) -> Array1<Complex64> {
        let sv = statevars.cloned().unwrap_or_else(|| self.statevars_inf(v));
        let p_open = self.open_probability_at(v, &sv);
        self.linear(v, freqs, Some(&sv))
            .mapv(|lin| lin * (e_rev - v) - p_open)
    }

    /// `(e_rev - v) * linear_conc`
    fn linearized_concentration_admittance(
        &self,
        v: f64,
        freqs: &Array1<Complex64>,
        e_rev: f64,
        ion: &str,
        statevars: Option<&Array1<f64>>,
    ) -> Array1<Complex64> {
        self.linear_conc(v, freqs, ion, statevars)
            .mapv(|lin| lin * (e_rev - v))
    }
}
