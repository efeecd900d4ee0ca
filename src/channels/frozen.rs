use crate::channels::channel_trait::IonChannelTrait;

use ndarray::Array1;
use num_complex::Complex64;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Channel without state variables
///
/// The open probability is fixed and its voltage derivative `dp_dv` (1/mV) acts
/// instantaneously, so the linearised admittance does not depend on frequency.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct FrozenChannel {
    pub ion: String,
    pub p_open: f64,
    pub dp_dv: f64,
}

impl FrozenChannel {
    pub fn new(ion: impl Into<String>, p_open: f64, dp_dv: f64) -> Self {
        Self {
            ion: ion.into(),
            p_open,
            dp_dv,
        }
    }

    /// Always-open ohmic conductance
    pub fn ohmic(ion: impl Into<String>) -> Self {
        Self::new(ion, 1.0, 0.0)
    }
}

impl IonChannelTrait for FrozenChannel {
    fn ion(&self) -> &str {
        &self.ion
    }

    fn concentrations(&self) -> &[String] {
        &[]
    }

    fn n_statevars(&self) -> usize {
        0
    }

    fn statevars_inf(&self, _v: f64) -> Array1<f64> {
        Array1::zeros(0)
    }

    fn taus_inf(&self, _v: f64) -> Array1<f64> {
        Array1::zeros(0)
    }

    fn open_probability_at(&self, _v: f64, _statevars: &Array1<f64>) -> f64 {
        self.p_open
    }

    fn dp_dx(&self, _v: f64, _statevars: &Array1<f64>) -> Array1<f64> {
        Array1::zeros(0)
    }

    fn df_dv(&self, _v: f64, _statevars: &Array1<f64>) -> Array1<f64> {
        Array1::zeros(0)
    }

    fn df_dx(&self, _v: f64, _statevars: &Array1<f64>) -> Array1<f64> {
        Array1::zeros(0)
    }

    fn df_dc(&self, _v: f64, _statevars: &Array1<f64>, _ion: &str) -> Array1<f64> {
        Array1::zeros(0)
    }

    fn linear(
        &self,
        _v: f64,
        freqs: &Array1<Complex64>,
        _statevars: Option<&Array1<f64>>,
    ) -> Array1<Complex64> {
        Array1::from_elem(freqs.len(), Complex64::new(self.dp_dv, 0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_abs_diff_eq;

    #[test]
    fn admittance_is_frequency_independent() {
        let channel = FrozenChannel::new("k", 0.5, 1e-3);
        let freqs: Array1<Complex64> = [0.0, 10.0, 1000.0]
            .iter()
            .map(|&w| Complex64::new(0.0, w))
            .collect();
        let admittance = channel.linearized_admittance(-75.0, &freqs, 0.0, None);
        for y in admittance {
            assert_abs_diff_eq!(y.re, 75.0 * 1e-3 - 0.5, epsilon = 1e-14);
            assert_abs_diff_eq!(y.im, 0.0);
        }
    }
}
