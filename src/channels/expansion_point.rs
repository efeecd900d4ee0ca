use crate::channels::{IonChannel, IonChannelTrait};
use crate::error::TreeError;

use cobyla::{Func, RhoBeg, StopTols, minimize};
use ndarray::Array1;
use num_complex::Complex64;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// State variables around which a channel is linearised
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub enum ExpansionPoint {
    /// Steady state at the node's equilibrium potential
    #[default]
    Asymptotic,
    /// State variables maximising the magnitude of the linearised current
    MaxCurrent,
    /// Explicit state variables
    Explicit(Array1<f64>),
}

impl ExpansionPoint {
    /// Concrete state variables, `None` stands for the steady state at `v`
    ///
    /// Explicit state variables must match the number of gates of `channel`.
    pub fn resolve(
        &self,
        channel: &IonChannel,
        v: f64,
        freqs: &Array1<Complex64>,
        e_rev: f64,
        search: &MaxCurrentSearch,
    ) -> Result<Option<Array1<f64>>, TreeError> {
        match self {
            Self::Asymptotic => Ok(None),
            Self::MaxCurrent => Ok(Some(search.find(channel, v, freqs, e_rev))),
            Self::Explicit(statevars) => {
                channel.check_statevars(statevars)?;
                Ok(Some(statevars.clone()))
            }
        }
    }
}

/// COBYLA search for the state variables maximising `|sum_freqs linearized_admittance|`
///
/// State variables are bounded to `[0, 1]`, the search starts from the centre of the unit cube.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct MaxCurrentSearch {
    pub niterations: u32,
    pub rhobeg: f64,
    pub ftol_rel: f64,
}

impl MaxCurrentSearch {
    /// Create a new [MaxCurrentSearch].
    ///
    /// # Arguments
    /// - `niterations`: maximum number of function evaluations
    /// - `rhobeg`: initial change of the state variables
    /// - `ftol_rel`: relative tolerance on the objective
    pub fn new(niterations: u32, rhobeg: f64, ftol_rel: f64) -> Self {
        assert!(niterations > 0, "niterations must be positive");
        assert!(
            rhobeg > 0.0 && rhobeg.is_finite(),
            "rhobeg must be positive and finite"
        );
        assert!(ftol_rel >= 0.0, "ftol_rel must be non-negative");
        Self {
            niterations,
            rhobeg,
            ftol_rel,
        }
    }

    #[inline]
    pub fn default_niterations() -> u32 {
        1000
    }

    #[inline]
    pub fn default_rhobeg() -> f64 {
        0.25
    }

    #[inline]
    pub fn default_ftol_rel() -> f64 {
        1e-8
    }

    pub fn find(
        &self,
        channel: &IonChannel,
        v: f64,
        freqs: &Array1<Complex64>,
        e_rev: f64,
    ) -> Array1<f64> {
        let n = channel.n_statevars();
        if n == 0 {
            return Array1::zeros(0);
        }

        let objective = {
            let channel = channel.clone();
            let freqs = freqs.clone();
            move |x: &[f64], _user_data: &mut ()| -> f64 {
                let statevars = Array1::from(x.to_vec());
                let total: Complex64 = channel
                    .linearized_admittance(v, &freqs, e_rev, Some(&statevars))
                    .sum();
                -total.norm()
            }
        };
        let x0 = vec![0.5; n];
        let bounds = vec![(0.0, 1.0); n];
        let constraints: Vec<&dyn Func<()>> = vec![];
        let stop_tol = StopTols {
            ftol_rel: self.ftol_rel,
            ..StopTols::default()
        };

        match minimize(
            objective,
            &x0,
            &bounds,
            &constraints,
            (),
            self.niterations as usize,
            RhoBeg::All(self.rhobeg),
            Some(stop_tol),
        ) {
            Ok((_status, x, _f)) => Array1::from(x),
            Err((status, _x, _f)) => {
                log::warn!(
                    "max current search failed with {status:?}, falling back to the steady state at {v} mV"
                );
                channel.statevars_inf(v)
            }
        }
    }
}

impl Default for MaxCurrentSearch {
    fn default() -> Self {
        Self::new(
            Self::default_niterations(),
            Self::default_rhobeg(),
            Self::default_ftol_rel(),
        )
    }
}

impl IonChannel {
    /// State variables maximising the linearised current magnitude at `v`
    pub fn max_current_statevars(
        &self,
        v: f64,
        freqs: &Array1<Complex64>,
        e_rev: f64,
        search: &MaxCurrentSearch,
    ) -> Array1<f64> {
        search.find(self, v, freqs, e_rev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::channels::{FrozenChannel, GatedChannel};

    #[test]
    fn max_current_beats_steady_state() {
        let channel: IonChannel = GatedChannel::h().into();
        let freqs = Array1::from(vec![Complex64::new(0.0, 0.0)]);
        let v = -75.0;
        let e_rev = -43.0;
        let search = MaxCurrentSearch::default();
        let statevars = channel.max_current_statevars(v, &freqs, e_rev, &search);
        assert_eq!(statevars.len(), 1);
        assert!(statevars.iter().all(|&x| (0.0..=1.0).contains(&x)));

        let magnitude = |sv: Option<&Array1<f64>>| {
            channel
                .linearized_admittance(v, &freqs, e_rev, sv)
                .sum()
                .norm()
        };
        assert!(magnitude(Some(&statevars)) >= magnitude(None) - 1e-12);
    }

    #[test]
    fn stateless_channel_has_empty_expansion_point() {
        let channel: IonChannel = FrozenChannel::new("k", 0.5, 1e-3).into();
        let freqs = Array1::from(vec![Complex64::new(0.0, 0.0)]);
        let resolved = ExpansionPoint::MaxCurrent.resolve(
            &channel,
            -75.0,
            &freqs,
            -85.0,
            &MaxCurrentSearch::default(),
        );
        assert_eq!(resolved, Ok(Some(Array1::zeros(0))));
    }

    #[test]
    fn explicit_statevars_must_match_gates() {
        let channel: IonChannel = GatedChannel::na_ta().into();
        let freqs = Array1::from(vec![Complex64::new(0.0, 0.0)]);
        let search = MaxCurrentSearch::default();
        let resolve = |statevars: Array1<f64>| {
            ExpansionPoint::Explicit(statevars).resolve(&channel, -75.0, &freqs, 50.0, &search)
        };
        assert_eq!(
            resolve(Array1::from(vec![0.5])),
            Err(TreeError::ShapeMismatch {
                expected: 2,
                actual: 1
            })
        );
        assert_eq!(
            resolve(Array1::from(vec![0.5, 0.5])),
            Ok(Some(Array1::from(vec![0.5, 0.5])))
        );
    }
}
