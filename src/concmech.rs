use ndarray::Array1;
use num_complex::Complex64;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Exponentially relaxing ion pool
///
/// The concentration relaxes with time constant `tau` (ms) and is driven by the ion current
/// scaled by the gain `gamma`.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ExpConcMech {
    pub ion: String,
    pub tau: f64,
    pub gamma: f64,
}

impl ExpConcMech {
    pub fn new(ion: impl Into<String>, tau: f64, gamma: f64) -> Self {
        Self {
            ion: ion.into(),
            tau,
            gamma,
        }
    }

    /// Frequency-domain transfer `-1 / (s + 1e3 / tau)` from ion current to concentration
    pub fn lin(&self, freqs: &Array1<Complex64>) -> Array1<Complex64> {
        let rate = 1e3 / self.tau;
        freqs.mapv(|s| -1.0 / (s + rate))
    }
}
