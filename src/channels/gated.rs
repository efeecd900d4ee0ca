use crate::channels::channel_trait::IonChannelTrait;

use ndarray::Array1;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Relaxation kinetics of a single gate
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
pub enum GateKinetics {
    /// Voltage-dependent activation `1 / (1 + exp(-(v - v_half) / slope))`, negative `slope`
    /// gives inactivation; the time scale is a Gaussian bell
    /// `tau_base + tau_amp * exp(-((v - v_peak) / sigma)^2)` in ms
    Boltzmann {
        v_half: f64,
        slope: f64,
        tau_base: f64,
        tau_amp: f64,
        v_peak: f64,
        sigma: f64,
    },
    /// Concentration-dependent Hill activation `c^n / (c^n + kd^n)` at the operating
    /// concentration `conc` (mM) of `ion`, with constant time scale `tau` in ms
    Hill {
        ion: String,
        kd: f64,
        n: f64,
        conc: f64,
        tau: f64,
    },
}

impl GateKinetics {
    fn x_inf(&self, v: f64) -> f64 {
        match self {
            Self::Boltzmann { v_half, slope, .. } => 1.0 / (1.0 + f64::exp(-(v - v_half) / slope)),
            Self::Hill { kd, n, conc, .. } => {
                let cn = conc.powf(*n);
                cn / (cn + kd.powf(*n))
            }
        }
    }

    fn dx_inf_dv(&self, v: f64) -> f64 {
        match self {
            Self::Boltzmann { slope, .. } => {
                let x = self.x_inf(v);
                x * (1.0 - x) / slope
            }
            Self::Hill { .. } => 0.0,
        }
    }

    fn dx_inf_dc(&self, ion: &str) -> f64 {
        match self {
            Self::Boltzmann { .. } => 0.0,
            Self::Hill {
                ion: gate_ion,
                kd,
                n,
                conc,
                ..
            } => {
                if gate_ion != ion {
                    return 0.0;
                }
                let cn = conc.powf(*n);
                let kn = kd.powf(*n);
                n * conc.powf(n - 1.0) * kn / (cn + kn).powi(2)
            }
        }
    }

    fn tau(&self, v: f64) -> f64 {
        match self {
            Self::Boltzmann {
                tau_base,
                tau_amp,
                v_peak,
                sigma,
                ..
            } => tau_base + tau_amp * f64::exp(-((v - v_peak) / sigma).powi(2)),
            Self::Hill { tau, .. } => *tau,
        }
    }

    fn dtau_dv(&self, v: f64) -> f64 {
        match self {
            Self::Boltzmann {
                tau_amp,
                v_peak,
                sigma,
                ..
            } => {
                let z = (v - v_peak) / sigma;
                -2.0 * tau_amp * z / sigma * f64::exp(-z * z)
            }
            Self::Hill { .. } => 0.0,
        }
    }
}

/// Gate raised to an integer power inside the open probability
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Gate {
    pub power: i32,
    pub kinetics: GateKinetics,
}

impl Gate {
    pub fn new(power: i32, kinetics: GateKinetics) -> Self {
        Self { power, kinetics }
    }
}

/// Hodgkin-Huxley type channel with open probability `prod_i x_i^p_i`
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct GatedChannel {
    ion: String,
    gates: Vec<Gate>,
    concentrations: Vec<String>,
}

impl GatedChannel {
    pub fn new(ion: impl Into<String>, gates: Vec<Gate>) -> Self {
        let mut concentrations: Vec<String> = gates
            .iter()
            .filter_map(|gate| match &gate.kinetics {
                GateKinetics::Hill { ion, .. } => Some(ion.clone()),
                GateKinetics::Boltzmann { .. } => None,
            })
            .collect();
        concentrations.sort();
        concentrations.dedup();
        Self {
            ion: ion.into(),
            gates,
            concentrations,
        }
    }

    pub fn gates(&self) -> &[Gate] {
        &self.gates
    }

    /// Transient sodium current of neocortical pyramidal cells
    pub fn na_ta() -> Self {
        Self::new(
            "na",
            vec![
                Gate::new(
                    3,
                    GateKinetics::Boltzmann {
                        v_half: -38.0,
                        slope: 6.0,
                        tau_base: 0.05,
                        tau_amp: 0.4,
                        v_peak: -40.0,
                        sigma: 20.0,
                    },
                ),
                Gate::new(
                    1,
                    GateKinetics::Boltzmann {
                        v_half: -66.0,
                        slope: -6.0,
                        tau_base: 0.5,
                        tau_amp: 5.0,
                        v_peak: -60.0,
                        sigma: 20.0,
                    },
                ),
            ],
        )
    }

    /// Fast delayed-rectifier potassium current
    pub fn kv3_3() -> Self {
        Self::new(
            "k",
            vec![
                Gate::new(
                    1,
                    GateKinetics::Boltzmann {
                        v_half: 18.7,
                        slope: 9.7,
                        tau_base: 0.8,
                        tau_amp: 3.0,
                        v_peak: -20.0,
                        sigma: 25.0,
                    },
                ),
                Gate::new(
                    1,
                    GateKinetics::Boltzmann {
                        v_half: -46.0,
                        slope: -6.0,
                        tau_base: 50.0,
                        tau_amp: 100.0,
                        v_peak: -50.0,
                        sigma: 30.0,
                    },
                ),
            ],
        )
    }

    /// Hyperpolarisation-activated unspecific cation current
    pub fn h() -> Self {
        Self::new(
            "",
            vec![Gate::new(
                1,
                GateKinetics::Boltzmann {
                    v_half: -82.0,
                    slope: -7.0,
                    tau_base: 20.0,
                    tau_amp: 100.0,
                    v_peak: -80.0,
                    sigma: 20.0,
                },
            )],
        )
    }

    /// High-voltage activated calcium current
    pub fn ca_hva() -> Self {
        Self::new(
            "ca",
            vec![
                Gate::new(
                    2,
                    GateKinetics::Boltzmann {
                        v_half: -27.0,
                        slope: 3.8,
                        tau_base: 0.3,
                        tau_amp: 1.5,
                        v_peak: -30.0,
                        sigma: 20.0,
                    },
                ),
                Gate::new(
                    1,
                    GateKinetics::Boltzmann {
                        v_half: -75.0,
                        slope: -17.0,
                        tau_base: 50.0,
                        tau_amp: 150.0,
                        v_peak: -70.0,
                        sigma: 30.0,
                    },
                ),
            ],
        )
    }

    /// Small-conductance calcium-activated potassium current
    pub fn sk() -> Self {
        Self::new(
            "k",
            vec![Gate::new(
                1,
                GateKinetics::Hill {
                    ion: "ca".into(),
                    kd: 4.3e-4,
                    n: 4.8,
                    conc: 1e-4,
                    tau: 1.0,
                },
            )],
        )
    }
}

impl IonChannelTrait for GatedChannel {
    fn ion(&self) -> &str {
        &self.ion
    }

    fn concentrations(&self) -> &[String] {
        &self.concentrations
    }

    fn n_statevars(&self) -> usize {
        self.gates.len()
    }

    fn statevars_inf(&self, v: f64) -> Array1<f64> {
        self.gates.iter().map(|gate| gate.kinetics.x_inf(v)).collect()
    }

    fn taus_inf(&self, v: f64) -> Array1<f64> {
        self.gates.iter().map(|gate| gate.kinetics.tau(v)).collect()
    }

    fn open_probability_at(&self, _v: f64, statevars: &Array1<f64>) -> f64 {
        self.gates
            .iter()
            .zip(statevars)
            .map(|(gate, &x)| x.powi(gate.power))
            .product()
    }

    fn dp_dx(&self, _v: f64, statevars: &Array1<f64>) -> Array1<f64> {
        (0..self.gates.len())
            .map(|i| {
                self.gates
                    .iter()
                    .zip(statevars)
                    .enumerate()
                    .map(|(j, (gate, &x))| {
                        if i == j {
                            f64::from(gate.power) * x.powi(gate.power - 1)
                        } else {
                            x.powi(gate.power)
                        }
                    })
                    .product()
            })
            .collect()
    }

    fn df_dv(&self, v: f64, statevars: &Array1<f64>) -> Array1<f64> {
        self.gates
            .iter()
            .zip(statevars)
            .map(|(gate, &x)| {
                let tau = gate.kinetics.tau(v);
                gate.kinetics.dx_inf_dv(v) / tau
                    - (gate.kinetics.x_inf(v) - x) * gate.kinetics.dtau_dv(v) / (tau * tau)
            })
            .collect()
    }

    fn df_dx(&self, v: f64, _statevars: &Array1<f64>) -> Array1<f64> {
        self.gates
            .iter()
            .map(|gate| -1.0 / gate.kinetics.tau(v))
            .collect()
    }

    fn df_dc(&self, v: f64, _statevars: &Array1<f64>, ion: &str) -> Array1<f64> {
        self.gates
            .iter()
            .map(|gate| gate.kinetics.dx_inf_dc(ion) / gate.kinetics.tau(v))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::error::TreeError;

    use approx::assert_relative_eq;
    use ndarray::array;

    fn numerical_derivative(f: impl Fn(f64) -> f64, x: f64) -> f64 {
        let h = 1e-6;
        (f(x + h) - f(x - h)) / (2.0 * h)
    }

    #[test]
    fn steady_state_is_fixed_point() {
        let channel = GatedChannel::na_ta();
        for v in [-80.0, -60.0, -40.0, 0.0] {
            let sv = channel.statevars_inf(v);
            let f: Array1<f64> = channel
                .gates()
                .iter()
                .zip(&sv)
                .map(|(gate, &x)| (gate.kinetics.x_inf(v) - x) / gate.kinetics.tau(v))
                .collect();
            assert_relative_eq!(f, Array1::<f64>::zeros(2));
        }
    }

    #[test]
    fn open_probability_rejects_wrong_number_of_statevars() {
        let channel = GatedChannel::na_ta();
        assert_eq!(
            channel.open_probability(-50.0, Some(&array![0.3])),
            Err(TreeError::ShapeMismatch {
                expected: 2,
                actual: 1
            })
        );
        assert_relative_eq!(
            channel.open_probability(-50.0, Some(&array![0.3, 0.6])).unwrap(),
            0.3f64.powi(3) * 0.6
        );
    }

    #[test]
    fn dp_dx_matches_finite_differences() {
        let channel = GatedChannel::na_ta();
        let sv = array![0.3, 0.6];
        let dp_dx = channel.dp_dx(-50.0, &sv);
        for i in 0..2 {
            let numerical = numerical_derivative(
                |x| {
                    let mut sv = sv.clone();
                    sv[i] = x;
                    channel.open_probability_at(-50.0, &sv)
                },
                sv[i],
            );
            assert_relative_eq!(dp_dx[i], numerical, max_relative = 1e-6);
        }
    }

    #[test]
    fn df_dv_matches_finite_differences() {
        let channel = GatedChannel::kv3_3();
        let sv = array![0.2, 0.7];
        let v = -30.0;
        let df_dv = channel.df_dv(v, &sv);
        for (i, gate) in channel.gates().iter().enumerate() {
            let numerical = numerical_derivative(
                |v| (gate.kinetics.x_inf(v) - sv[i]) / gate.kinetics.tau(v),
                v,
            );
            assert_relative_eq!(df_dv[i], numerical, max_relative = 1e-5);
        }
    }

    #[test]
    fn hill_gate_reads_concentration() {
        let channel = GatedChannel::sk();
        assert_eq!(channel.concentrations(), &["ca".to_string()]);
        let sv = channel.statevars_inf(-75.0);
        let df_dc = channel.df_dc(-75.0, &sv, "ca");
        assert!(df_dc[0] > 0.0);
        assert_eq!(channel.df_dc(-75.0, &sv, "k")[0], 0.0);
        assert_eq!(channel.df_dv(-75.0, &sv)[0], 0.0);
    }
}
