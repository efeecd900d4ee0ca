use crate::channels::{ChannelStorage, ExpansionPoint, IonChannelTrait, MaxCurrentSearch};
use crate::concmech::ExpConcMech;
use crate::error::TreeError;
use crate::types::LEAK;

use ndarray::{Array1, ArrayView1, Zip};
use num_complex::Complex64;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Conductance (µS) and reversal potential (mV) of one membrane current
#[derive(Clone, Copy, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Current {
    pub g: f64,
    pub e: f64,
}

/// Initial parameters of a node added to a [crate::CompartmentTreeBuilder]
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct NodeParams {
    /// Capacitance, µF
    pub ca: f64,
    /// Coupling conductance to the parent, µS, ignored for the root
    pub g_c: f64,
    /// Leak conductance, µS
    pub g_l: f64,
    /// Equilibrium potential and leak reversal, mV
    pub e_eq: f64,
}

impl NodeParams {
    pub fn new(ca: f64, g_c: f64, g_l: f64, e_eq: f64) -> Self {
        Self { ca, g_c, g_l, e_eq }
    }
}

impl Default for NodeParams {
    fn default() -> Self {
        Self::new(1.0, 0.0, 1e-2, -75.0)
    }
}

/// Single compartment of a reduced model
#[derive(Clone, Debug)]
pub struct CompartmentNode {
    index: usize,
    loc_ind: usize,
    parent: Option<usize>,
    children: Vec<usize>,
    pub ca: f64,
    pub g_c: f64,
    pub e_eq: f64,
    pub currents: BTreeMap<String, Current>,
    pub concmechs: BTreeMap<String, ExpConcMech>,
    expansion_points: BTreeMap<String, Array1<f64>>,
}

impl CompartmentNode {
    pub(crate) fn new(index: usize, loc_ind: usize, parent: Option<usize>, params: &NodeParams) -> Self {
        let mut currents = BTreeMap::new();
        currents.insert(
            LEAK.to_owned(),
            Current {
                g: params.g_l,
                e: params.e_eq,
            },
        );
        Self {
            index,
            loc_ind,
            parent,
            children: vec![],
            ca: params.ca,
            g_c: if parent.is_some() { params.g_c } else { 0.0 },
            e_eq: params.e_eq,
            currents,
            concmechs: BTreeMap::new(),
            expansion_points: BTreeMap::new(),
        }
    }

    /// Position in the tree ordering
    pub fn index(&self) -> usize {
        self.index
    }

    /// Position in the location ordering
    pub fn loc_ind(&self) -> usize {
        self.loc_ind
    }

    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    pub fn children(&self) -> &[usize] {
        &self.children
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub(crate) fn push_child(&mut self, child: usize) {
        self.children.push(child);
    }

    pub fn current(&self, name: &str) -> Result<&Current, TreeError> {
        self.currents
            .get(name)
            .ok_or_else(|| TreeError::MissingCurrent {
                index: self.index,
                name: name.to_owned(),
            })
    }

    pub fn current_mut(&mut self, name: &str) -> Result<&mut Current, TreeError> {
        let index = self.index;
        self.currents
            .get_mut(name)
            .ok_or_else(|| TreeError::MissingCurrent {
                index,
                name: name.to_owned(),
            })
    }

    pub fn g_l(&self) -> f64 {
        self.currents.get(LEAK).map_or(0.0, |leak| leak.g)
    }

    /// Add a current with zero conductance, linearised around its steady state
    pub fn add_current(&mut self, name: &str, e_rev: f64) {
        self.currents
            .insert(name.to_owned(), Current { g: 0.0, e: e_rev });
        self.expansion_points.remove(name);
    }

    pub fn add_conc_mech(&mut self, mech: ExpConcMech) {
        self.concmechs.insert(mech.ion.clone(), mech);
    }

    /// Resolve `point` at the node's equilibrium potential and store it for `name`
    pub fn set_expansion_point(
        &mut self,
        name: &str,
        point: &ExpansionPoint,
        storage: &ChannelStorage,
        freqs: &Array1<Complex64>,
        search: &MaxCurrentSearch,
    ) -> Result<(), TreeError> {
        let e_rev = self.current(name)?.e;
        let channel = storage.get(name)?;
        let statevars = point.resolve(channel, self.e_eq, freqs, e_rev, search)?;
        self.replace_expansion_point(name, statevars);
        Ok(())
    }

    pub(crate) fn replace_expansion_point(&mut self, name: &str, statevars: Option<Array1<f64>>) {
        match statevars {
            Some(statevars) => {
                self.expansion_points.insert(name.to_owned(), statevars);
            }
            None => {
                self.expansion_points.remove(name);
            }
        }
    }

    /// Explicit state variables of `name`, `None` for the steady state
    pub fn expansion_point(&self, name: &str) -> Option<&Array1<f64>> {
        self.expansion_points.get(name)
    }

    pub fn clear_expansion_points(&mut self) {
        self.expansion_points.clear();
    }

    /// Per-unit-conductance contributions of `channel_names` to the diagonal system-matrix entry
    pub fn calc_membrane_conductance_terms(
        &self,
        freqs: &Array1<Complex64>,
        channel_names: &[&str],
        storage: &ChannelStorage,
    ) -> Result<BTreeMap<String, Array1<Complex64>>, TreeError> {
        let mut terms = BTreeMap::new();
        for &name in channel_names {
            let term = if name == LEAK {
                Array1::from_elem(freqs.len(), Complex64::new(1.0, 0.0))
            } else {
                let current = self.current(name)?;
                storage
                    .get(name)?
                    .linearized_admittance(
                        self.e_eq,
                        freqs,
                        current.e,
                        self.expansion_point(name),
                    )
                    .mapv(|y| -y)
            };
            terms.insert(name.to_owned(), term);
        }
        Ok(terms)
    }

    /// Per-unit-gain contribution of the `ion` pool to the diagonal system-matrix entry
    ///
    /// Product of the linearised current of the channels carrying `ion`, the concentration
    /// sensitivity of the channels reading `ion` and the pool transfer function.
    pub fn calc_membrane_concentration_terms(
        &self,
        ion: &str,
        channel_names: &[&str],
        freqs: &Array1<Complex64>,
        storage: &ChannelStorage,
    ) -> Result<Array1<Complex64>, TreeError> {
        let mech = self
            .concmechs
            .get(ion)
            .ok_or_else(|| TreeError::MissingConcMech {
                index: self.index,
                ion: ion.to_owned(),
            })?;
        let mut write = Array1::<Complex64>::zeros(freqs.len());
        let mut read = Array1::<Complex64>::zeros(freqs.len());
        for &name in channel_names.iter().filter(|&&name| name != LEAK) {
            let current = self.current(name)?;
            let channel = storage.get(name)?;
            let statevars = self.expansion_point(name);
            if channel.ion() == ion {
                let lin = channel.linearized_admittance(self.e_eq, freqs, current.e, statevars);
                write.scaled_add(Complex64::new(current.g, 0.0), &lin);
            }
            if channel.concentrations().iter().any(|c| c == ion) {
                let lin = channel.linearized_concentration_admittance(
                    self.e_eq, freqs, current.e, ion, statevars,
                );
                read.scaled_add(Complex64::new(-current.g, 0.0), &lin);
            }
        }
        Ok(write * read * mech.lin(freqs))
    }

    fn p_open(
        &self,
        name: &str,
        v: f64,
        storage: &ChannelStorage,
        p_open: Option<&BTreeMap<String, f64>>,
    ) -> Result<f64, TreeError> {
        if let Some(&p) = p_open.and_then(|p_open| p_open.get(name)) {
            return Ok(p);
        }
        storage
            .get(name)?
            .open_probability(v, self.expansion_point(name))
    }

    fn selected_names<'a>(&'a self, channel_names: Option<&'a [&'a str]>) -> Vec<&'a str> {
        match channel_names {
            Some(names) => names.to_vec(),
            None => self.currents.keys().map(String::as_str).collect(),
        }
    }

    /// Total conductance at `v` (defaults to `e_eq`) of `channel_names` (defaults to all
    /// currents), optionally with precomputed open probabilities
    pub fn g_tot(
        &self,
        storage: &ChannelStorage,
        v: Option<f64>,
        channel_names: Option<&[&str]>,
        p_open: Option<&BTreeMap<String, f64>>,
    ) -> Result<f64, TreeError> {
        let v = v.unwrap_or(self.e_eq);
        let mut g_tot = 0.0;
        for name in self.selected_names(channel_names) {
            let current = self.current(name)?;
            g_tot += if name == LEAK {
                current.g
            } else {
                current.g * self.p_open(name, v, storage, p_open)?
            };
        }
        Ok(g_tot)
    }

    /// Total outward membrane current (nA) at `v`, see [CompartmentNode::g_tot]
    pub fn i_tot(
        &self,
        storage: &ChannelStorage,
        v: Option<f64>,
        channel_names: Option<&[&str]>,
        p_open: Option<&BTreeMap<String, f64>>,
    ) -> Result<f64, TreeError> {
        let v = v.unwrap_or(self.e_eq);
        let mut i_tot = 0.0;
        for name in self.selected_names(channel_names) {
            let current = self.current(name)?;
            i_tot += if name == LEAK {
                current.g * (v - current.e)
            } else {
                current.g * self.p_open(name, v, storage, p_open)? * (v - current.e)
            };
        }
        Ok(i_tot)
    }

    /// Set the leak reversal so that the steady-state current vanishes at `e_eq`
    pub fn fit_e_l(&mut self, storage: &ChannelStorage) -> Result<(), TreeError> {
        let mut i_eq = 0.0;
        for (name, current) in self.currents.iter().filter(|(name, _)| *name != LEAK) {
            let p_open = storage.get(name)?.open_probability(self.e_eq, None)?;
            i_eq += current.g * p_open * (current.e - self.e_eq);
        }
        let e_eq = self.e_eq;
        let leak = self.current_mut(LEAK)?;
        leak.e = e_eq - i_eq / leak.g;
        Ok(())
    }

    /// Set leak conductance and reversal for a target equilibrium (mV) and membrane time
    /// constant (ms)
    ///
    /// The leak conductance is clamped to `g_l_min` when the other currents alone already make
    /// the membrane faster than `tau_m_target`.
    pub fn fit_leak_current(
        &mut self,
        e_eq_target: f64,
        tau_m_target: f64,
        g_l_min: f64,
        storage: &ChannelStorage,
    ) -> Result<(), TreeError> {
        if tau_m_target <= 0.0 {
            return Err(TreeError::NonPositiveTau(tau_m_target));
        }
        let mut g_sum = 0.0;
        let mut i_eq = 0.0;
        for (name, current) in self.currents.iter().filter(|(name, _)| *name != LEAK) {
            let p_open = storage.get(name)?.open_probability(e_eq_target, None)?;
            g_sum += current.g * p_open;
            i_eq += current.g * p_open * (current.e - e_eq_target);
        }
        let mut g_l = self.ca / (tau_m_target * 1e-3) - g_sum;
        if g_l < g_l_min {
            log::warn!(
                "node {}: membrane time constant {} ms is unreachable, leak conductance clamped to {} µS",
                self.index,
                tau_m_target,
                g_l_min,
            );
            g_l = g_l_min;
        }
        let leak = self.current_mut(LEAK)?;
        leak.g = g_l;
        leak.e = e_eq_target - i_eq / g_l;
        self.e_eq = e_eq_target;
        Ok(())
    }

    /// Static driving term `p_open * (v - e)` of `name`, at `e_eq` when `v` is `None`
    pub fn drive(
        &self,
        name: &str,
        v: Option<f64>,
        storage: &ChannelStorage,
    ) -> Result<f64, TreeError> {
        let v = v.unwrap_or(self.e_eq);
        let e = self.current(name)?.e;
        Ok(self.p_open(name, v, storage, None)? * (v - e))
    }

    /// Time series `p_open * (v - e)` of `name`
    pub fn dynamic_drive(
        &self,
        name: &str,
        p_open: ArrayView1<f64>,
        v: ArrayView1<f64>,
    ) -> Result<Array1<f64>, TreeError> {
        if p_open.len() != v.len() {
            return Err(TreeError::ShapeMismatch {
                expected: v.len(),
                actual: p_open.len(),
            });
        }
        let e = self.current(name)?.e;
        Ok(Zip::from(&p_open)
            .and(&v)
            .map_collect(|&p, &v| p * (v - e)))
    }

    /// Time series `g * p_open * (v - e)` of `name`
    pub fn dynamic_current(
        &self,
        name: &str,
        p_open: ArrayView1<f64>,
        v: ArrayView1<f64>,
    ) -> Result<Array1<f64>, TreeError> {
        let g = self.current(name)?.g;
        Ok(self.dynamic_drive(name, p_open, v)? * g)
    }

    /// Driving term of `name` along the voltage trace `v` sampled every `dt` ms
    ///
    /// The gates start at the steady state of `v[0]`. Between samples every gate follows
    /// `dx/dt = -x / tau + x_inf / tau` with the rate averaged over both samples and the source
    /// term interpolated linearly, which is integrated exactly.
    pub fn dynamic_drive_integrated(
        &self,
        name: &str,
        v: ArrayView1<f64>,
        dt: f64,
        storage: &ChannelStorage,
    ) -> Result<Array1<f64>, TreeError> {
        let e = self.current(name)?.e;
        let channel = storage.get(name)?;
        let Some(&v0) = v.first() else {
            return Ok(Array1::zeros(0));
        };

        let mut sv_inf_prev = channel.statevars_inf(v0);
        let mut tau_prev = channel.taus_inf(v0);
        let mut statevars = sv_inf_prev.clone();
        let mut p_open = Array1::zeros(v.len());
        p_open[0] = channel.open_probability_at(v0, &statevars);
        for (k, &vk) in v.iter().enumerate().skip(1) {
            let sv_inf = channel.statevars_inf(vk);
            let tau = channel.taus_inf(vk);
            Zip::from(&mut statevars)
                .and(&sv_inf)
                .and(&tau)
                .and(&sv_inf_prev)
                .and(&tau_prev)
                .for_each(|x, &x_inf, &tau, &x_inf_prev, &tau_prev| {
                    let f = -2.0 / (tau + tau_prev);
                    let h_prev = x_inf_prev / tau_prev;
                    let h_now = x_inf / tau;
                    let p0 = f64::exp(f * dt);
                    let p1 = (1.0 - p0) / (f * f * dt);
                    let p2 = p0 / f + p1;
                    let p3 = -1.0 / f - p1;
                    *x = p0 * *x + p2 * h_prev + p3 * h_now;
                });
            p_open[k] = channel.open_probability_at(vk, &statevars);
            sv_inf_prev = sv_inf;
            tau_prev = tau;
        }
        Ok(Zip::from(&p_open)
            .and(&v)
            .map_collect(|&p, &v| p * (v - e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::channels::{ChannelRegistry, FrozenChannel};

    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use ndarray::array;

    fn storage_with(names: &[&str]) -> ChannelStorage {
        let mut registry = ChannelRegistry::default();
        registry.register("frozen", 0.0, FrozenChannel::new("k", 0.5, 1e-3));
        let mut storage = ChannelStorage::default();
        for name in names {
            storage.ensure(&registry, name).unwrap();
        }
        storage
    }

    fn root() -> CompartmentNode {
        CompartmentNode::new(0, 0, None, &NodeParams::default())
    }

    #[test]
    fn leak_term_is_one() {
        let node = root();
        let freqs = array![Complex64::new(0.0, 0.0), Complex64::new(0.0, 100.0)];
        let terms = node
            .calc_membrane_conductance_terms(&freqs, &[LEAK], &ChannelStorage::default())
            .unwrap();
        assert_eq!(terms[LEAK], Array1::from_elem(2, Complex64::new(1.0, 0.0)));
    }

    #[test]
    fn missing_current() {
        let node = root();
        let storage = storage_with(&["frozen"]);
        let freqs = array![Complex64::new(0.0, 0.0)];
        assert_eq!(
            node.calc_membrane_conductance_terms(&freqs, &["frozen"], &storage)
                .err(),
            Some(TreeError::MissingCurrent {
                index: 0,
                name: "frozen".into()
            })
        );
    }

    #[test]
    fn leak_reversal_zeroes_current() {
        let storage = storage_with(&["Kv3_3", "h"]);
        let mut node = root();
        node.e_eq = -70.0;
        node.add_current("Kv3_3", -85.0);
        node.add_current("h", -43.0);
        node.current_mut("Kv3_3").unwrap().g = 0.5;
        node.current_mut("h").unwrap().g = 0.1;
        node.fit_e_l(&storage).unwrap();
        let i_tot = node.i_tot(&storage, None, None, None).unwrap();
        assert_abs_diff_eq!(i_tot, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn leak_current_reaches_time_constant() {
        let storage = storage_with(&["h"]);
        let mut node = root();
        node.add_current("h", -43.0);
        node.current_mut("h").unwrap().g = 1e-3;
        node.fit_leak_current(-70.0, 20.0, 1e-10, &storage).unwrap();
        let g_tot = node.g_tot(&storage, None, None, None).unwrap();
        assert_relative_eq!(node.ca / g_tot, 20.0e-3, max_relative = 1e-12);
        assert_abs_diff_eq!(
            node.i_tot(&storage, None, None, None).unwrap(),
            0.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn unreachable_time_constant_is_clamped() {
        let storage = storage_with(&["shunt"]);
        let mut node = root();
        node.add_current("shunt", 0.0);
        node.current_mut("shunt").unwrap().g = 1e3;
        node.fit_leak_current(-70.0, 20.0, 1e-6, &storage).unwrap();
        assert_eq!(node.g_l(), 1e-6);
    }

    #[test]
    fn integrated_drive_is_steady_for_constant_voltage() {
        let storage = storage_with(&["Na_Ta"]);
        let mut node = root();
        node.add_current("Na_Ta", 50.0);
        let v = Array1::from_elem(100, -60.0);
        let drive = node
            .dynamic_drive_integrated("Na_Ta", v.view(), 0.1, &storage)
            .unwrap();
        let steady = node.drive("Na_Ta", Some(-60.0), &storage).unwrap();
        for &d in drive.iter() {
            assert_relative_eq!(d, steady, max_relative = 1e-12);
        }
    }

    #[test]
    fn integrated_drive_relaxes_towards_new_steady_state() {
        let storage = storage_with(&["h"]);
        let mut node = root();
        node.add_current("h", -43.0);
        let mut v = Array1::from_elem(20_000, -90.0);
        v[0] = -60.0;
        let drive = node
            .dynamic_drive_integrated("h", v.view(), 0.1, &storage)
            .unwrap();
        let steady = node.drive("h", Some(-90.0), &storage).unwrap();
        assert_relative_eq!(drive[drive.len() - 1], steady, max_relative = 1e-6);
    }

    #[test]
    fn dynamic_drive_shape_mismatch() {
        let mut node = root();
        node.add_current("h", -43.0);
        let p_open = array![0.5, 0.5];
        let v = array![-70.0];
        assert_eq!(
            node.dynamic_drive("h", p_open.view(), v.view()),
            Err(TreeError::ShapeMismatch {
                expected: 1,
                actual: 2
            })
        );
    }

    #[test]
    fn concentration_term_requires_mechanism() {
        let storage = storage_with(&["SK", "Ca_HVA"]);
        let mut node = root();
        node.add_current("SK", -85.0);
        node.add_current("Ca_HVA", 50.0);
        let freqs = array![Complex64::new(0.0, 0.0)];
        assert!(
            node.calc_membrane_concentration_terms("ca", &["SK", "Ca_HVA"], &freqs, &storage)
                .is_err()
        );
        node.add_conc_mech(ExpConcMech::new("ca", 100.0, 1.0));
        node.current_mut("SK").unwrap().g = 1.0;
        node.current_mut("Ca_HVA").unwrap().g = 1.0;
        let term = node
            .calc_membrane_concentration_terms("ca", &["SK", "Ca_HVA"], &freqs, &storage)
            .unwrap();
        assert!(term[0].norm() > 0.0);
    }
}
