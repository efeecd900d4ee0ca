use crate::error::FitError;
use crate::fit::{
    ChannelSelection, Conductances, FitAction, FitMatrices, FitSession, OperatingCondition,
    ParameterFamily,
};
use crate::tree::{CompartmentTree, Indexing};
use crate::types::{Freqs, LEAK, Traces};

use ndarray::{Array1, Array2, Array3, ArrayView2, Axis, s};
use std::collections::BTreeMap;

/// Sampled voltages, input currents and open probabilities at every location
///
/// Every array has shape `(n_locs, n_times)` in location indexing. Keys of `p_open` are the
/// channels to fit, keys of `p_open_other` the channels whose currents are known.
#[derive(Clone, Debug, PartialEq)]
pub struct TraceData {
    /// Voltage, mV
    pub v: Traces,
    /// Injected current, nA
    pub i_in: Traces,
    /// Time derivative of `v`, mV/ms
    pub dv: Traces,
    pub p_open: BTreeMap<String, Traces>,
    pub p_open_other: BTreeMap<String, Traces>,
}

impl TraceData {
    /// Traces sampled every `dt` ms, the voltage derivative is approximated by central
    /// differences
    pub fn new(v: Traces, i_in: Traces, dt: f64) -> Self {
        let dv = gradient(&v, dt);
        Self {
            v,
            i_in,
            dv,
            p_open: BTreeMap::new(),
            p_open_other: BTreeMap::new(),
        }
    }

    /// Replace the voltage derivative
    pub fn with_dv(mut self, dv: Traces) -> Self {
        self.dv = dv;
        self
    }

    /// Open probabilities of a channel to fit
    pub fn with_p_open(mut self, name: &str, p_open: Traces) -> Self {
        self.p_open.insert(name.to_owned(), p_open);
        self
    }

    /// Open probabilities of a channel with known conductance
    pub fn with_p_open_other(mut self, name: &str, p_open: Traces) -> Self {
        self.p_open_other.insert(name.to_owned(), p_open);
        self
    }

    pub fn n_times(&self) -> usize {
        self.v.ncols()
    }

    /// Names of the channels to fit
    pub fn fitted_channels(&self) -> Vec<&str> {
        self.p_open.keys().map(String::as_str).collect()
    }

    fn validate(&self, n_locs: usize) -> Result<(), FitError> {
        let shape = (n_locs, self.n_times());
        let arrays = [&self.v, &self.i_in, &self.dv]
            .into_iter()
            .chain(self.p_open.values())
            .chain(self.p_open_other.values());
        for traces in arrays {
            if traces.dim() != shape {
                return Err(FitError::LengthMismatch {
                    what: "trace samples",
                    expected: shape.0 * shape.1,
                    actual: traces.len(),
                });
            }
        }
        Ok(())
    }
}

/// Central differences along the time axis, one-sided at both ends
fn gradient(v: &Traces, dt: f64) -> Traces {
    let (n, n_t) = v.dim();
    let mut dv = Array2::zeros((n, n_t));
    if n_t < 2 {
        return dv;
    }
    for (v, mut dv) in v.outer_iter().zip(dv.outer_iter_mut()) {
        dv[0] = (v[1] - v[0]) / dt;
        dv[n_t - 1] = (v[n_t - 1] - v[n_t - 2]) / dt;
        for t in 1..n_t - 1 {
            dv[t] = (v[t + 1] - v[t - 1]) / (2.0 * dt);
        }
    }
    dv
}

impl CompartmentTree {
    /// Fit channel conductances to the current balance of every compartment
    ///
    /// Leak, coupling conductances and capacitances are taken as known. Per compartment and
    /// sample the injected current minus the capacitive, coupling, leak and known channel
    /// currents is regressed on the drives `p_open * (v - e)` of the fitted channels.
    pub fn compute_g_chan_from_trace(
        &mut self,
        data: &TraceData,
        all_channel_names: Option<&[&str]>,
        weight: f64,
        action: FitAction,
    ) -> Result<Option<FitMatrices>, FitError> {
        let n = self.len();
        data.validate(n)?;
        let fitted = data.fitted_channels();
        let family = Conductances::new(&fitted, all_channel_names)?;
        let n_t = data.n_times();
        let n_chan = family.all_channel_names.len();

        let mut feature = Array2::<f64>::zeros((n * n_t, n * n_chan));
        let mut target = Array1::<f64>::zeros(n * n_t);
        for node in self.iter() {
            let i = node.index();
            let loc = node.loc_ind();
            let v = data.v.row(loc);
            let mut i_vec = &data.i_in.row(loc) - &(&data.dv.row(loc) * (node.ca * 1e3));
            if let Some(parent) = node.parent() {
                let v_parent = data.v.row(self.nodes()[parent].loc_ind());
                i_vec.scaled_add(node.g_c, &(&v_parent - &v));
            }
            for &child in node.children() {
                let child = &self.nodes()[child];
                let v_child = data.v.row(child.loc_ind());
                i_vec.scaled_add(child.g_c, &(&v_child - &v));
            }
            let leak = node.current(LEAK)?;
            i_vec.zip_mut_with(&v, |i, &v| *i += leak.g * (leak.e - v));
            for (name, p_open) in &data.p_open_other {
                i_vec -= &node.dynamic_current(name, p_open.row(loc), v)?;
            }
            target.slice_mut(s![i * n_t..(i + 1) * n_t]).assign(&i_vec);

            for (kk, name) in family.all_channel_names.iter().enumerate() {
                if let Some(p_open) = data.p_open.get(name) {
                    let drive = node.dynamic_drive(name, p_open.row(loc), v)?;
                    feature
                        .slice_mut(s![i * n_t..(i + 1) * n_t, i * n_chan + kk])
                        .assign(&drive);
                }
            }
        }
        let matrices = FitMatrices::from_real(feature.view(), target)?;
        self.fit_res_action(action, family.into(), matrices, weight)
    }

    /// Fit channel conductances to voltage traces through the passive response of the tree
    ///
    /// The voltage deviation from equilibrium not explained by the passive response is
    /// regressed on the passive responses to the integrated channel drives. Without `v_pas` the
    /// passive response is the convolution of the injected current minus the known channel
    /// currents; `v_pas` in location indexing replaces it. Traces are sampled every `dt` ms.
    pub fn compute_g_chan_from_trace_conv(
        &mut self,
        dt: f64,
        data: &TraceData,
        v_pas: Option<ArrayView2<f64>>,
        all_channel_names: Option<&[&str]>,
        weight: f64,
        action: FitAction,
    ) -> Result<Option<FitMatrices>, FitError> {
        let n = self.len();
        data.validate(n)?;
        let fitted = data.fitted_channels();
        let family = Conductances::new(&fitted, all_channel_names)?;
        let n_t = data.n_times();
        let n_chan = family.all_channel_names.len();
        let loc_inds = self.loc_inds();
        let v = data.v.select(Axis(0), &loc_inds);

        let mut v_fit = &v - &self.e_eq(Indexing::Tree)?.insert_axis(Axis(1));
        match v_pas {
            Some(v_pas) => {
                if v_pas.dim() != (n, n_t) {
                    return Err(FitError::LengthMismatch {
                        what: "passive voltage samples",
                        expected: n * n_t,
                        actual: v_pas.len(),
                    });
                }
                v_fit -= &v_pas.select(Axis(0), &loc_inds);
            }
            None => {
                let mut i_in = data.i_in.select(Axis(0), &loc_inds);
                for (name, p_open) in &data.p_open_other {
                    let p_open = p_open.select(Axis(0), &loc_inds);
                    for node in self.iter() {
                        let i = node.index();
                        let i_chan = node.dynamic_current(name, p_open.row(i), v.row(i))?;
                        let mut row = i_in.row_mut(i);
                        row -= &i_chan;
                    }
                }
                let v_in = self.calc_convolution(dt, i_in.insert_axis(Axis(1)).view())?;
                v_fit -= &v_in.index_axis(Axis(2), 0).sum_axis(Axis(1));
            }
        }

        let mut d_chan = Array3::<f64>::zeros((n, n_chan, n_t));
        for node in self.iter() {
            let i = node.index();
            for (kk, name) in family.all_channel_names.iter().enumerate() {
                if data.p_open.contains_key(name) {
                    let drive = node.dynamic_drive_integrated(
                        name,
                        v.row(i),
                        dt,
                        self.channel_storage(),
                    )?;
                    d_chan.slice_mut(s![i, kk, ..]).assign(&(-drive));
                }
            }
        }
        let v_d = self.calc_convolution(dt, d_chan.view())?;

        let mut feature = Array2::<f64>::zeros((n * n_t, n * n_chan));
        for ((i, j, kk, t), &value) in v_d.indexed_iter() {
            feature[[i * n_t + t, j * n_chan + kk]] = value;
        }
        let target = Array1::from_iter(v_fit.iter().copied());
        let matrices = FitMatrices::from_real(feature.view(), target)?;
        self.fit_res_action(action, family.into(), matrices, weight)
    }

    /// Fit the conductances of the channels in `data.p_open` jointly to impedance matrices and
    /// to the current balance of `data`
    ///
    /// The impedance fit treats the leak and the channels of `data.p_open_other` as known. Both
    /// problems enter with their relative weights.
    #[allow(clippy::too_many_arguments)]
    pub fn compute_gm_combined(
        &mut self,
        freqs: &Freqs,
        conditions: &[OperatingCondition],
        data: &TraceData,
        w_freqs: Option<&Array1<f64>>,
        weight_impedance: f64,
        weight_trace: f64,
    ) -> Result<(), FitError> {
        let fitted: Vec<String> = data.p_open.keys().cloned().collect();
        let fitted: Vec<&str> = fitted.iter().map(String::as_str).collect();
        let other: Vec<&str> = data
            .p_open_other
            .keys()
            .map(String::as_str)
            .chain(std::iter::once(LEAK))
            .collect();
        let family: ParameterFamily = Conductances::new(&fitted, None)?.into();

        let mut session = FitSession::new();
        if let Some(matrices) = self.compute_gm(
            freqs,
            conditions,
            Some(fitted.as_slice()),
            ChannelSelection::default().other(&other),
            w_freqs,
            FitAction::Return,
        )? {
            session.store(family.clone(), matrices, weight_impedance)?;
        }
        if let Some(matrices) =
            self.compute_g_chan_from_trace(data, None, 1.0, FitAction::Return)?
        {
            session.store(family, matrices, weight_trace)?;
        }
        self.run_fit_session(&mut session)
    }
}
