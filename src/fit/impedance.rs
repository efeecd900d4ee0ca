use crate::channels::ExpansionPoint;
use crate::error::FitError;
use crate::fit::{
    Capacitance, ConcentrationGain, Conductances, FitAction, FitMatrices, LeakCoupling,
    ParameterFamily, ParameterFamilyTrait,
};
use crate::tree::{CompartmentTree, EEq, Indexing, MatrixOptions};
use crate::types::{FreqMatrices, Freqs, LEAK};

use ndarray::{Array1, ArrayView2, Axis, Zip, s};
use num_complex::Complex64;

/// Impedance matrices of the full model at one operating point
#[derive(Clone, Debug, PartialEq)]
pub struct OperatingCondition {
    /// Shape `(n_freqs, n, n)` in location indexing, MOhm
    pub z_mat: FreqMatrices,
    /// Equilibrium potentials the impedance matrices were computed at
    pub e_eq: EEq,
    /// Expansion point of the fitted channel in single-channel fits
    pub expansion_point: ExpansionPoint,
    /// Relative weight of the condition's squared residual
    pub weight: f64,
}

impl OperatingCondition {
    pub fn new(z_mat: FreqMatrices, e_eq: EEq) -> Self {
        Self {
            z_mat,
            e_eq,
            expansion_point: ExpansionPoint::Asymptotic,
            weight: 1.0,
        }
    }

    /// Real zero-frequency impedance matrix
    pub fn steady_state(z_mat: ArrayView2<f64>, e_eq: EEq) -> Self {
        Self::new(
            z_mat.mapv(|z| Complex64::new(z, 0.0)).insert_axis(Axis(0)),
            e_eq,
        )
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_expansion_point(mut self, expansion_point: ExpansionPoint) -> Self {
        self.expansion_point = expansion_point;
        self
    }
}

/// Channel lists of conductance fits
#[derive(Clone, Copy, Debug, Default)]
pub struct ChannelSelection<'a> {
    /// Channels of the parameter vector, defaults to the fitted channels
    pub all: Option<&'a [&'a str]>,
    /// Channels of the known part of the system matrix, defaults to every channel of the tree
    /// outside `all`, leak included
    pub other: Option<&'a [&'a str]>,
}

impl<'a> ChannelSelection<'a> {
    pub fn all(mut self, all: &'a [&'a str]) -> Self {
        self.all = Some(all);
        self
    }

    pub fn other(mut self, other: &'a [&'a str]) -> Self {
        self.other = Some(other);
        self
    }
}

/// Known part of the system matrix
struct Background {
    channels: Vec<String>,
    with_ca: bool,
    add_leak: bool,
    /// Capacitances already accounted for, in tree indexing
    ca_offset: Option<Array1<f64>>,
}

impl Background {
    fn channels(channels: Vec<String>) -> Self {
        Self {
            channels,
            with_ca: true,
            add_leak: false,
            ca_offset: None,
        }
    }
}

fn to_owned_names(names: &[&str]) -> Vec<String> {
    names.iter().map(|&name| name.to_owned()).collect()
}

impl CompartmentTree {
    fn background_matrix(
        &self,
        freqs: &Freqs,
        background: &Background,
    ) -> Result<FreqMatrices, FitError> {
        let names: Vec<&str> = background.channels.iter().map(String::as_str).collect();
        let mut y_known = self.calc_system_matrix(
            freqs,
            &MatrixOptions::default()
                .channels(&names)
                .with_ca(background.with_ca)
                .add_leak(background.add_leak)
                .indexing(Indexing::Tree),
        )?;
        if let Some(ca_offset) = &background.ca_offset {
            for (i, &ca) in ca_offset.iter().enumerate() {
                Zip::from(y_known.slice_mut(s![.., i, i]))
                    .and(freqs)
                    .for_each(|y, &f| *y += f * ca);
            }
        }
        Ok(y_known)
    }

    /// Tree channels outside `all`, leak included, unless `other` is given
    fn other_channels(&self, all: &[String], other: Option<&[&str]>) -> Vec<String> {
        match other {
            Some(other) => to_owned_names(other),
            None => self
                .all_channel_names()
                .into_iter()
                .filter(|name| !all.iter().any(|a| a == name))
                .map(str::to_owned)
                .collect(),
        }
    }

    fn stack_conditions(
        &mut self,
        freqs: &Freqs,
        conditions: &[OperatingCondition],
        family: &ParameterFamily,
        background: Option<&Background>,
        w_freqs: Option<&Array1<f64>>,
        single_channel: Option<&str>,
    ) -> Result<Vec<FitMatrices>, FitError> {
        let mut parts = Vec::with_capacity(conditions.len());
        for condition in conditions {
            if let Some(name) = single_channel {
                self.set_expansion_point(name, &condition.expansion_point, freqs)?;
            }
            parts.push(self.condition_matrices(freqs, condition, family, background, w_freqs)?);
        }
        Ok(parts)
    }

    fn condition_matrices(
        &mut self,
        freqs: &Freqs,
        condition: &OperatingCondition,
        family: &ParameterFamily,
        background: Option<&Background>,
        w_freqs: Option<&Array1<f64>>,
    ) -> Result<FitMatrices, FitError> {
        if condition.weight < 0.0 || condition.weight.is_nan() {
            return Err(FitError::NegativeWeight(condition.weight));
        }
        let n = self.len();
        if condition.z_mat.dim() != (freqs.len(), n, n) {
            return Err(FitError::ImpedanceShape {
                actual: condition.z_mat.dim(),
                freqs: freqs.len(),
                size: n,
            });
        }
        self.set_e_eq(&condition.e_eq)?;
        let z_mat = self.permute_to_tree(&condition.z_mat)?;
        let g_struct = family.structure_tensor(self, freqs)?;
        let y_known = background
            .map(|background| self.background_matrix(freqs, background))
            .transpose()?;
        Ok(
            FitMatrices::from_impedance(z_mat.view(), &g_struct, y_known.as_ref(), w_freqs)?
                .scaled(condition.weight.sqrt()),
        )
    }

    /// Stack the problems of every condition and apply `action`
    ///
    /// With `single_channel` the channel is linearised around each condition's expansion point,
    /// its previous expansion points are restored afterwards. Equilibrium potentials stay at
    /// those of the last condition, except for [FitAction::Return] and on error where the
    /// previous ones are restored.
    #[allow(clippy::too_many_arguments)]
    fn fit_conditions(
        &mut self,
        freqs: &Freqs,
        conditions: &[OperatingCondition],
        family: ParameterFamily,
        background: Option<&Background>,
        w_freqs: Option<&Array1<f64>>,
        single_channel: Option<&str>,
        action: FitAction,
    ) -> Result<Option<FitMatrices>, FitError> {
        if conditions.is_empty() {
            return Err(FitError::NoConditions);
        }
        let e_eq: Vec<f64> = self.iter().map(|node| node.e_eq).collect();
        let points = single_channel.map(|name| self.expansion_points(name));
        let parts = self.stack_conditions(
            freqs,
            conditions,
            &family,
            background,
            w_freqs,
            single_channel,
        );
        if let (Some(name), Some(points)) = (single_channel, points) {
            self.restore_expansion_points(name, points);
        }
        if parts.is_err() || action == FitAction::Return {
            for (node, e) in self.nodes_mut().iter_mut().zip(e_eq) {
                node.e_eq = e;
            }
        }
        let parts = parts?;
        log::debug!(
            "{}: {} conditions at {} frequencies",
            family.describe(),
            conditions.len(),
            freqs.len()
        );
        let matrices = FitMatrices::concatenate(&parts)?;
        self.fit_res_action(action, family, matrices, 1.0)
    }

    /// Fit coupling conductances and the static conductances of `channel_names` to steady-state
    /// impedance matrices
    ///
    /// Every condition must hold a single zero-frequency impedance matrix of a model whose
    /// currents are exactly `channel_names`.
    pub fn compute_gmc(
        &mut self,
        conditions: &[OperatingCondition],
        channel_names: &[&str],
        action: FitAction,
    ) -> Result<Option<FitMatrices>, FitError> {
        let zero = Array1::from_elem(1, Complex64::new(0.0, 0.0));
        let family = LeakCoupling::new(channel_names).into();
        self.fit_conditions(&zero, conditions, family, None, None, None, action)
    }

    /// Fit the conductances of `channel_names` to impedance matrices at `freqs`
    ///
    /// `channel_names` defaults to the leak and every channel of the tree. Rows of frequency `f`
    /// are weighted by `w_freqs[f]`.
    #[allow(clippy::too_many_arguments)]
    pub fn compute_gm(
        &mut self,
        freqs: &Freqs,
        conditions: &[OperatingCondition],
        channel_names: Option<&[&str]>,
        selection: ChannelSelection,
        w_freqs: Option<&Array1<f64>>,
        action: FitAction,
    ) -> Result<Option<FitMatrices>, FitError> {
        let fitted = match channel_names {
            Some(names) => to_owned_names(names),
            None => to_owned_names(&self.all_channel_names()),
        };
        let fitted_names: Vec<&str> = fitted.iter().map(String::as_str).collect();
        let family = Conductances::new(&fitted_names, selection.all)?;
        let background =
            Background::channels(self.other_channels(&family.all_channel_names, selection.other));
        self.fit_conditions(
            freqs,
            conditions,
            family.into(),
            Some(&background),
            w_freqs,
            None,
            action,
        )
    }

    /// Fit the conductance of a single channel, linearised around each condition's expansion
    /// point, with only the leak as known background
    pub fn compute_gm_single_chan(
        &mut self,
        freqs: &Freqs,
        conditions: &[OperatingCondition],
        channel_name: &str,
        w_freqs: Option<&Array1<f64>>,
        action: FitAction,
    ) -> Result<Option<FitMatrices>, FitError> {
        let family = Conductances::new(&[channel_name], None)?;
        let other = if channel_name == LEAK {
            vec![]
        } else {
            vec![LEAK.to_owned()]
        };
        self.fit_conditions(
            freqs,
            conditions,
            family.into(),
            Some(&Background::channels(other)),
            w_freqs,
            Some(channel_name),
            action,
        )
    }

    /// Conductance fit of `channel_names` against a single condition
    pub fn compute_g_chan_from_impedance(
        &mut self,
        freqs: &Freqs,
        condition: &OperatingCondition,
        channel_names: &[&str],
        selection: ChannelSelection,
        action: FitAction,
    ) -> Result<Option<FitMatrices>, FitError> {
        self.compute_gm(
            freqs,
            std::slice::from_ref(condition),
            Some(channel_names),
            selection,
            None,
            action,
        )
    }

    /// Conductance fit of one channel against a single condition, linearised around the
    /// condition's expansion point
    pub fn compute_g_single_chan_from_impedance(
        &mut self,
        freqs: &Freqs,
        condition: &OperatingCondition,
        channel_name: &str,
        selection: ChannelSelection,
        action: FitAction,
    ) -> Result<Option<FitMatrices>, FitError> {
        let family = Conductances::new(&[channel_name], selection.all)?;
        let background =
            Background::channels(self.other_channels(&family.all_channel_names, selection.other));
        self.fit_conditions(
            freqs,
            std::slice::from_ref(condition),
            family.into(),
            Some(&background),
            None,
            Some(channel_name),
            action,
        )
    }

    /// Fit the gains of the `ion` concentration pools
    ///
    /// The known background holds the leak and `channel_names` without concentration coupling;
    /// the channels keep their current expansion points.
    pub fn compute_conc_mech(
        &mut self,
        freqs: &Freqs,
        condition: &OperatingCondition,
        ion: &str,
        channel_names: &[&str],
        action: FitAction,
    ) -> Result<Option<FitMatrices>, FitError> {
        let family = ConcentrationGain::new(ion, channel_names).into();
        let background = Background {
            add_leak: true,
            ..Background::channels(to_owned_names(channel_names))
        };
        self.fit_conditions(
            freqs,
            std::slice::from_ref(condition),
            family,
            Some(&background),
            None,
            None,
            action,
        )
    }

    /// Fit the capacitances to impedance matrices at `freqs`, all conductances being known
    ///
    /// Capacitances are bounded below by `g_L * tau_min` of [crate::FitConfig]. `channel_names`
    /// defaults to every current of the tree.
    pub fn compute_c(
        &mut self,
        freqs: &Freqs,
        conditions: &[OperatingCondition],
        channel_names: Option<&[&str]>,
        w_freqs: Option<&Array1<f64>>,
        action: FitAction,
    ) -> Result<Option<FitMatrices>, FitError> {
        let family = Capacitance::with_tau_min(self, self.config().tau_min);
        let channels = match channel_names {
            Some(names) => to_owned_names(names),
            None => to_owned_names(&self.all_channel_names()),
        };
        let background = Background {
            channels,
            with_ca: false,
            add_leak: true,
            ca_offset: Some(family.lower.clone()),
        };
        self.fit_conditions(
            freqs,
            conditions,
            family.into(),
            Some(&background),
            w_freqs,
            None,
            action,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::tests::*;

    use ndarray::{Array3, array};

    fn zero_freq() -> Array1<Complex64> {
        array![Complex64::new(0.0, 0.0)]
    }

    #[test]
    fn gmc_recovers_leak_and_coupling() {
        let mut rng = StdRng::seed_from_u64(5);
        let reference = random_tree(&mut rng, 5);
        let z_mat = reference
            .calc_impedance_matrix(&zero_freq(), &MatrixOptions::default().channels(&[LEAK]))
            .unwrap();

        let mut tree = reference.clone();
        for node in tree.nodes_mut() {
            node.current_mut(LEAK).unwrap().g = 1.0;
            if !node.is_root() {
                node.g_c = 1.0;
            }
        }
        let condition = OperatingCondition::new(z_mat, EEq::Unchanged);
        tree.compute_gmc(&[condition], &[LEAK], FitAction::Fit)
            .unwrap();
        for (fitted, desired) in tree.iter().zip(reference.iter()) {
            assert_relative_eq!(fitted.g_l(), desired.g_l(), max_relative = 1e-6);
            assert_relative_eq!(fitted.g_c, desired.g_c, max_relative = 1e-6);
        }
    }

    #[test]
    fn gm_single_chan_recovers_frozen_conductance() {
        let mut tree = uniform_chain(1, 1e-2, 5e-3, 1.0);
        tree.add_current("frozen", None).unwrap();

        // p_open = 0.5 and (e - v) dp/dv = 75e-3 give a static admittance of 0.425 µS per µS
        let g = 0.02;
        let z = 1.0 / (1e-2 + g * 0.425);
        let condition =
            OperatingCondition::steady_state(array![[z]].view(), EEq::Uniform(-75.0));
        tree.compute_gm_single_chan(&zero_freq(), &[condition], "frozen", None, FitAction::Fit)
            .unwrap();
        assert_relative_eq!(
            tree.root().current("frozen").unwrap().g,
            g,
            max_relative = 1e-10
        );
        assert!(tree.root().expansion_point("frozen").is_none());
    }

    #[test]
    fn gm_recovers_channel_conductances() {
        let mut rng = StdRng::seed_from_u64(6);
        let mut reference = random_tree(&mut rng, 4);
        reference.set_e_eq(&EEq::Uniform(-60.0)).unwrap();
        let freqs = imaginary_axis(&[0.0, 10.0, 100.0]);
        let z_mat = reference
            .calc_impedance_matrix(&freqs, &MatrixOptions::default())
            .unwrap();

        let mut tree = reference.clone();
        for node in tree.nodes_mut() {
            node.current_mut("h").unwrap().g = 0.0;
            node.current_mut("Kv3_3").unwrap().g = 0.0;
        }
        let condition = OperatingCondition::new(z_mat, EEq::Uniform(-60.0));
        tree.compute_gm(
            &freqs,
            &[condition],
            Some(&["h", "Kv3_3"]),
            ChannelSelection::default(),
            None,
            FitAction::Fit,
        )
        .unwrap();
        for (fitted, desired) in tree.iter().zip(reference.iter()) {
            for name in ["h", "Kv3_3"] {
                assert_abs_diff_eq!(
                    fitted.current(name).unwrap().g,
                    desired.current(name).unwrap().g,
                    epsilon = 1e-8
                );
            }
        }
    }

    #[test]
    fn stored_single_channel_fits_share_the_parameter_vector() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut reference = random_tree(&mut rng, 3);
        reference.set_e_eq(&EEq::Uniform(-60.0)).unwrap();
        let freqs = imaginary_axis(&[0.0, 50.0]);
        let mut tree = reference.clone();
        let all = ["h", "Kv3_3"];
        for name in all {
            let only: [&str; 1] = [name];
            let z_mat = reference
                .calc_impedance_matrix(
                    &freqs,
                    &MatrixOptions::default().channels(&only),
                )
                .unwrap();
            tree.compute_g_single_chan_from_impedance(
                &freqs,
                &OperatingCondition::new(z_mat, EEq::Unchanged),
                name,
                ChannelSelection::default().all(&all).other(&[LEAK]),
                FitAction::Store,
            )
            .unwrap();
        }
        assert_eq!(tree.fit_data().len(), 2);
        tree.run_fit().unwrap();
        for (fitted, desired) in tree.iter().zip(reference.iter()) {
            for name in all {
                assert_abs_diff_eq!(
                    fitted.current(name).unwrap().g,
                    desired.current(name).unwrap().g,
                    epsilon = 1e-8
                );
            }
        }
    }

    #[test]
    fn conc_mech_recovers_gain() {
        let mut builder = CompartmentTree::builder();
        builder
            .add_root(0, NodeParams::new(1.0, 0.0, 1e-2, -30.0))
            .unwrap();
        builder
            .add_node(0, 1, NodeParams::new(1.0, 5e-3, 1e-2, -30.0))
            .unwrap();
        let mut reference = builder.build().unwrap();
        for name in ["Ca_HVA", "SK"] {
            reference.add_current(name, None).unwrap();
        }
        for node in reference.nodes_mut() {
            node.current_mut("Ca_HVA").unwrap().g = 5e-3;
            node.current_mut("SK").unwrap().g = 5e-3;
        }
        reference.add_conc_mech("ca", 100.0, 2.0);
        let freqs = imaginary_axis(&[0.0, 10.0]);
        let z_mat = reference
            .calc_impedance_matrix(&freqs, &MatrixOptions::default().use_conc(true))
            .unwrap();

        let mut tree = reference.clone();
        for node in tree.nodes_mut() {
            node.concmechs.get_mut("ca").unwrap().gamma = 0.0;
        }
        tree.compute_conc_mech(
            &freqs,
            &OperatingCondition::new(z_mat, EEq::Unchanged),
            "ca",
            &["Ca_HVA", "SK"],
            FitAction::Fit,
        )
        .unwrap();
        for node in tree.iter() {
            assert_relative_eq!(node.concmechs["ca"].gamma, 2.0, max_relative = 1e-6);
        }
    }

    #[test]
    fn c_recovers_capacitances() {
        let mut rng = StdRng::seed_from_u64(8);
        let reference = random_tree(&mut rng, 4);
        let freqs = imaginary_axis(&[10.0, 100.0, 1000.0]);
        let z_mat = reference
            .calc_impedance_matrix(&freqs, &MatrixOptions::default())
            .unwrap();

        let mut tree = reference.clone();
        for node in tree.nodes_mut() {
            node.ca = 1.0;
        }
        tree.compute_c(
            &freqs,
            &[OperatingCondition::new(z_mat, EEq::Unchanged)],
            None,
            None,
            FitAction::Fit,
        )
        .unwrap();
        for (fitted, desired) in tree.iter().zip(reference.iter()) {
            assert_relative_eq!(fitted.ca, desired.ca, max_relative = 1e-8);
        }
    }

    #[test]
    fn capacitance_lower_bound_is_respected() {
        let mut tree = uniform_chain(2, 1e-2, 5e-3, 1e-4);
        let freqs = imaginary_axis(&[100.0]);
        let z_mat = tree
            .calc_impedance_matrix(&freqs, &MatrixOptions::default())
            .unwrap();
        // time constant of 10 ms, bound at 50 ms
        let mut config = tree.config().clone();
        config.tau_min = 50.0;
        tree.set_config(config);
        tree.compute_c(
            &freqs,
            &[OperatingCondition::new(z_mat, EEq::Unchanged)],
            None,
            None,
            FitAction::Fit,
        )
        .unwrap();
        for node in tree.iter() {
            assert!(node.ca >= 5e-4 * (1.0 - 1e-12));
        }
    }

    #[test]
    fn conditions_are_validated() {
        let mut tree = uniform_chain(2, 1e-2, 5e-3, 1.0);
        assert_eq!(
            tree.compute_gmc(&[], &[LEAK], FitAction::Fit),
            Err(FitError::NoConditions)
        );
        let condition = OperatingCondition::new(Array3::zeros((2, 2, 2)), EEq::Unchanged);
        assert_eq!(
            tree.compute_gmc(&[condition.clone()], &[LEAK], FitAction::Fit),
            Err(FitError::ImpedanceShape {
                actual: (2, 2, 2),
                freqs: 1,
                size: 2
            })
        );
        let condition = OperatingCondition {
            z_mat: Array3::zeros((1, 2, 2)),
            ..condition.with_weight(-1.0)
        };
        assert_eq!(
            tree.compute_gmc(&[condition], &[LEAK], FitAction::Fit),
            Err(FitError::NegativeWeight(-1.0))
        );
    }

    #[test]
    fn return_leaves_linearisation_untouched() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut tree = random_tree(&mut rng, 4);
        let freqs = imaginary_axis(&[0.0, 10.0]);
        tree.set_expansion_point("h", &ExpansionPoint::Explicit(array![0.3]), &freqs)
            .unwrap();
        let e_eq = tree.e_eq(Indexing::Tree).unwrap();

        let z_mat = tree
            .calc_impedance_matrix(&zero_freq(), &MatrixOptions::default().channels(&[LEAK]))
            .unwrap();
        tree.compute_gmc(
            &[OperatingCondition::new(z_mat, EEq::Uniform(-40.0))],
            &[LEAK],
            FitAction::Return,
        )
        .unwrap()
        .unwrap();
        assert_eq!(tree.e_eq(Indexing::Tree).unwrap(), e_eq);

        let z_mat = tree
            .calc_impedance_matrix(&freqs, &MatrixOptions::default())
            .unwrap();
        let condition = OperatingCondition::new(z_mat, EEq::Uniform(-50.0))
            .with_expansion_point(ExpansionPoint::Explicit(array![0.6]));
        for action in [FitAction::Return, FitAction::Fit] {
            tree.compute_gm_single_chan(&freqs, std::slice::from_ref(&condition), "h", None, action)
                .unwrap();
            for node in tree.iter() {
                assert_eq!(node.expansion_point("h"), Some(&array![0.3]));
            }
        }
        assert!(tree.iter().all(|node| node.e_eq == -50.0));
    }

    #[test]
    fn return_hands_back_stacked_problem() {
        let mut tree = uniform_chain(3, 1e-2, 5e-3, 1.0);
        let z_mat = tree
            .calc_impedance_matrix(&zero_freq(), &MatrixOptions::default().channels(&[LEAK]))
            .unwrap();
        let conditions = vec![
            OperatingCondition::new(z_mat.clone(), EEq::Unchanged),
            OperatingCondition::new(z_mat, EEq::Unchanged).with_weight(4.0),
        ];
        let matrices = tree
            .compute_gmc(&conditions, &[LEAK], FitAction::Return)
            .unwrap()
            .unwrap();
        assert_eq!(matrices.n_samples(), 18);
        assert_eq!(matrices.n_params(), 5);
        for row in 0..9 {
            assert_relative_eq!(
                matrices.target[row + 9].re,
                2.0 * matrices.target[row].re,
                max_relative = 1e-12
            );
        }
        assert!(tree.fit_data().is_empty());
    }
}
