use crate::error::{FitError, TreeError};
use crate::tree::CompartmentTree;
use crate::types::{Freqs, StructureTensor};

use enum_dispatch::enum_dispatch;
use ndarray::{Array1, Array4, ArrayView1, Zip, s};
use num_complex::Complex64;

/// Set of tree parameters that enter the system matrix linearly
#[enum_dispatch]
pub trait ParameterFamilyTrait {
    /// Number of unknowns for `tree`
    fn n_params(&self, tree: &CompartmentTree) -> usize;

    /// Coefficients `G[f, i, j, k]` of unknown `k` in system-matrix entry `(i, j)`, tree indexing
    fn structure_tensor(
        &self,
        tree: &CompartmentTree,
        freqs: &Freqs,
    ) -> Result<StructureTensor, FitError>;

    /// Current parameter values of `tree`
    fn to_vec(&self, tree: &CompartmentTree) -> Result<Array1<f64>, FitError>;

    /// Write fitted parameter values into `tree`
    fn to_tree(&self, tree: &mut CompartmentTree, params: ArrayView1<f64>)
    -> Result<(), FitError>;

    /// Short human-readable name used in error messages
    fn describe(&self) -> String;
}

fn check_len(
    tree: &CompartmentTree,
    family: &impl ParameterFamilyTrait,
    len: usize,
) -> Result<(), FitError> {
    let expected = family.n_params(tree);
    if len != expected {
        return Err(FitError::LengthMismatch {
            what: "parameter vector",
            expected,
            actual: len,
        });
    }
    Ok(())
}

fn as_strs(names: &[String]) -> Vec<&str> {
    names.iter().map(String::as_str).collect()
}

/// Coupling conductances and static membrane conductances of `channel_names`
///
/// Per node the unknowns are `[g_c, g_channel...]`, the root has no coupling conductance.
#[derive(Clone, Debug, PartialEq)]
pub struct LeakCoupling {
    pub channel_names: Vec<String>,
}

impl LeakCoupling {
    pub fn new(channel_names: &[&str]) -> Self {
        Self {
            channel_names: channel_names.iter().map(|&name| name.to_owned()).collect(),
        }
    }
}

impl ParameterFamilyTrait for LeakCoupling {
    fn n_params(&self, tree: &CompartmentTree) -> usize {
        tree.len() * self.channel_names.len() + tree.len().saturating_sub(1)
    }

    fn structure_tensor(
        &self,
        tree: &CompartmentTree,
        freqs: &Freqs,
    ) -> Result<StructureTensor, FitError> {
        let n = tree.len();
        let names = as_strs(&self.channel_names);
        let mut g_struct =
            Array4::<Complex64>::zeros((freqs.len(), n, n, self.n_params(tree)));
        let mut k = 0;
        for node in tree.iter() {
            let i = node.index();
            let terms =
                node.calc_membrane_conductance_terms(freqs, &names, tree.channel_storage())?;
            if let Some(p) = node.parent() {
                let one = Complex64::new(1.0, 0.0);
                g_struct.slice_mut(s![.., i, i, k]).mapv_inplace(|g| g + one);
                g_struct.slice_mut(s![.., p, p, k]).mapv_inplace(|g| g + one);
                g_struct.slice_mut(s![.., i, p, k]).mapv_inplace(|g| g - one);
                g_struct.slice_mut(s![.., p, i, k]).mapv_inplace(|g| g - one);
                k += 1;
            }
            for name in &self.channel_names {
                g_struct.slice_mut(s![.., i, i, k]).assign(&terms[name]);
                k += 1;
            }
        }
        Ok(g_struct)
    }

    fn to_vec(&self, tree: &CompartmentTree) -> Result<Array1<f64>, FitError> {
        let mut params = Vec::with_capacity(self.n_params(tree));
        for node in tree.iter() {
            if !node.is_root() {
                params.push(node.g_c);
            }
            for name in &self.channel_names {
                params.push(node.current(name)?.g);
            }
        }
        Ok(params.into())
    }

    fn to_tree(
        &self,
        tree: &mut CompartmentTree,
        params: ArrayView1<f64>,
    ) -> Result<(), FitError> {
        check_len(tree, self, params.len())?;
        let mut values = params.iter();
        for node in tree.nodes_mut() {
            if !node.is_root() {
                node.g_c = values.next().copied().unwrap_or_default();
            }
            for name in &self.channel_names {
                node.current_mut(name)?.g = values.next().copied().unwrap_or_default();
            }
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("leak and coupling conductances {:?}", self.channel_names)
    }
}

/// Membrane conductances, one unknown per node and name in `all_channel_names`
///
/// Only the names in `channel_names` carry a coefficient; the others are part of the parameter
/// vector so that fits of single channels can be stacked into one solve.
#[derive(Clone, Debug, PartialEq)]
pub struct Conductances {
    pub channel_names: Vec<String>,
    pub all_channel_names: Vec<String>,
}

impl Conductances {
    /// `all_channel_names` defaults to `channel_names` and must contain every fitted channel
    pub fn new(
        channel_names: &[&str],
        all_channel_names: Option<&[&str]>,
    ) -> Result<Self, FitError> {
        let all_channel_names = all_channel_names.unwrap_or(channel_names);
        if let Some(&name) = channel_names
            .iter()
            .find(|&&name| !all_channel_names.contains(&name))
        {
            return Err(FitError::UnlistedChannel {
                name: name.to_owned(),
            });
        }
        Ok(Self {
            channel_names: channel_names.iter().map(|&name| name.to_owned()).collect(),
            all_channel_names: all_channel_names
                .iter()
                .map(|&name| name.to_owned())
                .collect(),
        })
    }
}

impl ParameterFamilyTrait for Conductances {
    fn n_params(&self, tree: &CompartmentTree) -> usize {
        tree.len() * self.all_channel_names.len()
    }

    fn structure_tensor(
        &self,
        tree: &CompartmentTree,
        freqs: &Freqs,
    ) -> Result<StructureTensor, FitError> {
        let n = tree.len();
        let names = as_strs(&self.channel_names);
        let mut g_struct =
            Array4::<Complex64>::zeros((freqs.len(), n, n, self.n_params(tree)));
        let mut k = 0;
        for node in tree.iter() {
            let i = node.index();
            let terms =
                node.calc_membrane_conductance_terms(freqs, &names, tree.channel_storage())?;
            for name in &self.all_channel_names {
                if let Some(term) = terms.get(name) {
                    g_struct.slice_mut(s![.., i, i, k]).assign(term);
                }
                k += 1;
            }
        }
        Ok(g_struct)
    }

    fn to_vec(&self, tree: &CompartmentTree) -> Result<Array1<f64>, FitError> {
        let mut params = Vec::with_capacity(self.n_params(tree));
        for node in tree.iter() {
            for name in &self.all_channel_names {
                params.push(node.current(name)?.g);
            }
        }
        Ok(params.into())
    }

    fn to_tree(
        &self,
        tree: &mut CompartmentTree,
        params: ArrayView1<f64>,
    ) -> Result<(), FitError> {
        check_len(tree, self, params.len())?;
        let n_names = self.all_channel_names.len();
        if n_names == 0 {
            return Ok(());
        }
        for (node, values) in tree
            .nodes_mut()
            .iter_mut()
            .zip(params.exact_chunks(n_names))
        {
            for (name, &g) in self.all_channel_names.iter().zip(values) {
                node.current_mut(name)?.g = g;
            }
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!(
            "conductances {:?} of {:?}",
            self.channel_names, self.all_channel_names
        )
    }
}

/// Gains of the `ion` concentration pools, one unknown per node
#[derive(Clone, Debug, PartialEq)]
pub struct ConcentrationGain {
    pub ion: String,
    /// Channels whose currents and concentration sensitivities make up the pool coupling
    pub channel_names: Vec<String>,
}

impl ConcentrationGain {
    pub fn new(ion: &str, channel_names: &[&str]) -> Self {
        Self {
            ion: ion.to_owned(),
            channel_names: channel_names.iter().map(|&name| name.to_owned()).collect(),
        }
    }
}

impl ParameterFamilyTrait for ConcentrationGain {
    fn n_params(&self, tree: &CompartmentTree) -> usize {
        tree.len()
    }

    fn structure_tensor(
        &self,
        tree: &CompartmentTree,
        freqs: &Freqs,
    ) -> Result<StructureTensor, FitError> {
        let n = tree.len();
        let names = as_strs(&self.channel_names);
        let mut c_struct = Array4::<Complex64>::zeros((freqs.len(), n, n, n));
        for node in tree.iter() {
            let i = node.index();
            let term = node.calc_membrane_concentration_terms(
                &self.ion,
                &names,
                freqs,
                tree.channel_storage(),
            )?;
            c_struct.slice_mut(s![.., i, i, i]).assign(&term);
        }
        Ok(c_struct)
    }

    fn to_vec(&self, tree: &CompartmentTree) -> Result<Array1<f64>, FitError> {
        tree.iter()
            .map(|node| {
                node.concmechs
                    .get(&self.ion)
                    .map(|mech| mech.gamma)
                    .ok_or_else(|| missing_mech(node.index(), &self.ion))
            })
            .collect()
    }

    fn to_tree(
        &self,
        tree: &mut CompartmentTree,
        params: ArrayView1<f64>,
    ) -> Result<(), FitError> {
        check_len(tree, self, params.len())?;
        for (node, &gamma) in tree.nodes_mut().iter_mut().zip(&params) {
            let index = node.index();
            node.concmechs
                .get_mut(&self.ion)
                .ok_or_else(|| missing_mech(index, &self.ion))?
                .gamma = gamma;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("{} concentration gains", self.ion)
    }
}

fn missing_mech(index: usize, ion: &str) -> FitError {
    TreeError::MissingConcMech {
        index,
        ion: ion.to_owned(),
    }
    .into()
}

/// Capacitances above a per-node lower bound, the unknowns are `ca - lower`
#[derive(Clone, Debug, PartialEq)]
pub struct Capacitance {
    /// Lower bound per node in tree indexing, µF
    pub lower: Array1<f64>,
}

impl Capacitance {
    /// Unbounded (non-negative) capacitances of an `n`-node tree
    pub fn unbounded(n: usize) -> Self {
        Self {
            lower: Array1::zeros(n),
        }
    }

    /// Capacitances bounded by `g_L * tau_min` in every node
    pub fn with_tau_min(tree: &CompartmentTree, tau_min: f64) -> Self {
        Self {
            lower: tree.iter().map(|node| node.g_l() * tau_min * 1e-3).collect(),
        }
    }
}

impl ParameterFamilyTrait for Capacitance {
    fn n_params(&self, tree: &CompartmentTree) -> usize {
        tree.len()
    }

    fn structure_tensor(
        &self,
        tree: &CompartmentTree,
        freqs: &Freqs,
    ) -> Result<StructureTensor, FitError> {
        let n = tree.len();
        let mut c_struct = Array4::<Complex64>::zeros((freqs.len(), n, n, n));
        for i in 0..n {
            c_struct.slice_mut(s![.., i, i, i]).assign(freqs);
        }
        Ok(c_struct)
    }

    fn to_vec(&self, tree: &CompartmentTree) -> Result<Array1<f64>, FitError> {
        check_len(tree, self, self.lower.len())?;
        Ok(Zip::from(&self.lower)
            .and(&tree.iter().map(|node| node.ca).collect::<Array1<f64>>())
            .map_collect(|&lower, &ca| ca - lower))
    }

    fn to_tree(
        &self,
        tree: &mut CompartmentTree,
        params: ArrayView1<f64>,
    ) -> Result<(), FitError> {
        check_len(tree, self, params.len())?;
        check_len(tree, self, self.lower.len())?;
        for ((node, &delta), &lower) in tree.nodes_mut().iter_mut().zip(&params).zip(&self.lower) {
            node.ca = lower + delta;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        "capacitances".to_owned()
    }
}

/// Parameter family of a fit, fixed for the lifetime of a [crate::FitSession]
#[enum_dispatch(ParameterFamilyTrait)]
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum ParameterFamily {
    LeakCoupling(LeakCoupling),
    Conductances(Conductances),
    ConcentrationGain(ConcentrationGain),
    Capacitance(Capacitance),
}

impl ParameterFamily {
    /// Whether both families write the same parameter vector into a tree
    ///
    /// Conductance fits of different channels share their unknowns when they list the same
    /// parameter channels.
    pub fn shares_parameters(&self, other: &ParameterFamily) -> bool {
        match (self, other) {
            (Self::Conductances(a), Self::Conductances(b)) => {
                a.all_channel_names == b.all_channel_names
            }
            (Self::ConcentrationGain(a), Self::ConcentrationGain(b)) => a.ion == b.ion,
            _ => self == other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::tests::*;
    use crate::tree::{Indexing, MatrixOptions};
    use crate::types::LEAK;

    use ndarray::{Axis, RemoveAxis, array};

    /// Contract the structure tensor with the parameter vector
    fn assemble(g_struct: &StructureTensor, params: &Array1<f64>) -> ndarray::Array3<Complex64> {
        let params = params.mapv(|p| Complex64::new(p, 0.0));
        g_struct
            .lanes(Axis(3))
            .into_iter()
            .map(|lane| lane.dot(&params))
            .collect::<Array1<Complex64>>()
            .into_shape_with_order(g_struct.raw_dim().remove_axis(Axis(3)))
            .unwrap()
    }

    #[test]
    fn leak_coupling_tensor_reproduces_passive_matrix() {
        let tree = uniform_chain(4, 1e-2, 5e-3, 1.0);
        let family = LeakCoupling::new(&[LEAK]);
        let zero = array![Complex64::new(0.0, 0.0)];
        let g_struct = family.structure_tensor(&tree, &zero).unwrap();
        let params = family.to_vec(&tree).unwrap();
        assert_eq!(params.len(), 7);
        let sys = tree
            .calc_system_matrix(
                &zero,
                &MatrixOptions::default()
                    .channels(&[LEAK])
                    .with_ca(false)
                    .indexing(Indexing::Tree),
            )
            .unwrap();
        let assembled = assemble(&g_struct, &params);
        for (a, b) in assembled.iter().zip(sys.iter()) {
            assert_abs_diff_eq!(a.re, b.re, epsilon = 1e-15);
        }
    }

    #[test]
    fn conductance_tensor_reproduces_channel_matrix() {
        let mut rng = StdRng::seed_from_u64(4);
        let tree = random_tree(&mut rng, 3);
        let freqs = imaginary_axis(&[0.0, 10.0, 100.0]);
        let family = Conductances::new(&["h", "Kv3_3"], Some(&["Na_Ta", "h", "Kv3_3"])).unwrap();
        let g_struct = family.structure_tensor(&tree, &freqs).unwrap();
        let params = family.to_vec(&tree).unwrap();
        let fitted = tree
            .calc_system_matrix(
                &freqs,
                &MatrixOptions::default()
                    .channels(&["h", "Kv3_3"])
                    .add_leak(false)
                    .with_ca(false)
                    .indexing(Indexing::Tree),
            )
            .unwrap();
        let coupling = tree
            .calc_system_matrix(
                &freqs,
                &MatrixOptions::default()
                    .channels(&[])
                    .add_leak(false)
                    .with_ca(false)
                    .indexing(Indexing::Tree),
            )
            .unwrap();
        let assembled = assemble(&g_struct, &params) + coupling;
        for (a, b) in assembled.iter().zip(fitted.iter()) {
            assert_abs_diff_eq!(a.re, b.re, epsilon = 1e-14);
            assert_abs_diff_eq!(a.im, b.im, epsilon = 1e-14);
        }
    }

    #[test]
    fn fitted_channel_must_be_listed() {
        assert_eq!(
            Conductances::new(&["h"], Some(&[LEAK])),
            Err(FitError::UnlistedChannel { name: "h".into() })
        );
    }

    #[test]
    fn capacitance_round_trip_through_tree() {
        let mut tree = uniform_chain(3, 1e-2, 5e-3, 1.0);
        let family = Capacitance::with_tau_min(&tree, 10.0);
        assert_abs_diff_eq!(family.lower, Array1::from_elem(3, 1e-4), epsilon = 1e-18);
        family
            .to_tree(&mut tree, array![0.5, 1.0, 2.0].view())
            .unwrap();
        assert_relative_eq!(tree.node(2).unwrap().ca, 2.0001);
        assert_abs_diff_eq!(
            family.to_vec(&tree).unwrap(),
            array![0.5, 1.0, 2.0],
            epsilon = 1e-12
        );
    }

    #[test]
    fn wrong_parameter_count() {
        let mut tree = uniform_chain(2, 1e-2, 5e-3, 1.0);
        let family = ParameterFamily::from(LeakCoupling::new(&[LEAK]));
        assert_eq!(
            family.to_tree(&mut tree, array![1.0].view()),
            Err(FitError::LengthMismatch {
                what: "parameter vector",
                expected: 3,
                actual: 1
            })
        );
    }
}
