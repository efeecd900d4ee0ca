mod builder;
pub use builder::CompartmentTreeBuilder;

mod convolution;
pub use convolution::EigenSystem;

mod permutation;
pub use permutation::{Indexing, Permute};

mod system_matrix;
pub use system_matrix::MatrixOptions;

use crate::channels::{ChannelRegistry, ChannelStorage, ExpansionPoint, MaxCurrentSearch};
use crate::concmech::ExpConcMech;
use crate::config::FitConfig;
use crate::error::TreeError;
use crate::fit::FitSession;
use crate::node::CompartmentNode;
use crate::types::LEAK;

use itertools::Itertools;
use ndarray::Array1;
use num_complex::Complex64;
use std::collections::BTreeMap;

/// Equilibrium potentials to impose on a tree
#[derive(Clone, Debug, Default, PartialEq)]
pub enum EEq {
    /// Keep the equilibrium potentials currently stored in the nodes
    #[default]
    Unchanged,
    /// Same potential (mV) for every node
    Uniform(f64),
    /// One potential (mV) per location, in location indexing
    PerLocation(Array1<f64>),
}

/// Reduced compartmental model: a rooted tree of [CompartmentNode]s
///
/// Nodes live in an arena whose positions are the node indices; parents always precede their
/// children. The tree owns the channel registry it instantiates channels from, the channels
/// instantiated so far, the fit session used by [crate::FitAction::Store] and a cache of the
/// passive eigen system which every mutating operation invalidates.
#[derive(Clone, Debug)]
pub struct CompartmentTree {
    nodes: Vec<CompartmentNode>,
    registry: ChannelRegistry,
    channel_storage: ChannelStorage,
    fit_data: FitSession,
    config: FitConfig,
    search: MaxCurrentSearch,
    eigen_cache: Option<EigenSystem>,
}

impl CompartmentTree {
    pub fn builder() -> CompartmentTreeBuilder {
        CompartmentTreeBuilder::new()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[CompartmentNode] {
        &self.nodes
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompartmentNode> {
        self.nodes.iter()
    }

    pub fn root(&self) -> &CompartmentNode {
        &self.nodes[0]
    }

    pub fn node(&self, index: usize) -> Result<&CompartmentNode, TreeError> {
        self.nodes.get(index).ok_or(TreeError::UnknownNode {
            index,
            size: self.nodes.len(),
        })
    }

    /// Mutable access to a node, invalidates derived structures
    pub fn node_mut(&mut self, index: usize) -> Result<&mut CompartmentNode, TreeError> {
        self.invalidate();
        let size = self.nodes.len();
        self.nodes
            .get_mut(index)
            .ok_or(TreeError::UnknownNode { index, size })
    }

    pub(crate) fn nodes_mut(&mut self) -> &mut [CompartmentNode] {
        self.invalidate();
        &mut self.nodes
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub fn channel_storage(&self) -> &ChannelStorage {
        &self.channel_storage
    }

    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: FitConfig) {
        self.config = config;
    }

    pub fn max_current_search(&self) -> &MaxCurrentSearch {
        &self.search
    }

    pub fn fit_data(&self) -> &FitSession {
        &self.fit_data
    }

    pub fn fit_data_mut(&mut self) -> &mut FitSession {
        &mut self.fit_data
    }

    pub(crate) fn invalidate(&mut self) {
        self.eigen_cache = None;
    }

    /// Whether the tree ordering is the depth-first ordering from the root
    pub fn check_ordered(&self) -> bool {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![0];
        while let Some(index) = stack.pop() {
            order.push(index);
            stack.extend(self.nodes[index].children().iter().rev());
        }
        order.into_iter().eq(0..self.nodes.len())
    }

    /// Location index of every node in tree order
    pub fn loc_inds(&self) -> Vec<usize> {
        self.nodes.iter().map(CompartmentNode::loc_ind).collect()
    }

    /// Tree index of every location
    pub fn tree_inds(&self) -> Vec<usize> {
        self.nodes
            .iter()
            .map(CompartmentNode::loc_ind)
            .enumerate()
            .sorted_by_key(|&(_, loc_ind)| loc_ind)
            .map(|(index, _)| index)
            .collect()
    }

    /// Reorder an array in location indexing into tree indexing
    pub fn permute_to_tree<P: Permute>(&self, arr: &P) -> Result<P, TreeError> {
        self.check_node_axis(arr)?;
        Ok(arr.permuted(&self.loc_inds()))
    }

    /// Reorder an array in tree indexing into location indexing
    pub fn permute_to_locs<P: Permute>(&self, arr: &P) -> Result<P, TreeError> {
        self.check_node_axis(arr)?;
        Ok(arr.permuted(&self.tree_inds()))
    }

    /// Reorder an array in tree indexing into `indexing`
    pub fn permute_from_tree<P: Permute>(&self, arr: P, indexing: Indexing) -> Result<P, TreeError> {
        match indexing {
            Indexing::Tree => Ok(arr),
            Indexing::Locs => self.permute_to_locs(&arr),
        }
    }

    fn check_node_axis<P: Permute>(&self, arr: &P) -> Result<(), TreeError> {
        if arr.node_axis_len() != self.nodes.len() {
            return Err(TreeError::ShapeMismatch {
                expected: self.nodes.len(),
                actual: arr.node_axis_len(),
            });
        }
        Ok(())
    }

    pub fn set_e_eq(&mut self, e_eq: &EEq) -> Result<(), TreeError> {
        let e_eq = match e_eq {
            EEq::Unchanged => return Ok(()),
            EEq::Uniform(e) => Array1::from_elem(self.nodes.len(), *e),
            EEq::PerLocation(e) => self.permute_to_tree(e)?,
        };
        for (node, &e) in self.nodes_mut().iter_mut().zip(&e_eq) {
            node.e_eq = e;
        }
        Ok(())
    }

    pub fn e_eq(&self, indexing: Indexing) -> Result<Array1<f64>, TreeError> {
        let e_eq: Array1<f64> = self.nodes.iter().map(|node| node.e_eq).collect();
        self.permute_from_tree(e_eq, indexing)
    }

    /// Add channel `name` with zero conductance to every node
    ///
    /// The reversal defaults to the one registered for the channel.
    pub fn add_current(&mut self, name: &str, e_rev: Option<f64>) -> Result<(), TreeError> {
        self.channel_storage.ensure(&self.registry, name)?;
        let e_rev = match e_rev {
            Some(e_rev) => e_rev,
            None => self.registry.default_reversal(name)?,
        };
        for node in self.nodes_mut() {
            node.add_current(name, e_rev);
        }
        Ok(())
    }

    /// Add an exponential pool for `ion` with time constant `tau` (ms) and gain `gamma` to
    /// every node
    pub fn add_conc_mech(&mut self, ion: &str, tau: f64, gamma: f64) {
        for node in self.nodes_mut() {
            node.add_conc_mech(ExpConcMech::new(ion, tau, gamma));
        }
    }

    /// Linearise channel `name` around `point` in every node
    pub fn set_expansion_point(
        &mut self,
        name: &str,
        point: &ExpansionPoint,
        freqs: &Array1<Complex64>,
    ) -> Result<(), TreeError> {
        let points = vec![point.clone(); self.nodes.len()];
        self.set_expansion_points_per_loc(name, &points, freqs)
    }

    /// Linearise channel `name` around one point per location
    pub fn set_expansion_points_per_loc(
        &mut self,
        name: &str,
        points: &[ExpansionPoint],
        freqs: &Array1<Complex64>,
    ) -> Result<(), TreeError> {
        if points.len() != self.nodes.len() {
            return Err(TreeError::ShapeMismatch {
                expected: self.nodes.len(),
                actual: points.len(),
            });
        }
        self.invalidate();
        for node in self.nodes.iter_mut() {
            node.set_expansion_point(
                name,
                &points[node.loc_ind()],
                &self.channel_storage,
                freqs,
                &self.search,
            )?;
        }
        Ok(())
    }

    /// Explicit state variables of `name` in every node, in tree order
    pub(crate) fn expansion_points(&self, name: &str) -> Vec<Option<Array1<f64>>> {
        self.nodes
            .iter()
            .map(|node| node.expansion_point(name).cloned())
            .collect()
    }

    /// Put back state variables taken by [Self::expansion_points]
    pub(crate) fn restore_expansion_points(
        &mut self,
        name: &str,
        points: Vec<Option<Array1<f64>>>,
    ) {
        self.invalidate();
        for (node, statevars) in self.nodes.iter_mut().zip(points) {
            node.replace_expansion_point(name, statevars);
        }
    }

    /// Linearise every channel around its steady state again
    pub fn remove_expansion_points(&mut self) {
        for node in self.nodes_mut() {
            node.clear_expansion_points();
        }
    }

    /// Set the leak reversals so that the network is at equilibrium at the node potentials
    ///
    /// Coupling currents between nodes at different potentials are included. `p_open` may
    /// provide per-location open probabilities of some channels instead of their steady state.
    pub fn fit_leak_reversals(
        &mut self,
        p_open: &BTreeMap<String, Array1<f64>>,
    ) -> Result<(), TreeError> {
        let p_open_tree = p_open
            .iter()
            .map(|(name, p)| Ok((name.clone(), self.permute_to_tree(p)?)))
            .collect::<Result<BTreeMap<_, _>, TreeError>>()?;
        let currents = self.equilibrium_currents(&p_open_tree)?;
        for (node, i_eq) in self.nodes_mut().iter_mut().zip(currents) {
            let leak = node.current_mut(LEAK)?;
            leak.e += i_eq / leak.g;
        }
        Ok(())
    }

    /// Outward membrane plus coupling current of every node at its equilibrium potential
    pub fn equilibrium_currents(
        &self,
        p_open_tree: &BTreeMap<String, Array1<f64>>,
    ) -> Result<Array1<f64>, TreeError> {
        self.nodes
            .iter()
            .map(|node| {
                let p_open: BTreeMap<_, _> = p_open_tree
                    .iter()
                    .map(|(name, p)| (name.clone(), p[node.index()]))
                    .collect();
                let mut i = node.i_tot(&self.channel_storage, None, None, Some(&p_open))?;
                if let Some(parent) = node.parent() {
                    i += node.g_c * (node.e_eq - self.nodes[parent].e_eq);
                }
                for &child in node.children() {
                    let child = &self.nodes[child];
                    i += child.g_c * (node.e_eq - child.e_eq);
                }
                Ok(i)
            })
            .collect()
    }

    /// Set leak conductances and reversals of every node for a target equilibrium potential
    /// (mV) and membrane time constant (ms), see [CompartmentNode::fit_leak_current]
    pub fn fit_leak_current(&mut self, e_eq_target: f64, tau_m_target: f64) -> Result<(), TreeError> {
        self.invalidate();
        let g_l_min = self.config.g_l_min;
        for node in self.nodes.iter_mut() {
            node.fit_leak_current(e_eq_target, tau_m_target, g_l_min, &self.channel_storage)?;
        }
        Ok(())
    }

    /// Channel names in system-matrix order: the leak followed by every instantiated channel
    pub fn all_channel_names(&self) -> Vec<&str> {
        std::iter::once(LEAK)
            .chain(self.channel_storage.names())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::node::NodeParams;

    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, array};

    fn shuffled_tree() -> CompartmentTree {
        // 0 -> (1 -> 3, 2), location indices shuffled
        let mut builder = CompartmentTree::builder();
        let params = NodeParams {
            g_c: 1e-2,
            ..NodeParams::default()
        };
        let root = builder.add_root(2, NodeParams::default()).unwrap();
        let a = builder.add_node(root, 0, params.clone()).unwrap();
        builder.add_node(root, 3, params.clone()).unwrap();
        builder.add_node(a, 1, params).unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn permutation_round_trip() {
        let tree = shuffled_tree();
        let x = array![10.0, 11.0, 12.0, 13.0];
        let to_tree = tree.permute_to_tree(&x).unwrap();
        assert_eq!(to_tree, array![12.0, 10.0, 13.0, 11.0]);
        assert_eq!(tree.permute_to_locs(&to_tree).unwrap(), x);

        let m = Array2::from_shape_fn((4, 4), |(i, j)| (10 * i + j) as f64);
        let back = tree
            .permute_to_locs(&tree.permute_to_tree(&m).unwrap())
            .unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn permutation_shape_mismatch() {
        let tree = shuffled_tree();
        assert_eq!(
            tree.permute_to_tree(&array![1.0, 2.0]),
            Err(TreeError::ShapeMismatch {
                expected: 4,
                actual: 2
            })
        );
    }

    #[test]
    fn ordering() {
        let tree = shuffled_tree();
        // depth-first order would be 0, 1, 3, 2
        assert!(!tree.check_ordered());

        let mut builder = CompartmentTree::builder();
        let root = builder.add_root(0, NodeParams::default()).unwrap();
        let params = NodeParams {
            g_c: 1e-2,
            ..NodeParams::default()
        };
        let a = builder.add_node(root, 1, params.clone()).unwrap();
        builder.add_node(a, 2, params.clone()).unwrap();
        builder.add_node(root, 3, params).unwrap();
        assert!(builder.build().unwrap().check_ordered());
    }

    #[test]
    fn e_eq_per_location() {
        let mut tree = shuffled_tree();
        let e = array![-70.0, -71.0, -72.0, -73.0];
        tree.set_e_eq(&EEq::PerLocation(e.clone())).unwrap();
        assert_eq!(tree.e_eq(Indexing::Locs).unwrap(), e);
        assert_eq!(tree.node(0).unwrap().e_eq, -72.0);
        tree.set_e_eq(&EEq::Uniform(-65.0)).unwrap();
        assert_eq!(tree.e_eq(Indexing::Tree).unwrap(), Array1::from_elem(4, -65.0));
    }

    #[test]
    fn leak_reversals_zero_network_current() {
        let mut tree = shuffled_tree();
        tree.add_current("h", None).unwrap();
        tree.add_current("Kv3_3", None).unwrap();
        for (i, node) in tree.nodes_mut().iter_mut().enumerate() {
            node.current_mut("h").unwrap().g = 1e-3 * (i + 1) as f64;
            node.current_mut("Kv3_3").unwrap().g = 5e-3;
        }
        tree.set_e_eq(&EEq::PerLocation(array![-70.0, -72.0, -68.0, -75.0]))
            .unwrap();
        tree.fit_leak_reversals(&BTreeMap::new()).unwrap();
        let currents = tree.equilibrium_currents(&BTreeMap::new()).unwrap();
        assert_abs_diff_eq!(currents, Array1::<f64>::zeros(4), epsilon = 1e-12);
    }

    #[test]
    fn unknown_channel_is_rejected() {
        let mut tree = shuffled_tree();
        assert_eq!(
            tree.add_current("NaP", None),
            Err(TreeError::UnknownChannel { name: "NaP".into() })
        );
    }
}
