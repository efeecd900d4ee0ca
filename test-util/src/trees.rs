use compartment_fit::{ChannelRegistry, CompartmentTree, FrozenChannel, NodeParams};
use itertools::Itertools;
use ndarray::Array1;
use num_complex::Complex64;

/// Purely imaginary frequencies `i * w` for angular frequencies `w` in 1/s
pub fn imag_freqs(ws: &[f64]) -> Array1<Complex64> {
    ws.iter().map(|&w| Complex64::new(0.0, w)).collect()
}

/// Default registry plus a stateless `frozen` potassium channel with `p_open = 0.5` and
/// `dp_dv = 1e-3`
pub fn frozen_registry() -> ChannelRegistry {
    let mut registry = ChannelRegistry::default();
    registry.register("frozen", 0.0, FrozenChannel::new("k", 0.5, 1e-3));
    registry
}

/// Unbranched tree with one leak conductance per node, location indices equal node indices
pub fn chain_tree(g_l: &[f64], g_c: f64, ca: f64) -> CompartmentTree {
    let mut builder = CompartmentTree::builder();
    for (index, &g) in g_l.iter().enumerate() {
        if index == 0 {
            builder
                .add_root(0, NodeParams::new(ca, 0.0, g, -75.0))
                .unwrap();
        } else {
            builder
                .add_node(index - 1, index, NodeParams::new(ca, g_c, g, -75.0))
                .unwrap();
        }
    }
    builder.registry(frozen_registry());
    builder.build().unwrap()
}

/// Root with two branches of two nodes each, locations in reverse depth-first order
///
/// ```text
///       0
///      / \
///     1   3
///     |   |
///     2   4
/// ```
pub fn branched_tree() -> CompartmentTree {
    let mut builder = CompartmentTree::builder();
    let loc = |index: usize| 4 - index;
    builder
        .add_root(loc(0), NodeParams::new(1.0, 0.0, 1e-2, -75.0))
        .unwrap();
    for (parent, index) in [(0, 1), (1, 2), (0, 3), (3, 4)] {
        let g_c = 1e-2 * (index + 1) as f64;
        builder
            .add_node(parent, loc(index), NodeParams::new(0.5, g_c, 2e-2, -70.0))
            .unwrap();
    }
    builder.registry(frozen_registry());
    let tree = builder.build().unwrap();
    debug_assert!(tree.iter().map(|node| node.loc_ind()).all_unique());
    tree
}
