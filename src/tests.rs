//! Unit-test fixtures. Integration tests and benches use `compartment-fit-test-util`, which links
//! against the public crate and cannot be shared with in-crate tests.

pub use crate::channels::{ChannelRegistry, FrozenChannel};
pub use crate::node::NodeParams;
pub use crate::tree::CompartmentTree;

pub use approx::{assert_abs_diff_eq, assert_relative_eq};
pub use ndarray::{Array1, Array2};
pub use num_complex::Complex64;
pub use rand::prelude::*;

/// Purely imaginary frequencies `i * w` for angular frequencies `w` in 1/s
pub fn imaginary_axis(ws: &[f64]) -> Array1<Complex64> {
    ws.iter().map(|&w| Complex64::new(0.0, w)).collect()
}

/// Default registry plus a stateless `frozen` potassium channel with `p_open = 0.5` and
/// `dp_dv = 1e-3`
pub fn registry_with_frozen() -> ChannelRegistry {
    let mut registry = ChannelRegistry::default();
    registry.register("frozen", 0.0, FrozenChannel::new("k", 0.5, 1e-3));
    registry
}

/// Unbranched tree whose location indices equal node indices
pub fn uniform_chain(n: usize, g_l: f64, g_c: f64, ca: f64) -> CompartmentTree {
    let mut builder = CompartmentTree::builder();
    builder
        .add_root(0, NodeParams::new(ca, 0.0, g_l, -75.0))
        .unwrap();
    for index in 1..n {
        builder
            .add_node(index - 1, index, NodeParams::new(ca, g_c, g_l, -75.0))
            .unwrap();
    }
    builder.registry(registry_with_frozen());
    builder.build().unwrap()
}

/// Random tree with shuffled location indices and `Na_Ta`, `Kv3_3` and `h` currents
pub fn random_tree(rng: &mut StdRng, n: usize) -> CompartmentTree {
    let mut builder = CompartmentTree::builder();
    let mut loc_inds: Vec<usize> = (0..n).collect();
    loc_inds.shuffle(rng);
    builder
        .add_root(
            loc_inds[0],
            NodeParams::new(rng.random_range(0.5..2.0), 0.0, 1e-2, -75.0),
        )
        .unwrap();
    for (index, &loc_ind) in loc_inds.iter().enumerate().skip(1) {
        let parent = rng.random_range(0..index);
        let params = NodeParams::new(
            rng.random_range(0.5..2.0),
            rng.random_range(1e-3..1e-1),
            rng.random_range(1e-3..1e-1),
            rng.random_range(-80.0..-60.0),
        );
        builder.add_node(parent, loc_ind, params).unwrap();
    }
    let mut tree = builder.build().unwrap();
    for name in ["Na_Ta", "Kv3_3", "h"] {
        tree.add_current(name, None).unwrap();
    }
    for node in tree.nodes_mut() {
        for name in ["Na_Ta", "Kv3_3", "h"] {
            node.current_mut(name).unwrap().g = rng.random_range(0.0..1e-2);
        }
    }
    tree
}
