pub use analytic::chain_steady_state_impedance;
pub use trees::{branched_tree, chain_tree, frozen_registry, imag_freqs};

mod analytic;
mod trees;
