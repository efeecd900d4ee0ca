#![doc = include_str!("../README.md")]

#[cfg(test)]
mod tests;

pub mod channels;
pub use channels::{
    ChannelRegistry, ChannelStorage, ExpansionPoint, FrozenChannel, GatedChannel, IonChannel,
    IonChannelTrait, MaxCurrentSearch,
};

mod concmech;
pub use concmech::ExpConcMech;

mod config;
pub use config::{FitConfig, LinearSolver, NewtonCapacitanceSolver};

mod error;
pub use error::{FitError, LinalgError, TreeError};

pub mod fit;
pub use fit::{
    ChannelSelection, FitAction, FitMatrices, FitSession, NewtonReport, OperatingCondition,
    ParameterFamily, TraceData,
};

pub mod linalg;

mod node;
pub use node::{CompartmentNode, Current, NodeParams};

mod tree;
pub use tree::{
    CompartmentTree, CompartmentTreeBuilder, EEq, EigenSystem, Indexing, MatrixOptions, Permute,
};

mod types;
pub use types::{FreqMatrices, Freqs, LEAK, StructureTensor, Traces};

pub use ndarray;
pub use num_complex;
