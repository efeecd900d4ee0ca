//! Linear least-squares fits of reduced-model parameters
//!
//! Every parameter family enters the system matrix `Y` linearly, so `Z . Y(params) = I` is a
//! linear problem in the parameters for any sampled impedance matrix `Z`. The fit operations
//! below build that problem for different targets and parameter families and hand it to
//! [CompartmentTree::fit_res_action](crate::CompartmentTree).

mod capacitance;
pub use capacitance::NewtonReport;

mod family;
pub use family::{
    Capacitance, ConcentrationGain, Conductances, LeakCoupling, ParameterFamily,
    ParameterFamilyTrait,
};

mod impedance;
pub use impedance::{ChannelSelection, OperatingCondition};

mod matrices;
pub use matrices::FitMatrices;

mod session;
pub use session::FitSession;

mod trace;
pub use trace::TraceData;

/// What a fit call does with its least-squares problem
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FitAction {
    /// Solve immediately and write the parameters into the tree
    #[default]
    Fit,
    /// Append the problem to the tree's [FitSession]
    Store,
    /// Return the problem without touching tree or session
    Return,
}
