/// Error returned from tree construction, lookups and per-location array handling
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TreeError {
    #[error("tree has no root node")]
    NoRoot,

    #[error("tree already has a root node")]
    RootExists,

    #[error("node index {index} is out of range for a tree of {size} nodes")]
    UnknownNode { index: usize, size: usize },

    #[error("location indices {loc_inds:?} are not a permutation of 0..{size}")]
    NonBijectiveLocations { loc_inds: Vec<usize>, size: usize },

    #[error("node {index} has non-positive coupling conductance {g_c}")]
    NonPositiveCoupling { index: usize, g_c: f64 },

    #[error("channel {name:?} is not registered")]
    UnknownChannel { name: String },

    #[error("node {index} has no current {name:?}")]
    MissingCurrent { index: usize, name: String },

    #[error("node {index} has no concentration mechanism for ion {ion:?}")]
    MissingConcMech { index: usize, ion: String },

    #[error("indexing must be \"tree\" or \"locs\", got {0:?}")]
    InvalidIndexing(String),

    #[error("expected {expected} values per location, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("membrane time constant must be positive, got {0}")]
    NonPositiveTau(f64),
}

/// Error returned from the dense linear-algebra helpers
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum LinalgError {
    #[error("matrix is singular")]
    Singular,

    #[error("capacitance {ca} of node {index} must be positive for the eigen decomposition")]
    NonPositiveCapacitance { index: usize, ca: f64 },

    #[error("dimension mismatch: {rows} rows against right-hand side of length {rhs}")]
    DimensionMismatch { rows: usize, rhs: usize },

    #[error("least-squares solve failed: {0}")]
    LeastSquares(&'static str),

    #[error("non-negative least squares did not converge after {0} iterations")]
    NnlsNoConvergence(usize),
}

/// Error returned from the fit operations of [crate::CompartmentTree]
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum FitError {
    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Linalg(#[from] LinalgError),

    #[error("impedance matrix has shape {actual:?}, expected ({freqs}, {size}, {size})")]
    ImpedanceShape {
        actual: (usize, usize, usize),
        freqs: usize,
        size: usize,
    },

    #[error("{what}: expected length {expected}, got {actual}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("feature matrix has {feature} rows but target vector has {target} entries")]
    TargetMismatch { feature: usize, target: usize },

    #[error("stored matrices fit {stored}, cannot add matrices fitting {requested}")]
    FamilyMismatch { stored: String, requested: String },

    #[error("fitted channel {name:?} is missing from the parameter channel list")]
    UnlistedChannel { name: String },

    #[error("fit weight must be non-negative, got {0}")]
    NegativeWeight(f64),

    #[error("at least one operating condition is required")]
    NoConditions,

    #[error("Newton iteration produced non-positive inverse capacitance {value} at node {index}")]
    NewtonDiverged { index: usize, value: f64 },
}
