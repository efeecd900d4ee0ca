mod channel_trait;
pub use channel_trait::IonChannelTrait;

mod expansion_point;
pub use expansion_point::{ExpansionPoint, MaxCurrentSearch};

mod frozen;
pub use frozen::FrozenChannel;

mod gated;
pub use gated::{Gate, GateKinetics, GatedChannel};

mod registry;
pub use registry::{ChannelRegistry, ChannelStorage};

use crate::error::TreeError;
use enum_dispatch::enum_dispatch;
use ndarray::Array1;
use num_complex::Complex64;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Ion-channel model used by compartment nodes
#[enum_dispatch(IonChannelTrait)]
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
#[non_exhaustive]
pub enum IonChannel {
    Gated(GatedChannel),
    Frozen(FrozenChannel),
}
