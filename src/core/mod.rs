pub mod device;
pub mod layers;
pub mod model;
pub mod network;

pub use device::DeviceKind;
pub use model::{
    ArchitectureBuilder, ClassifierConfig, InputEncoder, LayerGraph, NetworkType, OutputTopology,
};
pub use network::{ClassifierInput, ClassifierModel, ClassifierNetwork, ClassifierOutput};

pub use crate::error::{Error, Result};
