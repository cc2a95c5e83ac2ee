pub mod core;
pub mod error;

pub use crate::core::{
    ArchitectureBuilder, ClassifierConfig, ClassifierInput, ClassifierModel, ClassifierNetwork,
    ClassifierOutput, DeviceKind, InputEncoder, LayerGraph, NetworkType, OutputTopology,
};
pub use crate::core::model::{
    Activation, HeadKind, Initializer, Layer, MergeMode, OptimizerConfig, OutputHead,
};
pub use error::{Error, Result};
