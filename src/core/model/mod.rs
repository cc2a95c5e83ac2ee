pub mod architecture;
pub mod config;
pub mod graph;

pub use architecture::{ArchitectureBuilder, InputEncoder, OutputTopology};
pub use config::{ClassifierConfig, ClassifierConfigBuilder, NetworkType, OptimizerConfig};
pub use graph::{Activation, HeadKind, Initializer, Layer, LayerGraph, MergeMode, OutputHead};
