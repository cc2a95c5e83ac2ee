//! Declarative description of the classifier's layer graph.
//!
//! A [`LayerGraph`] names layer types, their order and their
//! hyperparameters. It carries no weights; [`ClassifierNetwork`] turns it
//! into candle modules.
//!
//! [`ClassifierNetwork`]: crate::core::ClassifierNetwork

use super::architecture::{InputEncoder, OutputTopology};
use crate::error::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    /// Leaky rectifier.
    Rectlin { slope: f64 },
    Logistic,
    Softmax,
    Tanh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Initializer {
    GlorotUniform,
    Kaiming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    /// Concatenate along the channel axis; sequence lengths must agree.
    Depth,
    /// Flatten each stream and concatenate along the feature axis.
    Stack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadKind {
    Exclusive,
    Overlapping,
}

impl HeadKind {
    pub fn activation(&self) -> Activation {
        match self {
            HeadKind::Exclusive => Activation::Softmax,
            HeadKind::Overlapping => Activation::Logistic,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputHead {
    pub kind: HeadKind,
    pub classes: Vec<String>,
    pub layers: Vec<Layer>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Layer {
    /// Token ids to dense vectors.
    Lookup {
        vocab_size: usize,
        embedding_dim: usize,
        init: Initializer,
    },
    /// `(batch, len, features)` to `(batch, features, len)`.
    ChannelsFirst,
    /// 1-D convolution along the word axis.
    Conv {
        kernel: usize,
        filters: usize,
        stride: usize,
        padding: usize,
        init: Initializer,
        activation: Activation,
        bias: bool,
    },
    Lstm {
        hidden: usize,
        init: Initializer,
        inner_init: Initializer,
        /// Cell and output activation.
        activation: Activation,
        gate_activation: Activation,
        reset_cells: bool,
    },
    /// Sum of recurrent outputs over time.
    RecurrentSum,
    Affine {
        units: usize,
        init: Initializer,
        activation: Activation,
        bias: bool,
    },
    Dropout {
        keep: f64,
    },
    NoisyDropout {
        keep: f64,
        noise_pct: f64,
        noise_std: f64,
    },
    /// Every branch sees the same input.
    MergeBroadcast {
        merge: MergeMode,
        branches: Vec<Vec<Layer>>,
    },
    /// Branch `i` sees input stream `i`.
    MergeMultistream {
        merge: MergeMode,
        streams: Vec<Vec<Layer>>,
    },
    /// Independent output heads sharing the trunk.
    Heads { heads: Vec<OutputHead> },
}

impl Layer {
    pub fn name(&self) -> &'static str {
        match self {
            Layer::Lookup { .. } => "lookup",
            Layer::ChannelsFirst => "channels_first",
            Layer::Conv { .. } => "conv",
            Layer::Lstm { .. } => "lstm",
            Layer::RecurrentSum => "recurrent_sum",
            Layer::Affine { .. } => "affine",
            Layer::Dropout { .. } => "dropout",
            Layer::NoisyDropout { .. } => "noisy_dropout",
            Layer::MergeBroadcast { .. } => "merge_broadcast",
            Layer::MergeMultistream { .. } => "merge_multistream",
            Layer::Heads { .. } => "heads",
        }
    }

    /// Visits this layer and every nested layer, depth first.
    pub fn visit<'a>(&'a self, f: &mut dyn FnMut(&'a Layer)) {
        f(self);
        match self {
            Layer::MergeBroadcast { branches: nested, .. }
            | Layer::MergeMultistream { streams: nested, .. } => {
                for layer in nested.iter().flatten() {
                    layer.visit(f);
                }
            }
            Layer::Heads { heads } => {
                for layer in heads.iter().flat_map(|h| h.layers.iter()) {
                    layer.visit(f);
                }
            }
            _ => {}
        }
    }
}

/// Output length of a 1-D convolution, `None` if the kernel does not fit.
pub fn conv_output_len(len: usize, kernel: usize, stride: usize, padding: usize) -> Option<usize> {
    let padded = len + 2 * padding;
    if kernel == 0 || stride == 0 || padded < kernel {
        return None;
    }
    Some((padded - kernel) / stride + 1)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerGraph {
    pub encoder: InputEncoder,
    pub topology: OutputTopology,
    pub layers: Vec<Layer>,
}

impl LayerGraph {
    pub fn heads(&self) -> &[OutputHead] {
        match self.layers.last() {
            Some(Layer::Heads { heads }) => heads,
            _ => &[],
        }
    }

    /// All layers, nested ones included, in depth-first order.
    pub fn flatten(&self) -> Vec<&Layer> {
        let mut out = Vec::new();
        for layer in &self.layers {
            layer.visit(&mut |l| out.push(l));
        }
        out
    }

    pub fn count(&self, name: &str) -> usize {
        self.flatten().iter().filter(|l| l.name() == name).count()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conv_output_len() {
        assert_eq!(conv_output_len(60, 3, 1, 1), Some(60));
        assert_eq!(conv_output_len(60, 5, 2, 0), Some(28));
        assert_eq!(conv_output_len(28, 3, 2, 0), Some(13));
        assert_eq!(conv_output_len(13, 9, 2, 0), Some(3));
        assert_eq!(conv_output_len(8, 9, 2, 0), None);
    }

    #[test]
    fn test_visit_reaches_nested_layers() {
        let layer = Layer::MergeBroadcast {
            merge: MergeMode::Depth,
            branches: vec![
                vec![Layer::RecurrentSum],
                vec![Layer::Dropout { keep: 0.5 }, Layer::ChannelsFirst],
            ],
        };
        let mut names = Vec::new();
        layer.visit(&mut |l| names.push(l.name()));
        assert_eq!(
            names,
            vec!["merge_broadcast", "recurrent_sum", "dropout", "channels_first"]
        );
    }

    #[test]
    fn test_layer_serializes_tagged() {
        let json = serde_json::to_value(Layer::Dropout { keep: 0.8 }).unwrap();
        assert_eq!(json["type"], "dropout");
        assert_eq!(json["keep"], 0.8);
    }
}
