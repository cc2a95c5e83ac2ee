//! Chooses the input encoder and output topology for a classifier and lays
//! out the corresponding [`LayerGraph`].
//!
//! The text stream is either a single LSTM summed over time or a small
//! convolutional stack with three parallel kernel widths. When analytics
//! features are present they run through their own affine stream and are
//! stacked next to the text features. A shared dropout then feeds one
//! softmax head, one logistic head, or both.

use super::config::ClassifierConfig;
use super::graph::{
    conv_output_len, Activation, HeadKind, Initializer, Layer, LayerGraph, MergeMode, OutputHead,
};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

pub const RECTLIN_SLOPE: f64 = 1e-5;
pub const LSTM_HIDDEN: usize = 300;
pub const ANALYTICS_UNITS: usize = 30;
pub const TRUNK_KEEP: f64 = 0.8;

const BRANCH_FILTERS: usize = 15;
const BRANCH_KERNELS: [usize; 3] = [3, 5, 7];
/// Inputs longer than this are downsampled by the first post-merge conv.
const LONG_INPUT_WORDS: usize = 59;

const RECTLIN: Activation = Activation::Rectlin {
    slope: RECTLIN_SLOPE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputEncoder {
    RecurrentWithAnalytics,
    Recurrent,
    ConvolutionalWithAnalytics,
    Convolutional,
}

impl InputEncoder {
    pub fn select(recurrent: bool, analytics: bool) -> Self {
        match (recurrent, analytics) {
            (true, true) => InputEncoder::RecurrentWithAnalytics,
            (true, false) => InputEncoder::Recurrent,
            (false, true) => InputEncoder::ConvolutionalWithAnalytics,
            (false, false) => InputEncoder::Convolutional,
        }
    }

    pub fn is_recurrent(&self) -> bool {
        matches!(
            self,
            InputEncoder::RecurrentWithAnalytics | InputEncoder::Recurrent
        )
    }

    pub fn has_analytics(&self) -> bool {
        matches!(
            self,
            InputEncoder::RecurrentWithAnalytics | InputEncoder::ConvolutionalWithAnalytics
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputTopology {
    /// Single softmax head.
    Exclusive,
    /// Single logistic head.
    Overlapping,
    /// Shared trunk split into a softmax head and a logistic head.
    Branched,
}

impl OutputTopology {
    pub fn select(exclusive: bool, overlapping: bool) -> Result<Self> {
        match (exclusive, overlapping) {
            (true, false) => Ok(OutputTopology::Exclusive),
            (false, true) => Ok(OutputTopology::Overlapping),
            (true, true) => Ok(OutputTopology::Branched),
            (false, false) => Err(Error::NoClasses),
        }
    }

    pub fn head_kinds(&self) -> &'static [HeadKind] {
        match self {
            OutputTopology::Exclusive => &[HeadKind::Exclusive],
            OutputTopology::Overlapping => &[HeadKind::Overlapping],
            OutputTopology::Branched => &[HeadKind::Exclusive, HeadKind::Overlapping],
        }
    }
}

pub struct ArchitectureBuilder<'a> {
    config: &'a ClassifierConfig,
}

impl<'a> ArchitectureBuilder<'a> {
    pub fn new(config: &'a ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn build(&self) -> Result<LayerGraph> {
        let topology = OutputTopology::select(
            self.config.exclusive_classes.is_some(),
            self.config.overlapping_classes.is_some(),
        )?;
        self.validate()?;

        let encoder = InputEncoder::select(self.config.is_recurrent(), self.config.analytics_input);
        let mut layers = self.input_layers(encoder);
        layers.push(Layer::Dropout { keep: TRUNK_KEEP });
        layers.push(self.output_layer(topology));

        tracing::debug!(?encoder, ?topology, layers = layers.len(), "built classifier graph");

        Ok(LayerGraph {
            encoder,
            topology,
            layers,
        })
    }

    fn validate(&self) -> Result<()> {
        let c = self.config;
        if c.exclusive_classes.as_ref().is_some_and(Vec::is_empty) {
            return Err(Error::EmptyClasses("exclusive"));
        }
        if c.overlapping_classes.as_ref().is_some_and(Vec::is_empty) {
            return Err(Error::EmptyClasses("overlapping"));
        }
        if c.num_words == 0 {
            return Err(Error::invalid_config("num_words must be > 0"));
        }
        if c.effective_width() == 0 {
            return Err(Error::invalid_config("width or lookup_dim must be > 0"));
        }
        if c.lookup_dim > 0 && c.lookup_size == 0 {
            return Err(Error::invalid_config("lookup_dim set without lookup_size"));
        }
        if c.analytics_input && c.analytics_width == 0 {
            return Err(Error::invalid_config(
                "analytics_width must be > 0 when analytics_input is enabled",
            ));
        }
        if !c.is_recurrent() && self.conv_sequence_len().is_none() {
            return Err(Error::invalid_config(format!(
                "num_words = {} is too short for the convolutional encoder",
                c.num_words
            )));
        }
        Ok(())
    }

    fn input_layers(&self, encoder: InputEncoder) -> Vec<Layer> {
        let text = if encoder.is_recurrent() {
            self.recurrent_net()
        } else {
            self.conv_net()
        };
        if !encoder.has_analytics() {
            return text;
        }

        // The convolutional variant squashes analytics through a logistic.
        let analytics_activation = if encoder.is_recurrent() {
            RECTLIN
        } else {
            Activation::Logistic
        };
        vec![Layer::MergeMultistream {
            merge: MergeMode::Stack,
            streams: vec![
                text,
                vec![Layer::Affine {
                    units: ANALYTICS_UNITS,
                    init: Initializer::GlorotUniform,
                    activation: analytics_activation,
                    bias: false,
                }],
            ],
        }]
    }

    fn lookup_layer(&self) -> Option<Layer> {
        self.config.uses_lookup().then(|| Layer::Lookup {
            vocab_size: self.config.lookup_size,
            embedding_dim: self.config.effective_width(),
            init: Initializer::GlorotUniform,
        })
    }

    fn recurrent_net(&self) -> Vec<Layer> {
        let mut layers: Vec<Layer> = self.lookup_layer().into_iter().collect();
        layers.push(Layer::Lstm {
            hidden: LSTM_HIDDEN,
            init: Initializer::GlorotUniform,
            inner_init: Initializer::Kaiming,
            activation: RECTLIN,
            gate_activation: Activation::Logistic,
            reset_cells: true,
        });
        layers.push(Layer::RecurrentSum);
        layers
    }

    fn conv_net(&self) -> Vec<Layer> {
        let width = self.config.effective_width();
        let mut layers = match self.lookup_layer() {
            Some(lookup) => vec![lookup, Layer::ChannelsFirst],
            None => vec![Layer::ChannelsFirst, conv(1, width, 1, 0)],
        };

        layers.push(Layer::MergeBroadcast {
            merge: MergeMode::Depth,
            branches: BRANCH_KERNELS
                .iter()
                .map(|&k| vec![conv(k, BRANCH_FILTERS, 1, k / 2)])
                .collect(),
        });
        layers.push(noisy_dropout(0.5, 1e-3));
        let first_stride = if self.config.num_words > LONG_INPUT_WORDS { 2 } else { 1 };
        layers.push(conv(5, 15, first_stride, 0));
        layers.push(noisy_dropout(0.9, 1e-5));
        layers.push(conv(3, 9, 2, 0));
        layers.push(noisy_dropout(0.9, 1e-5));
        layers.push(conv(9, 9, 2, 0));
        layers
    }

    /// Sequence length left after the convolutional stack.
    pub fn conv_sequence_len(&self) -> Option<usize> {
        self.conv_net()
            .iter()
            .try_fold(self.config.num_words, |len, layer| match layer {
                Layer::Conv {
                    kernel,
                    stride,
                    padding,
                    ..
                } => conv_output_len(len, *kernel, *stride, *padding),
                _ => Some(len),
            })
    }

    fn output_layer(&self, topology: OutputTopology) -> Layer {
        let heads = topology
            .head_kinds()
            .iter()
            .map(|&kind| {
                let classes = match kind {
                    HeadKind::Exclusive => self.config.exclusive_classes.clone(),
                    HeadKind::Overlapping => self.config.overlapping_classes.clone(),
                }
                .unwrap_or_default();
                OutputHead {
                    kind,
                    layers: vec![Layer::Affine {
                        units: classes.len(),
                        init: Initializer::GlorotUniform,
                        activation: kind.activation(),
                        bias: false,
                    }],
                    classes,
                }
            })
            .collect();
        Layer::Heads { heads }
    }
}

fn conv(kernel: usize, filters: usize, stride: usize, padding: usize) -> Layer {
    Layer::Conv {
        kernel,
        filters,
        stride,
        padding,
        init: Initializer::Kaiming,
        activation: RECTLIN,
        bias: false,
    }
}

fn noisy_dropout(keep: f64, noise_std: f64) -> Layer {
    Layer::NoisyDropout {
        keep,
        noise_pct: 1.0,
        noise_std,
    }
}

pub fn build(config: &ClassifierConfig) -> Result<LayerGraph> {
    ArchitectureBuilder::new(config).build()
}
