use crate::core::layers::{self, init, NoisyDropout};
use crate::core::model::graph::{conv_output_len, Activation, Layer, MergeMode};
use crate::error::{Error, Result};
use candle_core::Tensor;
use candle_nn::rnn::{LSTMConfig, LSTM, RNN};
use candle_nn::{Conv1d, Conv1dConfig, Dropout, Embedding, Linear, Module, ModuleT, VarBuilder};

/// Per-example layout of the activations flowing between blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureShape {
    /// Token ids, `(batch, len)`.
    Tokens { len: usize },
    /// `(batch, len, dim)`.
    Sequence { len: usize, dim: usize },
    /// `(batch, channels, len)`.
    Channels { channels: usize, len: usize },
    /// `(batch, dim)`.
    Flat { dim: usize },
}

impl FeatureShape {
    pub fn flat_dim(&self) -> usize {
        match *self {
            FeatureShape::Tokens { len } => len,
            FeatureShape::Sequence { len, dim } => len * dim,
            FeatureShape::Channels { channels, len } => channels * len,
            FeatureShape::Flat { dim } => dim,
        }
    }

    /// Trailing dims of a batch tensor with this layout.
    pub fn dims(&self) -> Vec<usize> {
        match *self {
            FeatureShape::Tokens { len } => vec![len],
            FeatureShape::Sequence { len, dim } => vec![len, dim],
            FeatureShape::Channels { channels, len } => vec![channels, len],
            FeatureShape::Flat { dim } => vec![dim],
        }
    }
}

pub enum Block {
    Lookup(Embedding),
    ChannelsFirst,
    Conv { conv: Conv1d, activation: Activation },
    Lstm(LSTM),
    RecurrentSum,
    Affine { linear: Linear, activation: Activation },
    Dropout(Dropout),
    NoisyDropout(NoisyDropout),
    Broadcast { merge: MergeMode, branches: Vec<Sequential> },
}

fn mismatch(layer: &Layer, shape: FeatureShape) -> Error {
    Error::invalid_config(format!("{} layer cannot consume {:?}", layer.name(), shape))
}

impl Block {
    pub fn realize(
        layer: &Layer,
        shape: FeatureShape,
        vb: VarBuilder,
    ) -> Result<(Self, FeatureShape)> {
        let realized = match (layer, shape) {
            (
                Layer::Lookup {
                    vocab_size,
                    embedding_dim,
                    init: kind,
                },
                FeatureShape::Tokens { len },
            ) => {
                let weight = vb.get_with_hints(
                    (*vocab_size, *embedding_dim),
                    "weight",
                    init::resolve(*kind, *vocab_size, *embedding_dim),
                )?;
                (
                    Block::Lookup(Embedding::new(weight, *embedding_dim)),
                    FeatureShape::Sequence {
                        len,
                        dim: *embedding_dim,
                    },
                )
            }
            (Layer::ChannelsFirst, FeatureShape::Sequence { len, dim }) => (
                Block::ChannelsFirst,
                FeatureShape::Channels { channels: dim, len },
            ),
            (
                Layer::Conv {
                    kernel,
                    filters,
                    stride,
                    padding,
                    init: kind,
                    activation,
                    bias: with_bias,
                },
                FeatureShape::Channels { channels, len },
            ) => {
                let out_len = conv_output_len(len, *kernel, *stride, *padding).ok_or_else(|| {
                    Error::invalid_config(format!(
                        "conv kernel {kernel} does not fit a sequence of {len}"
                    ))
                })?;
                let weight = vb.get_with_hints(
                    (*filters, channels, *kernel),
                    "weight",
                    init::resolve(*kind, channels * kernel, filters * kernel),
                )?;
                let bias = with_bias
                    .then(|| vb.get_with_hints(*filters, "bias", init::ZEROS))
                    .transpose()?;
                let config = Conv1dConfig {
                    padding: *padding,
                    stride: *stride,
                    ..Default::default()
                };
                (
                    Block::Conv {
                        conv: Conv1d::new(weight, bias, config),
                        activation: *activation,
                    },
                    FeatureShape::Channels {
                        channels: *filters,
                        len: out_len,
                    },
                )
            }
            (
                Layer::Lstm {
                    hidden,
                    init: kind,
                    inner_init,
                    activation,
                    gate_activation,
                    reset_cells,
                },
                FeatureShape::Sequence { len, dim },
            ) => {
                if !reset_cells {
                    return Err(Error::invalid_config(
                        "lstm state carried across batches is not supported",
                    ));
                }
                if *activation != Activation::Tanh || *gate_activation != Activation::Logistic {
                    tracing::warn!(
                        ?activation,
                        ?gate_activation,
                        "candle lstm cells always use tanh with logistic gates"
                    );
                }
                let config = LSTMConfig {
                    w_ih_init: init::resolve(*kind, dim, 4 * hidden),
                    w_hh_init: init::resolve(*inner_init, *hidden, 4 * hidden),
                    ..Default::default()
                };
                let lstm = candle_nn::lstm(dim, *hidden, config, vb)?;
                (
                    Block::Lstm(lstm),
                    FeatureShape::Sequence { len, dim: *hidden },
                )
            }
            (Layer::RecurrentSum, FeatureShape::Sequence { dim, .. }) => {
                (Block::RecurrentSum, FeatureShape::Flat { dim })
            }
            (
                Layer::Affine {
                    units,
                    init: kind,
                    activation,
                    bias: with_bias,
                },
                shape,
            ) if !matches!(shape, FeatureShape::Tokens { .. }) => {
                let fan_in = shape.flat_dim();
                let weight = vb.get_with_hints(
                    (*units, fan_in),
                    "weight",
                    init::resolve(*kind, fan_in, *units),
                )?;
                let bias = with_bias
                    .then(|| vb.get_with_hints(*units, "bias", init::ZEROS))
                    .transpose()?;
                (
                    Block::Affine {
                        linear: Linear::new(weight, bias),
                        activation: *activation,
                    },
                    FeatureShape::Flat { dim: *units },
                )
            }
            (Layer::Dropout { keep }, shape) => {
                (Block::Dropout(Dropout::new((1.0 - keep) as f32)), shape)
            }
            (
                Layer::NoisyDropout {
                    keep,
                    noise_pct,
                    noise_std,
                },
                shape,
            ) => (
                Block::NoisyDropout(NoisyDropout::new(*keep, *noise_pct, *noise_std)),
                shape,
            ),
            (Layer::MergeBroadcast { merge, branches }, shape) => {
                let mut realized = Vec::with_capacity(branches.len());
                let mut outputs = Vec::with_capacity(branches.len());
                for (i, branch) in branches.iter().enumerate() {
                    let branch_vb = vb.pp(format!("branch{i}"));
                    let (seq, out) = Sequential::realize(branch, shape, &branch_vb)?;
                    realized.push(seq);
                    outputs.push(out);
                }
                let merged = merged_shape(&outputs, *merge)?;
                (
                    Block::Broadcast {
                        merge: *merge,
                        branches: realized,
                    },
                    merged,
                )
            }
            (layer, shape) => return Err(mismatch(layer, shape)),
        };
        Ok(realized)
    }
}

/// Shape produced by merging streams of the given shapes.
pub fn merged_shape(shapes: &[FeatureShape], mode: MergeMode) -> Result<FeatureShape> {
    if shapes.is_empty() {
        return Err(Error::invalid_config("merge needs at least one branch"));
    }
    match mode {
        MergeMode::Stack => Ok(FeatureShape::Flat {
            dim: shapes.iter().map(FeatureShape::flat_dim).sum(),
        }),
        MergeMode::Depth => {
            let mut channels = 0;
            let mut seq_len = None;
            for shape in shapes {
                match *shape {
                    FeatureShape::Channels { channels: c, len }
                        if seq_len.map_or(true, |l| l == len) =>
                    {
                        channels += c;
                        seq_len = Some(len);
                    }
                    other => {
                        return Err(Error::invalid_config(format!(
                            "depth merge needs channel outputs of equal length, got {other:?}"
                        )))
                    }
                }
            }
            Ok(FeatureShape::Channels {
                channels,
                len: seq_len.unwrap_or(0),
            })
        }
    }
}

impl ModuleT for Block {
    fn forward_t(&self, xs: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        match self {
            Block::Lookup(embedding) => embedding.forward(xs),
            Block::ChannelsFirst => xs.transpose(1, 2)?.contiguous(),
            Block::Conv { conv, activation } => layers::activate(&conv.forward(xs)?, *activation),
            Block::Lstm(lstm) => {
                let states = lstm.seq(xs)?;
                lstm.states_to_tensor(&states)
            }
            Block::RecurrentSum => layers::recurrent_sum(xs),
            Block::Affine { linear, activation } => {
                let xs = if xs.rank() > 2 {
                    xs.flatten_from(1)?
                } else {
                    xs.clone()
                };
                layers::activate(&linear.forward(&xs)?, *activation)
            }
            Block::Dropout(dropout) => dropout.forward_t(xs, train),
            Block::NoisyDropout(dropout) => dropout.forward_t(xs, train),
            Block::Broadcast { merge, branches } => {
                let outputs = branches
                    .iter()
                    .map(|branch| branch.forward_t(xs, train))
                    .collect::<candle_core::Result<Vec<_>>>()?;
                layers::merge(&outputs, *merge)
            }
        }
    }
}

/// Blocks applied in order.
#[derive(Default)]
pub struct Sequential {
    blocks: Vec<Block>,
}

impl Sequential {
    pub fn realize(
        layers: &[Layer],
        input: FeatureShape,
        vb: &VarBuilder,
    ) -> Result<(Self, FeatureShape)> {
        let mut shape = input;
        let mut blocks = Vec::with_capacity(layers.len());
        for (idx, layer) in layers.iter().enumerate() {
            let (block, next) = Block::realize(layer, shape, vb.pp(idx.to_string()))?;
            blocks.push(block);
            shape = next;
        }
        Ok((Self { blocks }, shape))
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl ModuleT for Sequential {
    fn forward_t(&self, xs: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let mut xs = xs.clone();
        for block in &self.blocks {
            xs = block.forward_t(&xs, train)?;
        }
        Ok(xs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::graph::Initializer;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_conv_shape_propagation() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let layers = vec![
            Layer::ChannelsFirst,
            Layer::Conv {
                kernel: 5,
                filters: 15,
                stride: 2,
                padding: 0,
                init: Initializer::Kaiming,
                activation: Activation::Rectlin { slope: 1e-5 },
                bias: false,
            },
        ];
        let (seq, shape) =
            Sequential::realize(&layers, FeatureShape::Sequence { len: 60, dim: 8 }, &vb).unwrap();
        assert_eq!(seq.len(), 2);
        assert_eq!(shape, FeatureShape::Channels { channels: 15, len: 28 });

        let xs = Tensor::zeros((3, 60, 8), DType::F32, &Device::Cpu).unwrap();
        let ys = seq.forward_t(&xs, false).unwrap();
        assert_eq!(ys.dims(), &[3, 15, 28]);
        assert!(varmap.data().lock().unwrap().keys().all(|k| !k.contains("bias")));
    }

    #[test]
    fn test_biased_affine_creates_bias_var() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let layer = Layer::Affine {
            units: 6,
            init: Initializer::GlorotUniform,
            activation: Activation::Logistic,
            bias: true,
        };
        let (_, shape) = Block::realize(&layer, FeatureShape::Flat { dim: 4 }, vb).unwrap();
        assert_eq!(shape, FeatureShape::Flat { dim: 6 });
        let data = varmap.data().lock().unwrap();
        assert_eq!(data.get("bias").map(|v| v.as_tensor().dims().to_vec()), Some(vec![6]));
    }

    #[test]
    fn test_lstm_with_rectlin_activation_still_realizes() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let layer = Layer::Lstm {
            hidden: 4,
            init: Initializer::GlorotUniform,
            inner_init: Initializer::Kaiming,
            activation: Activation::Rectlin { slope: 1e-5 },
            gate_activation: Activation::Logistic,
            reset_cells: true,
        };
        let (_, shape) =
            Block::realize(&layer, FeatureShape::Sequence { len: 5, dim: 3 }, vb).unwrap();
        assert_eq!(shape, FeatureShape::Sequence { len: 5, dim: 4 });
    }

    #[test]
    fn test_lstm_on_channels_is_rejected() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let layer = Layer::Lstm {
            hidden: 4,
            init: Initializer::GlorotUniform,
            inner_init: Initializer::Kaiming,
            activation: Activation::Tanh,
            gate_activation: Activation::Logistic,
            reset_cells: true,
        };
        let result = Block::realize(&layer, FeatureShape::Channels { channels: 3, len: 5 }, vb);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_depth_merge_requires_equal_lengths() {
        let ok = merged_shape(
            &[
                FeatureShape::Channels { channels: 15, len: 60 },
                FeatureShape::Channels { channels: 15, len: 60 },
            ],
            MergeMode::Depth,
        )
        .unwrap();
        assert_eq!(ok, FeatureShape::Channels { channels: 30, len: 60 });

        let err = merged_shape(
            &[
                FeatureShape::Channels { channels: 15, len: 60 },
                FeatureShape::Channels { channels: 15, len: 59 },
            ],
            MergeMode::Depth,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_stack_merge_shape() {
        let shape = merged_shape(
            &[
                FeatureShape::Channels { channels: 9, len: 3 },
                FeatureShape::Flat { dim: 30 },
            ],
            MergeMode::Stack,
        )
        .unwrap();
        assert_eq!(shape, FeatureShape::Flat { dim: 57 });
    }
}
