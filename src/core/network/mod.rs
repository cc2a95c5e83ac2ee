//! Instantiates a [`LayerGraph`] as candle modules.

pub mod blocks;
pub mod model;

pub use blocks::FeatureShape;
pub use model::ClassifierModel;

use crate::core::layers;
use crate::core::model::architecture::ArchitectureBuilder;
use crate::core::model::config::ClassifierConfig;
use crate::core::model::graph::{HeadKind, Layer, LayerGraph, MergeMode};
use crate::error::{Error, Result};
use blocks::Sequential;
use candle_core::{DType, Device, Tensor};
use candle_nn::{AdamW, ModuleT, Optimizer, ParamsAdamW, VarBuilder, VarMap};

/// Per-example inputs: the text window and, when configured, analytics.
#[derive(Debug, Clone)]
pub struct ClassifierInput {
    pub content: Tensor,
    pub analytics: Option<Tensor>,
}

impl ClassifierInput {
    pub fn new(content: Tensor) -> Self {
        Self {
            content,
            analytics: None,
        }
    }

    pub fn with_analytics(mut self, analytics: Tensor) -> Self {
        self.analytics = Some(analytics);
        self
    }

    /// All-zero inputs of the layout `config` expects.
    pub fn zeros(config: &ClassifierConfig, batch: usize, device: &Device) -> Result<Self> {
        let content = if config.uses_lookup() {
            Tensor::zeros((batch, config.num_words), DType::U32, device)?
        } else {
            Tensor::zeros(
                (batch, config.num_words, config.effective_width()),
                DType::F32,
                device,
            )?
        };
        let analytics = if config.analytics_input {
            Some(Tensor::zeros(
                (batch, config.analytics_width),
                DType::F32,
                device,
            )?)
        } else {
            None
        };
        Ok(Self { content, analytics })
    }
}

#[derive(Debug, Clone)]
pub enum ClassifierOutput {
    /// Softmax probabilities, `(batch, exclusive classes)`.
    Exclusive(Tensor),
    /// Independent probabilities, `(batch, overlapping classes)`.
    Overlapping(Tensor),
    Branched {
        exclusive: Tensor,
        overlapping: Tensor,
    },
}

impl ClassifierOutput {
    pub fn exclusive(&self) -> Option<&Tensor> {
        match self {
            ClassifierOutput::Exclusive(t) | ClassifierOutput::Branched { exclusive: t, .. } => {
                Some(t)
            }
            ClassifierOutput::Overlapping(_) => None,
        }
    }

    pub fn overlapping(&self) -> Option<&Tensor> {
        match self {
            ClassifierOutput::Overlapping(t)
            | ClassifierOutput::Branched { overlapping: t, .. } => Some(t),
            ClassifierOutput::Exclusive(_) => None,
        }
    }
}

enum Encoder {
    Single(Sequential),
    Multistream {
        merge: MergeMode,
        streams: Vec<Sequential>,
    },
}

struct Head {
    kind: HeadKind,
    layers: Sequential,
}

pub struct ClassifierNetwork {
    config: ClassifierConfig,
    graph: LayerGraph,
    content_shape: FeatureShape,
    encoder: Encoder,
    trunk: Sequential,
    heads: Vec<Head>,
    trunk_width: usize,
}

impl ClassifierNetwork {
    pub fn new(config: &ClassifierConfig, vb: VarBuilder) -> Result<Self> {
        let graph = ArchitectureBuilder::new(config).build()?;
        Self::from_graph(config, graph, vb)
    }

    pub fn from_graph(
        config: &ClassifierConfig,
        graph: LayerGraph,
        vb: VarBuilder,
    ) -> Result<Self> {
        let content_shape = if config.uses_lookup() {
            FeatureShape::Tokens {
                len: config.num_words,
            }
        } else {
            FeatureShape::Sequence {
                len: config.num_words,
                dim: config.effective_width(),
            }
        };

        let (head_layers, body) = match graph.layers.split_last() {
            Some((Layer::Heads { heads }, body)) => (heads, body),
            _ => return Err(Error::invalid_config("layer graph must end with output heads")),
        };

        let (encoder, shape, body) = match body.split_first() {
            Some((Layer::MergeMultistream { merge, streams }, rest)) => {
                if !config.analytics_input || streams.len() != 2 {
                    return Err(Error::invalid_config(
                        "multistream input expects a content stream and an analytics stream",
                    ));
                }
                let inputs = [
                    content_shape,
                    FeatureShape::Flat {
                        dim: config.analytics_width,
                    },
                ];
                let mut realized = Vec::with_capacity(streams.len());
                let mut shapes = Vec::with_capacity(streams.len());
                for (i, (stream, input)) in streams.iter().zip(inputs).enumerate() {
                    let stream_vb = vb.pp(format!("stream{i}"));
                    let (seq, out) = Sequential::realize(stream, input, &stream_vb)?;
                    realized.push(seq);
                    shapes.push(out);
                }
                let shape = blocks::merged_shape(&shapes, *merge)?;
                (
                    Encoder::Multistream {
                        merge: *merge,
                        streams: realized,
                    },
                    shape,
                    rest,
                )
            }
            _ => {
                if config.analytics_input {
                    return Err(Error::invalid_config(
                        "analytics input configured but the graph has a single stream",
                    ));
                }
                (Encoder::Single(Sequential::default()), content_shape, body)
            }
        };

        let (trunk, trunk_shape) = Sequential::realize(body, shape, &vb.pp("trunk"))?;
        let trunk_width = trunk_shape.flat_dim();

        let mut heads = Vec::with_capacity(head_layers.len());
        for head in head_layers {
            let (layers, out) =
                Sequential::realize(&head.layers, trunk_shape, &vb.pp(head_prefix(head.kind)))?;
            if out != (FeatureShape::Flat { dim: head.classes.len() }) {
                return Err(Error::invalid_config(format!(
                    "{:?} head produces {:?} for {} classes",
                    head.kind,
                    out,
                    head.classes.len()
                )));
            }
            heads.push(Head {
                kind: head.kind,
                layers,
            });
        }

        tracing::info!(
            encoder = ?graph.encoder,
            topology = ?graph.topology,
            trunk_width,
            "classifier network realized"
        );

        Ok(Self {
            config: config.clone(),
            graph,
            content_shape,
            encoder,
            trunk,
            heads,
            trunk_width,
        })
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub fn graph(&self) -> &LayerGraph {
        &self.graph
    }

    /// Width of the shared features feeding the output heads.
    pub fn trunk_width(&self) -> usize {
        self.trunk_width
    }

    pub fn forward(&self, input: &ClassifierInput, train: bool) -> Result<ClassifierOutput> {
        self.check_input(input)?;

        let features = match (&self.encoder, &input.analytics) {
            (Encoder::Single(seq), _) => seq.forward_t(&input.content, train)?,
            (Encoder::Multistream { merge, streams }, Some(analytics)) => {
                let encoded = streams
                    .iter()
                    .zip([&input.content, analytics])
                    .map(|(stream, xs)| stream.forward_t(xs, train))
                    .collect::<candle_core::Result<Vec<_>>>()?;
                layers::merge(&encoded, *merge)?
            }
            (Encoder::Multistream { .. }, None) => {
                return Err(Error::input_mismatch("analytics tensor", "none"))
            }
        };
        let shared = self.trunk.forward_t(&features, train)?;

        let mut exclusive = None;
        let mut overlapping = None;
        for head in &self.heads {
            let out = head.layers.forward_t(&shared, train)?;
            match head.kind {
                HeadKind::Exclusive => exclusive = Some(out),
                HeadKind::Overlapping => overlapping = Some(out),
            }
        }

        match (exclusive, overlapping) {
            (Some(e), None) => Ok(ClassifierOutput::Exclusive(e)),
            (None, Some(o)) => Ok(ClassifierOutput::Overlapping(o)),
            (Some(exclusive), Some(overlapping)) => Ok(ClassifierOutput::Branched {
                exclusive,
                overlapping,
            }),
            (None, None) => Err(Error::NoClasses),
        }
    }

    fn check_input(&self, input: &ClassifierInput) -> Result<()> {
        let dims = input.content.dims();
        let batch = dims.first().copied().unwrap_or(0);
        let expected = self.content_shape.dims();
        if dims.len() != expected.len() + 1 || dims[1..] != expected[..] {
            return Err(Error::input_mismatch(
                format!("content [batch, {expected:?}]"),
                format!("{dims:?}"),
            ));
        }
        if matches!(self.content_shape, FeatureShape::Tokens { .. })
            && input.content.dtype().is_float()
        {
            return Err(Error::input_mismatch(
                "integer token ids",
                format!("{:?}", input.content.dtype()),
            ));
        }

        match (&input.analytics, self.config.analytics_input) {
            (Some(analytics), true) => {
                let want = [batch, self.config.analytics_width];
                if analytics.dims() != want {
                    return Err(Error::input_mismatch(
                        format!("analytics {want:?}"),
                        format!("{:?}", analytics.dims()),
                    ));
                }
            }
            (None, true) => return Err(Error::input_mismatch("analytics tensor", "none")),
            (Some(_), false) => {
                return Err(Error::input_mismatch("no analytics tensor", "analytics tensor"))
            }
            (None, false) => {}
        }
        Ok(())
    }

    /// Adam over every variable in `varmap`.
    pub fn optimizer(&self, varmap: &VarMap) -> Result<AdamW> {
        let opt = self.config.optimizer;
        let params = ParamsAdamW {
            lr: opt.learning_rate,
            beta1: opt.beta1,
            beta2: opt.beta2,
            eps: opt.epsilon,
            weight_decay: 0.0,
        };
        Ok(AdamW::new(varmap.all_vars(), params)?)
    }
}

fn head_prefix(kind: HeadKind) -> &'static str {
    match kind {
        HeadKind::Exclusive => "exclusive",
        HeadKind::Overlapping => "overlapping",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::config::NetworkType;

    fn small(network_type: NetworkType, analytics: bool) -> ClassifierConfig {
        ClassifierConfig::builder()
            .exclusive_classes(["primary", "social", "promotions"])
            .network_type(network_type)
            .analytics_input(analytics)
            .analytics_width(4)
            .width(8)
            .build()
    }

    fn network(config: &ClassifierConfig) -> (VarMap, ClassifierNetwork) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let net = ClassifierNetwork::new(config, vb).unwrap();
        (varmap, net)
    }

    #[test]
    fn test_trunk_width_per_encoder() {
        let (_, net) = network(&small(NetworkType::ConvNet, true));
        assert_eq!(net.trunk_width(), 9 * 3 + 30);
        let (_, net) = network(&small(NetworkType::ConvNet, false));
        assert_eq!(net.trunk_width(), 9 * 3);
        let (_, net) = network(&small(NetworkType::Lstm, true));
        assert_eq!(net.trunk_width(), 300 + 30);
        let (_, net) = network(&small(NetworkType::Lstm, false));
        assert_eq!(net.trunk_width(), 300);
    }

    #[test]
    fn test_forward_exclusive_rows_sum_to_one() {
        let config = small(NetworkType::ConvNet, true);
        let (_, net) = network(&config);
        let dev = Device::Cpu;
        let input = ClassifierInput::new(Tensor::randn(0f32, 1., (2, 60, 8), &dev).unwrap())
            .with_analytics(Tensor::randn(0f32, 1., (2, 4), &dev).unwrap());
        let out = net.forward(&input, false).unwrap();
        let probs = out.exclusive().unwrap();
        assert_eq!(probs.dims(), &[2, 3]);
        assert!(out.overlapping().is_none());
        for row in probs.sum(1).unwrap().to_vec1::<f32>().unwrap() {
            assert!((row - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_missing_analytics_rejected() {
        let config = small(NetworkType::ConvNet, true);
        let (_, net) = network(&config);
        let content = Tensor::zeros((1, 60, 8), DType::F32, &Device::Cpu).unwrap();
        let err = net.forward(&ClassifierInput::new(content), false).unwrap_err();
        assert!(matches!(err, Error::InputMismatch { .. }));
    }

    #[test]
    fn test_wrong_word_count_rejected() {
        let config = small(NetworkType::Lstm, false);
        let (_, net) = network(&config);
        let content = Tensor::zeros((1, 59, 8), DType::F32, &Device::Cpu).unwrap();
        assert!(net.forward(&ClassifierInput::new(content), false).is_err());
    }

    #[test]
    fn test_variables_are_namespaced() {
        let config = small(NetworkType::ConvNet, true);
        let (varmap, _) = network(&config);
        let data = varmap.data().lock().unwrap();
        assert!(data.contains_key("stream1.0.weight"));
        assert!(data.contains_key("exclusive.0.weight"));
        assert!(data.keys().any(|k| k.starts_with("stream0.") && k.contains("branch2")));
    }

    #[test]
    fn test_optimizer_uses_config() {
        let config = small(NetworkType::ConvNet, false);
        let (varmap, net) = network(&config);
        let opt = net.optimizer(&varmap).unwrap();
        assert_eq!(opt.learning_rate(), 0.001);
    }
}
