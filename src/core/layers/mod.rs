//! Thin compositions of candle-nn primitives used by the classifier.

pub mod init;
pub mod noisy_dropout;

pub use noisy_dropout::NoisyDropout;

use crate::core::model::graph::{Activation, MergeMode};
use candle_core::{Result, Tensor, D};

pub fn activate(xs: &Tensor, activation: Activation) -> Result<Tensor> {
    match activation {
        Activation::Rectlin { slope } => candle_nn::ops::leaky_relu(xs, slope),
        Activation::Logistic => candle_nn::ops::sigmoid(xs),
        Activation::Softmax => candle_nn::ops::softmax_last_dim(xs),
        Activation::Tanh => xs.tanh(),
    }
}

/// `(batch, len, hidden)` to `(batch, hidden)`.
pub fn recurrent_sum(xs: &Tensor) -> Result<Tensor> {
    xs.sum(1)
}

/// Depth merge concatenates `(batch, channels, len)` tensors on the channel
/// axis; stack merge flattens every stream and concatenates features.
pub fn merge(streams: &[Tensor], mode: MergeMode) -> Result<Tensor> {
    match mode {
        MergeMode::Depth => Tensor::cat(streams, 1),
        MergeMode::Stack => {
            let flat = streams
                .iter()
                .map(|t| t.flatten_from(1))
                .collect::<Result<Vec<_>>>()?;
            Tensor::cat(&flat, D::Minus1)
        }
    }
}
