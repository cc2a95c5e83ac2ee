use crate::core::model::graph::Initializer;
use candle_nn::init::{Init, DEFAULT_KAIMING_NORMAL};

/// Uniform in `[-b, b]` with `b = sqrt(6 / (fan_in + fan_out))`.
pub fn glorot_uniform(fan_in: usize, fan_out: usize) -> Init {
    let bound = (6.0 / (fan_in + fan_out).max(1) as f64).sqrt();
    Init::Uniform {
        lo: -bound,
        up: bound,
    }
}

/// Kaiming fans are derived from the weight shape by candle itself.
pub fn resolve(init: Initializer, fan_in: usize, fan_out: usize) -> Init {
    match init {
        Initializer::GlorotUniform => glorot_uniform(fan_in, fan_out),
        Initializer::Kaiming => DEFAULT_KAIMING_NORMAL,
    }
}

pub const ZEROS: Init = Init::Const(0.0);
