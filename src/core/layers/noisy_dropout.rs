use candle_core::{Result, Tensor};
use candle_nn::{Dropout, ModuleT};

/// Dropout followed, in training mode, by additive gaussian noise on a
/// random `noise_pct` fraction of the activations.
#[derive(Debug, Clone)]
pub struct NoisyDropout {
    dropout: Dropout,
    noise_pct: f64,
    noise_std: f64,
}

impl NoisyDropout {
    pub fn new(keep: f64, noise_pct: f64, noise_std: f64) -> Self {
        Self {
            dropout: Dropout::new((1.0 - keep) as f32),
            noise_pct,
            noise_std,
        }
    }
}

impl ModuleT for NoisyDropout {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let ys = self.dropout.forward_t(xs, train)?;
        if !train || self.noise_pct <= 0.0 || self.noise_std <= 0.0 {
            return Ok(ys);
        }
        let noise = ys.randn_like(0.0, self.noise_std)?;
        let noise = if self.noise_pct < 1.0 {
            let mask = ys.rand_like(0.0, 1.0)?.lt(self.noise_pct)?.to_dtype(ys.dtype())?;
            noise.mul(&mask)?
        } else {
            noise
        };
        ys.add(&noise)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn test_eval_is_identity() {
        let xs = Tensor::ones((2, 8), DType::F32, &Device::Cpu).unwrap();
        let layer = NoisyDropout::new(0.5, 1.0, 1e-3);
        let ys = layer.forward_t(&xs, false).unwrap();
        let diff = (ys - &xs).unwrap().abs().unwrap().sum_all().unwrap();
        assert_eq!(diff.to_scalar::<f32>().unwrap(), 0.0);
    }

    #[test]
    fn test_train_perturbs() {
        let xs = Tensor::ones((4, 64), DType::F32, &Device::Cpu).unwrap();
        let layer = NoisyDropout::new(1.0, 1.0, 0.1);
        let ys = layer.forward_t(&xs, true).unwrap();
        assert_eq!(ys.dims(), xs.dims());
        let diff = (ys - &xs).unwrap().abs().unwrap().sum_all().unwrap();
        assert!(diff.to_scalar::<f32>().unwrap() > 0.0);
    }
}
