use super::{ClassifierInput, ClassifierNetwork, ClassifierOutput};
use crate::core::model::config::ClassifierConfig;
use crate::error::Result;
use candle_core::{DType, Device};
use candle_nn::{AdamW, VarBuilder, VarMap};
use std::path::Path;

/// A [`ClassifierNetwork`] together with the variables it was built on.
pub struct ClassifierModel {
    varmap: VarMap,
    network: ClassifierNetwork,
    device: Device,
}

impl ClassifierModel {
    pub fn new(config: &ClassifierConfig, device: &Device) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let network = ClassifierNetwork::new(config, vb)?;
        let model = Self {
            varmap,
            network,
            device: device.clone(),
        };
        tracing::info!(
            parameters = model.parameter_count(),
            device = ?model.device,
            "classifier model initialized"
        );
        Ok(model)
    }

    pub fn network(&self) -> &ClassifierNetwork {
        &self.network
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn parameter_count(&self) -> usize {
        self.varmap
            .all_vars()
            .iter()
            .map(|v| v.as_tensor().elem_count())
            .sum()
    }

    pub fn forward(&self, input: &ClassifierInput, train: bool) -> Result<ClassifierOutput> {
        self.network.forward(input, train)
    }

    pub fn optimizer(&self) -> Result<AdamW> {
        self.network.optimizer(&self.varmap)
    }

    /// Writes all variables as safetensors.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.varmap.save(path)?;
        tracing::info!(path = %path.display(), "saved classifier weights");
        Ok(())
    }

    /// Overwrites variables from a safetensors file written by [`save`](Self::save).
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.varmap.load(path)?;
        tracing::info!(path = %path.display(), "loaded classifier weights");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::config::NetworkType;

    fn config() -> ClassifierConfig {
        ClassifierConfig::builder()
            .overlapping_classes(["travel", "finance"])
            .network_type(NetworkType::ConvNet)
            .analytics_input(false)
            .width(4)
            .num_words(30)
            .build()
    }

    #[test]
    fn test_parameter_count() {
        let model = ClassifierModel::new(&config(), &Device::Cpu).unwrap();
        // width projection, three branches, three post-merge convs, one head
        let expected = (4 * 4)
            + (15 * 4 * 3)
            + (15 * 4 * 5)
            + (15 * 4 * 7)
            + (15 * 45 * 5)
            + (9 * 15 * 3)
            + (9 * 9 * 9)
            + (2 * 18);
        assert_eq!(model.parameter_count(), expected);
    }

    fn bias_vars(model: &ClassifierModel) -> Vec<String> {
        let data = model.varmap().data().lock().unwrap();
        data.keys().filter(|k| k.contains("bias")).cloned().collect()
    }

    #[test]
    fn test_conv_net_has_no_bias_vars() {
        let config = ClassifierConfig::builder()
            .exclusive_classes(["inbox", "spam"])
            .network_type(NetworkType::ConvNet)
            .analytics_input(true)
            .width(4)
            .num_words(30)
            .build();
        let model = ClassifierModel::new(&config, &Device::Cpu).unwrap();
        assert!(bias_vars(&model).is_empty());
    }

    #[test]
    fn test_only_lstm_cells_have_bias_vars() {
        let config = ClassifierConfig::builder()
            .exclusive_classes(["inbox", "spam"])
            .network_type(NetworkType::Lstm)
            .analytics_input(true)
            .width(4)
            .num_words(10)
            .build();
        let model = ClassifierModel::new(&config, &Device::Cpu).unwrap();
        let biases = bias_vars(&model);
        assert_eq!(biases.len(), 2);
        assert!(biases.iter().all(|k| k.ends_with("_l0")));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.safetensors");
        let model = ClassifierModel::new(&config(), &Device::Cpu).unwrap();
        model.save(&path).unwrap();

        let mut other = ClassifierModel::new(&config(), &Device::Cpu).unwrap();
        other.load(&path).unwrap();

        let content = candle_core::Tensor::randn(0f32, 1., (2, 30, 4), &Device::Cpu).unwrap();
        let input = ClassifierInput::new(content);
        let a = model.forward(&input, false).unwrap();
        let b = other.forward(&input, false).unwrap();
        let a = a.overlapping().unwrap().to_vec2::<f32>().unwrap();
        let b = b.overlapping().unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(a, b);
    }
}
