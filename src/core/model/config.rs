use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Which text encoder fronts the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum NetworkType {
    #[serde(rename = "lstm")]
    Lstm,
    #[default]
    #[serde(rename = "conv_net")]
    ConvNet,
}

impl NetworkType {
    pub fn is_recurrent(&self) -> bool {
        matches!(self, NetworkType::Lstm)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkType::Lstm => "lstm",
            NetworkType::ConvNet => "conv_net",
        }
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "lstm" => Ok(NetworkType::Lstm),
            "conv_net" => Ok(NetworkType::ConvNet),
            other => Err(Error::UnknownNetworkType(other.to_string())),
        }
    }
}

/// Adam hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptimizerConfig {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.001,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
        }
    }
}

/// Class sets and hyperparameters for a [`ClassifierNetwork`](crate::core::ClassifierNetwork).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClassifierConfig {
    pub overlapping_classes: Option<Vec<String>>,
    pub exclusive_classes: Option<Vec<String>>,
    pub analytics_input: bool,
    pub analytics_width: usize,
    pub network_type: NetworkType,
    pub num_words: usize,
    pub width: usize,
    pub lookup_size: usize,
    pub lookup_dim: usize,
    pub optimizer: OptimizerConfig,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            overlapping_classes: None,
            exclusive_classes: None,
            analytics_input: true,
            analytics_width: 10,
            network_type: NetworkType::ConvNet,
            num_words: 60,
            width: 100,
            lookup_size: 0,
            lookup_dim: 0,
            optimizer: OptimizerConfig::default(),
        }
    }
}

impl ClassifierConfig {
    pub fn builder() -> ClassifierConfigBuilder {
        ClassifierConfigBuilder::new()
    }

    pub fn is_recurrent(&self) -> bool {
        self.network_type.is_recurrent()
    }

    /// Feature width seen by the encoders: the wider of `width` and `lookup_dim`.
    pub fn effective_width(&self) -> usize {
        self.width.max(self.lookup_dim)
    }

    /// Content arrives as token ids rather than dense word vectors.
    pub fn uses_lookup(&self) -> bool {
        self.lookup_size > 0
    }

    /// Loads a config from YAML or JSON, picked by file extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json {
            Ok(serde_json::from_str(&text)?)
        } else {
            Ok(serde_yaml::from_str(&text)?)
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

pub struct ClassifierConfigBuilder {
    config: ClassifierConfig,
}

impl ClassifierConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ClassifierConfig::default(),
        }
    }

    pub fn exclusive_classes<I, S>(mut self, classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.exclusive_classes = Some(classes.into_iter().map(Into::into).collect());
        self
    }

    pub fn overlapping_classes<I, S>(mut self, classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.overlapping_classes = Some(classes.into_iter().map(Into::into).collect());
        self
    }

    pub fn analytics_input(mut self, enabled: bool) -> Self {
        self.config.analytics_input = enabled;
        self
    }

    pub fn analytics_width(mut self, width: usize) -> Self {
        self.config.analytics_width = width;
        self
    }

    pub fn network_type(mut self, network_type: NetworkType) -> Self {
        self.config.network_type = network_type;
        self
    }

    pub fn num_words(mut self, n: usize) -> Self {
        self.config.num_words = n;
        self
    }

    pub fn width(mut self, width: usize) -> Self {
        self.config.width = width;
        self
    }

    pub fn lookup(mut self, size: usize, dim: usize) -> Self {
        self.config.lookup_size = size;
        self.config.lookup_dim = dim;
        self
    }

    pub fn optimizer(mut self, optimizer: OptimizerConfig) -> Self {
        self.config.optimizer = optimizer;
        self
    }

    pub fn build(self) -> ClassifierConfig {
        self.config
    }
}

impl Default for ClassifierConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
