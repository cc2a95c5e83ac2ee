use std::env;
use std::path::PathBuf;

pub const CONFIG_VAR: &str = "SMARTFOLDERS_CONFIG";
pub const DEVICE_VAR: &str = "SMARTFOLDERS_DEVICE";

pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub device: String,
}

impl EnvConfig {
    pub fn from_env() -> Self {
        Self {
            config_path: env::var(CONFIG_VAR)
                .ok()
                .filter(|p| !p.is_empty())
                .map(|p| expand_home(&p))
                .or_else(default_config_path),
            device: env::var(DEVICE_VAR).unwrap_or_else(|_| "auto".to_string()),
        }
    }
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// `~/.config/smartfolders/classifier.yaml`, when it exists.
pub fn default_config_path() -> Option<PathBuf> {
    let path = dirs::config_dir()?.join("smartfolders").join("classifier.yaml");
    path.exists().then_some(path)
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
