use serde::{Deserialize, Serialize};

use crate::paths;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the answer service, e.g. "http://localhost:8000"
    pub base_url: String,
    #[serde(default)]
    pub top_k: Option<u32>,
    #[serde(default = "default_streaming")]
    pub streaming: bool,
}

const CONFIG_FILE_PATH: &str = "config.toml";

fn default_streaming() -> bool {
    true
}

fn parse_bool_env(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        let mut config = ClientConfig {
            base_url: "http://localhost:8000".to_string(),
            top_k: None,
            streaming: true,
        };

        let mut loaded = false;
        let json_path = paths::config_json_path();
        if json_path.exists() {
            if let Ok(content) = std::fs::read_to_string(&json_path) {
                if let Ok(file_config) = serde_json::from_str::<ClientConfig>(&content) {
                    config = file_config;
                    loaded = true;
                }
            }
        }

        if !loaded && std::path::Path::new(CONFIG_FILE_PATH).exists() {
            if let Ok(content) = std::fs::read_to_string(CONFIG_FILE_PATH) {
                if let Ok(file_config) = toml::from_str::<ClientConfig>(&content) {
                    config = file_config;
                }
            }
        }

        if let Ok(base_url) = std::env::var("QA_BASE_URL") {
            config.base_url = base_url;
        }
        if let Ok(top_k) = std::env::var("QA_TOP_K") {
            if let Ok(value) = top_k.trim().parse::<u32>() {
                config.top_k = Some(value);
            }
        }
        if let Ok(streaming) = std::env::var("QA_STREAMING") {
            config.streaming = parse_bool_env(&streaming);
        }
        config
    }
}
