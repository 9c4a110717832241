//! Configuration for bridgeline

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the optional semantic memory layer.
///
/// When absent the system runs on structured local storage alone, which is
/// a fully supported mode.
#[derive(Debug, Clone)]
pub struct SemanticConfig {
    /// Base URL of the external retrieval service
    pub base_url: String,

    /// Bearer token for the retrieval service
    pub api_key: String,

    /// Upper bound on any single semantic-layer request
    pub timeout: Duration,
}

/// Configuration for the memory and session system
#[derive(Debug, Clone)]
pub struct Config {
    /// Base directory for all caller storage
    pub data_dir: PathBuf,

    /// Base URL of the generation model API
    pub model_base_url: String,

    /// API key for the generation model
    pub model_api_key: String,

    /// Model name used for roleplay and analysis calls
    pub model_name: String,

    /// Timeout for non-streaming model calls
    pub model_timeout: Duration,

    /// Semantic layer settings, if configured
    pub semantic: Option<SemanticConfig>,

    /// HTTP server port
    pub server_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            model_base_url: "https://api.anthropic.com".to_string(),
            model_api_key: String::new(),
            model_name: "claude-sonnet-4-5-20250929".to_string(),
            model_timeout: Duration::from_secs(60),
            semantic: None,
            server_port: 8000,
        }
    }
}

impl Config {
    /// Create a new config with a custom data directory
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Build a config from environment variables.
    ///
    /// Absent semantic-layer variables mean the semantic layer is disabled,
    /// not misconfigured.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let semantic = std::env::var("MEMU_API_KEY").ok().map(|api_key| SemanticConfig {
            base_url: std::env::var("MEMU_BASE_URL")
                .unwrap_or_else(|_| "https://api.memu.so".to_string()),
            api_key,
            timeout: Duration::from_secs(30),
        });

        Self {
            data_dir: std::env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            model_base_url: std::env::var("MODEL_BASE_URL").unwrap_or(defaults.model_base_url),
            model_api_key: std::env::var("MODEL_API_KEY").unwrap_or_default(),
            model_name: std::env::var("MODEL_NAME").unwrap_or(defaults.model_name),
            model_timeout: defaults.model_timeout,
            semantic,
            server_port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.server_port),
        }
    }

    /// Ensure the data directory exists
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)
    }
}
