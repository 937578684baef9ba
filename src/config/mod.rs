use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{ForgeError, Result};

pub const DEFAULT_CONFIG_FILE: &str = "feedforge.toml";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub model: ModelConfig,
    pub synthesis: SynthesisConfig,
    pub fetch: FetchConfig,
    pub logging: LoggingConfig,
}

/// OpenAI-compatible model service.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ModelConfig {
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub referer: Option<String>,
    pub app_title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub max_iterations: u32,
    /// Samples returned per selector test.
    pub sample_limit: usize,
    /// Character cap per sample.
    pub sample_chars: usize,
    /// Character cap of the trimmed markup embedded in the prompt.
    pub max_prompt_chars: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FetchConfig {
    pub user_agent: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
    pub json: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai/api/v1".to_string(),
            model: "anthropic/claude-sonnet-4".to_string(),
            api_key_env: "OPENROUTER_API_KEY".to_string(),
            temperature: 0.0,
            max_tokens: 4000,
            timeout: Duration::from_secs(60),
            referer: None,
            app_title: Some("FeedForge".to_string()),
        }
    }
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            sample_limit: 3,
            sample_chars: 300,
            max_prompt_chars: 30_000,
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (compatible; FeedForge/0.1; +https://github.com/feedforge)".to_string(),
            timeout: Duration::from_secs(15),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[async_trait::async_trait]
pub trait ConfigManager {
    async fn load_config(&self) -> Result<AppConfig>;
    async fn save_config(&self, config: &AppConfig) -> Result<()>;
    fn validate_config(&self, config: &AppConfig) -> Result<()>;
}

pub struct FileConfigManager {
    config_path: PathBuf,
}

impl FileConfigManager {
    pub fn new(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    /// The `[logging]` table of the config file, read before the subscriber exists.
    /// Falls back to defaults when the file is missing or unreadable; `load_config`
    /// reports those problems once logging is up.
    pub async fn logging_settings(&self) -> LoggingConfig {
        match fs::read_to_string(&self.config_path).await {
            Ok(content) => toml::from_str::<AppConfig>(&content)
                .map(|config| config.logging)
                .unwrap_or_default(),
            Err(_) => LoggingConfig::default(),
        }
    }
}

#[async_trait::async_trait]
impl ConfigManager for FileConfigManager {
    async fn load_config(&self) -> Result<AppConfig> {
        info!("Loading configuration from {:?}", self.config_path);

        if !fs::try_exists(&self.config_path).await.unwrap_or(false) {
            warn!("Configuration file not found, creating default config at {:?}", self.config_path);
            self.create_default_config().await?;
        }

        let config_content = fs::read_to_string(&self.config_path)
            .await
            .map_err(|e| ForgeError::Config(format!("Failed to read config file: {}", e)))?;

        let config: AppConfig = toml::from_str(&config_content)
            .map_err(|e| ForgeError::Config(format!("Failed to parse TOML config: {}", e)))?;

        self.validate_config(&config)?;

        info!("Configuration loaded successfully");
        Ok(config)
    }

    async fn save_config(&self, config: &AppConfig) -> Result<()> {
        info!("Saving configuration to {:?}", self.config_path);
        self.validate_config(config)?;
        self.write_config(config).await?;
        info!("Configuration saved successfully");
        Ok(())
    }

    fn validate_config(&self, config: &AppConfig) -> Result<()> {
        debug!("Validating configuration");

        // model service
        let base_url = Url::parse(&config.model.base_url)
            .map_err(|e| ForgeError::Config(format!("Invalid model base_url '{}': {}", config.model.base_url, e)))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(ForgeError::Config(
                "model base_url must start with http:// or https://".to_string(),
            ));
        }
        if config.model.model.trim().is_empty() {
            return Err(ForgeError::Config("model name cannot be empty".to_string()));
        }
        if config.model.api_key_env.trim().is_empty() {
            return Err(ForgeError::Config("api_key_env cannot be empty".to_string()));
        }
        if !(0.0..=2.0).contains(&config.model.temperature) {
            return Err(ForgeError::Config(
                "temperature must be between 0.0 and 2.0".to_string(),
            ));
        }
        if config.model.max_tokens == 0 {
            return Err(ForgeError::Config("max_tokens must be greater than 0".to_string()));
        }
        if config.model.timeout.is_zero() {
            return Err(ForgeError::Config("model timeout must be greater than 0".to_string()));
        }

        // synthesis loop
        if !(1..=10).contains(&config.synthesis.max_iterations) {
            return Err(ForgeError::Config(
                "max_iterations must be between 1 and 10".to_string(),
            ));
        }
        if config.synthesis.sample_limit == 0 {
            return Err(ForgeError::Config("sample_limit must be greater than 0".to_string()));
        }
        if config.synthesis.sample_chars == 0 {
            return Err(ForgeError::Config("sample_chars must be greater than 0".to_string()));
        }
        if config.synthesis.max_prompt_chars < 1000 {
            return Err(ForgeError::Config(
                "max_prompt_chars must be at least 1000".to_string(),
            ));
        }

        // page fetch
        if config.fetch.user_agent.trim().is_empty() {
            return Err(ForgeError::Config("user_agent cannot be empty".to_string()));
        }
        if config.fetch.timeout.is_zero() {
            return Err(ForgeError::Config("fetch timeout must be greater than 0".to_string()));
        }

        debug!("Configuration validation passed");
        Ok(())
    }
}

impl FileConfigManager {
    /// Create a default configuration file
    async fn create_default_config(&self) -> Result<()> {
        if let Some(parent) = self.config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ForgeError::Config(format!("Failed to create config directory: {}", e)))?;
        }

        self.write_config(&AppConfig::default()).await?;
        info!("Default configuration file created at {:?}", self.config_path);
        Ok(())
    }

    async fn write_config(&self, config: &AppConfig) -> Result<()> {
        let toml_content = toml::to_string_pretty(config)
            .map_err(|e| ForgeError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(&self.config_path, toml_content)
            .await
            .map_err(|e| ForgeError::Config(format!("Failed to write config file: {}", e)))?;
        Ok(())
    }
}
