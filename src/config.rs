use crate::cache::ValidationContext;
use crate::cli::{Cli, OutputFormat};
use crate::error::ValidationError;
use crate::policy::ValidationMode;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const ENV_PREFIX: &str = "AS4_VALIDATE_";

/// Trait for abstracting environment variable access
pub trait EnvProvider {
    fn get(&self, key: &str) -> Option<String>;
}

/// System environment variable provider for production use
pub struct SystemEnvProvider;

impl EnvProvider for SystemEnvProvider {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("JSON parsing error: {0}")]
    JsonParsing(#[from] serde_json::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable error: {0}")]
    Environment(String),

    #[error("Unsupported configuration file format: {0}")]
    UnsupportedFormat(String),
}

impl From<ConfigError> for ValidationError {
    fn from(err: ConfigError) -> Self {
        ValidationError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub validation: ValidationConfig,
    pub schemas: SchemaConfig,
    pub output: OutputConfig,
    pub files: FileConfig,
}

/// Validation-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ValidationConfig {
    /// Outcome mode as written by the user; parsed leniently
    pub mode: Option<String>,
    /// Schema group for whole-document validation
    pub context: ValidationContext,
    /// Run the receipt check instead of whole-document validation
    pub receipt: bool,
    /// Number of concurrent validation tasks
    pub threads: Option<usize>,
    /// Per-file timeout in seconds
    pub timeout_seconds: u64,
}

/// Schema resource configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchemaConfig {
    /// Root of the schema resource store
    pub directory: PathBuf,
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct OutputConfig {
    pub format: OutputFormat,
    /// Verbose output
    pub verbose: bool,
    /// Quiet mode (failures only)
    pub quiet: bool,
}

/// File processing configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FileConfig {
    /// File extensions to process
    pub extensions: Vec<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            mode: None,
            context: ValidationContext::SignalMessage,
            receipt: false,
            threads: None,
            timeout_seconds: 30,
        }
    }
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("schemas"),
        }
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["xml".to_string()],
        }
    }
}

/// Configuration manager for loading and merging configurations
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration with precedence: defaults -> file -> environment -> CLI
    pub async fn load_config(cli: &Cli) -> Result<Config> {
        Self::load_config_with(cli, &SystemEnvProvider).await
    }

    pub async fn load_config_with(cli: &Cli, env: &impl EnvProvider) -> Result<Config> {
        let mut config = Config::default();

        if let Some(config_path) = &cli.config {
            let file_config = Self::load_from_file(config_path).await?;
            config = Self::merge_configs(config, file_config);
        } else if let Some(found_config) = Self::find_config_file().await? {
            config = Self::merge_configs(config, found_config);
        }

        config = Self::apply_environment_overrides_with(env, config)?;
        config = Self::merge_with_cli(config, cli);

        Self::validate_config(&config)?;

        Ok(config)
    }

    /// Load configuration from a file (TOML or JSON)
    pub async fn load_from_file(path: &Path) -> Result<Config> {
        let content = tokio::fs::read_to_string(path).await?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(toml::from_str(&content)?),
            Some("json") => Ok(serde_json::from_str(&content)?),
            Some(ext) => Err(ConfigError::UnsupportedFormat(ext.to_string())),
            None => {
                // Try TOML first, then JSON
                if let Ok(config) = toml::from_str::<Config>(&content) {
                    Ok(config)
                } else {
                    Ok(serde_json::from_str(&content)?)
                }
            }
        }
    }

    /// Find a configuration file in the working directory or the user config directory
    pub async fn find_config_file() -> Result<Option<Config>> {
        let config_names = [
            "as4-validate.toml",
            "as4-validate.json",
            ".as4-validate.toml",
            ".as4-validate.json",
        ];

        for name in &config_names {
            let path = PathBuf::from(name);
            if tokio::fs::try_exists(&path).await? {
                return Ok(Some(Self::load_from_file(&path).await?));
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let app_config_dir = config_dir.join("as4-validate");
            for name in &config_names {
                let path = app_config_dir.join(name);
                if tokio::fs::try_exists(&path).await? {
                    return Ok(Some(Self::load_from_file(&path).await?));
                }
            }
        }

        Ok(None)
    }

    /// Apply environment variable overrides using the system environment
    pub fn apply_environment_overrides(config: Config) -> Result<Config> {
        Self::apply_environment_overrides_with(&SystemEnvProvider, config)
    }

    /// Apply environment variable overrides with a custom environment provider
    pub fn apply_environment_overrides_with(
        env: &impl EnvProvider,
        mut config: Config,
    ) -> Result<Config> {
        let var = |name: &str| env.get(&format!("{}{}", ENV_PREFIX, name));
        let invalid = |name: &str, value: &str| {
            ConfigError::Environment(format!("Invalid {}{} value: {}", ENV_PREFIX, name, value))
        };

        // Validation settings
        if let Some(mode) = var("MODE") {
            config.validation.mode = Some(mode);
        }

        if let Some(context) = var("CONTEXT") {
            config.validation.context =
                ValidationContext::from_str(&context, true).map_err(|_| invalid("CONTEXT", &context))?;
        }

        if let Some(receipt) = var("RECEIPT") {
            config.validation.receipt = receipt.parse().map_err(|_| invalid("RECEIPT", &receipt))?;
        }

        if let Some(threads) = var("THREADS") {
            config.validation.threads =
                Some(threads.parse().map_err(|_| invalid("THREADS", &threads))?);
        }

        if let Some(timeout) = var("TIMEOUT") {
            config.validation.timeout_seconds =
                timeout.parse().map_err(|_| invalid("TIMEOUT", &timeout))?;
        }

        // Schema settings
        if let Some(schema_dir) = var("SCHEMA_DIR") {
            config.schemas.directory = PathBuf::from(schema_dir);
        }

        // Output settings
        if let Some(verbose) = var("VERBOSE") {
            config.output.verbose = verbose.parse().map_err(|_| invalid("VERBOSE", &verbose))?;
        }

        if let Some(quiet) = var("QUIET") {
            config.output.quiet = quiet.parse().map_err(|_| invalid("QUIET", &quiet))?;
        }

        if let Some(format) = var("FORMAT") {
            config.output.format =
                OutputFormat::from_str(&format, true).map_err(|_| invalid("FORMAT", &format))?;
        }

        // File settings
        if let Some(extensions) = var("EXTENSIONS") {
            config.files.extensions = extensions
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        Ok(config)
    }

    /// Merge CLI arguments with configuration (CLI takes precedence)
    pub fn merge_with_cli(mut config: Config, cli: &Cli) -> Config {
        if cli.mode.is_some() {
            config.validation.mode = cli.mode.clone();
        }
        if let Some(context) = cli.context {
            config.validation.context = context;
        }
        if cli.receipt {
            config.validation.receipt = true;
        }
        if cli.threads.is_some() {
            config.validation.threads = cli.threads;
        }
        if let Some(timeout) = cli.timeout {
            config.validation.timeout_seconds = timeout;
        }

        if let Some(schema_dir) = &cli.schema_dir {
            config.schemas.directory = schema_dir.clone();
        }

        if let Some(format) = cli.format {
            config.output.format = format;
        }
        if cli.verbose {
            config.output.verbose = true;
            config.output.quiet = false;
        }
        if cli.quiet {
            config.output.quiet = true;
            config.output.verbose = false;
        }

        if let Some(extensions) = cli.get_extensions() {
            config.files.extensions = extensions;
        }

        config
    }

    /// Merge two configurations (second takes precedence)
    pub fn merge_configs(mut base: Config, override_config: Config) -> Config {
        if override_config.validation.mode.is_some() {
            base.validation.mode = override_config.validation.mode;
        }
        if override_config.validation.threads.is_some() {
            base.validation.threads = override_config.validation.threads;
        }
        base.validation.context = override_config.validation.context;
        base.validation.receipt = override_config.validation.receipt;
        base.validation.timeout_seconds = override_config.validation.timeout_seconds;

        base.schemas.directory = override_config.schemas.directory;

        base.output = override_config.output;

        if !override_config.files.extensions.is_empty() {
            base.files.extensions = override_config.files.extensions;
        }

        base
    }

    /// Validate configuration values
    pub fn validate_config(config: &Config) -> Result<()> {
        if let Some(threads) = config.validation.threads {
            if threads == 0 {
                return Err(ConfigError::Validation(
                    "Number of threads must be greater than 0".to_string(),
                ));
            }
            if threads > 1000 {
                return Err(ConfigError::Validation(
                    "Number of threads cannot exceed 1000".to_string(),
                ));
            }
        }

        if config.validation.timeout_seconds == 0 {
            return Err(ConfigError::Validation(
                "Timeout must be greater than 0".to_string(),
            ));
        }

        if config.output.verbose && config.output.quiet {
            return Err(ConfigError::Validation(
                "Cannot enable both verbose and quiet modes".to_string(),
            ));
        }

        if config.files.extensions.is_empty() {
            return Err(ConfigError::Validation(
                "At least one file extension must be specified".to_string(),
            ));
        }

        for ext in &config.files.extensions {
            if ext.contains('/') || ext.contains('\\') || ext.contains('.') {
                return Err(ConfigError::Validation(format!(
                    "Invalid file extension: {}",
                    ext
                )));
            }
        }

        Ok(())
    }

    /// The outcome mode, defaulting to advisory when unset or unrecognized
    pub fn get_validation_mode(config: &Config) -> ValidationMode {
        ValidationMode::from_setting(config.validation.mode.as_deref())
    }

    pub fn get_thread_count(config: &Config) -> usize {
        config.validation.threads.unwrap_or_else(num_cpus::get)
    }

    pub fn get_timeout_duration(config: &Config) -> Duration {
        Duration::from_secs(config.validation.timeout_seconds)
    }
}
