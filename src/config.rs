use crate::cache::CacheConfig;
use crate::charset::Encoding;
use crate::cli::Cli;
use crate::error::ConfigError;
use crate::validator::{ReportPolicy, ValidationSettings};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

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

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Legacy name of the fail-on-warning setting, still honoured.
pub const LEGACY_FAIL_ON_WARNING_ENV: &str = "RAML_JSON_SCHEMA_FAIL_ON_WARNING";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub validation: ValidationConfig,
    pub encoding: EncodingConfig,
    pub cache: CacheSizeConfig,
    pub schemas: SchemaConfig,
}

/// Validation-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ValidationConfig {
    /// Treat schema warnings as failures
    pub fail_on_warning: bool,
    /// Stop at the first violation or collect all of them
    pub report_policy: ReportPolicy,
    /// Longest wait on an in-flight schema or transformer build
    pub build_timeout_ms: Option<u64>,
    /// Number of payloads validated concurrently
    pub threads: Option<usize>,
}

/// Charset configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EncodingConfig {
    /// Charset used when neither the header nor the payload identifies one
    pub default_encoding: String,
}

/// Artifact cache bounds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheSizeConfig {
    /// Maximum compiled schemas kept per validator
    pub max_schemas: u64,
    /// Maximum transformers kept
    pub max_transformers: u64,
}

/// Filesystem schema source configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchemaConfig {
    pub root: PathBuf,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            fail_on_warning: false,
            report_policy: ReportPolicy::FailFast,
            build_timeout_ms: Some(30_000),
            threads: None,
        }
    }
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            default_encoding: "UTF-8".to_string(),
        }
    }
}

impl Default for CacheSizeConfig {
    fn default() -> Self {
        Self {
            max_schemas: 1000,
            max_transformers: 1000,
        }
    }
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
        }
    }
}

impl Config {
    pub fn validation_settings(&self) -> ValidationSettings {
        ValidationSettings {
            fail_on_warning: self.validation.fail_on_warning,
            report_policy: self.validation.report_policy,
        }
    }

    pub fn default_encoding(&self) -> Encoding {
        Encoding::new(self.encoding.default_encoding.clone()).canonicalize()
    }

    pub fn build_timeout(&self) -> Option<Duration> {
        self.validation.build_timeout_ms.map(Duration::from_millis)
    }

    pub fn schema_cache_config(&self) -> CacheConfig {
        CacheConfig {
            max_capacity: self.cache.max_schemas,
            build_timeout: self.build_timeout(),
        }
    }

    pub fn transformer_cache_config(&self) -> CacheConfig {
        CacheConfig {
            max_capacity: self.cache.max_transformers,
            build_timeout: self.build_timeout(),
        }
    }

    /// Effective concurrency: configured threads, else one per CPU.
    pub fn thread_count(&self) -> usize {
        self.validation.threads.unwrap_or_else(num_cpus::get)
    }
}

/// Configuration manager for loading and merging configurations
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration with precedence: defaults -> file -> environment -> CLI
    pub async fn load_config(cli: &Cli) -> Result<Config> {
        Self::load_config_with(&SystemEnvProvider, cli).await
    }

    pub async fn load_config_with(env: &impl EnvProvider, cli: &Cli) -> Result<Config> {
        let mut config = match &cli.config {
            Some(config_path) => Self::load_from_file(config_path).await?,
            None => Self::find_config_file().await?.unwrap_or_default(),
        };

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
            None => match toml::from_str::<Config>(&content) {
                Ok(config) => Ok(config),
                Err(_) => Ok(serde_json::from_str(&content)?),
            },
        }
    }

    /// Find a configuration file in the current directory, then the user
    /// config directory.
    pub async fn find_config_file() -> Result<Option<Config>> {
        let config_names = [
            "apikit-validate.toml",
            "apikit-validate.json",
            ".apikit-validate.toml",
            ".apikit-validate.json",
        ];

        for name in &config_names {
            let path = PathBuf::from(name);
            if path.exists() {
                return Ok(Some(Self::load_from_file(&path).await?));
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let app_config_dir = config_dir.join("apikit-validate");
            for name in &config_names {
                let path = app_config_dir.join(name);
                if path.exists() {
                    return Ok(Some(Self::load_from_file(&path).await?));
                }
            }
        }

        Ok(None)
    }

    /// Apply environment variable overrides with a custom environment provider
    pub fn apply_environment_overrides_with(
        env: &impl EnvProvider,
        mut config: Config,
    ) -> Result<Config> {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Environment(format!("Invalid {} value: {}", key, value)))
        }

        // Validation settings; the APIKIT_ name wins over the legacy one
        for key in [LEGACY_FAIL_ON_WARNING_ENV, "APIKIT_FAIL_ON_WARNING"] {
            if let Some(value) = env.get(key) {
                config.validation.fail_on_warning = parse(key, &value)?;
            }
        }

        if let Some(policy) = env.get("APIKIT_REPORT_POLICY") {
            config.validation.report_policy = match policy.to_lowercase().as_str() {
                "fail_fast" | "fail-fast" => ReportPolicy::FailFast,
                "collect_all" | "collect-all" => ReportPolicy::CollectAll,
                _ => {
                    return Err(ConfigError::Environment(format!(
                        "Invalid APIKIT_REPORT_POLICY value: {}",
                        policy
                    )));
                }
            };
        }

        if let Some(timeout) = env.get("APIKIT_BUILD_TIMEOUT_MS") {
            config.validation.build_timeout_ms = Some(parse("APIKIT_BUILD_TIMEOUT_MS", &timeout)?);
        }

        if let Some(threads) = env.get("APIKIT_THREADS") {
            config.validation.threads = Some(parse("APIKIT_THREADS", &threads)?);
        }

        // Encoding settings
        if let Some(encoding) = env.get("APIKIT_DEFAULT_ENCODING") {
            config.encoding.default_encoding = encoding;
        }

        // Cache settings
        if let Some(max) = env.get("APIKIT_MAX_SCHEMAS") {
            config.cache.max_schemas = parse("APIKIT_MAX_SCHEMAS", &max)?;
        }

        if let Some(max) = env.get("APIKIT_MAX_TRANSFORMERS") {
            config.cache.max_transformers = parse("APIKIT_MAX_TRANSFORMERS", &max)?;
        }

        // Schema source
        if let Some(root) = env.get("APIKIT_SCHEMA_ROOT") {
            config.schemas.root = PathBuf::from(root);
        }

        Ok(config)
    }

    /// Merge CLI arguments with configuration (CLI takes precedence)
    pub fn merge_with_cli(mut config: Config, cli: &Cli) -> Config {
        if cli.fail_on_warning {
            config.validation.fail_on_warning = true;
        }
        if cli.collect_all {
            config.validation.report_policy = ReportPolicy::CollectAll;
        }
        if cli.threads.is_some() {
            config.validation.threads = cli.threads;
        }
        if let Some(encoding) = &cli.default_encoding {
            config.encoding.default_encoding = encoding.clone();
        }
        if let Some(root) = &cli.schema_root {
            config.schemas.root = root.clone();
        }

        config
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

        if config.validation.build_timeout_ms == Some(0) {
            return Err(ConfigError::Validation(
                "Build timeout must be greater than 0".to_string(),
            ));
        }

        if config.cache.max_schemas == 0 || config.cache.max_transformers == 0 {
            return Err(ConfigError::Validation(
                "Cache capacities must be greater than 0".to_string(),
            ));
        }

        if !config.default_encoding().is_supported() {
            return Err(ConfigError::Validation(format!(
                "Unsupported default encoding: {}",
                config.encoding.default_encoding
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    /// Mock environment variable provider for testing
    #[derive(Default)]
    struct MockEnvProvider {
        vars: HashMap<String, String>,
    }

    impl MockEnvProvider {
        fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
            self.vars.insert(key.into(), value.into());
        }
    }

    impl EnvProvider for MockEnvProvider {
        fn get(&self, key: &str) -> Option<String> {
            self.vars.get(key).cloned()
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert!(!config.validation.fail_on_warning);
        assert_eq!(config.validation.report_policy, ReportPolicy::FailFast);
        assert_eq!(config.validation.build_timeout_ms, Some(30_000));
        assert_eq!(config.validation.threads, None);
        assert_eq!(config.encoding.default_encoding, "UTF-8");
        assert_eq!(config.cache.max_schemas, 1000);
        assert_eq!(config.cache.max_transformers, 1000);
        assert_eq!(config.schemas.root, PathBuf::from("."));

        assert!(ConfigManager::validate_config(&config).is_ok());
    }

    #[tokio::test]
    async fn test_load_toml_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let toml_content = r#"
[validation]
fail_on_warning = true
report_policy = "collect_all"
build_timeout_ms = 5000
threads = 8

[encoding]
default_encoding = "ISO-8859-1"

[cache]
max_schemas = 50
max_transformers = 20

[schemas]
root = "/srv/schemas"
"#;

        fs::write(&config_path, toml_content).unwrap();

        let config = ConfigManager::load_from_file(&config_path).await.unwrap();

        assert!(config.validation.fail_on_warning);
        assert_eq!(config.validation.report_policy, ReportPolicy::CollectAll);
        assert_eq!(config.build_timeout(), Some(Duration::from_secs(5)));
        assert_eq!(config.thread_count(), 8);
        assert_eq!(config.default_encoding().as_str(), "ISO-8859-1");
        assert_eq!(config.schema_cache_config().max_capacity, 50);
        assert_eq!(config.transformer_cache_config().max_capacity, 20);
        assert_eq!(config.schemas.root, PathBuf::from("/srv/schemas"));
    }

    #[tokio::test]
    async fn test_load_partial_json_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");

        fs::write(&config_path, r#"{"validation": {"fail_on_warning": true}}"#).unwrap();

        let config = ConfigManager::load_from_file(&config_path).await.unwrap();

        assert!(config.validation.fail_on_warning);
        assert_eq!(config.validation.report_policy, ReportPolicy::FailFast);
        assert_eq!(config.encoding, EncodingConfig::default());
    }

    #[tokio::test]
    async fn test_unsupported_file_format() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        fs::write(&config_path, "invalid: yaml").unwrap();

        match ConfigManager::load_from_file(&config_path).await.unwrap_err() {
            ConfigError::UnsupportedFormat(ext) => assert_eq!(ext, "yaml"),
            other => panic!("Expected UnsupportedFormat error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        fs::write(&config_path, "invalid toml [[[").unwrap();

        let result = ConfigManager::load_from_file(&config_path).await;
        assert!(matches!(result.unwrap_err(), ConfigError::TomlParsing(_)));
    }

    #[tokio::test]
    async fn test_invalid_json() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");

        fs::write(&config_path, "{ invalid json }").unwrap();

        let result = ConfigManager::load_from_file(&config_path).await;
        assert!(matches!(result.unwrap_err(), ConfigError::JsonParsing(_)));
    }

    #[test]
    fn test_environment_overrides() {
        let mut mock_env = MockEnvProvider::default();
        mock_env.set("APIKIT_FAIL_ON_WARNING", "true");
        mock_env.set("APIKIT_REPORT_POLICY", "collect-all");
        mock_env.set("APIKIT_BUILD_TIMEOUT_MS", "250");
        mock_env.set("APIKIT_THREADS", "16");
        mock_env.set("APIKIT_DEFAULT_ENCODING", "UTF-16LE");
        mock_env.set("APIKIT_MAX_SCHEMAS", "10");
        mock_env.set("APIKIT_SCHEMA_ROOT", "/env/schemas");

        let config =
            ConfigManager::apply_environment_overrides_with(&mock_env, Config::default()).unwrap();

        assert!(config.validation.fail_on_warning);
        assert_eq!(config.validation.report_policy, ReportPolicy::CollectAll);
        assert_eq!(config.validation.build_timeout_ms, Some(250));
        assert_eq!(config.validation.threads, Some(16));
        assert_eq!(config.default_encoding().as_str(), "UTF-16");
        assert_eq!(config.cache.max_schemas, 10);
        assert_eq!(config.schemas.root, PathBuf::from("/env/schemas"));
    }

    #[test]
    fn test_legacy_fail_on_warning_variable() {
        let mut mock_env = MockEnvProvider::default();
        mock_env.set(LEGACY_FAIL_ON_WARNING_ENV, "true");
        let config =
            ConfigManager::apply_environment_overrides_with(&mock_env, Config::default()).unwrap();
        assert!(config.validation.fail_on_warning);

        // The current name takes precedence
        mock_env.set("APIKIT_FAIL_ON_WARNING", "false");
        let config =
            ConfigManager::apply_environment_overrides_with(&mock_env, Config::default()).unwrap();
        assert!(!config.validation.fail_on_warning);
    }

    #[test]
    fn test_invalid_environment_values() {
        for (key, value) in [
            ("APIKIT_THREADS", "many"),
            ("APIKIT_FAIL_ON_WARNING", "maybe"),
            ("APIKIT_REPORT_POLICY", "sometimes"),
        ] {
            let mut mock_env = MockEnvProvider::default();
            mock_env.set(key, value);

            let result = ConfigManager::apply_environment_overrides_with(&mock_env, Config::default());
            assert!(
                matches!(result, Err(ConfigError::Environment(_))),
                "{} should be rejected",
                key
            );
        }
    }

    #[test]
    fn test_merge_with_cli() {
        let cli = Cli::try_parse_from([
            "apikit-validate",
            "--schema",
            "s.json",
            "--threads",
            "12",
            "--collect-all",
            "--fail-on-warning",
            "--default-encoding",
            "windows-1252",
            "--schema-root",
            "/cli/schemas",
            "a.json",
        ])
        .unwrap();

        let config = ConfigManager::merge_with_cli(Config::default(), &cli);

        assert_eq!(config.validation.threads, Some(12));
        assert_eq!(config.validation.report_policy, ReportPolicy::CollectAll);
        assert!(config.validation.fail_on_warning);
        assert_eq!(config.encoding.default_encoding, "windows-1252");
        assert_eq!(config.schemas.root, PathBuf::from("/cli/schemas"));
    }

    #[test]
    fn test_unset_cli_flags_keep_config_values() {
        let cli = Cli::try_parse_from(["apikit-validate", "-s", "s.json", "a.json"]).unwrap();

        let mut base = Config::default();
        base.validation.fail_on_warning = true;
        base.validation.report_policy = ReportPolicy::CollectAll;

        let config = ConfigManager::merge_with_cli(base.clone(), &cli);
        assert_eq!(config, base);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(ConfigManager::validate_config(&config).is_ok());

        config.validation.threads = Some(0);
        assert!(ConfigManager::validate_config(&config).is_err());
        config.validation.threads = Some(1001);
        assert!(ConfigManager::validate_config(&config).is_err());
        config.validation.threads = Some(4);

        config.validation.build_timeout_ms = Some(0);
        assert!(ConfigManager::validate_config(&config).is_err());
        config.validation.build_timeout_ms = None;
        assert!(ConfigManager::validate_config(&config).is_ok());

        config.cache.max_transformers = 0;
        assert!(ConfigManager::validate_config(&config).is_err());
        config.cache.max_transformers = 10;

        config.encoding.default_encoding = "klingon-8".to_string();
        assert!(ConfigManager::validate_config(&config).is_err());
    }

    #[tokio::test]
    async fn test_load_config_precedence() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");
        fs::write(
            &config_path,
            r#"
[validation]
threads = 6
build_timeout_ms = 1000

[encoding]
default_encoding = "ISO-8859-1"
"#,
        )
        .unwrap();

        let mut env = MockEnvProvider::default();
        env.set("APIKIT_BUILD_TIMEOUT_MS", "2000");
        env.set("APIKIT_THREADS", "7");

        let cli = Cli::try_parse_from([
            "apikit-validate",
            "--config",
            config_path.to_str().unwrap(),
            "--threads",
            "8",
            "-s",
            "s.json",
            "a.json",
        ])
        .unwrap();

        let config = ConfigManager::load_config_with(&env, &cli).await.unwrap();

        assert_eq!(config.validation.threads, Some(8)); // CLI over env over file
        assert_eq!(config.validation.build_timeout_ms, Some(2000)); // env over file
        assert_eq!(config.encoding.default_encoding, "ISO-8859-1"); // file over default
    }
}
