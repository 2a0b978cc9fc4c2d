use std::{
    collections::BTreeMap,
    env,
    path::{Path, PathBuf},
    time::Duration,
};

use config as cfg;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    CatalogError, Result, StoreLimits, DEFAULT_MAX_BATCH_OPERATIONS, DEFAULT_MAX_IDS_PER_QUERY,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "StoreConfig::default_max_ids_per_query")]
    pub max_ids_per_query: usize,
    #[serde(default = "StoreConfig::default_max_batch_operations")]
    pub max_batch_operations: usize,
    #[serde(default = "StoreConfig::default_commit_timeout_secs")]
    pub commit_timeout_secs: u64,
    /// JSON file backing the operator CLI's store.
    #[serde(default = "StoreConfig::default_data_path")]
    pub data_path: String,
}

impl StoreConfig {
    fn default_max_ids_per_query() -> usize {
        DEFAULT_MAX_IDS_PER_QUERY
    }

    fn default_max_batch_operations() -> usize {
        DEFAULT_MAX_BATCH_OPERATIONS
    }

    fn default_commit_timeout_secs() -> u64 {
        30
    }

    fn default_data_path() -> String {
        "data/catalog.json".to_string()
    }

    pub fn limits(&self) -> StoreLimits {
        StoreLimits {
            max_ids_per_query: self.max_ids_per_query,
            max_batch_operations: self.max_batch_operations,
        }
    }

    pub fn commit_timeout(&self) -> Duration {
        Duration::from_secs(self.commit_timeout_secs)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_ids_per_query: Self::default_max_ids_per_query(),
            max_batch_operations: Self::default_max_batch_operations(),
            commit_timeout_secs: Self::default_commit_timeout_secs(),
            data_path: Self::default_data_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Reject an edit whose snapshot version no longer matches the stored one.
    #[serde(default = "EngineConfig::default_optimistic_concurrency")]
    pub optimistic_concurrency: bool,
}

impl EngineConfig {
    fn default_optimistic_concurrency() -> bool {
        true
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            optimistic_concurrency: Self::default_optimistic_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing)]
    pub secret: Option<SecretString>,
    #[serde(default = "InvalidationConfig::default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "InvalidationConfig::default_timeout_secs")]
    pub timeout_secs: u64,
    /// Category name -> public category page path.
    #[serde(default = "InvalidationConfig::default_categories")]
    pub categories: BTreeMap<String, String>,
}

impl InvalidationConfig {
    fn default_max_attempts() -> usize {
        3
    }

    fn default_timeout_secs() -> u64 {
        10
    }

    fn default_categories() -> BTreeMap<String, String> {
        [
            ("Ys Series", "/ys-series"),
            ("Gagharv Trilogy", "/gagharv-trilogy"),
            ("Trails Series", "/trails-series"),
            ("Dragon Slayer", "/dragon-slayer"),
        ]
        .into_iter()
        .map(|(category, path)| (category.to_string(), path.to_string()))
        .collect()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for InvalidationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            secret: None,
            max_attempts: Self::default_max_attempts(),
            timeout_secs: Self::default_timeout_secs(),
            categories: Self::default_categories(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    /// HS256 secret used to verify operator bearer tokens.
    #[serde(default, skip_serializing)]
    pub jwt_secret: Option<SecretString>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "Settings::default_env")]
    pub env: String,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub invalidation: InvalidationConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            env: Self::default_env(),
            store: StoreConfig::default(),
            engine: EngineConfig::default(),
            invalidation: InvalidationConfig::default(),
            auth: AuthConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Settings {
    fn default_env() -> String {
        env::var("APP_ENV")
            .ok()
            .or_else(|| env::var("RUST_ENV").ok())
            .unwrap_or_else(|| "development".to_string())
    }

    pub fn validate(&self) -> Result<()> {
        ensure(
            self.store.max_ids_per_query > 0,
            "store.max_ids_per_query must be > 0",
        )?;
        ensure(
            self.store.max_batch_operations > 0,
            "store.max_batch_operations must be > 0",
        )?;
        ensure(
            self.store.commit_timeout_secs > 0,
            "store.commit_timeout_secs must be > 0",
        )?;
        ensure(
            self.invalidation.max_attempts > 0,
            "invalidation.max_attempts must be > 0",
        )?;
        if self.invalidation.enabled {
            ensure(
                self.invalidation
                    .endpoint
                    .as_deref()
                    .is_some_and(|e| !e.trim().is_empty()),
                "invalidation.endpoint is required when invalidation is enabled",
            )?;
        }
        for (category, path) in &self.invalidation.categories {
            if !path.starts_with('/') {
                return Err(CatalogError::Config(format!(
                    "invalidation.categories.{} must start with '/', got '{}'",
                    category, path
                )));
            }
        }
        Ok(())
    }
}

fn ensure(condition: bool, message: &str) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(CatalogError::Config(message.to_string()))
    }
}

pub struct ConfigManager;

impl ConfigManager {
    /// `~/.catalog/` when it exists, then `./config/`, then the working directory.
    pub fn default_config_dir() -> PathBuf {
        if let Some(home_dir) = dirs::home_dir() {
            let catalog_dir = home_dir.join(".catalog");
            if catalog_dir.exists() {
                info!("Using config directory: {:?}", catalog_dir);
                return catalog_dir;
            }
        }

        let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let project_config = cwd.join("config");
        if project_config.exists() {
            info!("Using config directory: {:?}", project_config);
            return project_config;
        }

        info!("Using config directory: {:?}", cwd);
        cwd
    }

    /// Load and validate settings from `dir` (or the default directory).
    pub fn load(dir: Option<PathBuf>) -> Result<Settings> {
        let config_dir = dir.unwrap_or_else(Self::default_config_dir);
        let settings = Self::load_from_sources(&config_dir, &Settings::default_env())?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load_from_sources(config_dir: &Path, env_name: &str) -> Result<Settings> {
        let builder = cfg::Config::builder()
            .add_source(cfg::File::from(config_dir.join("default.toml")).required(false))
            .add_source(cfg::File::from(config_dir.join("default.yaml")).required(false))
            .add_source(cfg::File::from(config_dir.join("default.json")).required(false))
            .add_source(
                cfg::File::from(config_dir.join(format!("{}.toml", env_name))).required(false),
            )
            .add_source(cfg::File::from(config_dir.join("local.toml")).required(false))
            .add_source(cfg::Environment::with_prefix("CATALOG").separator("__"));

        builder
            .build()
            .map_err(|e| CatalogError::Config(format!("building configuration: {}", e)))?
            .try_deserialize()
            .map_err(|e| CatalogError::Config(format!("deserializing configuration: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.store.limits(), StoreLimits::default());
        assert_eq!(settings.invalidation.max_attempts, 3);
        assert!(settings.engine.optimistic_concurrency);
    }

    #[test]
    fn enabled_invalidation_requires_endpoint() {
        let mut settings = Settings::default();
        settings.invalidation.enabled = true;
        assert!(settings.validate().is_err());

        settings.invalidation.endpoint = Some("https://pages.example.com/api/revalidate".into());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn category_paths_must_be_absolute() {
        let mut settings = Settings::default();
        settings
            .invalidation
            .categories
            .insert("Kiseki".into(), "kiseki".into());
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("invalidation.categories.Kiseki"));
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let mut settings = Settings::default();
        settings.store.max_ids_per_query = 0;
        assert!(matches!(settings.validate(), Err(CatalogError::Config(_))));
    }
}
