//! Configuration Loader
//!
//! Environment-aware loading and merging: a base file, an environment-specific
//! overlay, and `REVIEWFLOW__`-prefixed environment variables, later sources
//! winning. Missing files fall back to defaults so a bare checkout runs.

use super::ReviewFlowConfig;
use crate::error::ReviewFlowError;
use config::{Config, Environment, File, FileFormat};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Loaded configuration plus the environment it was resolved for.
#[derive(Debug)]
pub struct ConfigManager {
    config: ReviewFlowConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load with environment auto-detection from the default directory.
    pub fn load() -> Result<Arc<ConfigManager>, ReviewFlowError> {
        Self::load_from_directory(None)
    }

    pub fn load_from_directory(
        config_dir: Option<PathBuf>,
    ) -> Result<Arc<ConfigManager>, ReviewFlowError> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Explicit-environment variant, used by tests so they never mutate global
    /// environment variables.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> Result<Arc<ConfigManager>, ReviewFlowError> {
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from("config"));

        debug!(
            environment = %environment,
            directory = %config_directory.display(),
            "Loading configuration"
        );

        let base = config_directory.join("reviewflow.toml");
        let overlay = config_directory.join(format!("reviewflow.{environment}.toml"));

        let merged = Config::builder()
            .add_source(File::from(base).format(FileFormat::Toml).required(false))
            .add_source(File::from(overlay).format(FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix("REVIEWFLOW")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .map_err(|e| ReviewFlowError::ConfigurationError(e.to_string()))?;

        let config: ReviewFlowConfig = merged
            .try_deserialize()
            .map_err(|e| ReviewFlowError::ConfigurationError(e.to_string()))?;

        config.validate()?;

        debug!(
            environment = %environment,
            provider_preference = ?config.providers.preference,
            "Configuration loaded"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// `REVIEWFLOW_ENV`, falling back to `APP_ENV`, then `development`.
    pub fn detect_environment() -> String {
        env::var("REVIEWFLOW_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }

    pub fn config(&self) -> &ReviewFlowConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &PathBuf {
        &self.config_directory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_files_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test")
                .unwrap();
        assert_eq!(manager.environment(), "test");
        assert_eq!(manager.config().providers.preference, vec!["ollama", "gemini"]);
    }

    #[test]
    fn test_environment_overlay_wins_over_base() {
        let dir = tempfile::tempdir().unwrap();
        let mut base = std::fs::File::create(dir.path().join("reviewflow.toml")).unwrap();
        writeln!(base, "[retry]\nmax_attempts = 7\nbase_delay_ms = 100").unwrap();
        let mut overlay =
            std::fs::File::create(dir.path().join("reviewflow.production.toml")).unwrap();
        writeln!(overlay, "[retry]\nmax_attempts = 3").unwrap();

        let manager = ConfigManager::load_from_directory_with_env(
            Some(dir.path().to_path_buf()),
            "production",
        )
        .unwrap();
        assert_eq!(manager.config().retry.max_attempts, 3);
        // Base values the overlay does not touch survive the merge.
        assert_eq!(manager.config().retry.base_delay_ms, 100);
    }

    #[test]
    fn test_invalid_configuration_rejected_at_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut base = std::fs::File::create(dir.path().join("reviewflow.toml")).unwrap();
        writeln!(base, "[providers]\npreference = [\"nonexistent\"]").unwrap();

        let error =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test")
                .unwrap_err();
        assert!(matches!(error, ReviewFlowError::ConfigurationError(_)));
    }
}
