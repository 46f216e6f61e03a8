//! Configuration System
//!
//! Layered configuration: built-in defaults, then the global file
//! (`$XDG_CONFIG_HOME/examgen/config.toml`), then an explicit file, then `EXAMGEN__*`
//! environment variables. Validation collects every problem instead of stopping at the first.

mod sources;

pub use sources::global_config_path;

use crate::admission::AdmissionConfig;
use crate::artifact::ArtifactsConfig;
use crate::error::ApiError;
use crate::logging::LoggingConfig;
use crate::provider::ProviderConfig;
use crate::quota::QuotaConfig;
use crate::upload::UploadConfig;
use config::Config;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExamgenConfig {
    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub admission: AdmissionConfig,

    #[serde(default)]
    pub uploads: UploadConfig,

    #[serde(default)]
    pub artifacts: ArtifactsConfig,

    #[serde(default)]
    pub quota: QuotaConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where the sled database lives
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Data directory; defaults to the platform data dir for `examgen`
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl StorageConfig {
    pub fn resolve_data_dir(&self) -> PathBuf {
        match &self.data_dir {
            Some(dir) => dir.clone(),
            None => directories::ProjectDirs::from("", "", "examgen")
                .map(|dirs| dirs.data_dir().to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".examgen")),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.resolve_data_dir().join("db")
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub section: &'static str,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.section, self.message)
    }
}

impl std::error::Error for ValidationError {}

impl ExamgenConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        let mut check = |section: &'static str, result: Result<(), String>| {
            if let Err(message) = result {
                errors.push(ValidationError { section, message });
            }
        };

        check("provider", self.provider.validate());
        check("admission", self.admission.validate());
        check(
            "uploads",
            if self.uploads.max_files == 0 {
                Err("max_files must be at least 1".to_string())
            } else {
                Ok(())
            },
        );
        check(
            "artifacts",
            if self.artifacts.max_per_user == 0 {
                Err("max_per_user must be at least 1".to_string())
            } else {
                Ok(())
            },
        );
        check(
            "storage",
            match &self.storage.data_dir {
                Some(dir) if dir.as_os_str().is_empty() => {
                    Err("data_dir cannot be empty".to_string())
                }
                _ => Ok(()),
            },
        );

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate and fold every problem into one `ApiError`.
    pub fn ensure_valid(&self) -> Result<(), ApiError> {
        self.validate().map_err(|errors| {
            let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            ApiError::ConfigError(format!(
                "Configuration validation failed:\n{}",
                messages.join("\n")
            ))
        })
    }

    pub fn to_toml(&self) -> Result<String, ApiError> {
        toml::to_string_pretty(self)
            .map_err(|e| ApiError::ConfigError(format!("Failed to render config: {}", e)))
    }
}

/// Loads [`ExamgenConfig`] from its layered sources
pub struct ConfigLoader;

impl ConfigLoader {
    /// Global file, then `explicit` if given, then the environment.
    pub fn load(explicit: Option<&Path>) -> Result<ExamgenConfig, ApiError> {
        Self::load_layers(global_config_path(), explicit)
    }

    /// Only `path` and the environment.
    pub fn load_from_file(path: &Path) -> Result<ExamgenConfig, ApiError> {
        Self::load_layers(None, Some(path))
    }

    fn load_layers(
        global: Option<PathBuf>,
        explicit: Option<&Path>,
    ) -> Result<ExamgenConfig, ApiError> {
        let mut builder = Config::builder();
        if let Some(global) = global {
            builder = sources::add_file(builder, &global, false);
        }
        if let Some(explicit) = explicit {
            if !explicit.exists() {
                return Err(ApiError::ConfigError(format!(
                    "Config file not found: {}",
                    explicit.display()
                )));
            }
            builder = sources::add_file(builder, explicit, true);
        }
        builder = builder.add_source(sources::environment());

        let config: ExamgenConfig = builder.build()?.try_deserialize()?;
        Ok(config)
    }
}
