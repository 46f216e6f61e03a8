//! Config sources: global/explicit TOML files and the environment.

use config::builder::DefaultState;
use config::{ConfigBuilder, Environment, File, FileFormat};
use std::path::{Path, PathBuf};
use tracing::debug;

/// `$XDG_CONFIG_HOME/examgen/config.toml`, or `~/.config/examgen/config.toml`.
pub fn global_config_path() -> Option<PathBuf> {
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(xdg).join("examgen").join("config.toml"));
    }
    directories::BaseDirs::new().map(|dirs| {
        dirs.home_dir()
            .join(".config")
            .join("examgen")
            .join("config.toml")
    })
}

pub(super) fn add_file(
    builder: ConfigBuilder<DefaultState>,
    path: &Path,
    required: bool,
) -> ConfigBuilder<DefaultState> {
    if !required && !path.exists() {
        debug!(config_path = %path.display(), "No global config file");
        return builder;
    }
    builder.add_source(File::from(path).format(FileFormat::Toml).required(required))
}

/// `EXAMGEN__ADMISSION__CAPACITY=8` sets `admission.capacity`.
pub(super) fn environment() -> Environment {
    Environment::with_prefix("EXAMGEN")
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}
