//! User config file source: $XDG_CONFIG_HOME/clusterflow/config.toml

use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, File, FileFormat};
use std::path::PathBuf;
use tracing::debug;

/// Path of the user config file, if a home directory can be resolved.
pub fn global_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "clusterflow").map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Add the user config file to the builder when it exists.
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let Some(path) = global_config_path() else {
        return Ok(builder);
    };
    if !path.exists() {
        debug!(config_path = %path.display(), "No user configuration file");
        return Ok(builder);
    }
    Ok(builder.add_source(File::from(path).format(FileFormat::Toml).required(false)))
}
