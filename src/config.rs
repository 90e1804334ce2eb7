//! Configuration
//!
//! Layered configuration built with the `config` crate. Lowest to highest
//! precedence: built-in defaults, the user file
//! (`$XDG_CONFIG_HOME/clusterflow/config.toml`), an explicit file, and
//! `CLUSTERFLOW__SECTION__KEY` environment variables.

use crate::engine::{BarrierMode, EngineSettings};
use crate::error::EngineError;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod merge;
mod sources;

pub use sources::global_file::global_config_path;

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClusterflowConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Identity of this control-plane host; stamped into dispatched messages.
    #[serde(default = "default_host_id")]
    pub host_id: String,

    #[serde(default = "default_bus_subject")]
    pub bus_subject: String,

    #[serde(default = "default_resource_server_url")]
    pub resource_server_url: String,

    #[serde(default = "default_node_timeout_secs")]
    pub node_timeout_secs: u64,

    /// Consecutive timeouts a node task may accumulate before its step fails.
    #[serde(default = "default_timeout_threshold")]
    pub timeout_threshold: u32,

    /// Persist the operation after every successful step.
    #[serde(default = "default_true")]
    pub persist_each_step: bool,

    #[serde(default)]
    pub barrier_mode: BarrierMode,
}

fn default_host_id() -> String {
    "clusterflow".to_string()
}

fn default_bus_subject() -> String {
    "clusterflow.task".to_string()
}

fn default_resource_server_url() -> String {
    "http://127.0.0.1:8081".to_string()
}

fn default_node_timeout_secs() -> u64 {
    60
}

fn default_timeout_threshold() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            host_id: default_host_id(),
            bus_subject: default_bus_subject(),
            resource_server_url: default_resource_server_url(),
            node_timeout_secs: default_node_timeout_secs(),
            timeout_threshold: default_timeout_threshold(),
            persist_each_step: default_true(),
            barrier_mode: BarrierMode::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.host_id.trim().is_empty() {
            return Err(EngineError::ConfigError("engine.host_id cannot be empty".to_string()));
        }
        if self.bus_subject.trim().is_empty() {
            return Err(EngineError::ConfigError(
                "engine.bus_subject cannot be empty".to_string(),
            ));
        }
        if self.node_timeout_secs == 0 {
            return Err(EngineError::ConfigError(
                "engine.node_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.timeout_threshold == 0 {
            return Err(EngineError::ConfigError(
                "engine.timeout_threshold must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn to_settings(&self) -> EngineSettings {
        EngineSettings {
            host_id: self.host_id.clone(),
            bus_subject: self.bus_subject.clone(),
            resource_server_url: self.resource_server_url.clone(),
            node_timeout: Duration::from_secs(self.node_timeout_secs),
            timeout_threshold: self.timeout_threshold,
            persist_each_step: self.persist_each_step,
            barrier_mode: self.barrier_mode,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    /// Directory of the sled state store.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// `$XDG_DATA_HOME/clusterflow/store`, or `.clusterflow/store` when no home
/// directory can be resolved.
pub fn default_store_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "clusterflow")
        .map(|dirs| dirs.data_dir().join("store"))
        .unwrap_or_else(|| PathBuf::from(".clusterflow/store"))
}

impl ClusterflowConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        self.engine.validate()?;
        if self.storage.path.as_os_str().is_empty() {
            return Err(EngineError::ConfigError("storage.path cannot be empty".to_string()));
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, EngineError> {
        toml::to_string_pretty(self)
            .map_err(|e| EngineError::ConfigError(format!("Failed to render configuration: {}", e)))
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate configuration from every layer.
    pub fn load(explicit: Option<&Path>) -> Result<ClusterflowConfig, EngineError> {
        Self::load_with_env(explicit, None)
    }

    /// Load from defaults and one file only; no user file, no environment.
    pub fn load_from_file(path: &Path) -> Result<ClusterflowConfig, EngineError> {
        let builder = merge::merge_policy::builder_with_defaults()?;
        let builder = sources::explicit_file::add_to_builder(builder, path)?;
        Self::finish(builder)
    }

    /// Like [`ConfigLoader::load`], reading environment overrides from `env`
    /// instead of the process environment when given.
    pub fn load_with_env(
        explicit: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> Result<ClusterflowConfig, EngineError> {
        let mut builder = merge::merge_policy::builder_with_defaults()?;
        builder = sources::global_file::add_to_builder(builder)?;
        if let Some(path) = explicit {
            builder = sources::explicit_file::add_to_builder(builder, path)?;
        }
        builder = builder.add_source(sources::environment::source(env));
        Self::finish(builder)
    }

    fn finish(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<ClusterflowConfig, EngineError> {
        let config: ClusterflowConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}
