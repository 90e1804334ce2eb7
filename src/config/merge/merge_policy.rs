//! Merge rules: the defaults every later layer overrides.

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError};

/// A builder seeded with the built-in defaults.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let store_path = crate::config::default_store_path();
    Config::builder()
        .set_default("engine.host_id", "clusterflow")?
        .set_default("engine.bus_subject", "clusterflow.task")?
        .set_default("engine.resource_server_url", "http://127.0.0.1:8081")?
        .set_default("engine.node_timeout_secs", 60)?
        .set_default("engine.timeout_threshold", 1)?
        .set_default("engine.persist_each_step", true)?
        .set_default("engine.barrier_mode", "wait_for_all")?
        .set_default("storage.path", store_path.to_string_lossy().into_owned())
}
