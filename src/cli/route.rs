//! CLI route: one table mapping commands to store reads and presentation.

use crate::cli::parse::{ClusterCommands, Commands, ConfigCommands, OperationCommands, OutputFormat};
use crate::cli::presentation::{
    format_cluster_list, format_operation_detail_json, format_operation_detail_text,
    format_operation_list,
};
use crate::config::{ClusterflowConfig, ConfigLoader};
use crate::error::EngineError;
use crate::store::{SledStateStore, StateStore};
use std::path::PathBuf;
use tracing::debug;

pub struct RunContext {
    config: ClusterflowConfig,
}

impl RunContext {
    /// Load configuration; `store_override` replaces `storage.path`.
    pub fn new(config_path: Option<PathBuf>, store_override: Option<PathBuf>) -> Result<Self, EngineError> {
        let mut config = ConfigLoader::load(config_path.as_deref())?;
        if let Some(path) = store_override {
            config.storage.path = path;
        }
        Ok(Self::from_config(config))
    }

    pub fn from_config(config: ClusterflowConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClusterflowConfig {
        &self.config
    }

    fn open_store(&self) -> Result<SledStateStore, EngineError> {
        debug!(path = %self.config.storage.path.display(), "Opening state store");
        Ok(SledStateStore::open(&self.config.storage.path)?)
    }

    pub fn execute(&self, command: &Commands) -> Result<String, EngineError> {
        match command {
            Commands::Operations { command } => self.execute_operations(command),
            Commands::Clusters {
                command: ClusterCommands::List,
            } => {
                let clusters = self.open_store()?.list_clusters()?;
                Ok(format_cluster_list(&clusters))
            }
            Commands::Config {
                command: ConfigCommands::Show,
            } => self.config.to_toml(),
        }
    }

    fn execute_operations(&self, command: &OperationCommands) -> Result<String, EngineError> {
        let store = self.open_store()?;
        match command {
            OperationCommands::List { cluster } => {
                let operations: Vec<_> = store
                    .list_operations()?
                    .into_iter()
                    .filter(|op| cluster.as_ref().map_or(true, |c| &op.cluster_id == c))
                    .collect();
                Ok(format_operation_list(&operations))
            }
            OperationCommands::Show {
                operation_id,
                format,
            } => {
                let operation = store.require_operation(operation_id)?;
                match format {
                    OutputFormat::Text => Ok(format_operation_detail_text(&operation)),
                    OutputFormat::Json => format_operation_detail_json(&operation),
                }
            }
        }
    }
}
