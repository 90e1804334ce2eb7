//! CLI domain: parse, route, output and presentation only.
//! Read-only: inspects persisted operations and clusters, never dispatches.

mod output;
mod parse;
mod presentation;
mod route;

pub use output::map_error;
pub use parse::{Cli, ClusterCommands, Commands, ConfigCommands, OperationCommands, OutputFormat};
pub use presentation::{
    format_cluster_list, format_operation_detail_json, format_operation_detail_text,
    format_operation_list,
};
pub use route::RunContext;
