//! Integration tests for the clusterflow workflow engine

mod config_integration;
mod executor_scenarios;
mod recovery_flow;
mod store_integration;
mod test_utils;
