//! Clusterflow: step-based workflow engine for cluster installer control planes
//!
//! Long-running cluster operations (create, delete, scale, upgrade, backup,
//! restore) are modelled as ordered steps of node-scoped tasks. The engine
//! dispatches each step's tasks to node agents over a message bus, waits for their
//! replies, persists progress after every transition and can resume a failed
//! operation at the step that failed.

pub mod bus;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod operation;
pub mod store;
