//! Message bus contract consumed by the engine.
//!
//! The transport is an opaque request/reply primitive. Implementations must be
//! safe for concurrent use: a step dispatches all of its node tasks at once over
//! the same bus handle.

pub mod envelope;
pub mod memory;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub use envelope::{ReplyEnvelope, ReplyStatus, TaskEnvelope};
pub use memory::MemoryBus;

/// One request addressed to one node agent.
#[derive(Debug, Clone)]
pub struct BusRequest {
    pub subject: String,
    pub sender_id: String,
    pub target_id: String,
    pub correlation_id: String,
    pub timeout: Duration,
    pub payload: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("transport failure: {0}")]
    Transport(String),
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Send `request` and wait for the node's reply payload.
    async fn send_with_reply(&self, request: BusRequest) -> Result<Vec<u8>, BusError>;
}
