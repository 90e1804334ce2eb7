//! Completion barrier: resolves one step from the stream of node-task outcomes.
//!
//! The barrier counts terminal outcomes with an atomic counter and resolves exactly
//! once through a oneshot channel. Any failure resolves immediately; success
//! resolves after all expected outcomes (or the first one, in `WaitForFirst` mode).
//! Signals arriving after resolution are ignored.

use crate::error::EngineError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BarrierMode {
    /// Resolve after every node step reported a terminal outcome.
    #[default]
    WaitForAll,
    /// Resolve on the first terminal outcome.
    WaitForFirst,
}

#[derive(Debug)]
pub enum StepResolution {
    Succeeded,
    Failed(EngineError),
}

impl StepResolution {
    pub fn is_success(&self) -> bool {
        matches!(self, StepResolution::Succeeded)
    }
}

pub struct CompletionBarrier {
    expected: usize,
    mode: BarrierMode,
    received: AtomicUsize,
    resolver: Mutex<Option<oneshot::Sender<StepResolution>>>,
}

/// Receiving half of a barrier; the executor awaits it once per step.
pub struct BarrierWait {
    rx: oneshot::Receiver<StepResolution>,
}

impl CompletionBarrier {
    pub fn new(expected: usize, mode: BarrierMode) -> (Arc<Self>, BarrierWait) {
        let (tx, rx) = oneshot::channel();
        let barrier = Arc::new(Self {
            expected,
            mode,
            received: AtomicUsize::new(0),
            resolver: Mutex::new(Some(tx)),
        });
        if expected == 0 {
            barrier.resolve(StepResolution::Succeeded);
        }
        (barrier, BarrierWait { rx })
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn mode(&self) -> BarrierMode {
        self.mode
    }

    /// Terminal outcomes observed so far.
    pub fn received(&self) -> usize {
        self.received.load(Ordering::SeqCst)
    }

    pub fn is_resolved(&self) -> bool {
        self.resolver.lock().is_none()
    }

    /// Record one successful terminal outcome. Returns true if this call resolved
    /// the barrier.
    pub fn record_success(&self) -> bool {
        let received = self.received.fetch_add(1, Ordering::SeqCst) + 1;
        let done = match self.mode {
            BarrierMode::WaitForAll => received >= self.expected,
            BarrierMode::WaitForFirst => true,
        };
        if done {
            self.resolve(StepResolution::Succeeded)
        } else {
            false
        }
    }

    /// Record a failed terminal outcome; resolves the step as failed right away.
    pub fn record_failure(&self, error: EngineError) -> bool {
        self.received.fetch_add(1, Ordering::SeqCst);
        self.resolve(StepResolution::Failed(error))
    }

    fn resolve(&self, resolution: StepResolution) -> bool {
        let Some(tx) = self.resolver.lock().take() else {
            return false;
        };
        // The executor may have stopped waiting; nothing left to notify then.
        let _ = tx.send(resolution);
        true
    }
}

impl BarrierWait {
    pub async fn wait(self) -> StepResolution {
        match self.rx.await {
            Ok(resolution) => resolution,
            Err(_) => StepResolution::Failed(EngineError::InvalidOperation(
                "completion barrier dropped before resolving".to_string(),
            )),
        }
    }
}
