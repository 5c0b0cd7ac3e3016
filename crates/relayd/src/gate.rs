//! Admission control for running tasks.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyStats {
    pub max_concurrent: usize,
    pub current_running: usize,
    pub available: usize,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GateError {
    #[error("max_concurrent must be at least 1")]
    ZeroCapacity,
    #[error("concurrency gate is closed")]
    Closed,
    #[error("admission abandoned: task was cancelled while waiting")]
    Abandoned,
}

/// Counting semaphore sized to `max_concurrent`.
///
/// Waiters are admitted in the order they started waiting. Cloning shares
/// the same slots.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    running: Arc<AtomicUsize>,
    max_concurrent: usize,
}

/// A held execution slot. Dropping it releases the slot exactly once.
#[derive(Debug)]
pub struct ConcurrencySlot {
    _permit: OwnedSemaphorePermit,
    running: Arc<AtomicUsize>,
}

impl Drop for ConcurrencySlot {
    fn drop(&mut self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ConcurrencyGate {
    pub fn new(max_concurrent: usize) -> Result<Self, GateError> {
        if max_concurrent == 0 {
            return Err(GateError::ZeroCapacity);
        }
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            running: Arc::new(AtomicUsize::new(0)),
            max_concurrent,
        })
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> Result<ConcurrencySlot, GateError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| GateError::Closed)?;
        self.running.fetch_add(1, Ordering::SeqCst);
        Ok(ConcurrencySlot {
            _permit: permit,
            running: Arc::clone(&self.running),
        })
    }

    /// Wait for a free slot unless `cancel` fires first.
    pub async fn acquire_or_cancel(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ConcurrencySlot, GateError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(GateError::Abandoned),
            slot = self.acquire() => slot,
        }
    }

    pub fn stats(&self) -> ConcurrencyStats {
        ConcurrencyStats {
            max_concurrent: self.max_concurrent,
            current_running: self.running.load(Ordering::SeqCst),
            available: self.semaphore.available_permits(),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Reject all current and future waiters.
    pub fn close(&self) {
        self.semaphore.close();
    }
}
