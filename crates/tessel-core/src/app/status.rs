//! Status - ランタイムの集計値
//!
//! fiber の状態遷移 `Pending → {Succeeded, Failed, Cancelled}` を数えるだけの軽量な集計です。

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use crate::domain::{ExitKind, FiberState};

/// Snapshot of how many top-level effects are in each state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeCounts {
    pub pending: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl RuntimeCounts {
    pub fn total(&self) -> usize {
        self.pending + self.succeeded + self.failed + self.cancelled
    }
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pending: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    cancelled: AtomicUsize,
}

impl Counters {
    pub(crate) fn started(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    /// Pending から終端状態への遷移を記録
    pub(crate) fn finished(&self, exit: ExitKind) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
        let slot = match FiberState::from(exit) {
            FiberState::Succeeded => &self.succeeded,
            FiberState::Failed => &self.failed,
            FiberState::Cancelled => &self.cancelled,
            FiberState::Pending => return,
        };
        slot.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn snapshot(&self) -> RuntimeCounts {
        RuntimeCounts {
            pending: self.pending.load(Ordering::SeqCst),
            succeeded: self.succeeded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            cancelled: self.cancelled.load(Ordering::SeqCst),
        }
    }
}
