//! Fiber state machine.

use serde::{Deserialize, Serialize};

use super::exit::ExitKind;

/// State of one spawned effect chain.
///
/// State transitions:
/// - Pending -> Succeeded
/// - Pending -> Failed
/// - Pending -> Cancelled
///
/// All three outcomes are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FiberState {
    /// Still being evaluated (possibly suspended).
    Pending,

    Succeeded,

    Failed,

    /// Stopped by a cancel request. Scopes opened along the way were closed.
    Cancelled,
}

impl FiberState {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        !matches!(self, FiberState::Pending)
    }
}

impl From<ExitKind> for FiberState {
    fn from(kind: ExitKind) -> Self {
        match kind {
            ExitKind::Success => FiberState::Succeeded,
            ExitKind::Failure => FiberState::Failed,
            ExitKind::Cancelled => FiberState::Cancelled,
        }
    }
}
