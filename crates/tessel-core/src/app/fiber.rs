//! Fiber - spawn された effect chain へのハンドル

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::domain::{EffectError, Exit, FiberId, FiberState};
use crate::effect::CancelToken;

/// Handle to an effect running on its own tokio task.
///
/// Dropping the handle does not stop the fiber; use [`Fiber::cancel`].
pub struct Fiber<A> {
    id: FiberId,
    cancel: CancelToken,
    state: watch::Receiver<FiberState>,
    handle: JoinHandle<Exit<A>>,
}

impl<A> Fiber<A> {
    pub(crate) fn new(
        id: FiberId,
        cancel: CancelToken,
        state: watch::Receiver<FiberState>,
        handle: JoinHandle<Exit<A>>,
    ) -> Self {
        Self {
            id,
            cancel,
            state,
            handle,
        }
    }

    pub fn id(&self) -> FiberId {
        self.id
    }

    pub fn state(&self) -> FiberState {
        *self.state.borrow()
    }

    /// Request cancellation. Scopes opened by the fiber are still closed.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the terminal outcome.
    pub async fn join(self) -> Exit<A> {
        match self.handle.await {
            Ok(exit) => exit,
            Err(err) if err.is_cancelled() => Exit::Cancelled,
            Err(err) => Exit::Failure(EffectError::custom("fiber.panicked", err.to_string())),
        }
    }
}

impl<A> std::fmt::Debug for Fiber<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fiber")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}
