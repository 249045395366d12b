//! Resource handle - 1 つの scope に紐づく所有オブジェクト

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;

use crate::domain::{EffectError, ExitKind, ResourceId, ScopeId};

pub(crate) type ReleaseAction = Box<dyn FnOnce(ExitKind) -> BoxFuture<'static, Result<(), EffectError>> + Send>;

pub(crate) struct ResourceCell<T> {
    id: ResourceId,
    scope: ScopeId,
    label: String,
    value: Arc<T>,
    released: AtomicBool,
    release: Mutex<Option<ReleaseAction>>,
}

impl<T> ResourceCell<T> {
    pub(crate) fn new(id: ResourceId, scope: ScopeId, label: String, value: Arc<T>, release: ReleaseAction) -> Self {
        Self {
            id,
            scope,
            label,
            value,
            released: AtomicBool::new(false),
            release: Mutex::new(Some(release)),
        }
    }

    /// Run the release action if nobody ran it yet.
    pub(crate) async fn release(&self, exit: ExitKind) -> Result<(), EffectError> {
        self.released.store(true, Ordering::Release);
        let action = self
            .release
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match action {
            Some(action) => {
                tracing::debug!(resource = %self.id, label = %self.label, ?exit, "releasing resource");
                action(exit).await
            }
            None => Ok(()),
        }
    }
}

/// An owned object whose release is tied to exactly one scope.
///
/// Cloning the handle does not duplicate the resource.
pub struct Resource<T> {
    pub(crate) cell: Arc<ResourceCell<T>>,
}

impl<T> Clone for Resource<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T> Resource<T> {
    pub fn id(&self) -> ResourceId {
        self.cell.id
    }

    /// Scope that owns the release action.
    pub fn scope_id(&self) -> ScopeId {
        self.cell.scope
    }

    pub fn label(&self) -> &str {
        &self.cell.label
    }

    pub fn is_released(&self) -> bool {
        self.cell.released.load(Ordering::Acquire)
    }

    /// Borrow the value. Fails once the owning scope closed or the handle was
    /// released early.
    pub fn get(&self) -> Result<&T, EffectError> {
        if self.is_released() {
            return Err(EffectError::ResourceReleased { resource: self.cell.id });
        }
        Ok(self.cell.value.deref())
    }

    /// Release now instead of at scope close. Runs the release action at most
    /// once; the scope's finalizer becomes a no-op.
    pub async fn release(&self) -> Result<(), EffectError> {
        self.cell.release(ExitKind::Success).await
    }
}

impl<T> std::fmt::Debug for Resource<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("id", &self.cell.id)
            .field("label", &self.cell.label)
            .field("scope", &self.cell.scope)
            .field("released", &self.is_released())
            .finish()
    }
}
