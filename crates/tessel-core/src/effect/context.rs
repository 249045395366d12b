//! Context - effect 評価時に引き回す明示的な実行コンテキスト
//!
//! プロセス全体のシングルトン（暗黙のグローバル device など）は持ちません。
//! current scope / 有効な service binding / キャンセル信号はすべてここを通して渡されます。

use std::sync::Arc;
use std::time::Duration;

use super::cancel::CancelToken;
use crate::domain::{EffectError, ResourceId};
use crate::ports::IdGenerator;
use crate::scope::Scope;
use crate::service::{self, Env, MemoTable, Service, ServiceId};
use crate::service::layer::Binding;

/// State shared by every chain of one runtime instance.
pub(crate) struct RuntimeShared {
    pub(crate) memo: MemoTable,
    /// Owns resources acquired by memoized service constructors.
    pub(crate) root_scope: Scope,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) finalizer_timeout: Option<Duration>,
}

/// Execution context threaded through every step of an effect chain.
#[derive(Clone)]
pub struct Context {
    pub(crate) shared: Arc<RuntimeShared>,
    pub(crate) env: Arc<Env>,
    pub(crate) scope: Scope,
    pub(crate) cancel: CancelToken,
    /// Tags currently under construction along this chain.
    pub(crate) path: Arc<Vec<&'static str>>,
}

impl Context {
    pub(crate) fn new(shared: Arc<RuntimeShared>, env: Arc<Env>, scope: Scope, cancel: CancelToken) -> Self {
        Self {
            shared,
            env,
            scope,
            cancel,
            path: Arc::new(Vec::new()),
        }
    }

    /// The scope resources are currently registered into.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn check_cancelled(&self) -> Result<(), EffectError> {
        if self.cancel.is_cancelled() {
            Err(EffectError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub(crate) fn with_scope(&self, scope: Scope) -> Self {
        Self {
            scope,
            ..self.clone()
        }
    }

    pub(crate) fn with_cancel(&self, cancel: CancelToken) -> Self {
        Self {
            cancel,
            ..self.clone()
        }
    }

    /// Same context, but no longer reachable by the chain's cancel signal.
    /// Used for release actions, which must run to completion.
    pub(crate) fn uninterruptible(&self) -> Self {
        self.with_cancel(CancelToken::new())
    }

    /// Fresh scope configured like the runtime's scopes. The caller closes it.
    pub(crate) fn open_scope(&self) -> Scope {
        Scope::open_with(self.shared.ids.generate_scope_id(), self.shared.finalizer_timeout)
    }

    pub(crate) fn next_resource_id(&self) -> ResourceId {
        self.shared.ids.generate_resource_id()
    }

    /// Context for running `binding`'s constructor: the frame that declared
    /// the binding plus the binding's own dependency layers.
    pub(crate) fn for_construction(&self, binding: &Binding, declared_in: &Arc<Env>, scope: Scope) -> Self {
        let env = binding
            .deps
            .iter()
            .rev()
            .fold(Arc::clone(declared_in), |env, layer| env.extend(layer));
        let mut path = self.path.as_ref().clone();
        path.push(binding.service.tag);
        Self {
            shared: Arc::clone(&self.shared),
            env,
            scope,
            cancel: self.cancel.clone(),
            path: Arc::new(path),
        }
    }

    /// Resolve a service through the active bindings.
    pub async fn resolve<S: Service>(&self) -> Result<S, EffectError> {
        let value = service::resolve(self, ServiceId::of::<S>()).await?;
        value
            .downcast_ref::<S>()
            .cloned()
            .ok_or(EffectError::ServiceTypeMismatch { tag: S::TAG })
    }

    /// Whether `tag` is bound anywhere in the active chain.
    pub fn has_service(&self, tag: &str) -> bool {
        self.env.contains(tag)
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("scope", &self.scope.id())
            .field("cancelled", &self.cancel.is_cancelled())
            .field("resolving", &self.path)
            .finish()
    }
}
