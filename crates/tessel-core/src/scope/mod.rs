//! Scope - リソースの所有境界
//!
//! Scope は finalizer の順序付きリストを排他的に所有します。
//!
//! # 不変条件
//! - close 時、finalizer は登録の逆順でちょうど 1 回だけ実行される
//! - close 済みの scope への add_finalizer は常に `ScopeClosed` で失敗し、action は実行されない
//! - 2 回目以降の close は finalizer を再実行せず、最初の close が終わるのを待ってから成功する
//!   （finalizer の中から自分の scope を close すると返ってこない）
//! - finalizer の失敗は個別に伝播せず、全部実行し終えてから `FinalizerAggregate` 1 つにまとめる
//!
//! # ロック
//! finalizer リストの変更（add / close 時の取り出し）は std Mutex の中で完結させ、
//! finalizer 自体の実行はロックの外で行う（ロックを跨いで await しない）。

mod finalizer;

pub use self::finalizer::Finalizer;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;

use crate::domain::{EffectError, ExitKind, ScopeId};

struct ScopeState {
    finalizers: Vec<Finalizer>,
    closed: bool,
}

struct ScopeInner {
    id: ScopeId,
    finalizer_timeout: Option<Duration>,
    state: Mutex<ScopeState>,
    /// Flips to `true` once the first close has run every finalizer.
    drained: watch::Sender<bool>,
}

/// Marks the scope drained when the first close ends, even if its future is dropped.
struct Drained<'a>(&'a watch::Sender<bool>);

impl Drop for Drained<'_> {
    fn drop(&mut self) {
        self.0.send_replace(true);
    }
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if !state.closed && !state.finalizers.is_empty() {
            tracing::warn!(
                scope = %self.id,
                leaked = state.finalizers.len(),
                "scope dropped without being closed; finalizers will not run"
            );
        }
    }
}

/// Ownership boundary for scoped resources.
///
/// Cloning a `Scope` yields another handle to the same boundary.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Scope {
    /// Open a new, empty scope.
    pub fn open() -> Self {
        Self::open_with(ScopeId::generate(), None)
    }

    /// Open a scope with an explicit id and an optional per-finalizer time limit.
    pub fn open_with(id: ScopeId, finalizer_timeout: Option<Duration>) -> Self {
        tracing::debug!(scope = %id, "scope opened");
        Self {
            inner: Arc::new(ScopeInner {
                id,
                finalizer_timeout,
                state: Mutex::new(ScopeState {
                    finalizers: Vec::new(),
                    closed: false,
                }),
                drained: watch::channel(false).0,
            }),
        }
    }

    pub fn id(&self) -> ScopeId {
        self.inner.id
    }

    fn lock(&self) -> MutexGuard<'_, ScopeState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of finalizers waiting to run.
    pub fn len(&self) -> usize {
        self.lock().finalizers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a finalizer. Fails (without running it) once the scope is closed.
    pub fn add_finalizer(&self, finalizer: Finalizer) -> Result<(), EffectError> {
        let mut state = self.lock();
        if state.closed {
            return Err(EffectError::ScopeClosed { scope: self.id() });
        }
        state.finalizers.push(finalizer);
        Ok(())
    }

    /// Open a child scope that is closed (with the parent's outcome) when this
    /// scope closes, unless it was closed earlier.
    pub fn fork(&self) -> Result<Scope, EffectError> {
        self.fork_with_id(ScopeId::generate())
    }

    pub fn fork_with_id(&self, id: ScopeId) -> Result<Scope, EffectError> {
        let child = Scope::open_with(id, self.inner.finalizer_timeout);
        let handle = child.clone();
        self.add_finalizer(Finalizer::new(format!("child {id}"), move |exit| async move {
            handle.close(exit).await
        }))?;
        Ok(child)
    }

    /// Run every finalizer in reverse registration order.
    ///
    /// A later call runs nothing; it waits until the first close has finished
    /// and returns `Ok(())`.
    pub async fn close(&self, exit: ExitKind) -> Result<(), EffectError> {
        let finalizers = {
            let mut state = self.lock();
            if state.closed {
                None
            } else {
                state.closed = true;
                Some(std::mem::take(&mut state.finalizers))
            }
        };
        let Some(finalizers) = finalizers else {
            let mut drained = self.inner.drained.subscribe();
            while !*drained.borrow_and_update() {
                if drained.changed().await.is_err() {
                    break;
                }
            }
            return Ok(());
        };
        let _drained = Drained(&self.inner.drained);

        tracing::debug!(scope = %self.id(), count = finalizers.len(), ?exit, "closing scope");

        let mut failures = Vec::new();
        for finalizer in finalizers.into_iter().rev() {
            let label = finalizer.label().to_string();
            let result = match self.inner.finalizer_timeout {
                Some(limit) => match tokio::time::timeout(limit, finalizer.invoke(exit)).await {
                    Ok(result) => result,
                    Err(_) => Err(EffectError::Timeout { after: limit }),
                },
                None => finalizer.invoke(exit).await,
            };
            if let Err(err) = result {
                tracing::warn!(scope = %self.id(), finalizer = %label, error = %err, "finalizer failed");
                failures.push(err);
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(EffectError::FinalizerAggregate {
                scope: self.id(),
                failures,
            })
        }
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Scope")
            .field("id", &self.inner.id)
            .field("finalizers", &state.finalizers.len())
            .field("closed", &state.closed)
            .finish()
    }
}
