//! Env - 解決時に有効な binding の連鎖と memo table
//!
//! # 解決アルゴリズム
//! 1. 解決経路（resolution path）に同じ tag があれば `ServiceCycle`
//! 2. Env の連鎖を内側から外側へたどって binding を探す。無ければ `ServiceNotFound`
//! 3. constructor の種類で分岐
//!    - Value: そのまま返す
//!    - memoized Effect: runtime の root scope で 1 回だけ構築。結果（失敗も）をキャッシュ
//!    - fresh Effect: 呼び出し側の current scope で毎回構築
//!
//!    constructor が見る Env は binding を宣言した frame + その binding の deps。
//!    呼び出し側の Env（他の constructor に provide された private な依存を含みうる）は使わない。
//!
//! # 並行性
//! 同じ memoized service を複数の chain が同時に解決しても構築は 1 回。
//! 2 番目以降は `OnceCell` 上で先行する構築の完了を待つ（競争しない）。
//! キャンセルで中断された構築はキャッシュせず、次の resolver が改めて構築する。
//!
//! 循環検出は 1 本の chain の解決経路だけを見る。A と B が互いに依存する layer で、
//! 別々の chain が A と B の構築を同時に始めると、互いの `OnceCell` を待ち続ける。

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OnceCell;

use super::layer::{AnyService, Binding, Constructor, Layer};
use super::service::ServiceId;
use crate::domain::{BindingId, EffectError};
use crate::effect::Context;

/// Active bindings, innermost first.
pub(crate) struct Env {
    bindings: HashMap<&'static str, Arc<Binding>>,
    parent: Option<Arc<Env>>,
}

impl Env {
    pub(crate) fn root(layer: &Layer) -> Arc<Env> {
        Arc::new(Env {
            bindings: layer.bindings().clone(),
            parent: None,
        })
    }

    pub(crate) fn extend(self: &Arc<Self>, layer: &Layer) -> Arc<Env> {
        Arc::new(Env {
            bindings: layer.bindings().clone(),
            parent: Some(Arc::clone(self)),
        })
    }

    /// Finds the binding for `tag` together with the frame that declared it.
    pub(crate) fn lookup(self: &Arc<Self>, tag: &str) -> Option<(Arc<Binding>, Arc<Env>)> {
        let mut env = Some(self);
        while let Some(current) = env {
            if let Some(binding) = current.bindings.get(tag) {
                return Some((Arc::clone(binding), Arc::clone(current)));
            }
            env = current.parent.as_ref();
        }
        None
    }

    pub(crate) fn contains(self: &Arc<Self>, tag: &str) -> bool {
        self.lookup(tag).is_some()
    }
}

type Cell = Arc<OnceCell<Result<AnyService, EffectError>>>;

/// Per-runtime cache of memoized service values.
#[derive(Default)]
pub(crate) struct MemoTable {
    cells: Mutex<HashMap<BindingId, Cell>>,
    constructions: AtomicUsize,
}

impl MemoTable {
    fn cell(&self, id: BindingId) -> Cell {
        let mut cells = self.cells.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(cells.entry(id).or_default())
    }

    /// Number of constructor runs (memoized and fresh) so far.
    pub(crate) fn constructions(&self) -> usize {
        self.constructions.load(Ordering::Relaxed)
    }

    fn record_construction(&self) {
        self.constructions.fetch_add(1, Ordering::Relaxed);
    }
}

pub(crate) async fn resolve(ctx: &Context, id: ServiceId) -> Result<AnyService, EffectError> {
    if ctx.path.contains(&id.tag) {
        let mut path = ctx.path.as_ref().clone();
        path.push(id.tag);
        return Err(EffectError::ServiceCycle { path });
    }

    let (binding, declared_in) = ctx
        .env
        .lookup(id.tag)
        .ok_or(EffectError::ServiceNotFound { tag: id.tag })?;
    if binding.service.type_id != id.type_id {
        return Err(EffectError::ServiceTypeMismatch { tag: id.tag });
    }

    match binding.ctor.as_ref() {
        Constructor::Value(value) => Ok(Arc::clone(value)),
        Constructor::Effect {
            build,
            memoized: true,
        } => {
            let memo = &ctx.shared.memo;
            let cell = memo.cell(binding.id);
            let construct_ctx = ctx.for_construction(&binding, &declared_in, ctx.shared.root_scope.clone());
            let cached = cell
                .get_or_try_init(|| async {
                    memo.record_construction();
                    tracing::debug!(tag = id.tag, binding = %binding.id, "constructing memoized service");
                    match build.run(construct_ctx).await {
                        Err(EffectError::Cancelled) => Err(EffectError::Cancelled),
                        other => Ok(other),
                    }
                })
                .await?;
            cached.clone()
        }
        Constructor::Effect {
            build,
            memoized: false,
        } => {
            ctx.shared.memo.record_construction();
            tracing::debug!(tag = id.tag, "constructing fresh service");
            let construct_ctx = ctx.for_construction(&binding, &declared_in, ctx.scope.clone());
            build.run(construct_ctx).await
        }
    }
}
