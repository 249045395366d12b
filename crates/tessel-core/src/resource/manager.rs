//! acquire + finalizer 登録を 1 つの操作として扱う
//!
//! `acquire` が成功した直後、await を挟まずに release を scope へ登録します。
//! そのため「取得はできたが release が登録されていない」状態は外から観測できません。
//! 取得に失敗した場合は何も登録しません。
//!
//! `acquire` 自体はキャンセル信号から切り離して最後まで走らせます。途中で future を
//! drop すると、backend 側で確保済みのオブジェクトが release 無しで残るためです。
//! キャンセルは登録が済んだ後で観測し、`Cancelled` として返します（release は scope close で走る）。

use std::sync::Arc;

use super::handle::{Resource, ResourceCell};
use crate::domain::{EffectError, ExitKind};
use crate::effect::{Context, Effect};
use crate::scope::{Finalizer, Scope};

/// Acquire a resource and register its release into `scope`.
///
/// The release action runs exactly once: at `scope` close, or earlier via
/// [`Resource::release`]. It is shielded from the chain's cancel signal.
pub fn acquire_scoped<T, F>(
    scope: &Scope,
    label: impl Into<String>,
    acquire: Effect<T>,
    release: F,
) -> Effect<Resource<T>>
where
    T: Send + Sync + 'static,
    F: Fn(Arc<T>) -> Effect<()> + Send + Sync + 'static,
{
    let scope = scope.clone();
    acquire_into(move |_| scope.clone(), label.into(), acquire, release)
}

/// [`acquire_scoped`] against the current scope of the running chain.
pub fn acquire_release<T, F>(label: impl Into<String>, acquire: Effect<T>, release: F) -> Effect<Resource<T>>
where
    T: Send + Sync + 'static,
    F: Fn(Arc<T>) -> Effect<()> + Send + Sync + 'static,
{
    acquire_into(|ctx: &Context| ctx.scope().clone(), label.into(), acquire, release)
}

/// Release `resource` now, as an effect.
pub fn release<T: Send + Sync + 'static>(resource: &Resource<T>) -> Effect<()> {
    let resource = resource.clone();
    Effect::from_fn(move |_| {
        let resource = resource.clone();
        async move { resource.release().await }
    })
}

fn acquire_into<T, F, P>(target: P, label: String, acquire: Effect<T>, release: F) -> Effect<Resource<T>>
where
    T: Send + Sync + 'static,
    F: Fn(Arc<T>) -> Effect<()> + Send + Sync + 'static,
    P: Fn(&Context) -> Scope + Send + Sync + 'static,
{
    let release = Arc::new(release);
    Effect::from_fn(move |ctx: Context| {
        let scope = target(&ctx);
        let acquire = acquire.clone();
        let release = Arc::clone(&release);
        let label = label.clone();
        async move {
            if scope.is_closed() {
                return Err(EffectError::ScopeClosed { scope: scope.id() });
            }
            ctx.check_cancelled()?;
            let value = Arc::new(acquire.run(ctx.uninterruptible()).await?);

            let id = ctx.next_resource_id();
            let release_ctx = ctx.uninterruptible();
            let owned = Arc::clone(&value);
            let cell = Arc::new(ResourceCell::new(
                id,
                scope.id(),
                label.clone(),
                value,
                Box::new(move |_exit: ExitKind| (*release)(owned).run(release_ctx)),
            ));

            let registered = Arc::clone(&cell);
            let finalizer = Finalizer::new(label.clone(), move |exit| async move { registered.release(exit).await });
            if let Err(err) = scope.add_finalizer(finalizer) {
                // scope が acquire 中に閉じられた: 登録先がないので即座に返却する
                if let Err(release_err) = cell.release(ExitKind::Failure).await {
                    tracing::warn!(resource = %id, error = %release_err, "release after late registration failed");
                }
                return Err(err);
            }

            tracing::debug!(resource = %id, label = %label, scope = %scope.id(), "resource acquired");
            ctx.check_cancelled()?;
            Ok(Resource { cell })
        }
    })
}
