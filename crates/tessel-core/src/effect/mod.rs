//! Effect - 遅延評価される型付き計算
//!
//! `Effect<A>` は「実行すると `A` か `EffectError` を返す計算」の記述です。
//! 構築しただけでは何も起きず、`Runtime` が `Context` を渡して初めて評価されます。
//!
//! # 学習ポイント
//! - 本体は `Arc<dyn Fn(Context) -> BoxFuture<..>>`。`Fn` なので同じ記述を何度評価しても安全
//! - コンビネータは元の Effect を clone して新しいクロージャに包むだけ（記述は不変）
//! - サスペンドは `from_future` だけ。ここでキャンセル信号と外部 future を競わせる
//!
//! # キャンセル
//! `EffectError::Cancelled` は `catch` / `catch_all` では捕まえられません。
//! `and_then` は各ステップの前後でキャンセル信号を確認します。

mod cancel;
mod concurrent;
mod context;

pub use self::cancel::CancelToken;
pub use self::context::Context;
pub(crate) use self::context::RuntimeShared;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};

use crate::domain::{EffectError, ErrorKind, ExitKind};
use crate::scope::Scope;
use crate::service::Service;

type Step<A> = dyn Fn(Context) -> BoxFuture<'static, Result<A, EffectError>> + Send + Sync;

/// A deferred, composable computation with a typed failure channel.
pub struct Effect<A> {
    step: Arc<Step<A>>,
}

impl<A> Clone for Effect<A> {
    fn clone(&self) -> Self {
        Self {
            step: Arc::clone(&self.step),
        }
    }
}

impl<A> std::fmt::Debug for Effect<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("output", &std::any::type_name::<A>())
            .finish()
    }
}

impl<A: Send + 'static> Effect<A> {
    /// Build an effect from a context-aware async function.
    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<A, EffectError>> + Send + 'static,
    {
        Self {
            step: Arc::new(move |ctx| f(ctx).boxed()),
        }
    }

    /// Evaluate once in `ctx`.
    pub fn run(&self, ctx: Context) -> BoxFuture<'static, Result<A, EffectError>> {
        (self.step)(ctx)
    }

    pub fn succeed(value: A) -> Self
    where
        A: Clone + Sync,
    {
        Self::from_fn(move |_| futures::future::ready(Ok(value.clone())))
    }

    pub fn fail(error: EffectError) -> Self {
        Self::from_fn(move |_| futures::future::ready(Err(error.clone())))
    }

    /// Synchronous, fallible computation. Re-run on every evaluation.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn() -> Result<A, EffectError> + Send + Sync + 'static,
    {
        Self::from_fn(move |ctx: Context| {
            let result = ctx.check_cancelled().and_then(|()| f());
            futures::future::ready(result)
        })
    }

    /// Wrap an external asynchronous operation.
    ///
    /// This is the suspension point: the operation is raced against the
    /// chain's cancel signal and dropped if cancellation wins.
    pub fn from_future<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<A, EffectError>> + Send + 'static,
    {
        let f = Arc::new(f);
        Self::from_fn(move |ctx: Context| {
            let f = Arc::clone(&f);
            async move {
                ctx.check_cancelled()?;
                let cancelled = ctx.cancel.cancelled();
                tokio::select! {
                    biased;
                    _ = cancelled => Err(EffectError::Cancelled),
                    result = f() => result,
                }
            }
        })
    }

    /// Never completes on its own; ends only by cancellation.
    pub fn never() -> Self {
        Self::from_future(futures::future::pending)
    }

    pub fn map<B, F>(self, f: F) -> Effect<B>
    where
        B: Send + 'static,
        F: Fn(A) -> B + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Effect::from_fn(move |ctx| {
            let this = self.clone();
            let f = Arc::clone(&f);
            async move { this.run(ctx).await.map(|a| f(a)) }
        })
    }

    /// Fallible transformation of the success value.
    pub fn try_map<B, F>(self, f: F) -> Effect<B>
    where
        B: Send + 'static,
        F: Fn(A) -> Result<B, EffectError> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Effect::from_fn(move |ctx| {
            let this = self.clone();
            let f = Arc::clone(&f);
            async move { this.run(ctx).await.and_then(|a| f(a)) }
        })
    }

    /// Transform the failure. Cancellation passes through untouched.
    pub fn map_error<F>(self, f: F) -> Effect<A>
    where
        F: Fn(EffectError) -> EffectError + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Effect::from_fn(move |ctx| {
            let this = self.clone();
            let f = Arc::clone(&f);
            async move {
                match this.run(ctx).await {
                    Err(err) if !err.is_cancelled() => Err(f(err)),
                    other => other,
                }
            }
        })
    }

    /// Sequence: run `self`, then the effect built from its value.
    pub fn and_then<B, F>(self, f: F) -> Effect<B>
    where
        B: Send + 'static,
        F: Fn(A) -> Effect<B> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Effect::from_fn(move |ctx: Context| {
            let this = self.clone();
            let f = Arc::clone(&f);
            async move {
                ctx.check_cancelled()?;
                let a = this.run(ctx.clone()).await?;
                ctx.check_cancelled()?;
                f(a).run(ctx).await
            }
        })
    }

    /// Run `self` then `other`, keeping both values.
    pub fn zip<B>(self, other: Effect<B>) -> Effect<(A, B)>
    where
        B: Send + 'static,
    {
        Effect::from_fn(move |ctx: Context| {
            let this = self.clone();
            let other = other.clone();
            async move {
                let a = this.run(ctx.clone()).await?;
                ctx.check_cancelled()?;
                let b = other.run(ctx).await?;
                Ok((a, b))
            }
        })
    }

    /// Observe the success value without changing it.
    pub fn tap<F>(self, f: F) -> Effect<A>
    where
        F: Fn(&A) + Send + Sync + 'static,
    {
        self.map(move |a| {
            f(&a);
            a
        })
    }

    /// Recover from one named kind of failure.
    pub fn catch<F>(self, kind: ErrorKind, handler: F) -> Effect<A>
    where
        F: Fn(EffectError) -> Effect<A> + Send + Sync + 'static,
    {
        self.recover(move |err| err.kind() == kind, handler)
    }

    /// Recover from any failure. Opt-in; cancellation is still not caught.
    pub fn catch_all<F>(self, handler: F) -> Effect<A>
    where
        F: Fn(EffectError) -> Effect<A> + Send + Sync + 'static,
    {
        self.recover(|_| true, handler)
    }

    fn recover<P, F>(self, accepts: P, handler: F) -> Effect<A>
    where
        P: Fn(&EffectError) -> bool + Send + Sync + 'static,
        F: Fn(EffectError) -> Effect<A> + Send + Sync + 'static,
    {
        let accepts = Arc::new(accepts);
        let handler = Arc::new(handler);
        Effect::from_fn(move |ctx: Context| {
            let this = self.clone();
            let accepts = Arc::clone(&accepts);
            let handler = Arc::clone(&handler);
            async move {
                match this.run(ctx.clone()).await {
                    Err(err) if !err.is_cancelled() && accepts(&err) => handler(err).run(ctx).await,
                    other => other,
                }
            }
        })
    }

    /// Run `finalizer` after `self` on every exit path, shielded from cancellation.
    pub fn ensuring(self, finalizer: Effect<()>) -> Effect<A> {
        Effect::from_fn(move |ctx: Context| {
            let this = self.clone();
            let finalizer = finalizer.clone();
            async move {
                let result = this.run(ctx.clone()).await;
                let cleanup = finalizer.run(ctx.uninterruptible()).await;
                settle(result, cleanup)
            }
        })
    }

    /// Run `self` in a fresh child scope that is closed on every exit path
    /// (success, failure, cancellation) before the outcome propagates.
    pub fn scoped(self) -> Effect<A> {
        Effect::from_fn(move |ctx: Context| {
            let body = self.clone();
            async move {
                let scope = ctx.open_scope();
                let result = body.run(ctx.with_scope(scope.clone())).await;
                let closed = scope.close(ExitKind::of(&result)).await;
                settle(result, closed)
            }
        })
    }
}

impl Effect<()> {
    pub fn unit() -> Self {
        Self::succeed(())
    }

    /// Timer effect. Interrupted early by cancellation.
    pub fn sleep(duration: Duration) -> Self {
        Self::from_future(move || async move {
            tokio::time::sleep(duration).await;
            Ok(())
        })
    }
}

impl<S: Service> Effect<S> {
    /// Resolve `S` from the active layers.
    pub fn service() -> Self {
        Self::from_fn(|ctx: Context| async move { ctx.resolve::<S>().await })
    }
}

impl Effect<Scope> {
    /// The scope currently receiving finalizers.
    pub fn current_scope() -> Self {
        Self::from_fn(|ctx: Context| futures::future::ready(Ok(ctx.scope.clone())))
    }
}

/// Combine a body outcome with the outcome of its cleanup.
///
/// A cleanup failure replaces a successful body outcome. When the body already
/// failed or was cancelled, the body outcome wins and the cleanup failure is logged.
pub(crate) fn settle<A>(
    result: Result<A, EffectError>,
    cleanup: Result<(), EffectError>,
) -> Result<A, EffectError> {
    match (result, cleanup) {
        (result, Ok(())) => result,
        (Ok(_), Err(cleanup_err)) => Err(cleanup_err),
        (Err(err), Err(cleanup_err)) => {
            tracing::error!(error = %err, cleanup = %cleanup_err, "cleanup failed after the chain had already failed");
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::Runtime;
    use crate::domain::Exit;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn runtime() -> Runtime {
        Runtime::builder().build().unwrap()
    }

    #[tokio::test]
    async fn effect_is_a_description_until_run() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let effect = Effect::sync(move || Ok(counter.fetch_add(1, Ordering::SeqCst)));
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        let rt = runtime();
        assert_eq!(rt.run_result(effect.clone()).await.unwrap(), 0);
        assert_eq!(rt.run_result(effect).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn and_then_sequences_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let first = Arc::clone(&log);
        let second = Arc::clone(&log);
        let effect = Effect::sync(move || {
            first.lock().unwrap().push("first");
            Ok(2)
        })
        .and_then(move |n| {
            let log = Arc::clone(&second);
            Effect::sync(move || {
                log.lock().unwrap().push("second");
                Ok(n * 10)
            })
        });

        assert_eq!(runtime().run_result(effect).await.unwrap(), 20);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn map_error_rewrites_failures() {
        let effect = Effect::<u8>::fail(EffectError::custom("gpu", "lost"))
            .map_error(|_| EffectError::custom("renderer", "frame dropped"));
        let err = runtime().run_result(effect).await.unwrap_err();
        assert_eq!(err.to_string(), "renderer: frame dropped");
    }

    #[tokio::test]
    async fn catch_only_handles_the_named_kind() {
        let rt = runtime();

        let recovered = Effect::<u8>::fail(EffectError::Timeout {
            after: Duration::from_millis(1),
        })
        .catch(ErrorKind::Timeout, |_| Effect::succeed(7));
        assert_eq!(rt.run_result(recovered).await.unwrap(), 7);

        let untouched = Effect::<u8>::fail(EffectError::custom("gpu", "lost"))
            .catch(ErrorKind::Timeout, |_| Effect::succeed(7));
        assert!(matches!(
            rt.run_result(untouched).await,
            Err(EffectError::Custom { .. })
        ));
    }

    #[tokio::test]
    async fn catch_all_never_swallows_cancellation() {
        let effect = Effect::<u8>::fail(EffectError::Cancelled).catch_all(|_| Effect::succeed(1));
        let exit = runtime().run(effect).await;
        assert!(exit.is_cancelled());
    }

    #[tokio::test]
    async fn zip_keeps_both_values() {
        let effect = Effect::succeed(1u32).zip(Effect::succeed("two"));
        assert_eq!(runtime().run_result(effect).await.unwrap(), (1, "two"));
    }

    #[tokio::test]
    async fn ensuring_runs_after_failure() {
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let effect = Effect::<u8>::fail(EffectError::custom("gpu", "lost")).ensuring(Effect::sync(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        ));

        let exit = runtime().run(effect).await;
        assert!(matches!(exit, Exit::Failure(EffectError::Custom { .. })));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn scoped_closes_its_scope_before_returning() {
        let captured = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&captured);
        let effect = Effect::current_scope()
            .tap(move |scope| *slot.lock().unwrap() = Some(scope.clone()))
            .map(|_| ())
            .scoped();

        runtime().run_result(effect).await.unwrap();

        let scope = captured.lock().unwrap().take().unwrap();
        assert!(scope.is_closed());
    }

    #[tokio::test]
    async fn cleanup_failure_replaces_success() {
        let effect = Effect::unit().ensuring(Effect::fail(EffectError::custom("gpu", "destroy failed")));
        let err = runtime().run_result(effect).await.unwrap_err();
        assert!(err.to_string().contains("destroy failed"));
    }

    #[tokio::test]
    async fn missing_service_fails_with_its_tag() {
        #[derive(Clone, Debug)]
        struct Compositor;
        impl Service for Compositor {
            const TAG: &'static str = "test.compositor";
        }

        let err = runtime()
            .run_result(Effect::<Compositor>::service())
            .await
            .unwrap_err();
        assert!(matches!(err, EffectError::ServiceNotFound { tag: "test.compositor" }));
    }
}
