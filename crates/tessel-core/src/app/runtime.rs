//! Runtime - effect chain を評価する executor
//!
//! # 学習ポイント
//! - root scope: memoized service が取得した resource の持ち主。`shutdown` で閉じる
//! - 各 `run` / `spawn` は暗黙の scope の中で評価される（どの終了経路でも閉じる）
//! - キャンセル信号は runtime の shutdown token の子。`shutdown` で全 fiber に届く
//!
//! # 状態遷移
//! `Pending → {Succeeded, Failed, Cancelled}`（いずれも終端）を `RuntimeCounts` で数える。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use super::builder::RuntimeBuilder;
use super::config::RuntimeConfig;
use super::fiber::Fiber;
use super::status::{Counters, RuntimeCounts};
use crate::domain::{EffectError, Exit, ExitKind, FiberId, FiberState};
use crate::effect::{CancelToken, Context, Effect, RuntimeShared};
use crate::ports::IdGenerator;
use crate::scope::Scope;
use crate::service::{Env, Layer, MemoTable};

struct RuntimeInner {
    shared: Arc<RuntimeShared>,
    env: Arc<Env>,
    config: RuntimeConfig,
    counters: Counters,
    shutdown: CancelToken,
    fibers: Mutex<HashMap<FiberId, watch::Receiver<FiberState>>>,
    /// Number of `execute` calls (run and spawn) that have not returned yet.
    in_flight: watch::Sender<usize>,
}

/// Counts one in-flight execution; the count drops even if the caller
/// abandons the `run` future.
struct InFlight<'a>(&'a watch::Sender<usize>);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a watch::Sender<usize>) -> Self {
        counter.send_modify(|n| *n += 1);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Runtime は effect を評価するエントリポイント
///
/// Clone すると同じ runtime instance（同じ memo table / root scope）を共有します。
///
/// # 使用例
/// ```ignore
/// let runtime = Runtime::builder().layer(Device::layer(backend)).build()?;
/// let exit = runtime.run(buffer(desc).scoped()).await;
/// runtime.shutdown().await?;
/// ```
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    pub(crate) fn new(layer: Layer, config: RuntimeConfig, ids: Arc<dyn IdGenerator>) -> Self {
        let finalizer_timeout = config.finalizer_timeout();
        let root_scope = Scope::open_with(ids.generate_scope_id(), finalizer_timeout);
        tracing::debug!(runtime = %config.name, services = ?layer.tags(), "runtime built");
        Self {
            inner: Arc::new(RuntimeInner {
                shared: Arc::new(RuntimeShared {
                    memo: MemoTable::default(),
                    root_scope,
                    ids,
                    finalizer_timeout,
                }),
                env: Env::root(&layer),
                config,
                counters: Counters::default(),
                shutdown: CancelToken::new(),
                fibers: Mutex::new(HashMap::new()),
                in_flight: watch::channel(0).0,
            }),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Evaluate `effect` in an implicit scope and wait for its terminal outcome.
    pub async fn run<A: Send + 'static>(&self, effect: Effect<A>) -> Exit<A> {
        self.execute(effect, self.inner.shutdown.child()).await
    }

    /// [`Runtime::run`] as a `Result`; cancellation becomes `EffectError::Cancelled`.
    pub async fn run_result<A: Send + 'static>(&self, effect: Effect<A>) -> Result<A, EffectError> {
        self.run(effect).await.into_result()
    }

    /// Start `effect` on its own tokio task.
    pub fn spawn<A: Send + 'static>(&self, effect: Effect<A>) -> Fiber<A> {
        let id = self.inner.shared.ids.generate_fiber_id();
        let cancel = self.inner.shutdown.child();
        let (state_tx, state_rx) = watch::channel(FiberState::Pending);
        self.fibers().insert(id, state_rx.clone());

        let runtime = self.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let exit = runtime.execute(effect, token).await;
            state_tx.send_replace(FiberState::from(exit.kind()));
            runtime.fibers().remove(&id);
            exit
        });
        tracing::debug!(fiber = %id, "fiber spawned");
        Fiber::new(id, cancel, state_rx, handle)
    }

    pub fn counts(&self) -> RuntimeCounts {
        self.inner.counters.snapshot()
    }

    /// Number of service constructor runs so far (memoized and fresh).
    pub fn constructions(&self) -> usize {
        self.inner.shared.memo.constructions()
    }

    /// Cancel every outstanding chain (`run` and `spawn`), wait until each has
    /// finished its own cleanup, then close the root scope.
    ///
    /// Effects started afterwards end as `Exit::Cancelled`. A second call is a no-op.
    /// Calling this from inside a chain of the same runtime never returns.
    pub async fn shutdown(&self) -> Result<(), EffectError> {
        self.inner.shutdown.cancel();
        let outstanding: Vec<watch::Receiver<FiberState>> =
            self.fibers().drain().map(|(_, state)| state).collect();
        tracing::debug!(runtime = %self.inner.config.name, fibers = outstanding.len(), "shutting down");

        for mut state in outstanding {
            loop {
                let done = state.borrow_and_update().is_terminal();
                if done || state.changed().await.is_err() {
                    break;
                }
            }
        }

        // `run` chains are not fibers; wait for them too before memoized
        // resources go away under their cleanup.
        let mut in_flight = self.inner.in_flight.subscribe();
        loop {
            let idle = *in_flight.borrow_and_update() == 0;
            if idle || in_flight.changed().await.is_err() {
                break;
            }
        }
        self.inner.shared.root_scope.close(ExitKind::Success).await
    }

    fn fibers(&self) -> MutexGuard<'_, HashMap<FiberId, watch::Receiver<FiberState>>> {
        self.inner.fibers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn execute<A: Send + 'static>(&self, effect: Effect<A>, cancel: CancelToken) -> Exit<A> {
        let counters = &self.inner.counters;
        counters.started();
        let _in_flight = InFlight::enter(&self.inner.in_flight);
        if self.inner.shutdown.is_cancelled() {
            tracing::debug!(runtime = %self.inner.config.name, "runtime is shut down; effect not started");
            counters.finished(ExitKind::Cancelled);
            return Exit::Cancelled;
        }

        let body = match self.inner.config.default_timeout() {
            Some(after) => effect.scoped().timeout(after),
            None => effect.scoped(),
        };
        let ctx = Context::new(
            Arc::clone(&self.inner.shared),
            Arc::clone(&self.inner.env),
            self.inner.shared.root_scope.clone(),
            cancel,
        );
        let exit = Exit::from(body.run(ctx).await);

        match &exit {
            Exit::Success(_) => {}
            Exit::Failure(err) => tracing::warn!(kind = %err.kind(), error = %err, "effect failed"),
            Exit::Cancelled => tracing::debug!("effect cancelled"),
        }
        counters.finished(exit.kind());
        exit
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("name", &self.inner.config.name)
            .field("counts", &self.counts())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorKind;
    use crate::impls::InMemoryGpu;
    use crate::ports::{BufferDescriptor, GpuBackend, TextureDescriptor};
    use crate::resource::{Device, Resource, Texture, acquire_scoped, buffer, texture};
    use crate::scope::Finalizer;
    use crate::service::Service;
    use rstest::rstest;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    type Log = Arc<Mutex<Vec<&'static str>>>;

    #[derive(Clone, Debug, PartialEq)]
    struct Adapter {
        serial: usize,
    }

    impl Service for Adapter {
        const TAG: &'static str = "test.adapter";
    }

    #[derive(Clone, Debug)]
    struct Renderer {
        adapter: usize,
    }

    impl Service for Renderer {
        const TAG: &'static str = "test.renderer";
    }

    #[derive(Clone, Debug)]
    struct Ping;

    impl Service for Ping {
        const TAG: &'static str = "test.ping";
    }

    #[derive(Clone, Debug)]
    struct Pong;

    impl Service for Pong {
        const TAG: &'static str = "test.pong";
    }

    #[derive(Clone)]
    struct Atlas {
        page: Resource<Texture>,
    }

    impl Service for Atlas {
        const TAG: &'static str = "test.atlas";
    }

    #[derive(Clone, Debug, PartialEq)]
    struct Config(&'static str);

    impl Service for Config {
        const TAG: &'static str = "test.config";
    }

    #[derive(Clone, Debug, PartialEq)]
    struct Db(&'static str);

    impl Service for Db {
        const TAG: &'static str = "test.db";
    }

    #[derive(Clone, Debug, PartialEq)]
    struct App(&'static str);

    impl Service for App {
        const TAG: &'static str = "test.app";
    }

    fn counting_adapter(builds: &Arc<AtomicUsize>) -> Effect<Adapter> {
        let builds = Arc::clone(builds);
        Effect::from_future(move || {
            let builds = Arc::clone(&builds);
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(Adapter {
                    serial: builds.fetch_add(1, Ordering::SeqCst) + 1,
                })
            }
        })
    }

    fn release_into(log: &Log, name: &'static str) -> impl Fn(Arc<u32>) -> Effect<()> + Send + Sync + 'static {
        let log = Arc::clone(log);
        move |_| {
            let log = Arc::clone(&log);
            Effect::sync(move || {
                log.lock().unwrap().push(name);
                Ok(())
            })
        }
    }

    fn gpu_runtime(gpu: &Arc<InMemoryGpu>, extra: Layer) -> Runtime {
        let backend: Arc<dyn GpuBackend> = gpu.clone();
        Runtime::builder()
            .layer(Device::layer(backend))
            .layer(extra)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn scenario_a_dependent_resources_release_in_reverse() {
        let rt = Runtime::builder().build().unwrap();
        let scope = Scope::open();
        let log: Log = Arc::new(Mutex::new(Vec::new()));

        let outer = scope.clone();
        let log_r2 = Arc::clone(&log);
        let chain = acquire_scoped(&scope, "R1", Effect::succeed(1u32), release_into(&log, "F1")).and_then(
            move |r1| {
                let base = *r1.get().unwrap();
                acquire_scoped(&outer, "R2", Effect::succeed(base + 1), release_into(&log_r2, "F2"))
            },
        );

        let r2 = rt.run_result(chain).await.unwrap();
        assert_eq!(*r2.get().unwrap(), 2);
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(scope.len(), 2);

        scope.close(ExitKind::Success).await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["F2", "F1"]);
    }

    #[tokio::test]
    async fn scenario_b_memoized_service_is_built_once() {
        let builds = Arc::new(AtomicUsize::new(0));
        let rt = Runtime::builder()
            .layer(Layer::effect(counting_adapter(&builds)))
            .build()
            .unwrap();

        for _ in 0..5 {
            let adapter = rt.run_result(Effect::<Adapter>::service()).await.unwrap();
            assert_eq!(adapter, Adapter { serial: 1 });
        }

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(rt.constructions(), 1);
    }

    #[tokio::test]
    async fn scenario_c_failed_second_acquisition_releases_only_the_first() {
        let gpu = Arc::new(InMemoryGpu::new());
        gpu.fail_label("R2");
        let rt = gpu_runtime(&gpu, Layer::empty());

        let chain = buffer(BufferDescriptor::new("R1", 64))
            .and_then(|_| buffer(BufferDescriptor::new("R2", 64)))
            .scoped();
        let exit = rt.run(chain).await;

        assert_eq!(exit.failure().map(EffectError::kind), Some(ErrorKind::ResourceAcquisition));
        assert_eq!(gpu.destroyed().len(), 1);
        assert_eq!(gpu.live_count(), 0);
    }

    #[tokio::test]
    async fn scenario_d_failing_branch_cancels_sibling_and_its_cleanup_runs() {
        let gpu = Arc::new(InMemoryGpu::new());
        let rt = gpu_runtime(&gpu, Layer::empty());

        let branch_one = Effect::sleep(Duration::from_millis(20))
            .and_then(|()| Effect::<()>::fail(EffectError::custom("branch-1", "device lost")));
        let branch_two = texture(TextureDescriptor::new("pending", 8, 8, "rgba8"))
            .and_then(|_| Effect::<()>::never())
            .scoped();

        let exit = rt.run(Effect::all(vec![branch_one, branch_two])).await;

        assert!(matches!(exit, Exit::Failure(EffectError::Custom { ref tag, .. }) if tag == "branch-1"));
        assert_eq!(gpu.destroyed().len(), 1);
        assert_eq!(gpu.live_count(), 0);
    }

    #[rstest]
    #[case(2)]
    #[case(8)]
    #[case(32)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_resolutions_share_one_construction(#[case] resolvers: usize) {
        let builds = Arc::new(AtomicUsize::new(0));
        let rt = Runtime::builder()
            .layer(Layer::effect(counting_adapter(&builds)))
            .build()
            .unwrap();

        let fibers: Vec<_> = (0..resolvers)
            .map(|_| rt.spawn(Effect::<Adapter>::service()))
            .collect();
        for fiber in fibers {
            let adapter = fiber.join().await.into_result().unwrap();
            assert_eq!(adapter.serial, 1);
        }

        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn memoized_failure_is_replayed_to_every_resolver() {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&builds);
        let ctor = Effect::<Adapter>::from_future(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(EffectError::custom("adapter", "no compatible device")) }
        });
        let rt = Runtime::builder().layer(Layer::effect(ctor)).build().unwrap();

        let all = Effect::all((0..4).map(|_| Effect::<Adapter>::service().map(|a| a.serial)));
        let err = rt.run_result(all).await.unwrap_err();
        let again = rt.run_result(Effect::<Adapter>::service()).await.unwrap_err();

        assert!(matches!(err, EffectError::Custom { ref tag, .. } if tag == "adapter"));
        assert!(matches!(again, EffectError::Custom { ref tag, .. } if tag == "adapter"));
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_memoized_construction_is_rebuilt_by_the_next_resolver() {
        let builds = Arc::new(AtomicUsize::new(0));
        let rt = Runtime::builder()
            .layer(Layer::effect(counting_adapter(&builds)))
            .build()
            .unwrap();

        let first = rt.spawn(Effect::<Adapter>::service());
        tokio::time::sleep(Duration::from_millis(2)).await;
        first.cancel();
        assert!(first.join().await.is_cancelled());
        assert_eq!(builds.load(Ordering::SeqCst), 0);

        let adapter = rt.run_result(Effect::<Adapter>::service()).await.unwrap();

        assert_eq!(adapter, Adapter { serial: 1 });
        assert_eq!(rt.constructions(), 2);
    }

    #[tokio::test]
    async fn tag_bound_to_another_type_is_a_type_mismatch() {
        #[derive(Clone, Debug)]
        struct Impostor;

        impl Service for Impostor {
            const TAG: &'static str = "test.adapter";
        }

        let rt = Runtime::builder().layer(Layer::succeed(Impostor)).build().unwrap();

        let err = rt.run_result(Effect::<Adapter>::service()).await.unwrap_err();

        assert!(matches!(err, EffectError::ServiceTypeMismatch { tag: "test.adapter" }));
        assert_eq!(err.kind(), ErrorKind::ServiceTypeMismatch);
    }

    #[tokio::test]
    async fn provided_dependency_is_visible_only_to_the_constructor() {
        let renderer = Layer::effect(Effect::<Adapter>::service().map(|a| Renderer { adapter: a.serial }));
        let rt = Runtime::builder()
            .layer(renderer.provide(Layer::succeed(Adapter { serial: 7 })))
            .build()
            .unwrap();

        let renderer = rt.run_result(Effect::<Renderer>::service()).await.unwrap();
        let hidden = rt.run_result(Effect::<Adapter>::service()).await.unwrap_err();

        assert_eq!(renderer.adapter, 7);
        assert!(matches!(hidden, EffectError::ServiceNotFound { tag: "test.adapter" }));
    }

    #[tokio::test]
    async fn merge_lets_the_later_layer_win() {
        let layer = Layer::succeed(Adapter { serial: 1 }).merge(Layer::succeed(Adapter { serial: 2 }));
        let rt = Runtime::builder().layer(layer).build().unwrap();

        let adapter = rt.run_result(Effect::<Adapter>::service()).await.unwrap();
        assert_eq!(adapter.serial, 2);
    }

    #[tokio::test]
    async fn dependency_cycle_is_reported_instead_of_deadlocking() {
        let layer = Layer::effect(Effect::<Pong>::service().map(|_| Ping))
            .merge(Layer::effect(Effect::<Ping>::service().map(|_| Pong)));
        let rt = Runtime::builder().layer(layer).build().unwrap();

        let err = rt.run_result(Effect::<Ping>::service()).await.unwrap_err();

        assert!(matches!(err, EffectError::ServiceCycle { ref path }
            if *path == vec!["test.ping", "test.pong", "test.ping"]));
    }

    #[tokio::test]
    async fn memoized_resources_live_until_shutdown() {
        let gpu = Arc::new(InMemoryGpu::new());
        let atlas = Layer::effect(
            texture(TextureDescriptor::new("atlas", 256, 256, "r8")).map(|page| Atlas { page }),
        );
        let rt = gpu_runtime(&gpu, atlas);

        let usable = rt
            .run_result(Effect::<Atlas>::service().map(|atlas| atlas.page.get().is_ok()))
            .await
            .unwrap();
        assert!(usable);
        assert_eq!(gpu.live_count(), 1);

        rt.shutdown().await.unwrap();
        assert_eq!(gpu.live_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_waits_for_running_chains_before_releasing_memoized_resources() {
        let gpu = Arc::new(InMemoryGpu::new());
        let atlas = Layer::effect(
            texture(TextureDescriptor::new("atlas", 256, 256, "r8")).map(|page| Atlas { page }),
        );
        let rt = gpu_runtime(&gpu, atlas);
        let usable_in_cleanup = Arc::new(Mutex::new(None));

        let record = Arc::clone(&usable_in_cleanup);
        let chain = Effect::<Atlas>::service().and_then(move |atlas| {
            let record = Arc::clone(&record);
            let cleanup = Effect::sleep(Duration::from_millis(10)).and_then(move |()| {
                let usable = atlas.page.get().is_ok();
                let record = Arc::clone(&record);
                Effect::sync(move || {
                    *record.lock().unwrap() = Some(usable);
                    Ok(())
                })
            });
            Effect::<()>::never().ensuring(cleanup)
        });
        let running = {
            let rt = rt.clone();
            tokio::spawn(async move { rt.run(chain).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(gpu.live_count(), 1);

        rt.shutdown().await.unwrap();

        assert_eq!(*usable_in_cleanup.lock().unwrap(), Some(true));
        assert_eq!(gpu.live_count(), 0);
        assert!(running.await.unwrap().is_cancelled());
    }

    #[tokio::test]
    async fn memoized_service_sees_only_its_declaring_layer() {
        let db = Layer::effect(Effect::<Config>::service().map(|config| Db(config.0)));
        let app = Layer::effect(Effect::<Db>::service().map(|db| App(db.0)))
            .provide(Layer::succeed(Config("private-to-app")));
        let rt = Runtime::builder()
            .layer(Layer::succeed(Config("global")))
            .layer(db)
            .layer(app)
            .build()
            .unwrap();

        let app = rt.run_result(Effect::<App>::service()).await.unwrap();
        let db = rt.run_result(Effect::<Db>::service()).await.unwrap();

        assert_eq!(app, App("global"));
        assert_eq!(db, Db("global"));
    }

    #[tokio::test]
    async fn fresh_service_is_rebuilt_in_the_resolver_scope() {
        let gpu = Arc::new(InMemoryGpu::new());
        let atlas = Layer::effect_fresh(
            texture(TextureDescriptor::new("scratch", 16, 16, "r8")).map(|page| Atlas { page }),
        );
        let rt = gpu_runtime(&gpu, atlas);

        for _ in 0..2 {
            rt.run_result(Effect::<Atlas>::service()).await.unwrap();
            assert_eq!(gpu.live_count(), 0);
        }

        assert_eq!(rt.constructions(), 2);
        assert_eq!(gpu.destroyed().len(), 2);
    }

    #[tokio::test]
    async fn cancelled_fiber_still_releases_its_resources() {
        let gpu = Arc::new(InMemoryGpu::new());
        let rt = gpu_runtime(&gpu, Layer::empty());

        let fiber = rt.spawn(
            texture(TextureDescriptor::new("framebuffer", 64, 64, "rgba8"))
                .and_then(|_| Effect::<()>::never())
                .scoped(),
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(fiber.state(), FiberState::Pending);
        assert_eq!(gpu.live_count(), 1);

        fiber.cancel();
        let exit = fiber.join().await;

        assert!(exit.is_cancelled());
        assert_eq!(gpu.live_count(), 0);
        let counts = rt.counts();
        assert_eq!((counts.pending, counts.cancelled), (0, 1));
    }

    #[tokio::test]
    async fn shutdown_cancels_fibers_and_refuses_new_work() {
        let rt = Runtime::builder().build().unwrap();
        let fiber = rt.spawn(Effect::<()>::never());

        rt.shutdown().await.unwrap();

        assert_eq!(fiber.state(), FiberState::Cancelled);
        assert!(fiber.join().await.is_cancelled());
        assert!(rt.run(Effect::succeed(1u8)).await.is_cancelled());
        rt.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn counts_track_terminal_states() {
        let rt = Runtime::builder().build().unwrap();
        rt.run(Effect::succeed(1u8)).await;
        rt.run(Effect::<u8>::fail(EffectError::custom("test", "boom"))).await;

        assert_eq!(
            rt.counts(),
            RuntimeCounts {
                pending: 0,
                succeeded: 1,
                failed: 1,
                cancelled: 0
            }
        );
    }

    #[tokio::test]
    async fn default_timeout_bounds_top_level_effects() {
        let config = RuntimeConfig {
            default_timeout_ms: Some(20),
            ..RuntimeConfig::default_v1()
        };
        let rt = Runtime::builder().config(config).build().unwrap();

        let exit = rt.run(Effect::<()>::never()).await;

        assert!(matches!(exit, Exit::Failure(EffectError::Timeout { .. })));
    }

    #[tokio::test]
    async fn slow_finalizer_is_cut_off_by_configured_timeout() {
        let config = RuntimeConfig {
            finalizer_timeout_ms: Some(10),
            ..RuntimeConfig::default_v1()
        };
        let rt = Runtime::builder().config(config).build().unwrap();
        let effect = Effect::current_scope().and_then(|scope| {
            Effect::sync(move || {
                scope.add_finalizer(Finalizer::new("flush", |_| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                }))
            })
        });

        let exit = rt.run(effect).await;

        assert!(matches!(exit, Exit::Failure(EffectError::FinalizerAggregate { ref failures, .. })
            if matches!(failures[0], EffectError::Timeout { .. })));
    }
}
