use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use tessel_core::app::{Runtime, RuntimeConfig, RuntimeCounts};
use tessel_core::domain::{EffectError, ErrorKind, Exit, ExitKind};
use tessel_core::effect::Effect;
use tessel_core::impls::InMemoryGpu;
use tessel_core::ports::{
    BufferDescriptor, GpuBackend, GpuError, GpuHandle, PipelineDescriptor, ShaderArtifact,
    TextureDescriptor,
};
use tessel_core::resource::{Device, Resource, Texture, buffer, pipeline, texture};
use tessel_core::service::{Layer, Service};

/// 実 backend の代わり: InMemoryGpu の呼び出しをログに出すだけ
struct TracingGpu {
    inner: Arc<InMemoryGpu>,
}

#[async_trait]
impl GpuBackend for TracingGpu {
    fn name(&self) -> &str {
        "tracing(in-memory)"
    }

    async fn create_buffer(&self, desc: &BufferDescriptor) -> Result<GpuHandle, GpuError> {
        let handle = self.inner.create_buffer(desc).await?;
        tracing::info!(%handle, label = %desc.label, size = desc.size, "create buffer");
        Ok(handle)
    }

    async fn create_texture(&self, desc: &TextureDescriptor) -> Result<GpuHandle, GpuError> {
        let handle = self.inner.create_texture(desc).await?;
        tracing::info!(%handle, label = %desc.label, "create texture");
        Ok(handle)
    }

    async fn create_pipeline(&self, desc: &PipelineDescriptor) -> Result<GpuHandle, GpuError> {
        let handle = self.inner.create_pipeline(desc).await?;
        tracing::info!(%handle, label = %desc.label, entry = %desc.entry_point, "create pipeline");
        Ok(handle)
    }

    async fn destroy(&self, handle: GpuHandle) -> Result<(), GpuError> {
        tracing::info!(%handle, "destroy");
        self.inner.destroy(handle).await
    }
}

/// runtime 全体で 1 つだけ作る swapchain（memoized service）
#[derive(Clone)]
struct Swapchain {
    image: Resource<Texture>,
}

impl Service for Swapchain {
    const TAG: &'static str = "demo.swapchain";
}

#[derive(Debug, Serialize)]
struct Report {
    runtime: String,
    exit: ExitKind,
    frames: Vec<String>,
    error: Option<String>,
    counts: RuntimeCounts,
    live_objects: usize,
}

fn load_config() -> Result<RuntimeConfig, Box<dyn std::error::Error>> {
    match std::env::args().nth(1) {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&raw)?)
        }
        None => Ok(RuntimeConfig::default_v1()),
    }
}

/// 1 フレーム分: buffer と depth texture を取り、pipeline を作る。scope を抜けると全部 destroy
fn frame(index: usize) -> Effect<String> {
    let shader = ShaderArtifact::new("blit", vec![0x03, 0x02, 0x23, 0x07]);
    buffer(BufferDescriptor::new(format!("vertices-{index}"), 4096).with_usage("vertex"))
        .zip(texture(TextureDescriptor::new(format!("depth-{index}"), 640, 480, "depth32")))
        .and_then(move |(vertices, depth)| {
            pipeline(PipelineDescriptor::new(format!("blit-{index}"), shader.clone(), "main")).try_map(
                move |pipe| {
                    Ok(format!(
                        "{} + {} -> {}",
                        vertices.get()?.handle,
                        depth.get()?.handle,
                        pipe.get()?.handle
                    ))
                },
            )
        })
        .and_then(|frame| {
            Effect::<Swapchain>::service().try_map(move |swapchain| {
                Ok(format!("{frame} => {}", swapchain.image.get()?.handle))
            })
        })
        .scoped()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let config = load_config()?;

    // (A) backend と layer を用意
    let gpu = Arc::new(InMemoryGpu::new().with_memory_limit(64 * 1024));
    let backend: Arc<dyn GpuBackend> = Arc::new(TracingGpu { inner: gpu.clone() });
    let swapchain = Layer::effect(
        texture(TextureDescriptor::new("swapchain", 640, 480, "bgra8")).map(|image| Swapchain { image }),
    );

    let runtime = Runtime::builder()
        .config(config)
        .layer(Device::layer(backend))
        .layer(swapchain)
        .expect_services(&[Device::TAG, Swapchain::TAG])
        .build()?;

    // (B) 2 フレームを並行に。大きすぎる staging buffer は回復可能な取得失敗として扱う
    let staging = buffer(BufferDescriptor::new("staging", 1 << 20))
        .map(|_| "staging ready".to_string())
        .catch(ErrorKind::ResourceAcquisition, |err: EffectError| {
            tracing::warn!(error = %err, "staging buffer unavailable; continuing without it");
            Effect::succeed("staging skipped".to_string())
        })
        .scoped();
    let program = Effect::all(vec![frame(0), frame(1), staging]);

    let exit = runtime.run(program).await;
    let live_before_shutdown = gpu.live_count();
    runtime.shutdown().await?;

    let (frames, error) = match &exit {
        Exit::Success(frames) => (frames.clone(), None),
        Exit::Failure(err) => (Vec::new(), Some(err.to_string())),
        Exit::Cancelled => (Vec::new(), None),
    };
    let report = Report {
        runtime: runtime.config().name.clone(),
        exit: exit.kind(),
        frames,
        error,
        counts: runtime.counts(),
        live_objects: gpu.live_count(),
    };
    tracing::info!(live_before_shutdown, "root scope held the swapchain until shutdown");
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
