//! InMemoryGpu - 開発用・テスト用の GpuBackend
//!
//! # 学習ポイント
//! - 実デバイスなしで create / destroy の対応関係を検証する
//! - 失敗注入（label 指定 / メモリ上限）で取得失敗の経路をテストする
//! - destroy の冪等性

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::ports::{
    BufferDescriptor, GpuBackend, GpuError, GpuHandle, ObjectKind, PipelineDescriptor, TextureDescriptor,
};

#[derive(Default)]
struct Ledger {
    /// live handle -> label
    live: HashMap<GpuHandle, String>,
    destroyed: Vec<GpuHandle>,
    failing_labels: HashSet<String>,
    allocated_bytes: u64,
    sizes: HashMap<GpuHandle, u64>,
}

/// InMemoryGpu はハンドルを発行して台帳に記録するだけの backend
///
/// # 使用例
/// ```ignore
/// let gpu = Arc::new(InMemoryGpu::new().with_memory_limit(64 * 1024));
/// gpu.fail_label("shadow-map");
/// let layer = Device::layer(gpu.clone());
/// ```
pub struct InMemoryGpu {
    next_raw: AtomicU64,
    memory_limit: Option<u64>,
    latency: Option<Duration>,
    ledger: Mutex<Ledger>,
}

impl InMemoryGpu {
    pub fn new() -> Self {
        Self {
            next_raw: AtomicU64::new(1),
            memory_limit: None,
            latency: None,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    /// Buffer allocations beyond `bytes` in total fail with `OutOfMemory`.
    pub fn with_memory_limit(mut self, bytes: u64) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    /// Every create call sleeps for `latency` first.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make every create call for `label` fail with `InvalidDescriptor`.
    pub fn fail_label(&self, label: impl Into<String>) {
        self.ledger().failing_labels.insert(label.into());
    }

    pub fn live_count(&self) -> usize {
        self.ledger().live.len()
    }

    /// Labels of objects not yet destroyed, sorted.
    pub fn live_labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self.ledger().live.values().cloned().collect();
        labels.sort();
        labels
    }

    /// Handles in destroy order.
    pub fn destroyed(&self) -> Vec<GpuHandle> {
        self.ledger().destroyed.clone()
    }

    pub fn allocated_bytes(&self) -> u64 {
        self.ledger().allocated_bytes
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn create(&self, kind: ObjectKind, label: &str, bytes: u64) -> Result<GpuHandle, GpuError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        } else {
            tokio::task::yield_now().await;
        }

        let mut ledger = self.ledger();
        if ledger.failing_labels.contains(label) {
            return Err(GpuError::InvalidDescriptor(format!("injected failure for '{label}'")));
        }
        if let Some(limit) = self.memory_limit
            && ledger.allocated_bytes.saturating_add(bytes) > limit
        {
            return Err(GpuError::OutOfMemory { requested: bytes });
        }

        let handle = GpuHandle {
            kind,
            raw: self.next_raw.fetch_add(1, Ordering::Relaxed),
        };
        ledger.allocated_bytes += bytes;
        ledger.sizes.insert(handle, bytes);
        ledger.live.insert(handle, label.to_string());
        Ok(handle)
    }
}

impl Default for InMemoryGpu {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GpuBackend for InMemoryGpu {
    fn name(&self) -> &str {
        "in-memory"
    }

    async fn create_buffer(&self, desc: &BufferDescriptor) -> Result<GpuHandle, GpuError> {
        if desc.size == 0 {
            return Err(GpuError::InvalidDescriptor(format!("buffer '{}' has zero size", desc.label)));
        }
        self.create(ObjectKind::Buffer, &desc.label, desc.size).await
    }

    async fn create_texture(&self, desc: &TextureDescriptor) -> Result<GpuHandle, GpuError> {
        if desc.width == 0 || desc.height == 0 {
            return Err(GpuError::InvalidDescriptor(format!(
                "texture '{}' has an empty extent {}x{}",
                desc.label, desc.width, desc.height
            )));
        }
        self.create(ObjectKind::Texture, &desc.label, 0).await
    }

    async fn create_pipeline(&self, desc: &PipelineDescriptor) -> Result<GpuHandle, GpuError> {
        if desc.shader.bytes.is_empty() {
            return Err(GpuError::InvalidDescriptor(format!(
                "pipeline '{}' has an empty shader",
                desc.label
            )));
        }
        self.create(ObjectKind::Pipeline, &desc.label, 0).await
    }

    /// 冪等: 未知または破棄済みのハンドルは何もしない
    async fn destroy(&self, handle: GpuHandle) -> Result<(), GpuError> {
        let mut ledger = self.ledger();
        if ledger.live.remove(&handle).is_some() {
            let bytes = ledger.sizes.remove(&handle).unwrap_or(0);
            ledger.allocated_bytes = ledger.allocated_bytes.saturating_sub(bytes);
            ledger.destroyed.push(handle);
        }
        Ok(())
    }
}
