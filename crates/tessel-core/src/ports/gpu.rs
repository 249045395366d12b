//! GpuBackend port - GPU object layer の抽象化
//!
//! 実際のグラフィックス API（device / buffer / texture / pipeline）は外部コラボレータです。
//! core が仮定するのは次の 2 点だけ:
//! - create はハンドルを返すか失敗する
//! - destroy は冪等（破棄済みハンドルに対しては何もしない）
//!
//! ResourceManager は create を acquire、destroy を release として使います。

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Kind of native object behind a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Buffer,
    Texture,
    Pipeline,
}

/// Opaque native handle returned by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GpuHandle {
    pub kind: ObjectKind,
    pub raw: u64,
}

impl fmt::Display for GpuHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}#{}", self.kind, self.raw)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferDescriptor {
    pub label: String,
    pub size: u64,
    #[serde(default)]
    pub usage: Vec<String>,
}

impl BufferDescriptor {
    pub fn new(label: impl Into<String>, size: u64) -> Self {
        Self {
            label: label.into(),
            size,
            usage: Vec::new(),
        }
    }

    pub fn with_usage(mut self, usage: impl Into<String>) -> Self {
        self.usage.push(usage.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextureDescriptor {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub format: String,
}

impl TextureDescriptor {
    pub fn new(label: impl Into<String>, width: u32, height: u32, format: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            width,
            height,
            format: format.into(),
        }
    }
}

/// Compiled shader produced by the (external) shader pipeline.
///
/// The core treats it as an opaque blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderArtifact {
    pub label: String,
    pub bytes: Arc<[u8]>,
}

impl ShaderArtifact {
    pub fn new(label: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            label: label.into(),
            bytes: bytes.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineDescriptor {
    pub label: String,
    pub shader: ShaderArtifact,
    pub entry_point: String,
}

impl PipelineDescriptor {
    pub fn new(label: impl Into<String>, shader: ShaderArtifact, entry_point: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            shader,
            entry_point: entry_point.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GpuError {
    #[error("out of device memory (requested {requested} bytes)")]
    OutOfMemory { requested: u64 },

    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("device lost")]
    DeviceLost,
}

/// GpuBackend は raw create/destroy primitive を提供
///
/// # 設計原則
/// - 内部表現については何も仮定しない（ハンドルは opaque）
/// - destroy は冪等であること
#[async_trait]
pub trait GpuBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn create_buffer(&self, desc: &BufferDescriptor) -> Result<GpuHandle, GpuError>;

    async fn create_texture(&self, desc: &TextureDescriptor) -> Result<GpuHandle, GpuError>;

    async fn create_pipeline(&self, desc: &PipelineDescriptor) -> Result<GpuHandle, GpuError>;

    async fn destroy(&self, handle: GpuHandle) -> Result<(), GpuError>;
}
