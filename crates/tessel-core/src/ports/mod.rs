//! Ports - 抽象化レイヤー
//!
//! 外部システム（時刻、ID 生成、GPU object layer）へのインターフェースを定義し、
//! 実装の詳細を隠蔽します。テスト用・開発用の実装は `impls` にあります。

pub mod clock;
pub mod gpu;
pub mod id_generator;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::gpu::{
    BufferDescriptor, GpuBackend, GpuError, GpuHandle, ObjectKind, PipelineDescriptor,
    ShaderArtifact, TextureDescriptor,
};
pub use self::id_generator::{IdGenerator, UlidGenerator};
