//! Impls - 実装（開発用・テスト用）
//!
//! このモジュールには ports の実装を含めます。
//!
//! # 含まれる実装
//! - **InMemoryGpu**: 台帳に記録するだけの GpuBackend（失敗注入つき）
//!
//! 実デバイスを叩く backend は別クレートに置く想定です。

pub mod inmem_gpu;

pub use self::inmem_gpu::InMemoryGpu;
