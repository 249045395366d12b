//! tessel-core
//!
//! Scoped effect runtime for GPU-like resources.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, errors, exit, state）
//! - **ports**: 抽象化レイヤー（Clock, IdGenerator, GpuBackend）
//! - **effect**: 遅延評価される計算 `Effect<A>` とコンビネータ（all, race, timeout など）
//! - **scope**: リソースの所有境界と finalizer
//! - **service**: 型付きサービス識別子と Layer（succeed, effect, provide, merge）
//! - **resource**: scoped resource（acquire_scoped, acquire_release）と GPU object helper
//! - **app**: ランタイム（RuntimeBuilder, Runtime, Fiber, RuntimeConfig）
//! - **impls**: 実装（InMemoryGpu など開発用）
//!
//! # 最小の例
//! ```ignore
//! let runtime = Runtime::builder().layer(Device::layer(backend)).build()?;
//! let exit = runtime
//!     .run(buffer(BufferDescriptor::new("vertices", 4096)).map(|b| b.id()).scoped())
//!     .await;
//! ```

pub mod app;
pub mod domain;
pub mod effect;
pub mod impls;
pub mod ports;
pub mod resource;
pub mod scope;
pub mod service;

pub use self::app::{Runtime, RuntimeConfig};
pub use self::domain::{EffectError, Exit, ExitKind};
pub use self::effect::Effect;
pub use self::scope::Scope;
pub use self::service::{Layer, Service};
