//! Service - 型付きサービス識別子と Layer による依存注入
//!
//! # 二層構造
//! - **表層（Typed）**: `Service` trait と `Effect::service::<S>()` - 型安全
//! - **内部（Dyn）**: `Arc<dyn Any + Send + Sync>` - 型消去して tag で管理

mod env;
pub mod layer;
pub mod service;

pub(crate) use self::env::{resolve, Env, MemoTable};
pub use self::layer::Layer;
pub use self::service::{Service, ServiceId};
