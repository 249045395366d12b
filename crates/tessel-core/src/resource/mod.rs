//! Resource manager - Scope と service registry の上に載る scoped resource
//!
//! # 学習ポイント
//! - acquire に成功したものだけが release を登録する
//! - release は scope close 時にちょうど 1 回（`Resource::release` で早めることも可能）
//! - release 中はキャンセル信号を受け取らない

mod gpu;
mod handle;
mod manager;

pub use self::gpu::{Buffer, Device, GpuObject, Pipeline, Texture, buffer, pipeline, texture};
pub use self::handle::Resource;
pub use self::manager::{acquire_release, acquire_scoped, release};
