//! Service trait - 型付きのサービス識別子
//!
//! # 使用例
//! ```ignore
//! #[derive(Clone)]
//! struct Allocator { /* ... */ }
//!
//! impl Service for Allocator {
//!     const TAG: &'static str = "tessel.allocator";
//! }
//! ```
//!
//! # Trait Bounds
//! - `Clone`: resolve のたびに呼び出し側へ値を渡すため（中身は Arc にするのが普通）
//! - `Send + Sync + 'static`: 複数の effect chain から共有されるため

use std::any::TypeId;

/// A typed key naming a capability.
///
/// The value type is `Self`; the tag must be globally unique.
pub trait Service: Clone + Send + Sync + 'static {
    /// 命名規約: `{namespace}.{capability}`（例: `tessel.device`）
    const TAG: &'static str;
}

/// Type-erased service identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceId {
    pub tag: &'static str,
    pub type_id: TypeId,
    pub type_name: &'static str,
}

impl ServiceId {
    pub fn of<S: Service>() -> Self {
        Self {
            tag: S::TAG,
            type_id: TypeId::of::<S>(),
            type_name: std::any::type_name::<S>(),
        }
    }
}

impl std::fmt::Display for ServiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.tag, self.type_name)
    }
}
