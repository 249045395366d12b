//! IdGenerator port - ID 生成の抽象化
//!
//! Runtime は scope / resource / fiber の ID をこの port 経由で払い出します。
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（Clock で timestamp 部分を決める）

use crate::domain::ids::{FiberId, ResourceId, ScopeId};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は runtime 内の各種 ID を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（複数の effect chain から同時に使われる）
pub trait IdGenerator: Send + Sync {
    fn generate_scope_id(&self) -> ScopeId;

    fn generate_resource_id(&self) -> ResourceId;

    fn generate_fiber_id(&self) -> FiberId;
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// FixedClock を渡すと timestamp 部分が決定的になります。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_scope_id(&self) -> ScopeId {
        ScopeId::from(self.next_ulid())
    }

    fn generate_resource_id(&self) -> ResourceId {
        ResourceId::from(self.next_ulid())
    }

    fn generate_fiber_id(&self) -> FiberId {
        FiberId::from(self.next_ulid())
    }
}
