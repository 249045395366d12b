//! Runtime identifiers (strongly-typed IDs).
//!
//! # ULID + Phantom type
//! Scope / Resource / Fiber / Binding の ID はすべて ULID ベースです。
//! `Id<T>` というジェネリック型で共通実装を提供し、
//! `T` はマーカー型（PhantomData）としてコンパイル時の型安全性だけを担います。
//!
//! - 生成順でソート可能（ログで scope の open 順を追える）
//! - ScopeId と ResourceId は混同できない

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
///
/// Display で使うプレフィックス（"scope-", "res-" など）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    /// 現在時刻ベースの新しい ID
    ///
    /// Runtime の外で Scope を開く場合など、IdGenerator を経由しない経路用。
    pub fn generate() -> Self {
        Self::from_ulid(Ulid::new())
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

// ========================================
// マーカー型の定義
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScopeMarker {}

impl IdMarker for ScopeMarker {
    fn prefix() -> &'static str {
        "scope-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceMarker {}

impl IdMarker for ResourceMarker {
    fn prefix() -> &'static str {
        "res-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FiberMarker {}

impl IdMarker for FiberMarker {
    fn prefix() -> &'static str {
        "fiber-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BindingMarker {}

impl IdMarker for BindingMarker {
    fn prefix() -> &'static str {
        "binding-"
    }
}

// ========================================
// Type Alias
// ========================================

/// Identifier of a Scope (one ownership/cleanup boundary).
pub type ScopeId = Id<ScopeMarker>;

/// Identifier of a scoped resource handle.
pub type ResourceId = Id<ResourceMarker>;

/// Identifier of a spawned effect chain.
pub type FiberId = Id<FiberMarker>;

/// Identifier of one service binding inside a layer (memo table key).
pub type BindingId = Id<BindingMarker>;
