//! Errors - エラー型と分類
//!
//! EffectError は閉じた分類（closed taxonomy）です。
//! 周辺レイヤー（GPU object layer など）は `Custom` で拡張します。
//!
//! # Clone である理由
//! memoized service の構築失敗はキャッシュされ、後続のすべての resolver に
//! 同じ失敗を返します。そのため原因（source）は `Arc` で保持します。

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::ids::{ResourceId, ScopeId};

/// Shared, clonable underlying cause.
pub type SharedCause = Arc<dyn StdError + Send + Sync + 'static>;

/// ErrorKind は EffectError の判別子
///
/// `Effect::catch(kind, ..)` で回復対象を指定するために使います。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ServiceNotFound,
    ServiceTypeMismatch,
    ServiceCycle,
    ScopeClosed,
    ResourceAcquisition,
    ResourceReleased,
    FinalizerAggregate,
    FinalizerPanicked,
    Timeout,
    Cancelled,
    Custom,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum EffectError {
    #[error("service not found: tag={tag}")]
    ServiceNotFound { tag: &'static str },

    #[error("service tag={tag} is bound to a value of a different type")]
    ServiceTypeMismatch { tag: &'static str },

    #[error("service dependency cycle: {}", .path.join(" -> "))]
    ServiceCycle { path: Vec<&'static str> },

    #[error("scope {scope} is already closed")]
    ScopeClosed { scope: ScopeId },

    #[error("failed to acquire resource '{resource}': {source}")]
    ResourceAcquisition {
        resource: String,
        #[source]
        source: SharedCause,
    },

    #[error("resource {resource} was used after release")]
    ResourceReleased { resource: ResourceId },

    #[error("{} finalizer(s) failed while closing {scope}: {}", .failures.len(), join_failures(.failures))]
    FinalizerAggregate {
        scope: ScopeId,
        failures: Vec<EffectError>,
    },

    #[error("finalizer panicked: {message}")]
    FinalizerPanicked { message: String },

    #[error("timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("cancelled")]
    Cancelled,

    #[error("{tag}: {message}")]
    Custom { tag: String, message: String },
}

fn join_failures(failures: &[EffectError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl EffectError {
    /// Wrap a create-primitive failure.
    pub fn acquisition<E>(resource: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::ResourceAcquisition {
            resource: resource.into(),
            source: Arc::new(source),
        }
    }

    pub fn custom(tag: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Custom {
            tag: tag.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ServiceNotFound { .. } => ErrorKind::ServiceNotFound,
            Self::ServiceTypeMismatch { .. } => ErrorKind::ServiceTypeMismatch,
            Self::ServiceCycle { .. } => ErrorKind::ServiceCycle,
            Self::ScopeClosed { .. } => ErrorKind::ScopeClosed,
            Self::ResourceAcquisition { .. } => ErrorKind::ResourceAcquisition,
            Self::ResourceReleased { .. } => ErrorKind::ResourceReleased,
            Self::FinalizerAggregate { .. } => ErrorKind::FinalizerAggregate,
            Self::FinalizerPanicked { .. } => ErrorKind::FinalizerPanicked,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Custom { .. } => ErrorKind::Custom,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Caller may retry at its own discretion. Nothing is retried automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ResourceAcquisition { .. } | Self::Timeout { .. }
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
