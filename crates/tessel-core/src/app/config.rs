//! RuntimeConfig - ランタイムの設定値
//!
//! JSON などから読み込めるように serde で derive しています。
//! 欠けているフィールドは `default_v1()` の値で埋まります。

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Shown in logs.
    pub name: String,

    /// Upper bound for a single finalizer during scope close.
    /// A finalizer that exceeds it is reported as a timeout in the aggregate.
    pub finalizer_timeout_ms: Option<u64>,

    /// Applied by `Runtime::run` to every top-level effect.
    pub default_timeout_ms: Option<u64>,
}

impl RuntimeConfig {
    /// Default for v1: finalizers get 5s each, top-level effects are unbounded.
    pub fn default_v1() -> Self {
        Self {
            name: "tessel".to_string(),
            finalizer_timeout_ms: Some(5_000),
            default_timeout_ms: None,
        }
    }

    pub fn finalizer_timeout(&self) -> Option<Duration> {
        self.finalizer_timeout_ms.map(Duration::from_millis)
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::default_v1()
    }
}
