//! RuntimeBuilder - ランタイムの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - 開発体験の改善（明確なエラーメッセージ）

use std::sync::Arc;

use super::config::RuntimeConfig;
use super::runtime::Runtime;
use crate::ports::{IdGenerator, SystemClock, UlidGenerator};
use crate::service::Layer;

/// RuntimeBuilder はランタイムを構築
///
/// # 使用例
/// ```ignore
/// let runtime = Runtime::builder()
///     .layer(Device::layer(backend))
///     .layer(Layer::effect(compositor))
///     .expect_services(&["tessel.device", "app.compositor"])
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - 通常、service の不在は最初に解決されたときに `ServiceNotFound` で表面化する
/// - expect_services() を使うと build() 時点で「期待集合 ⊆ 束縛済み集合」をチェックできる
pub struct RuntimeBuilder {
    layer: Layer,
    config: RuntimeConfig,
    ids: Option<Arc<dyn IdGenerator>>,
    expected_services: Option<Vec<String>>,
}

/// BuildError はランタイム構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing services: {0:?}. These services were expected but no layer binds them.")]
    MissingServices(Vec<String>),
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            layer: Layer::empty(),
            config: RuntimeConfig::default_v1(),
            ids: None,
            expected_services: None,
        }
    }

    /// Layer を追加
    ///
    /// 複数回呼ぶと `merge` される（同じ tag は後から追加した方が勝つ）。
    pub fn layer(mut self, layer: Layer) -> Self {
        self.layer = self.layer.merge(layer);
        self
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// ID 生成器を差し替える（テストで FixedClock を使うときなど）
    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// 期待される service tag のリストを設定
    pub fn expect_services(mut self, tags: &[&str]) -> Self {
        self.expected_services = Some(tags.iter().map(|tag| tag.to_string()).collect());
        self
    }

    /// # 検証
    /// - expect_services() で設定された tag が全て束縛されているかチェック
    /// - 不足があれば BuildError::MissingServices を返す
    pub fn build(self) -> Result<Runtime, BuildError> {
        if let Some(expected) = &self.expected_services {
            let missing: Vec<String> = expected
                .iter()
                .filter(|tag| !self.layer.contains(tag))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingServices(missing));
            }
        }
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(SystemClock)));
        Ok(Runtime::new(self.layer, self.config, ids))
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
