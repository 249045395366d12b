//! App - アプリケーション層
//!
//! effect / scope / service を組み合わせて、実行可能なランタイムを組み立てます。
//!
//! # 主要コンポーネント
//! - **RuntimeBuilder**: layer のワイヤリングと起動時検証
//! - **Runtime**: effect の評価（`run` / `spawn` / `shutdown`）
//! - **Fiber**: spawn した effect chain へのハンドル
//! - **RuntimeConfig**: 設定値
//! - **RuntimeCounts**: 状態ごとの集計

pub mod builder;
pub mod config;
pub mod fiber;
pub mod runtime;
pub mod status;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, RuntimeBuilder};
pub use self::config::RuntimeConfig;
pub use self::fiber::Fiber;
pub use self::runtime::Runtime;
pub use self::status::RuntimeCounts;
