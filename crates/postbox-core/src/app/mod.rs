//! App - アプリケーション層
//!
//! ports を組み合わせて postbox の処理ロジックを実装します。
//!
//! # 主要コンポーネント
//! - **PostboxProcessor**: poll loop と 1 cycle の transactional な処理
//! - **PostboxProcessorBuilder**: ワイヤリングと起動時検証
//! - **ProcessingConfig**: batch size / polling budget（環境変数から読み込み可）
//! - **PostboxCounts**: 状態別件数のビュー

pub mod builder;
pub mod config;
pub mod processing;
pub mod status;

pub use self::builder::{BuildError, PostboxProcessorBuilder};
pub use self::config::{ConfigError, ProcessingConfig};
pub use self::processing::{PostboxProcessor, SuccessCriteria, successful_status};
pub use self::status::PostboxCounts;
