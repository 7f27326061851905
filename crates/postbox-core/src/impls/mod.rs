//! Impls - ports の実装（開発用・テスト用・tokio 本番用）
//!
//! # 含まれる実装
//! - **InMemoryPostbox**: 開発用の Postbox + Transactor
//! - **TokioExecutionContext**: tokio 上で poll loop を動かす
//! - **ManualExecutionContext / ManualClock**: 決定的なテスト用
//! - **RecordingEventSink / TracingEventSink**
//!
//! 本番用のストレージ実装（PostgreSQL など）は別クレートに配置します。

pub mod event_sinks;
pub mod inmem_postbox;
pub mod manual_context;
pub mod tokio_context;

pub use self::event_sinks::{RecordingEventSink, TracingEventSink};
pub use self::inmem_postbox::InMemoryPostbox;
pub use self::manual_context::{ManualClock, ManualExecutionContext};
pub use self::tokio_context::TokioExecutionContext;
