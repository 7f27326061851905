//! Ports - 抽象化レイヤー
//!
//! processor が依存する外部システム（ストレージ、配送先、イベント通知、
//! スケジューラ、時計）のインターフェースを定義します。
//! 実装は `impls`（開発・テスト用）または別クレートに置きます。

pub mod clock;
pub mod event_sink;
pub mod execution;
pub mod handler;
pub mod id_generator;
pub mod postbox;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::event_sink::{EventSink, NoopEventSink};
pub use self::execution::{BackgroundTask, ExecutionContext};
pub use self::handler::RequestHandler;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::postbox::{
    Postbox, PostboxTransaction, PostboxTransactor, TransactorExt, UnitOfWork,
};
