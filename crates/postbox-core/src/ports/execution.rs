//! ExecutionContext port - スケジューリングと時刻の抽象化
//!
//! processor の poll loop をどこで・どう動かすかを切り離す。
//! - 本番: TokioExecutionContext（tokio task + 実時間）
//! - テスト: ManualExecutionContext（同期実行 + 仮想時計）
//!
//! # 状態遷移
//! - running（初期状態）-> stopped（`stop()` のみ、戻らない）

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// A long-running background task handed to the context.
pub type BackgroundTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[async_trait]
pub trait ExecutionContext: Send + Sync {
    /// Flip to `stopped` and release the worker resource. Idempotent.
    fn stop(&self);

    /// Pure read of the running flag.
    fn is_running(&self) -> bool;

    /// Asked by the poll loop before every cycle. Contexts that bound the
    /// number of cycles count them here; the default is [`Self::is_running`].
    fn next_cycle(&self) -> bool {
        self.is_running()
    }

    /// Suspend the calling task only.
    async fn pause(&self, duration: Duration);

    /// Schedule `task` without blocking the caller.
    fn start(&self, task: BackgroundTask);

    /// The context's notion of "now".
    fn current_time(&self) -> DateTime<Utc>;
}
