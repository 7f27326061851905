//! TokioExecutionContext - 本番用の ExecutionContext
//!
//! - `start()` は ambient な tokio runtime に spawn する
//! - running フラグは `watch` channel（`stop()` と poll loop の間で共有）
//! - `pause()` は sleep するが、`stop()` されたら早めに起きる
//! - `join()` で spawn したタスクの終了を待てる（graceful shutdown）

use std::sync::{Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::ports::{BackgroundTask, Clock, ExecutionContext, SystemClock};

pub struct TokioExecutionContext<C = SystemClock> {
    clock: C,
    shutdown_tx: watch::Sender<bool>,
    joins: StdMutex<Vec<JoinHandle<()>>>,
}

impl TokioExecutionContext<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for TokioExecutionContext<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> TokioExecutionContext<C> {
    pub fn with_clock(clock: C) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            clock,
            shutdown_tx,
            joins: StdMutex::new(Vec::new()),
        }
    }

    /// Wait for every task started so far. Does not stop them.
    pub async fn join(&self) {
        let joins = std::mem::take(&mut *self.joins());
        for join in joins {
            if let Err(err) = join.await {
                error!(error = %err, "background task ended abnormally");
            }
        }
    }

    /// Stop and wait for all tasks to leave their loops.
    pub async fn shutdown_and_join(&self) {
        self.stop();
        self.join().await;
    }

    fn joins(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.joins.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl<C: Clock> ExecutionContext for TokioExecutionContext<C> {
    fn stop(&self) {
        let was_stopped = self.shutdown_tx.send_replace(true);
        if !was_stopped {
            info!("execution context stopped");
        }
    }

    fn is_running(&self) -> bool {
        !*self.shutdown_tx.borrow()
    }

    async fn pause(&self, duration: Duration) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        if *shutdown_rx.borrow_and_update() {
            return;
        }

        // false -> true の一方向にしか変わらないので、changed は stop を意味する
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = shutdown_rx.changed() => {}
        }
    }

    fn start(&self, task: BackgroundTask) {
        if !self.is_running() {
            warn!("execution context is stopped, refusing to start task");
            return;
        }

        match Handle::try_current() {
            Ok(handle) => self.joins().push(handle.spawn(task)),
            Err(err) => error!(error = %err, "no tokio runtime available, task not started"),
        }
    }

    fn current_time(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
