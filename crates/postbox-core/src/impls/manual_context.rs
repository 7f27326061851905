//! ManualExecutionContext - テスト用の決定的な ExecutionContext
//!
//! - `start()` はタスクを積むだけ。`run_until_complete()` で呼び出し元のタスク上で実行する
//! - 時刻は共有の `ManualClock`。`pause()` は眠らずに時計を進めて記録する
//! - `with_cycle_limit(n)` で poll loop の cycle 数（`next_cycle()` が true を返す回数）を制限できる

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::ports::{BackgroundTask, Clock, ExecutionContext};

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<StdMutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(StdMutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let by = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
        let mut now = self.lock();
        *now = now.checked_add_signed(by).unwrap_or(DateTime::<Utc>::MAX_UTC);
    }

    pub fn set(&self, time: DateTime<Utc>) {
        *self.lock() = time;
    }

    fn lock(&self) -> MutexGuard<'_, DateTime<Utc>> {
        self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.lock()
    }
}

pub struct ManualExecutionContext {
    clock: ManualClock,
    running: AtomicBool,
    /// Remaining `true` answers of `next_cycle()`; `None` means unlimited.
    cycles_left: Option<AtomicUsize>,
    tasks: StdMutex<Vec<BackgroundTask>>,
    pauses: StdMutex<Vec<Duration>>,
}

impl ManualExecutionContext {
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            running: AtomicBool::new(true),
            cycles_left: None,
            tasks: StdMutex::new(Vec::new()),
            pauses: StdMutex::new(Vec::new()),
        }
    }

    /// `next_cycle()` answers `true` exactly `cycles` times, then the context
    /// stops itself. `is_running()` stays a plain read.
    pub fn with_cycle_limit(mut self, cycles: usize) -> Self {
        self.cycles_left = Some(AtomicUsize::new(cycles));
        self
    }

    pub fn clock(&self) -> ManualClock {
        self.clock.clone()
    }

    /// Drive every started task to completion on the caller's task.
    pub async fn run_until_complete(&self) {
        loop {
            let tasks = std::mem::take(&mut *lock(&self.tasks));
            if tasks.is_empty() {
                break;
            }
            for task in tasks {
                task.await;
            }
        }
    }

    pub fn pending_tasks(&self) -> usize {
        lock(&self.tasks).len()
    }

    /// Every duration passed to `pause()`, in call order.
    pub fn pauses(&self) -> Vec<Duration> {
        lock(&self.pauses).clone()
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl ExecutionContext for ManualExecutionContext {
    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn next_cycle(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        let Some(cycles_left) = &self.cycles_left else {
            return true;
        };

        let granted = cycles_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !granted {
            self.stop();
        }
        granted
    }

    async fn pause(&self, duration: Duration) {
        lock(&self.pauses).push(duration);
        self.clock.advance(duration);
    }

    fn start(&self, task: BackgroundTask) {
        if !self.running.load(Ordering::SeqCst) {
            warn!("execution context is stopped, refusing to start task");
            return;
        }
        lock(&self.tasks).push(task);
    }

    fn current_time(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
