//! PostboxProcessor - postbox を定期的にポーリングして pending な request を配送する
//!
//! # フロー（1 cycle）
//! 1. Transactor で transaction を開始
//! 2. `batch_size` 件まで pending request を取得（ExecutionContext の時刻基準）
//! 3. 1 件ずつ順番に downstream handler へ配送
//! 4. success criteria で分類して processed / dead にマーク
//! 5. commit（失敗したら cycle 全体を rollback）
//!
//! # 既知の制限
//! - retry 回数の上限・backoff はない（dead にならない限り次の cycle で再試行される）
//! - lease / lock がないため、同じストレージに対して複数インスタンスを動かすと
//!   同じ request が二重に配送されうる
//! - 1 cycle・1 handler 呼び出しにタイムアウトはない

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tracing::{debug, error, info, warn};

use super::builder::PostboxProcessorBuilder;
use super::config::ProcessingConfig;
use crate::domain::{
    PendingRequest, ProcessingEvent, RequestProcessingError, Response, StorageError,
};
use crate::ports::{
    EventSink, ExecutionContext, PostboxTransaction, PostboxTransactor, RequestHandler,
    TransactorExt,
};

/// Decides whether a downstream response counts as delivered.
pub type SuccessCriteria = Arc<dyn Fn(&Response) -> bool + Send + Sync>;

/// Default criteria: the response status is 2xx.
pub fn successful_status() -> SuccessCriteria {
    Arc::new(|response: &Response| response.status.is_successful())
}

/// Background process that drains the postbox into the downstream handler.
pub struct PostboxProcessor {
    pub(super) transactor: Arc<dyn PostboxTransactor>,
    pub(super) target: Arc<dyn RequestHandler>,
    pub(super) config: ProcessingConfig,
    pub(super) events: Arc<dyn EventSink>,
    pub(super) context: Arc<dyn ExecutionContext>,
    pub(super) success_criteria: SuccessCriteria,
}

impl PostboxProcessor {
    pub fn builder(
        transactor: Arc<dyn PostboxTransactor>,
        target: Arc<dyn RequestHandler>,
    ) -> PostboxProcessorBuilder {
        PostboxProcessorBuilder::new(transactor, target)
    }

    pub fn config(&self) -> &ProcessingConfig {
        &self.config
    }

    /// Hand the poll loop to the execution context and return immediately.
    pub fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        self.context.start(Box::pin(async move {
            this.poll_loop().await;
        }));
    }

    /// Ask the loop to exit after the cycle in flight. Safe to call repeatedly.
    pub fn stop(&self) {
        self.context.stop();
    }

    pub fn is_running(&self) -> bool {
        self.context.is_running()
    }

    /// Run one transactional cycle.
    ///
    /// Returns the number of requests fetched. Per-request outcomes are only
    /// reported through the event sink; an `Err` means the whole cycle was
    /// rolled back.
    pub async fn process_pending_requests(
        &self,
        success_criteria: SuccessCriteria,
    ) -> Result<usize, RequestProcessingError> {
        let batch_size = self.config.batch_size;
        let as_of = self.context.current_time();
        let target = Arc::clone(&self.target);
        let events = Arc::clone(&self.events);

        self.transactor
            .perform_as_result(move |postbox| {
                Box::pin(async move {
                    // TODO: cap the number of attempts per request once the store tracks them
                    let pending = postbox.pending_requests(batch_size, as_of).await?;
                    for request in &pending {
                        // panic は cycle ごと rollback（request は pending のまま残る）
                        let response = dispatch(target.as_ref(), request).await?;
                        let outcome = record_outcome(
                            &mut *postbox,
                            request,
                            response,
                            success_criteria.as_ref(),
                        )
                        .await?;

                        match outcome {
                            Ok(()) => events.emit(ProcessingEvent::RequestProcessingSucceeded {
                                request_id: request.request_id,
                            }),
                            Err(err) => {
                                debug!(request_id = %request.request_id, reason = %err.reason, "request not delivered");
                                events.emit(ProcessingEvent::RequestProcessingFailed {
                                    reason: err.reason,
                                })
                            }
                        }
                    }
                    Ok::<_, StorageError>(pending.len())
                })
            })
            .await
            .map_err(RequestProcessingError::from)
    }

    async fn poll_loop(&self) {
        info!(
            batch_size = self.config.batch_size,
            max_polling_time_ms = self.config.max_polling_time.as_millis() as u64,
            "postbox processing started"
        );

        while self.context.next_cycle() {
            let t0 = self.context.current_time();
            let result = self
                .process_pending_requests(Arc::clone(&self.success_criteria))
                .await;
            let elapsed = elapsed_between(t0, self.context.current_time());

            match result {
                Ok(batch_size) => {
                    debug!(batch_size, elapsed_ms = elapsed.as_millis() as u64, "cycle committed");
                    self.events.emit(ProcessingEvent::BatchProcessingSucceeded {
                        batch_size,
                        duration: elapsed,
                    });
                }
                Err(err) => {
                    warn!(reason = %err.reason, "cycle rolled back");
                    self.events
                        .emit(ProcessingEvent::BatchProcessingFailed { reason: err.reason });
                }
            }

            if let Some(remaining) = remaining_budget(self.config.max_polling_time, elapsed) {
                self.events
                    .emit(ProcessingEvent::PollWait { duration: remaining });
                self.context.pause(remaining).await;
            }
        }

        info!("postbox processing stopped");
    }
}

/// Call the downstream handler, turning a panic into an aborted unit of work.
async fn dispatch(
    target: &dyn RequestHandler,
    pending: &PendingRequest,
) -> Result<Response, StorageError> {
    AssertUnwindSafe(target.handle(&pending.request))
        .catch_unwind()
        .await
        .map_err(|payload| aborted(pending, "handler", payload.as_ref()))
}

/// Classify `response` and record it inside the open transaction.
///
/// The outer `Err` aborts the cycle; the inner one is a per-request failure.
async fn record_outcome(
    postbox: &mut dyn PostboxTransaction,
    pending: &PendingRequest,
    response: Response,
    success_criteria: &(dyn Fn(&Response) -> bool + Send + Sync),
) -> Result<Result<(), RequestProcessingError>, StorageError> {
    let accepted = catch_unwind(AssertUnwindSafe(|| success_criteria(&response)))
        .map_err(|payload| aborted(pending, "success criteria", payload.as_ref()))?;

    let outcome = if accepted {
        postbox
            .mark_processed(pending.request_id, response)
            .await
            .map_err(RequestProcessingError::from)
    } else {
        // dead にできても配送としては失敗
        match postbox.mark_dead(pending.request_id, response).await {
            Ok(()) => Err(RequestProcessingError::rejected()),
            Err(err) => Err(err.into()),
        }
    };
    Ok(outcome)
}

fn aborted(pending: &PendingRequest, what: &str, payload: &(dyn Any + Send)) -> StorageError {
    let message = panic_message(payload);
    error!(request_id = %pending.request_id, %message, "{what} panicked");
    StorageError::Aborted(format!("{what} panicked on {}: {message}", pending.request_id))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn elapsed_between(start: DateTime<Utc>, end: DateTime<Utc>) -> Duration {
    (end - start).to_std().unwrap_or(Duration::ZERO)
}

/// What is left of the polling budget, if anything.
fn remaining_budget(max_polling_time: Duration, elapsed: Duration) -> Option<Duration> {
    max_polling_time
        .checked_sub(elapsed)
        .filter(|remaining| !remaining.is_zero())
}
