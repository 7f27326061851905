//! EventSink 実装
//!
//! - RecordingEventSink: テスト用（受け取ったイベントをすべて保持）
//! - TracingEventSink: `tracing` へのログ出力

use std::sync::{Mutex as StdMutex, MutexGuard, PoisonError};

use tracing::{debug, info, trace, warn};

use crate::domain::ProcessingEvent;
use crate::ports::EventSink;

#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: StdMutex<Vec<ProcessingEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProcessingEvent> {
        self.lock().clone()
    }

    /// Event names in emission order.
    pub fn names(&self) -> Vec<&'static str> {
        self.lock().iter().map(ProcessingEvent::name).collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ProcessingEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: ProcessingEvent) {
        self.lock().push(event);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: ProcessingEvent) {
        match &event {
            ProcessingEvent::BatchProcessingSucceeded {
                batch_size,
                duration,
            } => {
                if *batch_size > 0 {
                    info!(
                        event = event.name(),
                        batch_size,
                        elapsed_ms = duration.as_millis() as u64,
                        "batch processed"
                    );
                } else {
                    debug!(event = event.name(), "nothing to process");
                }
            }
            ProcessingEvent::BatchProcessingFailed { reason } => {
                warn!(event = event.name(), %reason, "batch processing failed");
            }
            ProcessingEvent::RequestProcessingSucceeded { request_id } => {
                debug!(event = event.name(), %request_id, "request processed");
            }
            ProcessingEvent::RequestProcessingFailed { reason } => {
                warn!(event = event.name(), %reason, "request processing failed");
            }
            ProcessingEvent::PollWait { duration } => {
                trace!(
                    event = event.name(),
                    wait_ms = duration.as_millis() as u64,
                    "waiting for next poll"
                );
            }
        }
    }
}
