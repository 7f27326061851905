//! Processing events - lifecycle notifications of the poll loop.
//!
//! Within one poll cycle the order is fixed:
//! 1. zero or more `RequestProcessing*` events, in fetch order
//! 2. exactly one `BatchProcessing*` event
//! 3. at most one `PollWait`

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ids::RequestId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProcessingEvent {
    /// A cycle committed. `batch_size` is the number of requests fetched,
    /// not the number that individually succeeded.
    BatchProcessingSucceeded {
        batch_size: usize,
        duration: Duration,
    },

    /// A cycle was rolled back as a whole.
    BatchProcessingFailed { reason: String },

    RequestProcessingSucceeded { request_id: RequestId },

    RequestProcessingFailed { reason: String },

    /// The loop is about to sleep for the rest of the polling budget.
    PollWait { duration: Duration },
}

impl ProcessingEvent {
    /// Short machine-friendly name, used as a log field.
    pub fn name(&self) -> &'static str {
        match self {
            ProcessingEvent::BatchProcessingSucceeded { .. } => "batch_processing_succeeded",
            ProcessingEvent::BatchProcessingFailed { .. } => "batch_processing_failed",
            ProcessingEvent::RequestProcessingSucceeded { .. } => "request_processing_succeeded",
            ProcessingEvent::RequestProcessingFailed { .. } => "request_processing_failed",
            ProcessingEvent::PollWait { .. } => "poll_wait",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ProcessingEvent::BatchProcessingFailed { .. }
                | ProcessingEvent::RequestProcessingFailed { .. }
        )
    }
}
