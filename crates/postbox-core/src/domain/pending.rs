use serde::{Deserialize, Serialize};

use super::ids::RequestId;
use super::request::Request;

/// A stored request that has not been resolved yet.
///
/// Read-only from the processor's point of view: it leaves the pending set
/// only through `mark_processed` or `mark_dead`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRequest {
    pub request_id: RequestId,
    pub request: Request,
}

impl PendingRequest {
    pub fn new(request_id: RequestId, request: Request) -> Self {
        Self {
            request_id,
            request,
        }
    }
}
