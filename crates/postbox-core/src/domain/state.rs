//! Request state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::request::Response;

/// Lifecycle of a stored request.
///
/// State transitions:
/// - Pending -> Processed (downstream accepted the request)
/// - Pending -> Dead (downstream rejected the request)
///
/// Both outcomes are terminal. There is no way back to Pending and no
/// transition between Processed and Dead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Pending,
    Processed,
    Dead,
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestState::Processed | RequestState::Dead)
    }

    pub fn can_transition_to(self, next: RequestState) -> bool {
        matches!(
            (self, next),
            (RequestState::Pending, RequestState::Processed)
                | (RequestState::Pending, RequestState::Dead)
        )
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestState::Pending => "pending",
            RequestState::Processed => "processed",
            RequestState::Dead => "dead",
        };
        f.write_str(s)
    }
}

/// Observable outcome of a stored request, including the persisted response
/// once the request has been resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "response", rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Processed(Response),
    Dead(Response),
}

impl RequestStatus {
    pub fn state(&self) -> RequestState {
        match self {
            RequestStatus::Pending => RequestState::Pending,
            RequestStatus::Processed(_) => RequestState::Processed,
            RequestStatus::Dead(_) => RequestState::Dead,
        }
    }

    pub fn response(&self) -> Option<&Response> {
        match self {
            RequestStatus::Pending => None,
            RequestStatus::Processed(response) | RequestStatus::Dead(response) => Some(response),
        }
    }
}
