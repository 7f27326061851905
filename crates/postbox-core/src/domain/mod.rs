//! Domain model (ids, stored requests, request states, events, errors).

pub mod errors;
pub mod events;
pub mod ids;
pub mod pending;
pub mod request;
pub mod state;

pub use self::errors::{REJECTED_BY_SUCCESS_CRITERIA, RequestProcessingError, StorageError};
pub use self::events::ProcessingEvent;
pub use self::ids::{ParseRequestIdError, RequestId};
pub use self::pending::PendingRequest;
pub use self::request::{Method, Request, Response, Status};
pub use self::state::{RequestState, RequestStatus};
