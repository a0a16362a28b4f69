//! Failure classification
//!
//! Maps a failed [`TransportResponse`] onto an [`ErrorKind`]. Checks run in
//! a fixed order and the first match wins:
//!
//! 1. not online: `offline`, or `cors-suspected` once the event has seen
//!    too many offline/online flaps at the head of the queue
//! 2. `not_found`: `not-found`
//! 3. `id_in_use`: `invalid-id`
//! 4. 408 / `request_timeout`: `request-timeout` while retries remain
//! 5. 502/503/504: `server-unavailable` while retries remain
//! 6. 401 with a nonce: `reauthorize`
//! 7. anything else: `server-rejected`

use serde_json::Value;

use super::event::SyncEvent;
use crate::config::SyncConfig;
use crate::error::{ErrorKind, SyncError};
use crate::transport::{error_ids, TransportResponse};

/// Classify a failed response for `event`
pub fn classify(
    response: &TransportResponse,
    event: &SyncEvent,
    online: bool,
    config: &SyncConfig,
) -> ErrorKind {
    if !online {
        return if event.return_to_online_count >= config.max_retries_before_cors_error {
            ErrorKind::CorsSuspected
        } else {
            ErrorKind::Offline
        };
    }

    let error_id = response.error_id();
    let exhausted = event.retry_count >= config.max_retries;

    if error_id == Some(error_ids::NOT_FOUND) {
        return ErrorKind::NotFound;
    }
    if error_id == Some(error_ids::ID_IN_USE) {
        return ErrorKind::InvalidId;
    }
    if response.status == Some(408) || error_id == Some(error_ids::REQUEST_TIMEOUT) {
        return if exhausted {
            ErrorKind::TooManyFailures
        } else {
            ErrorKind::RequestTimeout
        };
    }
    if matches!(response.status, Some(502 | 503 | 504)) {
        return if exhausted {
            ErrorKind::TooManyFailures
        } else {
            ErrorKind::ServerUnavailable
        };
    }
    if response.status == Some(401) && response.nonce().is_some() {
        return ErrorKind::Reauthorize;
    }
    ErrorKind::ServerRejected
}

/// Turn "id already in use" for our own CREATE into a success
///
/// A CREATE that reached the server but whose response was lost is retried;
/// the retry collides with the object it created. When the colliding id is
/// the one we asked for, the server's copy (`data.data`) is the result.
pub fn normalize_id_in_use(event: &SyncEvent, response: TransportResponse) -> TransportResponse {
    if response.success || response.error_id() != Some(error_ids::ID_IN_USE) {
        return response;
    }
    let Some(created) = event.create_id() else {
        return response;
    };
    let existing = response.data.get("data").cloned().unwrap_or(Value::Null);
    if existing.get("id").and_then(Value::as_str) == Some(created) {
        TransportResponse {
            success: true,
            status: response.status,
            data: existing,
        }
    } else {
        response
    }
}

/// Build the error delivered to handlers and listeners
pub fn to_sync_error(kind: ErrorKind, response: &TransportResponse) -> SyncError {
    let message = response
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| kind.as_str().to_string());
    SyncError::new(kind, message)
        .with_status(response.status)
        .with_data(response.data.clone())
}
