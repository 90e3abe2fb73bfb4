//! Replay-on-retry for mutating operations.
//!
//! A caller passes an opaque key with a request. The first time a key is seen the operation runs
//! and its response is recorded next to a hash of the request payload. Repeating the same
//! operation with the same payload under that key replays the recorded response without touching
//! the bridge; anything else under that key is a conflict.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CommandError, ErrorCode};
use crate::state::State;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub operation: String,
    pub payload_hash: String,
    pub response: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// SHA-256 over the canonical JSON encoding of `payload`.
///
/// Payloads pass through [`serde_json::Value`] first, whose maps keep keys sorted, so field order
/// in the caller's types does not change the hash.
pub fn payload_hash<P: Serialize + ?Sized>(payload: &P) -> Result<String, CommandError> {
    let canonical = serde_json::to_value(payload)
        .and_then(|v| serde_json::to_vec(&v))
        .map_err(|e| CommandError::new(ErrorCode::State, format!("cannot encode payload: {}", e)))?;
    let digest = Sha256::digest(&canonical);
    Ok(digest.iter().map(|b| format!("{:02x}", b)).collect())
}

/// Look for a recorded response to replay.
///
/// An empty key disables idempotency and always misses.
pub fn lookup<P, R>(
    state: &State,
    key: &str,
    operation: &str,
    payload: &P,
) -> Result<Option<R>, CommandError>
where
    P: Serialize + ?Sized,
    R: DeserializeOwned,
{
    let key = key.trim();
    if key.is_empty() {
        return Ok(None);
    }
    let record = match state.idempotency.get(key) {
        Some(record) => record,
        None => return Ok(None),
    };
    if record.operation != operation || record.payload_hash != payload_hash(payload)? {
        return Err(CommandError::new(
            ErrorCode::IdempotencyConflict,
            "idempotency key already used with a different payload",
        )
        .with_hint("Use a new idempotency key for a different request"));
    }
    serde_json::from_value(record.response.clone())
        .map(Some)
        .map_err(|e| {
            CommandError::new(
                ErrorCode::State,
                format!("recorded response for key {:?} is unreadable: {}", key, e),
            )
        })
}

/// Record `response` under `key`. Persisting it is the caller's job, in the same save as the
/// mutation it describes.
pub fn store<P, R>(
    state: &mut State,
    key: &str,
    operation: &str,
    payload: &P,
    response: &R,
) -> Result<(), CommandError>
where
    P: Serialize + ?Sized,
    R: Serialize,
{
    let key = key.trim();
    if key.is_empty() {
        return Ok(());
    }
    let response = serde_json::to_value(response).map_err(|e| {
        CommandError::new(ErrorCode::State, format!("cannot encode response: {}", e))
    })?;
    state.idempotency.insert(
        key.to_string(),
        IdempotencyRecord {
            operation: operation.to_string(),
            payload_hash: payload_hash(payload)?,
            response,
            created_at: Utc::now(),
        },
    );
    Ok(())
}
