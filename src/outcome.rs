//! Result of one requester call.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::policy::{ERROR_SENTINEL, TIMEOUT_SENTINEL};
use crate::{ReplyEnvelope, Result, RpcError};

/// How a call resolved.
///
/// A call never fails with an error; every failure mode is one of these
/// variants, so a legitimate reply that happens to equal a legacy sentinel
/// string can never be mistaken for a failure.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    /// The responder answered with this JSON value.
    Reply(ReplyEnvelope),

    /// No matching reply arrived inside the call window.
    TimedOut,

    /// The broker could not be reached or rejected a channel operation.
    ConnectionFailed(String),

    /// The responder's handler failed and said why.
    HandlerFailed(String),

    /// The request could not be encoded or the reply was not valid JSON.
    InvalidPayload(String),
}

impl CallOutcome {
    /// Whether the call produced a reply.
    pub fn is_reply(&self) -> bool {
        matches!(self, CallOutcome::Reply(_))
    }

    /// Borrow the reply, if any.
    pub fn reply(&self) -> Option<&ReplyEnvelope> {
        match self {
            CallOutcome::Reply(value) => Some(value),
            _ => None,
        }
    }

    /// Convert into a `Result`, mapping each failure onto [`RpcError`].
    pub fn into_result(self) -> Result<ReplyEnvelope> {
        // ---
        match self {
            CallOutcome::Reply(value) => Ok(value),
            CallOutcome::TimedOut => Err(RpcError::Timeout),
            CallOutcome::ConnectionFailed(detail) => Err(RpcError::Connection(detail)),
            CallOutcome::HandlerFailed(detail) => Err(RpcError::Handler(detail)),
            CallOutcome::InvalidPayload(detail) => Err(RpcError::InvalidPayload(detail)),
        }
    }

    /// Decode the reply into `T`.
    ///
    /// # Errors
    ///
    /// The failure from [`into_result`](Self::into_result), or
    /// [`RpcError::Serialization`] if the reply does not fit `T`.
    pub fn decode<T: DeserializeOwned>(self) -> Result<T> {
        let value = self.into_result()?;
        Ok(serde_json::from_value(value)?)
    }

    /// The value older callers branch on: the reply itself, the timeout
    /// sentinel string, or the generic error sentinel string.
    pub fn into_legacy_value(self) -> Value {
        // ---
        match self {
            CallOutcome::Reply(value) => value,
            CallOutcome::TimedOut => Value::String(TIMEOUT_SENTINEL.to_string()),
            CallOutcome::ConnectionFailed(_)
            | CallOutcome::HandlerFailed(_)
            | CallOutcome::InvalidPayload(_) => Value::String(ERROR_SENTINEL.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn test_legacy_sentinels() {
        // ---
        assert_eq!(
            CallOutcome::TimedOut.into_legacy_value(),
            json!("API could not fulfill the request!")
        );
        assert_eq!(
            CallOutcome::ConnectionFailed("refused".into()).into_legacy_value(),
            json!("error")
        );
        assert_eq!(
            CallOutcome::Reply(json!({"_id": "u1"})).into_legacy_value(),
            json!({"_id": "u1"})
        );
    }

    #[test]
    fn test_reply_equal_to_sentinel_is_still_a_reply() {
        // ---
        let outcome = CallOutcome::Reply(json!("error"));
        assert!(outcome.is_reply());
        assert_eq!(outcome.into_result().unwrap(), json!("error"));
    }

    #[test]
    fn test_into_result_maps_failures() {
        // ---
        assert!(matches!(
            CallOutcome::TimedOut.into_result(),
            Err(RpcError::Timeout)
        ));
        assert!(matches!(
            CallOutcome::HandlerFailed("boom".into()).into_result(),
            Err(RpcError::Handler(d)) if d == "boom"
        ));
    }

    #[test]
    fn test_decode_typed_reply() {
        // ---
        #[derive(Deserialize)]
        struct User {
            _id: String,
            role: u8,
        }

        let user: User = CallOutcome::Reply(json!({"_id": "u1", "role": 0}))
            .decode()
            .unwrap();
        assert_eq!(user._id, "u1");
        assert_eq!(user.role, 0);
    }
}
