//! Wire format shared by requesters and responders.
//!
//! A request body is the UTF-8 JSON object `{"event": ..., "data": ...}`;
//! `event` names the operation and `data` is its argument. A reply body is
//! any JSON value, and only the caller knows which shape to expect for a
//! given event. A failed handler answers with [`ErrorReply`] instead, flagged
//! by the [`ERROR_KIND`](crate::ERROR_KIND) message type.

use serde::{Deserialize, Serialize};

/// Request body published to a responder's queue.
///
/// ```
/// # use lms_rpc::RequestEnvelope;
/// # use serde_json::json;
/// let req = RequestEnvelope::new("LOGIN", json!({ "token": "abc" }));
/// let text = serde_json::to_string(&req).unwrap();
/// assert_eq!(text, r#"{"event":"LOGIN","data":{"token":"abc"}}"#);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope<T = serde_json::Value> {
    /// Operation name, e.g. `LOGIN`.
    pub event: String,
    /// Operation argument.
    pub data: T,
}

impl<T> RequestEnvelope<T> {
    pub fn new(event: impl Into<String>, data: T) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

/// Reply body, opaque to the RPC layer.
pub type ReplyEnvelope = serde_json::Value;

/// Body of the reply sent when a handler fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub error: String,
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_decodes_with_typed_data() {
        // ---
        #[derive(Deserialize)]
        struct Token {
            token: String,
        }

        let bytes = br#"{"event":"LOGIN","data":{"token":"abc"}}"#;
        let req: RequestEnvelope<Token> = serde_json::from_slice(bytes).unwrap();

        assert_eq!(req.event, "LOGIN");
        assert_eq!(req.data.token, "abc");
    }

    #[test]
    fn test_request_without_data_is_rejected() {
        // ---
        let res = serde_json::from_value::<RequestEnvelope<serde_json::Value>>(json!({
            "event": "LOGIN"
        }));
        assert!(res.is_err());
    }
}
