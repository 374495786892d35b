//! Correlation and timeout policy shared by requesters and responders.

use std::time::Duration;

use crate::CorrelationId;

/// How long a requester waits for a matching reply.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_millis(8000);

/// How long the connection manager waits for the broker to accept a
/// connection before giving up.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(8000);

/// Unacknowledged deliveries a responder may hold at once.
///
/// One call is handled completely, reply published and request acked,
/// before the broker hands over the next.
pub const RESPONDER_PREFETCH: u16 = 1;

/// Legacy value returned to callers when no reply arrived in time.
pub const TIMEOUT_SENTINEL: &str = "API could not fulfill the request!";

/// Legacy value returned to callers for every other failure.
pub const ERROR_SENTINEL: &str = "error";

/// Whether a delivered correlation id answers the expected request.
///
/// Exact string equality; a reply without an id never matches.
pub fn correlation_matches(expected: &CorrelationId, delivered: Option<&str>) -> bool {
    delivered == Some(expected.as_str())
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_exact_match_only() {
        // ---
        let id = CorrelationId::from("abc-123");

        assert!(correlation_matches(&id, Some("abc-123")));
        assert!(!correlation_matches(&id, Some("abc-1234")));
        assert!(!correlation_matches(&id, Some("ABC-123")));
        assert!(!correlation_matches(&id, None));
    }
}
