use tokio::sync::mpsc;

use crate::policy::correlation_matches;
use crate::protocol::ErrorReply;
use crate::{log_debug, CallOutcome, CorrelationId, Delivery};

/// Wait on a reply consumer's inbox for the delivery answering `expected`.
///
/// Deliveries with any other correlation id are skipped. Resolves at most
/// once; the caller bounds the wait with the call timeout.
pub(super) async fn await_reply(
    inbox: &mut mpsc::UnboundedReceiver<Delivery>,
    expected: &CorrelationId,
) -> CallOutcome {
    // ---
    while let Some(delivery) = inbox.recv().await {
        let delivered = delivery.envelope.correlation_id.as_deref();

        if !correlation_matches(expected, delivered) {
            log_debug!("ignoring reply for correlation id {delivered:?}, waiting on {expected}");
            continue;
        }

        return decode_reply(delivery);
    }

    CallOutcome::ConnectionFailed("reply consumer closed before a reply arrived".into())
}

fn decode_reply(delivery: Delivery) -> CallOutcome {
    // ---
    let envelope = delivery.envelope;

    if envelope.is_error() {
        let detail = match serde_json::from_slice::<ErrorReply>(&envelope.payload) {
            Ok(reply) => reply.error,
            Err(_) => String::from_utf8_lossy(&envelope.payload).into_owned(),
        };
        return CallOutcome::HandlerFailed(detail);
    }

    match serde_json::from_slice(&envelope.payload) {
        Ok(value) => CallOutcome::Reply(value),
        Err(e) => CallOutcome::InvalidPayload(format!("reply is not valid JSON: {e}")),
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::{Address, Envelope};
    use bytes::Bytes;
    use serde_json::json;

    fn reply(correlation_id: &str, body: &'static str) -> Delivery {
        Delivery {
            delivery_tag: 0,
            envelope: Envelope::response(
                Address::from("amq.gen-test"),
                Bytes::from_static(body.as_bytes()),
                correlation_id.into(),
            ),
            redelivered: false,
        }
    }

    #[tokio::test]
    async fn test_mismatched_correlation_is_skipped() {
        // ---
        let (tx, mut rx) = mpsc::unbounded_channel();
        let expected = CorrelationId::generate();

        tx.send(reply("someone-else", r#"{"_id":"intruder"}"#)).unwrap();
        tx.send(reply(expected.as_str(), r#"{"_id":"u1"}"#)).unwrap();

        let outcome = await_reply(&mut rx, &expected).await;
        assert_eq!(outcome, CallOutcome::Reply(json!({"_id": "u1"})));
    }

    #[tokio::test]
    async fn test_first_match_wins() {
        // ---
        let (tx, mut rx) = mpsc::unbounded_channel();
        let expected = CorrelationId::generate();

        tx.send(reply(expected.as_str(), "1")).unwrap();
        tx.send(reply(expected.as_str(), "2")).unwrap();

        assert_eq!(
            await_reply(&mut rx, &expected).await,
            CallOutcome::Reply(json!(1))
        );
    }

    #[tokio::test]
    async fn test_closed_inbox_without_match() {
        // ---
        let (tx, mut rx) = mpsc::unbounded_channel();
        let expected = CorrelationId::generate();

        tx.send(reply("other", "{}")).unwrap();
        drop(tx);

        assert!(matches!(
            await_reply(&mut rx, &expected).await,
            CallOutcome::ConnectionFailed(_)
        ));
    }

    #[tokio::test]
    async fn test_error_reply_becomes_handler_failure() {
        // ---
        let (tx, mut rx) = mpsc::unbounded_channel();
        let expected = CorrelationId::generate();

        let mut delivery = reply(expected.as_str(), r#"{"error":"token expired"}"#);
        delivery.envelope.kind = Some(crate::ERROR_KIND.into());
        tx.send(delivery).unwrap();

        assert_eq!(
            await_reply(&mut rx, &expected).await,
            CallOutcome::HandlerFailed("token expired".into())
        );
    }

    #[tokio::test]
    async fn test_non_json_reply_is_invalid_payload() {
        // ---
        let (tx, mut rx) = mpsc::unbounded_channel();
        let expected = CorrelationId::generate();

        tx.send(reply(expected.as_str(), "not json")).unwrap();

        assert!(matches!(
            await_reply(&mut rx, &expected).await,
            CallOutcome::InvalidPayload(_)
        ));
    }
}
