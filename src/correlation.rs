use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

/// Pairs one outgoing call with the reply that answers it.
///
/// A fresh UUID v4 is generated per call and travels in the AMQP
/// `correlation_id` property of both the request and the reply. The inner
/// string is shared, so stamping it onto an [`Envelope`](crate::Envelope)
/// does not copy it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(Arc<str>);

impl CorrelationId {
    /// Generate an id for a new call.
    pub fn generate() -> Self {
        Self(Arc::from(Uuid::new_v4().hyphenated().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The shared string, ready for an envelope's `correlation_id`.
    pub fn shared(&self) -> Arc<str> {
        Arc::clone(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

impl From<Arc<str>> for CorrelationId {
    fn from(value: Arc<str>) -> Self {
        Self(value)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_generated_ids_are_v4_uuids() {
        // ---
        let id = CorrelationId::generate();
        let parsed = Uuid::parse_str(id.as_str()).expect("uuid");

        assert_eq!(parsed.get_version_num(), 4);
        assert_eq!(id.as_str().len(), 36);
        assert_ne!(id, CorrelationId::generate());
    }

    #[test]
    fn test_shared_does_not_copy() {
        // ---
        let id = CorrelationId::from("cid-7");
        let shared = id.shared();

        assert!(std::ptr::eq(shared.as_ptr(), id.as_str().as_ptr()));
        assert_eq!(CorrelationId::from(shared), id);
    }
}
