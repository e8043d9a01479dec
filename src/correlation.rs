use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

/// Token matching a response to the request that caused it.
///
/// Generated by the client for every call and carried in the AMQP
/// `correlation-id` property, never inside the payload. The server treats it
/// as opaque and echoes it back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(Arc<str>);

impl CorrelationId {
    /// Generate a fresh token (UUID v4, hyphenated).
    pub fn generate() -> Self {
        // ---
        Self(Arc::from(Uuid::new_v4().to_string()))
    }

    /// Borrow the token as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
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
    use std::collections::HashSet;

    #[test]
    fn test_generate_unique() {
        // ---
        let ids: HashSet<CorrelationId> = (0..1000).map(|_| CorrelationId::generate()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_format() {
        // ---
        let id = CorrelationId::generate();
        assert_eq!(id.to_string().len(), 36); // hyphenated UUID
        assert_eq!(id.as_str(), id.to_string());
    }

    #[test]
    fn test_opaque_tokens_round_trip_unchanged() {
        // ---
        let id = CorrelationId::from("not-a-uuid:42");
        assert_eq!(id.as_str(), "not-a-uuid:42");
    }
}
