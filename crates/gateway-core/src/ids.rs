//! Request identifiers.

use std::fmt;
use uuid::Uuid;

/// The `X-Request-Id` value attached to every request, client-supplied or generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses a client-supplied `X-Request-Id` header value, falling back to
    /// a freshly generated id if it isn't a valid UUID.
    pub fn from_header_or_new(value: Option<&str>) -> Self {
        value
            .and_then(|v| Uuid::parse_str(v).ok())
            .map(Self)
            .unwrap_or_else(Self::new)
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_header_falls_back_to_a_generated_id() {
        let id = RequestId::from_header_or_new(Some("not-a-uuid"));
        assert!(!id.to_string().is_empty());
    }

    #[test]
    fn valid_header_is_preserved() {
        let uuid = Uuid::new_v4();
        let id = RequestId::from_header_or_new(Some(&uuid.to_string()));
        assert_eq!(id.to_string(), uuid.to_string());
    }
}
