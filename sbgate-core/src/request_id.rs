//! Request ID generation

use uuid::Uuid;

/// Header carrying the request ID in both directions
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Identifier attached to every request and echoed in error bodies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId {
    pub id: String,
}

impl RequestId {
    /// Generate a new request ID
    pub fn new() -> Self {
        let id = Uuid::new_v4().simple().to_string().to_uppercase();
        Self { id }
    }

    /// Reuse a caller-supplied ID, falling back to a fresh one when the
    /// value is empty or unreasonably long
    pub fn from_header(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if !v.is_empty() && v.len() <= 128 => Self::with_id(v),
            _ => Self::new(),
        }
    }

    /// Create a request ID with a specific value (for testing)
    pub fn with_id(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.id
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_generation() {
        let id1 = RequestId::new();
        let id2 = RequestId::new();

        assert_ne!(id1.id, id2.id);
        assert!(id1.id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_request_id_from_header() {
        assert_eq!(RequestId::from_header(Some("abc-123")).id, "abc-123");

        let generated = RequestId::from_header(Some("   "));
        assert_eq!(generated.id.len(), 32);

        let long = "x".repeat(200);
        assert_ne!(RequestId::from_header(Some(&long)).id, long);
        assert_eq!(RequestId::from_header(None).id.len(), 32);
    }
}
