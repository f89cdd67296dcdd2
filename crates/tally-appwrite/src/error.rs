//! Error types for the Appwrite gateway.

use thiserror::Error;

/// Errors that can occur when talking to the document store.
#[derive(Debug, Error)]
pub enum AppwriteError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Document not found.
    #[error("document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    /// A document with the same id or unique index already exists.
    #[error("document conflict in {collection}: {message}")]
    Conflict { collection: String, message: String },

    /// Rate limited.
    #[error("rate limited{}", match retry_after_secs {
        Some(secs) => format!(" (retry after {}s)", secs),
        None => String::new(),
    })]
    RateLimited {
        /// Seconds to wait before retrying (from Retry-After header, optional).
        retry_after_secs: Option<u64>,
    },

    /// Structured error from the server.
    #[error("API error {code} ({kind}): {message}")]
    Api {
        code: u16,
        kind: String,
        message: String,
    },

    /// Invalid response from server.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// WebSocket error on the realtime channel.
    #[error("WebSocket error: {0}")]
    WebSocket(String),
}

impl AppwriteError {
    /// Whether the failure is worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            AppwriteError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            AppwriteError::Api { code, .. } => *code >= 500,
            _ => false,
        }
    }

    /// Whether the request failed before reaching the server, so resending it
    /// cannot apply a write twice.
    pub fn is_unsent(&self) -> bool {
        matches!(self, AppwriteError::Http(e) if e.is_connect())
    }

    /// Whether the server rejected a write because the collection schema lacks
    /// one of the submitted attributes.
    pub fn is_unknown_attribute(&self) -> bool {
        matches!(
            self,
            AppwriteError::Api { kind, message, .. }
                if kind == "document_invalid_structure" && message.contains("Unknown attribute")
        )
    }

    /// Whether the server reported a duplicate document.
    pub fn is_conflict(&self) -> bool {
        matches!(self, AppwriteError::Conflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_attribute_detection() {
        let err = AppwriteError::Api {
            code: 400,
            kind: "document_invalid_structure".to_string(),
            message: "Invalid document structure: Unknown attribute: \"holiday\"".to_string(),
        };
        assert!(err.is_unknown_attribute());
        assert!(!err.is_transient());

        let other = AppwriteError::Api {
            code: 400,
            kind: "document_invalid_structure".to_string(),
            message: "Missing required attribute \"storeNumber\"".to_string(),
        };
        assert!(!other.is_unknown_attribute());
    }

    #[test]
    fn test_server_errors_are_transient() {
        let err = AppwriteError::Api {
            code: 503,
            kind: "general_unknown".to_string(),
            message: "unavailable".to_string(),
        };
        assert!(err.is_transient());
    }

    #[test]
    fn test_server_errors_are_not_unsent() {
        let err = AppwriteError::Api {
            code: 502,
            kind: "general_unknown".to_string(),
            message: "bad gateway".to_string(),
        };
        assert!(err.is_transient());
        assert!(!err.is_unsent());
    }

    #[test]
    fn test_rate_limited_display() {
        let err = AppwriteError::RateLimited {
            retry_after_secs: Some(7),
        };
        assert_eq!(err.to_string(), "rate limited (retry after 7s)");
        let err = AppwriteError::RateLimited {
            retry_after_secs: None,
        };
        assert_eq!(err.to_string(), "rate limited");
    }
}
