//! Error types for the cache layer.

use std::sync::Arc;

use tally_appwrite::AppwriteError;
use thiserror::Error;

/// Errors surfaced by cache fetches and inventory mutations.
///
/// Cloneable so one failed fetch can be handed to every caller that joined it.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// The document store rejected or failed the request.
    #[error("gateway error: {0}")]
    Gateway(#[source] Arc<AppwriteError>),

    /// A document did not have the expected shape.
    #[error("malformed {kind} document: {source}")]
    Decode {
        kind: &'static str,
        #[source]
        source: Arc<serde_json::Error>,
    },

    /// The item is not in the cached inventory.
    #[error("unknown item: {0}")]
    UnknownItem(String),

    /// No store record exists for the store number.
    #[error("store not found: {0}")]
    StoreNotFound(String),
}

impl CacheError {
    pub(crate) fn decode(kind: &'static str, source: serde_json::Error) -> Self {
        CacheError::Decode {
            kind,
            source: Arc::new(source),
        }
    }

    /// The underlying gateway error, if any.
    pub fn gateway(&self) -> Option<&AppwriteError> {
        match self {
            CacheError::Gateway(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<AppwriteError> for CacheError {
    fn from(err: AppwriteError) -> Self {
        CacheError::Gateway(Arc::new(err))
    }
}
