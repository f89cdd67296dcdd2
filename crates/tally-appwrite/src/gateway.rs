//! The document store contract the cache layer is written against.
//!
//! `AppwriteClient` implements it over HTTP and WebSocket; tests implement it
//! in memory.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::{AppwriteError, Query};

/// Collections the tracker stores documents in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Stores,
    Locations,
    Items,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Stores => "stores",
            Collection::Locations => "locations",
            Collection::Items => "items",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change notification from the realtime channel.
///
/// Fired for any write to the subscribed collection; the payload is the
/// changed document.
#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeEvent {
    /// Event names, e.g. `databases.db.collections.items.documents.abc.update`.
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub channels: Vec<String>,
    /// String on current servers, integer seconds on older ones.
    #[serde(default)]
    pub timestamp: Value,
    #[serde(default)]
    pub payload: Value,
}

impl RealtimeEvent {
    /// Owning store number of the changed document, if the payload carries one.
    pub fn store_number(&self) -> Option<&str> {
        self.payload.get("storeNumber").and_then(Value::as_str)
    }

    pub fn document_id(&self) -> Option<&str> {
        self.payload.get("$id").and_then(Value::as_str)
    }

    pub fn is_delete(&self) -> bool {
        self.events.iter().any(|e| e.ends_with(".delete"))
    }
}

/// Callback for realtime events.
pub type EventHandler = Arc<dyn Fn(RealtimeEvent) + Send + Sync>;

/// An open realtime subscription. Closing or dropping it tears the channel down.
pub struct ChannelHandle {
    on_close: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl ChannelHandle {
    pub fn new(on_close: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            on_close: Some(Box::new(on_close)),
        }
    }

    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(on_close) = self.on_close.take() {
            on_close();
        }
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("open", &self.on_close.is_some())
            .finish()
    }
}

/// Remote CRUD + subscribe API over schemaless JSON documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// List documents matching `queries`.
    async fn list_documents(
        &self,
        collection: Collection,
        queries: &[Query],
    ) -> Result<Vec<Value>, AppwriteError>;

    /// Create a document. `None` lets the server pick the id.
    async fn create_document(
        &self,
        collection: Collection,
        id: Option<&str>,
        data: Value,
    ) -> Result<Value, AppwriteError>;

    /// Patch the given fields of a document.
    async fn update_document(
        &self,
        collection: Collection,
        id: &str,
        data: Value,
    ) -> Result<Value, AppwriteError>;

    async fn delete_document(&self, collection: Collection, id: &str) -> Result<(), AppwriteError>;

    /// Open a realtime channel for every write to `collection`.
    fn subscribe(&self, collection: Collection, handler: EventHandler) -> ChannelHandle;

    /// List every matching document, paging with `limit`/`offset`.
    ///
    /// Paging queries in `queries` are ignored.
    async fn list_all_documents(
        &self,
        collection: Collection,
        queries: &[Query],
        page_size: u32,
    ) -> Result<Vec<Value>, AppwriteError> {
        let page_size = page_size.max(1);
        let mut all = Vec::new();
        let mut offset = 0u32;

        loop {
            let mut page_queries: Vec<Query> =
                queries.iter().filter(|q| !q.is_paging()).cloned().collect();
            page_queries.push(Query::limit(page_size));
            page_queries.push(Query::offset(offset));

            let page = self.list_documents(collection, &page_queries).await?;
            let fetched = page.len() as u32;
            all.extend(page);

            if fetched < page_size {
                break;
            }
            offset += page_size;
        }

        Ok(all)
    }
}
