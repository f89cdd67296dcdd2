//! How each entity kind is loaded from the document store.

use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tally_appwrite::{Collection, DocumentStore, HolidayId, Item, Location, Query, Store};
use tracing::warn;

use crate::error::CacheError;
use crate::key::{ItemsKey, LocationsKey, StoreKey};
use crate::pending::PendingTracker;

/// Page size for paged list requests.
const PAGE_SIZE: u32 = 100;

/// One entity kind the cache can hold.
#[async_trait]
pub trait Source: Send + Sync + 'static {
    type Key: Clone + Eq + Hash + Display + Send + Sync + 'static;
    type Value: Clone + Default + Send + Sync + 'static;

    /// Name used in logs and decode errors.
    const KIND: &'static str;

    /// Collection whose realtime channel invalidates this kind.
    fn collection(&self) -> Collection;

    /// Store number owning every value under `key`.
    fn store_number<'k>(&self, key: &'k Self::Key) -> &'k str;

    async fn load(
        &self,
        gateway: &dyn DocumentStore,
        key: &Self::Key,
    ) -> Result<Self::Value, CacheError>;

    /// Adjust a freshly loaded value before it is cached and delivered.
    fn settle(&self, value: Self::Value) -> Self::Value {
        value
    }
}

/// Decode a listing, skipping documents that do not parse, such as ones tagged
/// with a holiday or category this build does not know.
pub(crate) fn decode_all<T: DeserializeOwned>(kind: &'static str, documents: Vec<Value>) -> Vec<T> {
    documents
        .into_iter()
        .filter_map(|doc| {
            let id = doc.get("$id").and_then(Value::as_str).map(str::to_string);
            serde_json::from_value(doc)
                .map_err(|e| warn!(kind, id = ?id, error = %e, "skipping malformed document"))
                .ok()
        })
        .collect()
}

/// Store record per `(store_number, holiday)`.
///
/// An untagged legacy record answers for the default holiday.
#[derive(Debug, Default)]
pub struct StoreSource;

#[async_trait]
impl Source for StoreSource {
    type Key = StoreKey;
    type Value = Option<Store>;

    const KIND: &'static str = "store";

    fn collection(&self) -> Collection {
        Collection::Stores
    }

    fn store_number<'k>(&self, key: &'k StoreKey) -> &'k str {
        &key.store_number
    }

    async fn load(
        &self,
        gateway: &dyn DocumentStore,
        key: &StoreKey,
    ) -> Result<Option<Store>, CacheError> {
        let documents = gateway
            .list_documents(
                Collection::Stores,
                &[Query::equal("storeNumber", key.store_number.as_str())],
            )
            .await?;
        let stores: Vec<Store> = decode_all(Self::KIND, documents);

        Ok(pick_store(stores, key.holiday))
    }
}

/// The record tagged with `holiday`, else a legacy record for the default holiday.
pub(crate) fn pick_store(stores: Vec<Store>, holiday: HolidayId) -> Option<Store> {
    let mut legacy = None;
    for store in stores {
        match store.holiday {
            Some(h) if h == holiday => return Some(store),
            None if holiday == HolidayId::DEFAULT && legacy.is_none() => legacy = Some(store),
            _ => {}
        }
    }
    legacy
}

/// Locations of a store number, in display order.
#[derive(Debug, Default)]
pub struct LocationSource;

#[async_trait]
impl Source for LocationSource {
    type Key = LocationsKey;
    type Value = Vec<Location>;

    const KIND: &'static str = "location";

    fn collection(&self) -> Collection {
        Collection::Locations
    }

    fn store_number<'k>(&self, key: &'k LocationsKey) -> &'k str {
        &key.store_number
    }

    async fn load(
        &self,
        gateway: &dyn DocumentStore,
        key: &LocationsKey,
    ) -> Result<Vec<Location>, CacheError> {
        let documents = gateway
            .list_all_documents(
                Collection::Locations,
                &[
                    Query::equal("storeNumber", key.store_number.as_str()),
                    Query::order_asc("order"),
                ],
                PAGE_SIZE,
            )
            .await?;
        Ok(decode_all(Self::KIND, documents))
    }
}

/// Items of one category, with live pending counts overlaid.
#[derive(Debug)]
pub struct ItemSource {
    pending: Arc<PendingTracker>,
}

impl ItemSource {
    pub fn new(pending: Arc<PendingTracker>) -> Self {
        Self { pending }
    }
}

#[async_trait]
impl Source for ItemSource {
    type Key = ItemsKey;
    type Value = Vec<Item>;

    const KIND: &'static str = "item";

    fn collection(&self) -> Collection {
        Collection::Items
    }

    fn store_number<'k>(&self, key: &'k ItemsKey) -> &'k str {
        &key.store_number
    }

    async fn load(
        &self,
        gateway: &dyn DocumentStore,
        key: &ItemsKey,
    ) -> Result<Vec<Item>, CacheError> {
        let documents = gateway
            .list_all_documents(
                Collection::Items,
                &[
                    Query::equal("storeNumber", key.store_number.as_str()),
                    Query::equal("holiday", key.holiday.as_str()),
                    Query::equal("category", key.category.as_str()),
                ],
                PAGE_SIZE,
            )
            .await?;
        Ok(decode_all(Self::KIND, documents))
    }

    fn settle(&self, items: Vec<Item>) -> Vec<Item> {
        self.pending.reconcile(items)
    }
}
