//! Optimistic inventory edits for one store, holiday and category.
//!
//! Count edits show up in the cache before the server confirms them and are
//! protected from stale realtime echoes by the pending tracker. A failed
//! write restores the count it replaced.

use chrono::{NaiveDate, Utc};
use serde_json::{Value, json};
use tally_appwrite::{Category, Collection, HolidayId, Item, Location, Query};
use tracing::{debug, info, warn};

use crate::error::CacheError;
use crate::facade::DataCache;
use crate::holiday::primary_pallet_type;
use crate::key::{ItemsKey, LocationsKey, StoreKey};
use crate::source::{ItemSource, LocationSource, Source, StoreSource};
use crate::stats::InventoryStats;

/// What a new item slot looks like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemTemplate {
    pub name: String,
    pub item_type: String,
    pub icon: String,
}

impl ItemTemplate {
    pub fn new(
        name: impl Into<String>,
        item_type: impl Into<String>,
        icon: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            item_type: item_type.into(),
            icon: icon.into(),
        }
    }
}

/// Inventory view bound to `(store_number, holiday, category)`.
#[derive(Clone)]
pub struct Inventory {
    cache: DataCache,
    store_number: String,
    holiday: HolidayId,
    category: Category,
}

impl Inventory {
    pub fn new(
        cache: DataCache,
        store_number: impl Into<String>,
        holiday: HolidayId,
        category: Category,
    ) -> Self {
        Self {
            cache,
            store_number: store_number.into(),
            holiday,
            category,
        }
    }

    pub fn store_number(&self) -> &str {
        &self.store_number
    }

    pub fn holiday(&self) -> HolidayId {
        self.holiday
    }

    pub fn category(&self) -> Category {
        self.category
    }

    fn items_key(&self) -> ItemsKey {
        ItemsKey::new(self.store_number.as_str(), self.holiday, self.category)
    }

    /// Cached items, scheduling a refresh when stale.
    pub fn items(&self) -> Vec<Item> {
        self.cache.item_cache().read(&self.items_key())
    }

    fn cached_count(&self, item_id: &str) -> Result<u32, CacheError> {
        self.items()
            .iter()
            .find(|item| item.id == item_id)
            .map(|item| item.count)
            .ok_or_else(|| CacheError::UnknownItem(item_id.to_string()))
    }

    fn set_cached_count(&self, item_id: &str, count: u32) {
        self.cache.item_cache().update(&self.items_key(), |items| {
            if let Some(item) = items.iter_mut().find(|item| item.id == item_id) {
                item.count = count;
            }
        });
    }

    async fn write_count(&self, item_id: &str, count: u32) -> Result<(), CacheError> {
        let lock = self.cache.count_write_lock(item_id);
        let _guard = lock.lock().await;
        self.cache
            .gateway()
            .update_document(
                Collection::Items,
                item_id,
                json!({ "count": count, "updatedAt": Utc::now().to_rfc3339() }),
            )
            .await?;
        Ok(())
    }

    /// Add `delta` to an item's count, saturating at zero.
    ///
    /// Builds on the pending count when one is live, so rapid taps chain.
    /// Returns the count written.
    pub async fn adjust_count(&self, item_id: &str, delta: i64) -> Result<u32, CacheError> {
        let current = self.cached_count(item_id)?;
        let pending = self.cache.pending();
        let base = pending.effective_count(item_id, current);
        let next = (i64::from(base) + delta).clamp(0, i64::from(u32::MAX)) as u32;

        pending.set_pending(item_id, next);
        self.set_cached_count(item_id, next);
        debug!(item = item_id, base, next, "count adjusted");

        match self.write_count(item_id, next).await {
            Ok(()) => {
                pending.clear_if_matches(item_id, next);
                Ok(next)
            }
            Err(e) => {
                warn!(item = item_id, error = %e, "count update failed, reverting");
                pending.clear_pending(item_id);
                self.set_cached_count(item_id, current);
                Err(e)
            }
        }
    }

    /// Set an item's count directly. A no-op when the count is unchanged.
    pub async fn set_count(&self, item_id: &str, count: u32) -> Result<u32, CacheError> {
        let current = self.cached_count(item_id)?;
        if count == current {
            return Ok(current);
        }

        let pending = self.cache.pending();
        pending.set_pending(item_id, count);
        self.set_cached_count(item_id, count);

        match self.write_count(item_id, count).await {
            Ok(()) => {
                pending.clear_pending(item_id);
                Ok(count)
            }
            Err(e) => {
                warn!(item = item_id, error = %e, "count edit failed, reverting");
                pending.clear_pending(item_id);
                self.set_cached_count(item_id, current);
                Err(e)
            }
        }
    }

    /// Create an empty slot at a location.
    pub async fn add_item(
        &self,
        location_id: &str,
        template: &ItemTemplate,
    ) -> Result<Item, CacheError> {
        let doc = self
            .cache
            .gateway()
            .create_document(
                Collection::Items,
                None,
                json!({
                    "locationId": location_id,
                    "storeNumber": self.store_number,
                    "name": template.name,
                    "type": template.item_type,
                    "icon": template.icon,
                    "count": 0,
                    "updatedAt": Utc::now().to_rfc3339(),
                    "holiday": self.holiday.as_str(),
                    "category": self.category.as_str(),
                }),
            )
            .await?;
        let item: Item =
            serde_json::from_value(doc).map_err(|e| CacheError::decode(ItemSource::KIND, e))?;

        let added = item.clone();
        self.cache.item_cache().update(&self.items_key(), move |items| {
            if !items.iter().any(|i| i.id == added.id) {
                items.push(added);
            }
        });
        info!(item = %item.id, location = location_id, item_type = %item.item_type, "item added");
        Ok(item)
    }

    /// Remove an item slot. The cache drops it first; a failed delete
    /// refetches the category.
    pub async fn remove_item(&self, item_id: &str) -> Result<(), CacheError> {
        let key = self.items_key();
        self.cache
            .item_cache()
            .update(&key, |items| items.retain(|i| i.id != item_id));
        self.cache.pending().clear_pending(item_id);

        match self
            .cache
            .gateway()
            .delete_document(Collection::Items, item_id)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(item = item_id, error = %e, "item delete failed, refetching");
                self.cache.item_cache().invalidate(&key);
                Err(e.into())
            }
        }
    }

    /// Append a location after the existing ones.
    pub async fn add_location(&self, name: &str, icon: &str) -> Result<Location, CacheError> {
        let key = LocationsKey::new(self.store_number.as_str());
        let order = self.cache.location_cache().read(&key).len() as i64;

        let doc = self
            .cache
            .gateway()
            .create_document(
                Collection::Locations,
                None,
                json!({
                    "storeNumber": self.store_number,
                    "name": name,
                    "icon": icon,
                    "order": order,
                }),
            )
            .await?;
        let location: Location = serde_json::from_value(doc)
            .map_err(|e| CacheError::decode(LocationSource::KIND, e))?;

        let added = location.clone();
        self.cache.location_cache().update(&key, move |locations| {
            if !locations.iter().any(|l| l.id == added.id) {
                locations.push(added);
                locations.sort_by_key(|l| l.order);
            }
        });
        info!(location = %location.id, name, order, "location added");
        Ok(location)
    }

    /// Delete a location and every item in it, across holidays and categories.
    ///
    /// Not atomic: items deleted before a failure stay deleted.
    pub async fn remove_location(&self, location_id: &str) -> Result<usize, CacheError> {
        let gateway = self.cache.gateway();
        let documents = gateway
            .list_all_documents(
                Collection::Items,
                &[
                    Query::equal("storeNumber", self.store_number.as_str()),
                    Query::equal("locationId", location_id),
                ],
                100,
            )
            .await?;
        // Only ids are needed, so items with tags this build cannot read still go.
        let item_ids: Vec<&str> = documents
            .iter()
            .filter_map(|doc| doc.get("$id").and_then(Value::as_str))
            .collect();

        for item_id in &item_ids {
            gateway.delete_document(Collection::Items, item_id).await?;
            self.cache.pending().clear_pending(item_id);
        }
        gateway
            .delete_document(Collection::Locations, location_id)
            .await?;

        self.cache
            .item_cache()
            .update(&self.items_key(), |cached| {
                cached.retain(|i| i.location_id != location_id)
            });
        self.cache.location_cache().update(
            &LocationsKey::new(self.store_number.as_str()),
            |locations| locations.retain(|l| l.id != location_id),
        );
        info!(location = location_id, items = item_ids.len(), "location removed");
        Ok(item_ids.len())
    }

    /// Move the store's clearance target.
    pub async fn set_target_date(&self, date: NaiveDate) -> Result<(), CacheError> {
        let key = StoreKey::new(self.store_number.as_str(), self.holiday);
        let store = match self.cache.store_cache().read(&key) {
            Some(store) => store,
            None => self
                .cache
                .fetch_store(&self.store_number, self.holiday)
                .await?
                .ok_or_else(|| CacheError::StoreNotFound(self.store_number.clone()))?,
        };

        let doc = self
            .cache
            .gateway()
            .update_document(
                Collection::Stores,
                &store.id,
                json!({ "targetDate": date.to_string() }),
            )
            .await?;
        let updated =
            serde_json::from_value(doc).map_err(|e| CacheError::decode(StoreSource::KIND, e))?;

        self.cache.store_cache().put(&key, Some(updated));
        info!(store = %store.id, target_date = %date, "target date updated");
        Ok(())
    }

    /// Totals and clearance rates from the cached items and store.
    ///
    /// Without a stored target date the holiday default is used.
    pub fn stats(&self, today: NaiveDate) -> InventoryStats {
        let target_date = self
            .cache
            .target_date(&self.store_number, self.holiday, today);
        InventoryStats::compute(
            &self.items(),
            primary_pallet_type(self.holiday),
            Some(target_date),
            today,
        )
    }
}
