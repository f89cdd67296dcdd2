//! One entry point for every cached entity kind.

use std::sync::Arc;

use chrono::{Local, NaiveDate};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tally_appwrite::{Category, DocumentStore, HolidayId, Item, Location, Store};
use tracing::debug;

use crate::config::CacheConfig;
use crate::entity::{EntityCache, Subscription};
use crate::error::CacheError;
use crate::holiday::{default_target_date, primary_pallet_type};
use crate::key::{ItemsKey, LocationsKey, StoreKey};
use crate::pending::PendingTracker;
use crate::provision::get_or_create_store;
use crate::source::{ItemSource, LocationSource, StoreSource};
use crate::stats::Overview;

type EnsureFuture = Shared<BoxFuture<'static, Result<Store, CacheError>>>;
type WriteLock = Arc<tokio::sync::Mutex<()>>;

/// Shared cache of stores, locations and items.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct DataCache {
    gateway: Arc<dyn DocumentStore>,
    config: CacheConfig,
    pending: Arc<PendingTracker>,
    stores: EntityCache<StoreSource>,
    locations: EntityCache<LocationSource>,
    items: EntityCache<ItemSource>,
    ensuring: Arc<DashMap<StoreKey, EnsureFuture>>,
    count_writes: Arc<DashMap<String, WriteLock>>,
}

impl DataCache {
    pub fn new(gateway: Arc<dyn DocumentStore>, config: CacheConfig) -> Self {
        let pending = Arc::new(PendingTracker::new(config.pending_window));
        Self {
            stores: EntityCache::new(StoreSource, Arc::clone(&gateway), config.ttl),
            locations: EntityCache::new(LocationSource, Arc::clone(&gateway), config.ttl),
            items: EntityCache::new(
                ItemSource::new(Arc::clone(&pending)),
                Arc::clone(&gateway),
                config.ttl,
            ),
            gateway,
            config,
            pending,
            ensuring: Arc::new(DashMap::new()),
            count_writes: Arc::new(DashMap::new()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn gateway(&self) -> &Arc<dyn DocumentStore> {
        &self.gateway
    }

    pub fn pending(&self) -> &Arc<PendingTracker> {
        &self.pending
    }

    /// Held while an item's count is written, so writes land in the order
    /// they were issued.
    pub(crate) fn count_write_lock(&self, item_id: &str) -> WriteLock {
        Arc::clone(
            self.count_writes
                .entry(item_id.to_string())
                .or_default()
                .value(),
        )
    }

    pub fn store_cache(&self) -> &EntityCache<StoreSource> {
        &self.stores
    }

    pub fn location_cache(&self) -> &EntityCache<LocationSource> {
        &self.locations
    }

    pub fn item_cache(&self) -> &EntityCache<ItemSource> {
        &self.items
    }

    // Reads

    pub fn store(&self, store_number: &str, holiday: HolidayId) -> Option<Store> {
        self.stores.read(&StoreKey::new(store_number, holiday))
    }

    pub fn locations(&self, store_number: &str) -> Vec<Location> {
        self.locations.read(&LocationsKey::new(store_number))
    }

    pub fn items(&self, store_number: &str, holiday: HolidayId, category: Category) -> Vec<Item> {
        self.items
            .read(&ItemsKey::new(store_number, holiday, category))
    }

    pub fn is_store_loading(&self, store_number: &str, holiday: HolidayId) -> bool {
        self.stores
            .is_loading(&StoreKey::new(store_number, holiday))
    }

    pub fn is_locations_loading(&self, store_number: &str) -> bool {
        self.locations.is_loading(&LocationsKey::new(store_number))
    }

    pub fn is_items_loading(
        &self,
        store_number: &str,
        holiday: HolidayId,
        category: Category,
    ) -> bool {
        self.items
            .is_loading(&ItemsKey::new(store_number, holiday, category))
    }

    /// The cached store's target date, or the holiday default when it has none.
    pub fn target_date(&self, store_number: &str, holiday: HolidayId, today: NaiveDate) -> NaiveDate {
        self.store(store_number, holiday)
            .and_then(|store| store.target_date)
            .unwrap_or_else(|| default_target_date(holiday, today))
    }

    /// Totals for every category of a store and holiday, from cached data.
    pub fn overview(&self, store_number: &str, holiday: HolidayId, today: NaiveDate) -> Overview {
        let sections: Vec<_> = Category::ALL
            .into_iter()
            .map(|category| (category, self.items(store_number, holiday, category)))
            .collect();
        Overview::compute(
            &sections,
            primary_pallet_type(holiday),
            self.target_date(store_number, holiday, today),
            today,
        )
    }

    // Preloads

    pub fn preload_store(&self, store_number: &str, holiday: HolidayId) {
        self.stores.preload(&StoreKey::new(store_number, holiday));
    }

    pub fn preload_locations(&self, store_number: &str) {
        self.locations.preload(&LocationsKey::new(store_number));
    }

    pub fn preload_items(&self, store_number: &str, holiday: HolidayId, category: Category) {
        self.items
            .preload(&ItemsKey::new(store_number, holiday, category));
    }

    /// Warm everything a holiday view needs. Returns immediately.
    pub fn preload_all_for_holiday(&self, store_number: &str, holiday: HolidayId) {
        debug!(store_number, holiday = %holiday, "preloading holiday");
        self.preload_store(store_number, holiday);
        self.preload_locations(store_number);
        for category in Category::ALL {
            self.preload_items(store_number, holiday, category);
        }
    }

    // Fetches

    pub async fn fetch_store(
        &self,
        store_number: &str,
        holiday: HolidayId,
    ) -> Result<Option<Store>, CacheError> {
        self.stores
            .fetch(&StoreKey::new(store_number, holiday))
            .await
    }

    pub async fn fetch_locations(&self, store_number: &str) -> Result<Vec<Location>, CacheError> {
        self.locations.fetch(&LocationsKey::new(store_number)).await
    }

    pub async fn fetch_items(
        &self,
        store_number: &str,
        holiday: HolidayId,
        category: Category,
    ) -> Result<Vec<Item>, CacheError> {
        self.items
            .fetch(&ItemsKey::new(store_number, holiday, category))
            .await
    }

    // Subscriptions

    pub fn subscribe_store<F>(&self, store_number: &str, holiday: HolidayId, callback: F) -> Subscription
    where
        F: Fn(&Option<Store>) + Send + Sync + 'static,
    {
        self.stores
            .subscribe(&StoreKey::new(store_number, holiday), Arc::new(callback))
    }

    pub fn subscribe_locations<F>(&self, store_number: &str, callback: F) -> Subscription
    where
        F: Fn(&Vec<Location>) + Send + Sync + 'static,
    {
        self.locations
            .subscribe(&LocationsKey::new(store_number), Arc::new(callback))
    }

    pub fn subscribe_items<F>(
        &self,
        store_number: &str,
        holiday: HolidayId,
        category: Category,
        callback: F,
    ) -> Subscription
    where
        F: Fn(&Vec<Item>) + Send + Sync + 'static,
    {
        self.items.subscribe(
            &ItemsKey::new(store_number, holiday, category),
            Arc::new(callback),
        )
    }

    // Invalidation and direct writes

    pub fn invalidate_store(&self, store_number: &str, holiday: HolidayId) {
        self.stores
            .invalidate(&StoreKey::new(store_number, holiday));
    }

    pub fn invalidate_locations(&self, store_number: &str) {
        self.locations.invalidate(&LocationsKey::new(store_number));
    }

    pub fn invalidate_items(&self, store_number: &str, holiday: HolidayId, category: Category) {
        self.items
            .invalidate(&ItemsKey::new(store_number, holiday, category));
    }

    /// Replace cached items, e.g. after an optimistic edit, and notify.
    pub fn update_items(
        &self,
        store_number: &str,
        holiday: HolidayId,
        category: Category,
        items: Vec<Item>,
    ) {
        self.items
            .put(&ItemsKey::new(store_number, holiday, category), items);
    }

    /// Get or create the store record and cache it.
    ///
    /// A fresh cached record short-circuits. Concurrent callers for the same
    /// key share one creation.
    pub async fn ensure_store(
        &self,
        store_number: &str,
        holiday: HolidayId,
    ) -> Result<Store, CacheError> {
        let key = StoreKey::new(store_number, holiday);
        if let Some(Some(store)) = self.stores.fresh(&key) {
            return Ok(store);
        }

        let future = match self.ensuring.entry(key.clone()) {
            Entry::Occupied(occupied) => {
                debug!(key = %key, "joining store provisioning");
                occupied.get().clone()
            }
            Entry::Vacant(vacant) => {
                let future = self.provision(key).boxed().shared();
                vacant.insert(future.clone());
                future
            }
        };
        future.await
    }

    fn provision(
        &self,
        key: StoreKey,
    ) -> impl Future<Output = Result<Store, CacheError>> + Send + 'static {
        let gateway = Arc::clone(&self.gateway);
        let stores = self.stores.clone();
        let locations = self.locations.clone();
        let ensuring = Arc::clone(&self.ensuring);

        async move {
            let today = Local::now().date_naive();
            let result =
                get_or_create_store(gateway.as_ref(), &key.store_number, key.holiday, today).await;
            let store = result.map(|provisioned| {
                stores.put(&key, Some(provisioned.store.clone()));
                if provisioned.seeded_locations {
                    locations.invalidate(&LocationsKey::new(key.store_number.as_str()));
                }
                provisioned.store
            });
            ensuring.remove(&key);
            store
        }
    }

    /// Drop every cached entry and close every realtime channel.
    pub fn shutdown(&self) {
        self.stores.shutdown();
        self.locations.shutdown();
        self.items.shutdown();
        self.ensuring.clear();
        self.count_writes.clear();
        debug!("data cache shut down");
    }
}
