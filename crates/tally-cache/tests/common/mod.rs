pub mod memory;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use tally_appwrite::{Category, Collection, DocumentStore, HolidayId};
use tally_cache::{CacheConfig, DataCache};

#[allow(unused_imports)]
pub use memory::MemoryStore;

#[allow(dead_code)]
pub fn cache_over(store: &Arc<MemoryStore>) -> DataCache {
    let gateway: Arc<dyn DocumentStore> = store.clone();
    DataCache::new(gateway, CacheConfig::default())
}

/// Let spawned fetches run to completion.
#[allow(dead_code)]
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}

#[allow(dead_code)]
pub fn store_doc(store_number: &str, holiday: Option<HolidayId>, target_date: &str) -> Value {
    let mut doc = json!({
        "storeNumber": store_number,
        "targetDate": target_date,
    });
    if let Some(holiday) = holiday {
        doc["holiday"] = json!(holiday.as_str());
    }
    doc
}

#[allow(dead_code)]
pub fn location_doc(store_number: &str, name: &str, order: i64) -> Value {
    json!({
        "storeNumber": store_number,
        "name": name,
        "icon": "📦",
        "order": order,
    })
}

#[allow(dead_code)]
pub fn item_doc(
    store_number: &str,
    location_id: &str,
    holiday: HolidayId,
    category: Category,
    item_type: &str,
    count: u32,
) -> Value {
    json!({
        "locationId": location_id,
        "storeNumber": store_number,
        "name": item_type,
        "type": item_type,
        "icon": "🍬",
        "count": count,
        "holiday": holiday.as_str(),
        "category": category.as_str(),
    })
}

/// Insert a candy item for 4521/christmas and return its id.
#[allow(dead_code)]
pub fn seed_candy_item(store: &MemoryStore, count: u32) -> String {
    store.insert(
        Collection::Items,
        item_doc("4521", "loc-1", HolidayId::Christmas, Category::Candy, "candy", count),
    )
}

/// A callback that records every value it sees.
#[allow(dead_code)]
pub fn recorder<T>() -> (Arc<Mutex<Vec<T>>>, impl Fn(&T) + Send + Sync + 'static)
where
    T: Clone + Send + 'static,
{
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (seen, move |value: &T| sink.lock().unwrap().push(value.clone()))
}
