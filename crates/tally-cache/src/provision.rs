//! Find or create the store record for a store number and holiday.

use chrono::NaiveDate;
use serde_json::{Value, json};
use tally_appwrite::{AppwriteError, Collection, DocumentStore, HolidayId, Query, Store};
use tracing::{debug, info, warn};

use crate::error::CacheError;
use crate::holiday::{DEFAULT_LOCATIONS, default_target_date};
use crate::source::{Source, StoreSource, decode_all, pick_store};

/// Outcome of [`get_or_create_store`].
#[derive(Debug, Clone)]
pub struct Provisioned {
    pub store: Store,
    /// Default locations were written, so any cached location list is stale.
    pub seeded_locations: bool,
}

/// Return the store record for `(store_number, holiday)`, creating it if needed.
///
/// - A record already tagged with `holiday` is returned as-is.
/// - An untagged legacy record is claimed for the default holiday; if the
///   tag cannot be written the legacy record is used unchanged.
/// - Otherwise a record is created with the holiday's default target date,
///   without the `holiday` attribute if the collection schema lacks it.
///   A duplicate reported by the server is re-read instead.
/// - A store number with no locations is seeded with the defaults.
pub async fn get_or_create_store(
    gateway: &dyn DocumentStore,
    store_number: &str,
    holiday: HolidayId,
    today: NaiveDate,
) -> Result<Provisioned, CacheError> {
    let stores = list_stores(gateway, store_number).await?;

    if let Some(store) = stores.iter().find(|s| s.holiday == Some(holiday)) {
        return Ok(Provisioned {
            store: store.clone(),
            seeded_locations: false,
        });
    }

    if holiday == HolidayId::DEFAULT {
        if let Some(legacy) = stores.into_iter().find(|s| s.holiday.is_none()) {
            return Ok(Provisioned {
                store: tag_legacy_store(gateway, legacy, holiday).await,
                seeded_locations: false,
            });
        }
    }

    let store = create_store(gateway, store_number, holiday, today).await?;
    let seeded_locations = seed_default_locations(gateway, store_number).await?;
    Ok(Provisioned {
        store,
        seeded_locations,
    })
}

async fn list_stores(
    gateway: &dyn DocumentStore,
    store_number: &str,
) -> Result<Vec<Store>, CacheError> {
    let documents = gateway
        .list_documents(Collection::Stores, &[Query::equal("storeNumber", store_number)])
        .await?;
    Ok(decode_all(StoreSource::KIND, documents))
}

async fn tag_legacy_store(gateway: &dyn DocumentStore, legacy: Store, holiday: HolidayId) -> Store {
    let result = gateway
        .update_document(
            Collection::Stores,
            &legacy.id,
            json!({ "holiday": holiday.as_str() }),
        )
        .await
        .map_err(CacheError::from)
        .and_then(decode_store);

    match result {
        Ok(store) => {
            info!(store = %store.id, holiday = %holiday, "tagged legacy store record");
            store
        }
        Err(e) => {
            warn!(store = %legacy.id, error = %e, "could not tag legacy store, using as-is");
            legacy
        }
    }
}

async fn create_store(
    gateway: &dyn DocumentStore,
    store_number: &str,
    holiday: HolidayId,
    today: NaiveDate,
) -> Result<Store, CacheError> {
    let target_date = default_target_date(holiday, today);
    let mut data = json!({
        "storeNumber": store_number,
        "targetDate": target_date.to_string(),
    });
    let untagged = data.clone();
    data["holiday"] = Value::from(holiday.as_str());

    let created = match gateway.create_document(Collection::Stores, None, data).await {
        Err(e) if e.is_unknown_attribute() => {
            warn!(error = %e, "store schema lacks holiday, creating untagged record");
            gateway
                .create_document(Collection::Stores, None, untagged)
                .await
        }
        other => other,
    };

    match created {
        Ok(doc) => {
            let store = decode_store(doc)?;
            info!(store = %store.id, store_number, holiday = %holiday, %target_date, "created store record");
            Ok(store)
        }
        Err(e) if e.is_conflict() => reread_after_conflict(gateway, store_number, holiday, e).await,
        Err(e) => Err(e.into()),
    }
}

async fn reread_after_conflict(
    gateway: &dyn DocumentStore,
    store_number: &str,
    holiday: HolidayId,
    conflict: AppwriteError,
) -> Result<Store, CacheError> {
    debug!(store_number, holiday = %holiday, "store created concurrently, re-reading");
    let stores = list_stores(gateway, store_number).await?;
    match pick_store(stores, holiday) {
        Some(store) => Ok(store),
        None => Err(conflict.into()),
    }
}

/// Create the default locations when the store number has none yet.
/// Returns whether anything was written.
async fn seed_default_locations(
    gateway: &dyn DocumentStore,
    store_number: &str,
) -> Result<bool, CacheError> {
    let existing = gateway
        .list_documents(
            Collection::Locations,
            &[Query::equal("storeNumber", store_number), Query::limit(1)],
        )
        .await?;
    if !existing.is_empty() {
        return Ok(false);
    }

    for location in DEFAULT_LOCATIONS {
        gateway
            .create_document(
                Collection::Locations,
                None,
                json!({
                    "storeNumber": store_number,
                    "name": location.name,
                    "icon": location.icon,
                    "order": location.order,
                }),
            )
            .await?;
    }
    info!(store_number, count = DEFAULT_LOCATIONS.len(), "seeded default locations");
    Ok(true)
}

fn decode_store(doc: Value) -> Result<Store, CacheError> {
    serde_json::from_value(doc).map_err(|e| CacheError::decode(StoreSource::KIND, e))
}
