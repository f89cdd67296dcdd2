//! Live view of one category.

use chrono::Local;
use miette::{IntoDiagnostic, Result};
use tally_appwrite::{Category, HolidayId};
use tally_cache::{DataCache, Inventory};
use tracing::info;

use crate::inventory::print_stats;

/// Subscribe to a category and print totals on every change until Ctrl-C.
pub async fn run(
    cache: &DataCache,
    store_number: &str,
    holiday: HolidayId,
    category: Category,
) -> Result<()> {
    cache
        .ensure_store(store_number, holiday)
        .await
        .into_diagnostic()?;
    cache.preload_all_for_holiday(store_number, holiday);

    let view = Inventory::new(cache.clone(), store_number, holiday, category);
    let loading = cache.clone();
    let sn = store_number.to_string();
    let subscription = cache.subscribe_items(store_number, holiday, category, move |items| {
        if items.is_empty() && loading.is_items_loading(&sn, holiday, category) {
            return;
        }
        println!("--- {} item(s)", items.len());
        print_stats(&view.stats(Local::now().date_naive()));
    });

    info!(store_number, holiday = %holiday, category = %category, "watching, Ctrl-C to stop");
    tokio::signal::ctrl_c().await.into_diagnostic()?;

    subscription.unsubscribe();
    info!("stopped watching");
    Ok(())
}
