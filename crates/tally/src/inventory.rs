//! One-shot inventory commands.

use chrono::{Local, NaiveDate};
use miette::{IntoDiagnostic, Result};
use tally_appwrite::{Category, HolidayId};
use tally_cache::{DataCache, Inventory, InventoryStats, Overview};
use tracing::info;

/// Get or create the store record.
pub async fn ensure(cache: &DataCache, store_number: &str, holiday: HolidayId) -> Result<()> {
    let store = cache
        .ensure_store(store_number, holiday)
        .await
        .into_diagnostic()?;
    let locations = cache.fetch_locations(store_number).await.into_diagnostic()?;

    println!("store {} ({})", store.store_number, store.id);
    match store.target_date {
        Some(date) => println!("  target date: {}", date),
        None => println!("  target date: not set"),
    }
    for location in locations {
        println!("  {} {}", location.icon, location.name);
    }
    Ok(())
}

/// Load the inventory's items so edits have something to build on.
async fn load(cache: &DataCache, inventory: &Inventory) -> Result<()> {
    cache
        .fetch_items(
            inventory.store_number(),
            inventory.holiday(),
            inventory.category(),
        )
        .await
        .into_diagnostic()?;
    Ok(())
}

pub async fn bump(cache: &DataCache, inventory: Inventory, item_id: &str, delta: i64) -> Result<()> {
    load(cache, &inventory).await?;
    let count = inventory
        .adjust_count(item_id, delta)
        .await
        .into_diagnostic()?;
    info!(item = item_id, count, "count saved");
    println!("{}: {}", item_id, count);
    Ok(())
}

pub async fn set_count(
    cache: &DataCache,
    inventory: Inventory,
    item_id: &str,
    count: u32,
) -> Result<()> {
    load(cache, &inventory).await?;
    let count = inventory.set_count(item_id, count).await.into_diagnostic()?;
    println!("{}: {}", item_id, count);
    Ok(())
}

pub async fn stats(cache: &DataCache, inventory: Inventory) -> Result<()> {
    cache
        .fetch_store(inventory.store_number(), inventory.holiday())
        .await
        .into_diagnostic()?;
    load(cache, &inventory).await?;

    print_stats(&inventory.stats(Local::now().date_naive()));
    Ok(())
}

pub async fn overview(cache: &DataCache, store_number: &str, holiday: HolidayId) -> Result<()> {
    cache
        .fetch_store(store_number, holiday)
        .await
        .into_diagnostic()?;
    for category in Category::ALL {
        cache
            .fetch_items(store_number, holiday, category)
            .await
            .into_diagnostic()?;
    }

    print_overview(&cache.overview(store_number, holiday, Local::now().date_naive()));
    Ok(())
}

pub async fn set_date(inventory: Inventory, date: NaiveDate) -> Result<()> {
    inventory.set_target_date(date).await.into_diagnostic()?;
    println!("target date: {}", date);
    Ok(())
}

pub fn print_stats(stats: &InventoryStats) {
    println!("total pallets: {}", stats.grand_total);
    for (item_type, total) in &stats.type_totals {
        println!("  {:<12} {}", item_type, total);
    }
    match stats.days_remaining {
        Some(days) => println!(
            "{} days left: {}/day overall, {}/day primary",
            days, stats.total_per_day, stats.primary_per_day
        ),
        None => println!("no target date"),
    }
}

fn print_overview(overview: &Overview) {
    println!(
        "target {} ({} days left)",
        overview.target_date, overview.days_remaining
    );
    for (category, stats) in &overview.categories {
        println!(
            "  {:<6} {} pallets, {}/day",
            category.as_str(),
            stats.grand_total,
            stats.total_per_day
        );
    }
    println!(
        "total pallets: {}, {}/day",
        overview.grand_total, overview.grand_per_day
    );
}
