//! Clearance projections over an inventory snapshot.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use tally_appwrite::{Category, Item};

/// Whole days from `today` until `target`; negative once it has passed.
pub fn days_remaining(target: NaiveDate, today: NaiveDate) -> i64 {
    (target - today).num_days()
}

/// Pallets that must move per day to clear `total` in `days`, to one decimal.
///
/// Zero when the target date is today or already past.
pub fn per_day_rate(total: u64, days: i64) -> f64 {
    if days <= 0 {
        return 0.0;
    }
    (total as f64 / days as f64 * 10.0).round() / 10.0
}

/// Totals and projections for one category of one store.
#[derive(Debug, Clone, PartialEq)]
pub struct InventoryStats {
    pub grand_total: u64,
    /// Count per pallet type. Always contains the primary type.
    pub type_totals: BTreeMap<String, u64>,
    /// `None` when the store has no target date.
    pub days_remaining: Option<i64>,
    pub total_per_day: f64,
    pub primary_per_day: f64,
}

impl InventoryStats {
    pub fn compute(
        items: &[Item],
        primary_type: &str,
        target_date: Option<NaiveDate>,
        today: NaiveDate,
    ) -> Self {
        let mut type_totals = BTreeMap::new();
        type_totals.insert(primary_type.to_string(), 0u64);
        for item in items {
            *type_totals.entry(item.item_type.clone()).or_insert(0) += u64::from(item.count);
        }

        let grand_total = type_totals.values().sum();
        let primary_total = type_totals.get(primary_type).copied().unwrap_or(0);
        let days = target_date.map(|target| days_remaining(target, today));
        let rate = |total| days.map_or(0.0, |d| per_day_rate(total, d));

        Self {
            grand_total,
            type_totals,
            days_remaining: days,
            total_per_day: rate(grand_total),
            primary_per_day: rate(primary_total),
        }
    }
}

/// Totals across every category of one store and holiday.
#[derive(Debug, Clone, PartialEq)]
pub struct Overview {
    pub target_date: NaiveDate,
    pub days_remaining: i64,
    pub categories: Vec<(Category, InventoryStats)>,
    pub grand_total: u64,
    pub grand_per_day: f64,
}

impl Overview {
    pub fn compute(
        sections: &[(Category, Vec<Item>)],
        primary_type: &str,
        target_date: NaiveDate,
        today: NaiveDate,
    ) -> Self {
        let categories: Vec<_> = sections
            .iter()
            .map(|(category, items)| {
                let stats = InventoryStats::compute(items, primary_type, Some(target_date), today);
                (*category, stats)
            })
            .collect();
        let grand_total = categories.iter().map(|(_, stats)| stats.grand_total).sum();
        let days = days_remaining(target_date, today);

        Self {
            target_date,
            days_remaining: days,
            categories,
            grand_total,
            grand_per_day: per_day_rate(grand_total, days),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn item(item_type: &str, count: u32) -> Item {
        Item {
            id: format!("{}-{}", item_type, count),
            location_id: "l1".to_string(),
            store_number: "4521".to_string(),
            name: item_type.to_string(),
            item_type: item_type.to_string(),
            icon: String::new(),
            count,
            updated_at: None,
            holiday: None,
            category: None,
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_days_remaining() {
        assert_eq!(days_remaining(date(2024, 12, 21), date(2024, 12, 1)), 20);
        assert_eq!(days_remaining(date(2024, 12, 21), date(2024, 12, 21)), 0);
        assert_eq!(days_remaining(date(2024, 12, 21), date(2024, 12, 24)), -3);
    }

    #[test]
    fn test_per_day_rate() {
        assert_eq!(per_day_rate(52, 10), 5.2);
        assert_eq!(per_day_rate(10, 3), 3.3);
        assert_eq!(per_day_rate(10, 0), 0.0);
        assert_eq!(per_day_rate(10, -2), 0.0);
    }

    #[test]
    fn test_compute_stats() {
        let items = vec![item("candy", 4), item("candy", 6), item("popcorn", 10)];
        let stats = InventoryStats::compute(
            &items,
            "candy",
            Some(date(2024, 12, 21)),
            date(2024, 12, 11),
        );

        assert_eq!(stats.grand_total, 20);
        assert_eq!(stats.type_totals.get("candy"), Some(&10));
        assert_eq!(stats.type_totals.get("popcorn"), Some(&10));
        assert_eq!(stats.days_remaining, Some(10));
        assert_eq!(stats.total_per_day, 2.0);
        assert_eq!(stats.primary_per_day, 1.0);
    }

    #[test]
    fn test_overview_sums_categories() {
        let sections = vec![
            (Category::Candy, vec![item("candy", 10), item("chocolate", 3)]),
            (Category::Gm, vec![item("tinsel", 7)]),
        ];
        let overview =
            Overview::compute(&sections, "candy", date(2024, 12, 21), date(2024, 12, 11));

        assert_eq!(overview.grand_total, 20);
        assert_eq!(overview.days_remaining, 10);
        assert_eq!(overview.grand_per_day, 2.0);
        assert_eq!(overview.categories.len(), 2);
        assert_eq!(overview.categories[0].1.grand_total, 13);
        assert_eq!(overview.categories[1].0, Category::Gm);
        assert_eq!(overview.categories[1].1.total_per_day, 0.7);
    }

    #[test]
    fn test_overview_past_target_has_no_rate() {
        let sections = vec![(Category::Candy, vec![item("candy", 5)])];
        let overview =
            Overview::compute(&sections, "candy", date(2024, 12, 21), date(2024, 12, 23));
        assert_eq!(overview.days_remaining, -2);
        assert_eq!(overview.grand_per_day, 0.0);
    }

    #[test]
    fn test_primary_type_always_present() {
        let stats = InventoryStats::compute(&[], "chocolate", None, date(2025, 1, 1));
        assert_eq!(stats.type_totals.get("chocolate"), Some(&0));
        assert_eq!(stats.days_remaining, None);
        assert_eq!(stats.total_per_day, 0.0);
    }
}
