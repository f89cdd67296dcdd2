//! Per-holiday defaults.

use chrono::{Datelike, NaiveDate};
use tally_appwrite::HolidayId;

/// A location every new store number starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultLocation {
    pub name: &'static str,
    pub icon: &'static str,
    pub order: i64,
}

/// Seeded the first time a store number is provisioned, whatever the holiday.
pub const DEFAULT_LOCATIONS: [DefaultLocation; 6] = [
    DefaultLocation { name: "Grocery Back Room", icon: "🏪", order: 0 },
    DefaultLocation { name: "GM Back Room", icon: "📦", order: 1 },
    DefaultLocation { name: "Hardware Back Wall", icon: "🔨", order: 2 },
    DefaultLocation { name: "Garden Center", icon: "🌻", order: 3 },
    DefaultLocation { name: "Trailer", icon: "🚛", order: 4 },
    DefaultLocation { name: "Seasonal Floor", icon: "🎄", order: 5 },
];

/// Month and day the seasonal stock should be gone by.
fn target_month_day(holiday: HolidayId) -> (u32, u32) {
    match holiday {
        HolidayId::Christmas => (12, 21),
        HolidayId::Valentines => (2, 14),
        // Easter moves every year; this is close enough for a default.
        HolidayId::Easter => (4, 20),
        HolidayId::Halloween => (10, 31),
    }
}

/// This year's target date, or next year's once it has passed.
pub fn default_target_date(holiday: HolidayId, today: NaiveDate) -> NaiveDate {
    let (month, day) = target_month_day(holiday);
    let this_year = NaiveDate::from_ymd_opt(today.year(), month, day);
    match this_year {
        Some(date) if date >= today => date,
        _ => NaiveDate::from_ymd_opt(today.year() + 1, month, day).unwrap_or(today),
    }
}

/// The pallet type whose clearance rate is called out separately.
pub fn primary_pallet_type(holiday: HolidayId) -> &'static str {
    match holiday {
        HolidayId::Valentines => "chocolate",
        HolidayId::Christmas | HolidayId::Easter | HolidayId::Halloween => "candy",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_target_date_this_year() {
        assert_eq!(
            default_target_date(HolidayId::Christmas, date(2024, 11, 1)),
            date(2024, 12, 21)
        );
        assert_eq!(
            default_target_date(HolidayId::Halloween, date(2024, 10, 31)),
            date(2024, 10, 31)
        );
    }

    #[test]
    fn test_target_date_rolls_over() {
        assert_eq!(
            default_target_date(HolidayId::Valentines, date(2024, 3, 1)),
            date(2025, 2, 14)
        );
        assert_eq!(
            default_target_date(HolidayId::Christmas, date(2024, 12, 22)),
            date(2025, 12, 21)
        );
    }

    #[test]
    fn test_primary_pallet_type() {
        assert_eq!(primary_pallet_type(HolidayId::Valentines), "chocolate");
        assert_eq!(primary_pallet_type(HolidayId::Easter), "candy");
    }

    #[test]
    fn test_default_locations_ordered() {
        let orders: Vec<i64> = DEFAULT_LOCATIONS.iter().map(|l| l.order).collect();
        assert_eq!(orders, vec![0, 1, 2, 3, 4, 5]);
    }
}
