//! Composite cache keys.
//!
//! The `Display` form of each key is the string key used in logs.

use std::fmt;

use tally_appwrite::{Category, HolidayId};

/// Store configuration for one store number and holiday.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreKey {
    pub store_number: String,
    pub holiday: HolidayId,
}

impl StoreKey {
    pub fn new(store_number: impl Into<String>, holiday: HolidayId) -> Self {
        Self {
            store_number: store_number.into(),
            holiday,
        }
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store:{}:{}", self.store_number, self.holiday)
    }
}

/// Locations are shared across holidays, so only the store number matters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocationsKey {
    pub store_number: String,
}

impl LocationsKey {
    pub fn new(store_number: impl Into<String>) -> Self {
        Self {
            store_number: store_number.into(),
        }
    }
}

impl fmt::Display for LocationsKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "locations:{}", self.store_number)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemsKey {
    pub store_number: String,
    pub holiday: HolidayId,
    pub category: Category,
}

impl ItemsKey {
    pub fn new(store_number: impl Into<String>, holiday: HolidayId, category: Category) -> Self {
        Self {
            store_number: store_number.into(),
            holiday,
            category,
        }
    }
}

impl fmt::Display for ItemsKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "items:{}:{}:{}",
            self.store_number, self.holiday, self.category
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display() {
        assert_eq!(
            StoreKey::new("4521", HolidayId::Christmas).to_string(),
            "store:4521:christmas"
        );
        assert_eq!(LocationsKey::new("4521").to_string(), "locations:4521");
        assert_eq!(
            ItemsKey::new("4521", HolidayId::Easter, Category::Gm).to_string(),
            "items:4521:easter:gm"
        );
    }
}
