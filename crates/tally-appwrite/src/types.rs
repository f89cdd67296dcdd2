//! Core types for inventory documents.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Seasonal event an inventory is tracked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HolidayId {
    Christmas,
    Valentines,
    Easter,
    Halloween,
}

impl HolidayId {
    /// Holiday that untagged legacy store records belong to.
    pub const DEFAULT: HolidayId = HolidayId::Christmas;

    /// All holidays in display order.
    pub const ALL: [HolidayId; 4] = [
        HolidayId::Christmas,
        HolidayId::Valentines,
        HolidayId::Easter,
        HolidayId::Halloween,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HolidayId::Christmas => "christmas",
            HolidayId::Valentines => "valentines",
            HolidayId::Easter => "easter",
            HolidayId::Halloween => "halloween",
        }
    }
}

impl fmt::Display for HolidayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HolidayId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HolidayId::ALL
            .into_iter()
            .find(|h| h.as_str() == s)
            .ok_or_else(|| format!("unknown holiday '{}'", s))
    }
}

/// Section of the inventory an item belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Candy,
    Gm,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Candy, Category::Gm];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Candy => "candy",
            Category::Gm => "gm",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown category '{}'", s))
    }
}

/// Store configuration for one store number and holiday.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Store {
    #[serde(rename = "$id")]
    pub id: String,
    pub store_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Day the seasonal stock should be cleared by.
    #[serde(
        default,
        deserialize_with = "lenient_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub target_date: Option<NaiveDate>,
    /// Absent on legacy records created before holidays existed.
    #[serde(
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub holiday: Option<HolidayId>,
}

/// Physical location inside a store. Shared across holidays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    #[serde(rename = "$id")]
    pub id: String,
    pub store_number: String,
    pub name: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub order: i64,
}

/// Pallet slot with a count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    #[serde(rename = "$id")]
    pub id: String,
    pub location_id: String,
    pub store_number: String,
    pub name: String,
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub holiday: Option<HolidayId>,
    #[serde(
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub category: Option<Category>,
}

/// Response from listing documents.
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentList {
    pub total: u64,
    pub documents: Vec<serde_json::Value>,
}

/// Treat null and empty strings as an absent tag.
fn empty_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: fmt::Display,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref() {
        None | Some("") => Ok(None),
        Some(s) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

/// Accept `YYYY-MM-DD` or a full datetime; anything unparseable is absent.
fn lenient_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|s| {
        s.get(..10)
            .and_then(|day| NaiveDate::parse_from_str(day, "%Y-%m-%d").ok())
    }))
}
