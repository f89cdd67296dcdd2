//! Client-side data cache for Tally.
//!
//! Holds store, location and item data fetched from the document store,
//! shares one fetch and one realtime channel per key between every consumer,
//! and keeps optimistic count edits visible until the server catches up.
//!
//! ## Features
//!
//! - **Entity cache**: TTL freshness, single-flight fetches, out-of-order
//!   result discard, reference-counted realtime subscriptions
//! - **Pending writes**: a short window in which local counts override
//!   server snapshots
//! - **Facade**: [`DataCache`], including get-or-create of store records
//! - **Inventory**: optimistic count edits with rollback, item and location
//!   management, clearance stats

mod config;
pub mod entity;
mod error;
mod facade;
pub mod holiday;
mod inventory;
mod key;
pub mod pending;
pub mod provision;
pub mod source;
pub mod stats;

pub use config::CacheConfig;
pub use entity::{CacheEntry, Callback, EntityCache, EntryState, Subscription};
pub use error::CacheError;
pub use facade::DataCache;
pub use inventory::{Inventory, ItemTemplate};
pub use key::{ItemsKey, LocationsKey, StoreKey};
pub use pending::{CountState, PendingTracker, PendingWrite};
pub use stats::{InventoryStats, Overview};
