//! Short-lived optimistic item counts.
//!
//! A count written locally but not yet confirmed by the server overrides
//! whatever a fetch returns for the same item, for a few seconds. That keeps
//! a realtime echo of an older write from reverting rapid taps.

use std::time::Duration;

use dashmap::DashMap;
use tally_appwrite::Item;
use tokio::time::Instant;
use tracing::trace;

/// An unconfirmed local count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingWrite {
    pub count: u32,
    pub since: Instant,
}

/// Which count an item shows right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountState {
    /// No live pending write; the server value stands.
    Confirmed(u32),
    /// A local write inside the window overrides the server.
    Pending { count: u32, since: Instant },
}

impl CountState {
    pub fn count(&self) -> u32 {
        match self {
            CountState::Confirmed(count) => *count,
            CountState::Pending { count, .. } => *count,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, CountState::Pending { .. })
    }
}

/// Decide the visible count from a server value and an optional pending write.
///
/// A pending write is live while its age is at most `window`.
pub fn settle(
    server: u32,
    pending: Option<&PendingWrite>,
    now: Instant,
    window: Duration,
) -> CountState {
    match pending {
        Some(p) if now.saturating_duration_since(p.since) <= window => CountState::Pending {
            count: p.count,
            since: p.since,
        },
        _ => CountState::Confirmed(server),
    }
}

/// Pending writes keyed by item id.
#[derive(Debug)]
pub struct PendingTracker {
    window: Duration,
    writes: DashMap<String, PendingWrite>,
}

impl PendingTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            writes: DashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// The count to build the next write on: pending if live, else `server`.
    pub fn effective_count(&self, item_id: &str, server: u32) -> u32 {
        self.state(item_id, server).count()
    }

    pub fn state(&self, item_id: &str, server: u32) -> CountState {
        let pending = self.writes.get(item_id).map(|p| *p);
        settle(server, pending.as_ref(), Instant::now(), self.window)
    }

    /// Record a local write, resetting its age.
    pub fn set_pending(&self, item_id: &str, count: u32) {
        self.writes.insert(
            item_id.to_string(),
            PendingWrite {
                count,
                since: Instant::now(),
            },
        );
    }

    /// Drop the entry only if no newer local write replaced it.
    pub fn clear_if_matches(&self, item_id: &str, saved: u32) {
        self.writes.remove_if(item_id, |_, p| p.count == saved);
    }

    pub fn clear_pending(&self, item_id: &str) {
        self.writes.remove(item_id);
    }

    pub fn get(&self, item_id: &str) -> Option<PendingWrite> {
        self.writes.get(item_id).map(|p| *p)
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Purge expired writes, then overlay live ones onto a server snapshot.
    pub fn reconcile(&self, mut items: Vec<Item>) -> Vec<Item> {
        let now = Instant::now();
        self.writes
            .retain(|_, p| now.saturating_duration_since(p.since) <= self.window);

        if self.writes.is_empty() {
            return items;
        }

        for item in &mut items {
            let pending = self.writes.get(&item.id).map(|p| *p);
            if let CountState::Pending { count, .. } =
                settle(item.count, pending.as_ref(), now, self.window)
            {
                if count != item.count {
                    trace!(item = %item.id, server = item.count, pending = count, "overlaying pending count");
                }
                item.count = count;
            }
        }
        items
    }
}
