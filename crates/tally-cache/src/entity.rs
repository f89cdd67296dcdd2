//! Keyed cache for one entity kind.
//!
//! Entries move `Empty → Loading → Fresh → Stale → Loading → …`. Staleness is
//! evaluated lazily on access. Every key has at most one fetch in flight;
//! callers asking for the same key join it. Results carry a sequence number
//! and a result older than what the entry already holds is dropped.
//!
//! Subscribers share one realtime channel per key. Any event touching the
//! key's store number refetches the whole key and fans the result out.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tally_appwrite::{ChannelHandle, DocumentStore, RealtimeEvent};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::error::CacheError;
use crate::source::Source;

/// Subscriber callback.
pub type Callback<V> = Arc<dyn Fn(&V) + Send + Sync>;

type SharedFetch<V> = Shared<BoxFuture<'static, Result<V, CacheError>>>;

/// A cached value and its bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub data: V,
    /// `None` until the first successful fetch or direct write.
    pub fetched_at: Option<Instant>,
    pub loading: bool,
    /// Sequence of the write the entry holds; older results are discarded.
    pub seq: u64,
}

impl<V: Default> CacheEntry<V> {
    fn empty() -> Self {
        Self {
            data: V::default(),
            fetched_at: None,
            loading: false,
            seq: 0,
        }
    }
}

impl<V> CacheEntry<V> {
    pub fn state(&self, now: Instant, ttl: Duration) -> EntryState {
        if self.loading {
            return EntryState::Loading;
        }
        match self.fetched_at {
            None => EntryState::Empty,
            Some(_) if !self.is_fresh(now, ttl) => EntryState::Stale,
            Some(_) => EntryState::Fresh,
        }
    }

    /// Data is younger than `ttl`, regardless of any fetch in flight.
    pub fn is_fresh(&self, now: Instant, ttl: Duration) -> bool {
        self.fetched_at
            .is_some_and(|at| now.saturating_duration_since(at) < ttl)
    }
}

/// Lifecycle state of one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Empty,
    Loading,
    Fresh,
    Stale,
}

/// How a new fetch interacts with one already in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchMode {
    /// Join the in-flight fetch.
    Coalesce,
    /// Start a new fetch; the in-flight one loses the ordering race.
    Supersede,
    /// Join the in-flight fetch and refetch once it settles.
    Follow,
}

struct InFlight<V> {
    seq: u64,
    future: SharedFetch<V>,
    rerun: bool,
}

struct Subscribers<V> {
    callbacks: Vec<(u64, Callback<V>)>,
    channel: Option<ChannelHandle>,
}

struct Inner<S: Source> {
    source: S,
    gateway: Arc<dyn DocumentStore>,
    ttl: Duration,
    entries: DashMap<S::Key, CacheEntry<S::Value>>,
    in_flight: DashMap<S::Key, InFlight<S::Value>>,
    subscriptions: DashMap<S::Key, Subscribers<S::Value>>,
    next_seq: AtomicU64,
    next_subscriber: AtomicU64,
    closed: AtomicBool,
}

/// Cache of one entity kind, shared by cloning.
///
/// Background refreshes are spawned on the current Tokio runtime. Outside one,
/// reads and preloads return cached data without fetching.
pub struct EntityCache<S: Source> {
    inner: Arc<Inner<S>>,
}

impl<S: Source> Clone for EntityCache<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Source> EntityCache<S> {
    pub fn new(source: S, gateway: Arc<dyn DocumentStore>, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                gateway,
                ttl,
                entries: DashMap::new(),
                in_flight: DashMap::new(),
                subscriptions: DashMap::new(),
                next_seq: AtomicU64::new(0),
                next_subscriber: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn source(&self) -> &S {
        &self.inner.source
    }

    /// Cached value, or the default when nothing is cached.
    ///
    /// Schedules a background fetch when the key is missing or stale.
    pub fn read(&self, key: &S::Key) -> S::Value {
        let (data, state) = match self.inner.entries.get(key) {
            Some(entry) => (
                entry.data.clone(),
                entry.state(Instant::now(), self.inner.ttl),
            ),
            None => (S::Value::default(), EntryState::Empty),
        };

        if matches!(state, EntryState::Empty | EntryState::Stale) {
            self.inner.refresh_in_background(key);
        }
        data
    }

    /// Warm the key without waiting for it.
    pub fn preload(&self, key: &S::Key) {
        if matches!(self.state(key), EntryState::Empty | EntryState::Stale) {
            self.inner.refresh_in_background(key);
        }
    }

    /// Fetch the key, joining a fetch already in flight.
    ///
    /// On failure the prior value stays cached and only this caller sees the
    /// error.
    pub async fn fetch(&self, key: &S::Key) -> Result<S::Value, CacheError> {
        Inner::launch(&self.inner, key, FetchMode::Coalesce).await
    }

    /// Drop the entry and refetch, superseding any fetch in flight.
    pub fn invalidate(&self, key: &S::Key) {
        debug!(kind = S::KIND, key = %key, "invalidating");
        self.inner.entries.remove(key);
        Inner::launch_detached(&self.inner, key, FetchMode::Supersede);
    }

    /// Replace the cached value and notify subscribers.
    pub fn put(&self, key: &S::Key, data: S::Value) {
        let seq = self.inner.next_seq();
        let loading = self.inner.in_flight.contains_key(key);
        {
            let mut entry = self
                .inner
                .entries
                .entry(key.clone())
                .or_insert_with(CacheEntry::empty);
            entry.data = data.clone();
            entry.fetched_at = Some(Instant::now());
            entry.loading = loading;
            entry.seq = seq;
        }
        trace!(kind = S::KIND, key = %key, seq, "direct write");
        self.inner.notify(key, &data);
    }

    /// Modify the cached value in place and notify subscribers.
    ///
    /// Freshness is left alone; a fetch already in flight will not overwrite
    /// the result.
    pub fn update<F>(&self, key: &S::Key, f: F) -> S::Value
    where
        F: FnOnce(&mut S::Value),
    {
        let seq = self.inner.next_seq();
        let data = {
            let mut entry = self
                .inner
                .entries
                .entry(key.clone())
                .or_insert_with(CacheEntry::empty);
            f(&mut entry.data);
            entry.seq = seq;
            entry.data.clone()
        };
        trace!(kind = S::KIND, key = %key, seq, "in-place update");
        self.inner.notify(key, &data);
        data
    }

    /// Register a callback for the key.
    ///
    /// The first subscriber opens the realtime channel. The callback is
    /// invoked with the current value before this returns.
    pub fn subscribe(&self, key: &S::Key, callback: Callback<S::Value>) -> Subscription {
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);

        match self.inner.subscriptions.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                occupied.get_mut().callbacks.push((id, Arc::clone(&callback)));
            }
            Entry::Vacant(vacant) => {
                let channel = self.open_channel(key);
                vacant.insert(Subscribers {
                    callbacks: vec![(id, Arc::clone(&callback))],
                    channel: Some(channel),
                });
            }
        }
        debug!(kind = S::KIND, key = %key, subscriber = id, "subscribed");

        let current = self.read(key);
        callback(&current);

        let weak = Arc::downgrade(&self.inner);
        let key = key.clone();
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.release(&key, id);
            }
        })
    }

    fn open_channel(&self, key: &S::Key) -> ChannelHandle {
        let weak: Weak<Inner<S>> = Arc::downgrade(&self.inner);
        let store_number = self.inner.source.store_number(key).to_string();
        let watched = key.clone();

        debug!(kind = S::KIND, key = %key, "opening realtime channel");
        self.inner.gateway.subscribe(
            self.inner.source.collection(),
            Arc::new(move |event: RealtimeEvent| {
                if event.store_number().is_some_and(|sn| sn != store_number) {
                    return;
                }
                if let Some(inner) = weak.upgrade() {
                    trace!(kind = S::KIND, key = %watched, events = ?event.events, "realtime refetch");
                    Inner::launch_detached(&inner, &watched, FetchMode::Follow);
                }
            }),
        )
    }

    /// `true` while loading, and for keys never seen.
    pub fn is_loading(&self, key: &S::Key) -> bool {
        self.inner.entries.get(key).is_none_or(|e| e.loading)
    }

    pub fn state(&self, key: &S::Key) -> EntryState {
        self.inner
            .entries
            .get(key)
            .map_or(EntryState::Empty, |e| e.state(Instant::now(), self.inner.ttl))
    }

    /// Copy of the entry, if any.
    pub fn entry(&self, key: &S::Key) -> Option<CacheEntry<S::Value>> {
        self.inner.entries.get(key).map(|e| e.clone())
    }

    /// Cached value if it is younger than the TTL. Never schedules a fetch.
    pub fn fresh(&self, key: &S::Key) -> Option<S::Value> {
        let entry = self.inner.entries.get(key)?;
        entry
            .is_fresh(Instant::now(), self.inner.ttl)
            .then(|| entry.data.clone())
    }

    pub fn subscriber_count(&self, key: &S::Key) -> usize {
        self.inner
            .subscriptions
            .get(key)
            .map_or(0, |s| s.callbacks.len())
    }

    /// Number of realtime channels currently held open.
    pub fn open_channels(&self) -> usize {
        self.inner
            .subscriptions
            .iter()
            .filter(|s| s.channel.is_some())
            .count()
    }

    /// Drop every entry and close every channel. Fetches still in flight
    /// finish without touching the cache.
    pub fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);

        let keys: Vec<S::Key> = self
            .inner
            .subscriptions
            .iter()
            .map(|s| s.key().clone())
            .collect();
        let mut closed = 0usize;
        for key in keys {
            if let Some((_, subscribers)) = self.inner.subscriptions.remove(&key) {
                if let Some(channel) = subscribers.channel {
                    channel.close();
                    closed += 1;
                }
            }
        }

        self.inner.entries.clear();
        self.inner.in_flight.clear();
        debug!(kind = S::KIND, channels = closed, "cache shut down");
    }
}

impl<S: Source> Inner<S> {
    fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn refresh_in_background(self: &Arc<Self>, key: &S::Key) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        Self::launch_detached(self, key, FetchMode::Coalesce);
    }

    /// Launch a fetch nobody awaits. Without a runtime nothing would drive it,
    /// so the key is left untouched.
    fn launch_detached(this: &Arc<Self>, key: &S::Key, mode: FetchMode) {
        if tokio::runtime::Handle::try_current().is_err() {
            warn!(kind = S::KIND, key = %key, "no tokio runtime, background fetch skipped");
            return;
        }
        let _ = Self::launch(this, key, mode);
    }

    /// Start or join a fetch for `key` and drive it on the runtime.
    fn launch(this: &Arc<Self>, key: &S::Key, mode: FetchMode) -> SharedFetch<S::Value> {
        let (future, floor) = match this.in_flight.entry(key.clone()) {
            Entry::Occupied(mut occupied) => match mode {
                FetchMode::Coalesce => return occupied.get().future.clone(),
                FetchMode::Follow => {
                    occupied.get_mut().rerun = true;
                    return occupied.get().future.clone();
                }
                FetchMode::Supersede => {
                    let (seq, future) = Self::build(this, key);
                    let previous = occupied.insert(InFlight {
                        seq,
                        future: future.clone(),
                        rerun: false,
                    });
                    (future, previous.seq)
                }
            },
            Entry::Vacant(vacant) => {
                let (seq, future) = Self::build(this, key);
                vacant.insert(InFlight {
                    seq,
                    future: future.clone(),
                    rerun: false,
                });
                (future, 0)
            }
        };

        {
            let mut entry = this
                .entries
                .entry(key.clone())
                .or_insert_with(CacheEntry::empty);
            entry.loading = true;
            entry.seq = entry.seq.max(floor);
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(future.clone());
            }
            Err(_) => {
                debug!(kind = S::KIND, key = %key, "no runtime, fetch runs in the caller");
            }
        }
        future
    }

    fn build(this: &Arc<Self>, key: &S::Key) -> (u64, SharedFetch<S::Value>) {
        let seq = this.next_seq();
        let inner = Arc::clone(this);
        let key = key.clone();

        let future = async move {
            let (result, rerun) = inner.run_fetch(&key, seq).await;
            if rerun && !inner.closed.load(Ordering::SeqCst) {
                debug!(kind = S::KIND, key = %key, "trailing refetch");
                Self::launch_detached(&inner, &key, FetchMode::Coalesce);
            }
            result
        }
        .boxed()
        .shared();

        (seq, future)
    }

    async fn run_fetch(&self, key: &S::Key, seq: u64) -> (Result<S::Value, CacheError>, bool) {
        debug!(kind = S::KIND, key = %key, seq, "fetching");
        let result = self
            .source
            .load(self.gateway.as_ref(), key)
            .await
            .map(|value| self.source.settle(value));

        let rerun = self
            .in_flight
            .remove_if(key, |_, f| f.seq == seq)
            .is_some_and(|(_, f)| f.rerun);

        if self.closed.load(Ordering::SeqCst) {
            return (result, false);
        }

        let outcome = match result {
            Ok(value) => Ok(self.apply(key, value, seq)),
            Err(e) => {
                warn!(kind = S::KIND, key = %key, error = %e, "fetch failed, keeping cached value");
                let loading = self.in_flight.contains_key(key);
                if let Some(mut entry) = self.entries.get_mut(key) {
                    entry.loading = loading;
                }
                Err(e)
            }
        };
        (outcome, rerun)
    }

    /// Store a fetch result unless something newer is already cached.
    fn apply(&self, key: &S::Key, value: S::Value, seq: u64) -> S::Value {
        let loading = self.in_flight.contains_key(key);
        let applied = {
            let mut entry = self
                .entries
                .entry(key.clone())
                .or_insert_with(CacheEntry::empty);
            entry.loading = loading;
            if seq > entry.seq {
                entry.data = value;
                entry.fetched_at = Some(Instant::now());
                entry.seq = seq;
                Ok(entry.data.clone())
            } else {
                Err((entry.seq, entry.data.clone()))
            }
        };

        match applied {
            Ok(data) => {
                debug!(kind = S::KIND, key = %key, seq, "cached");
                self.notify(key, &data);
                data
            }
            Err((current, data)) => {
                debug!(kind = S::KIND, key = %key, seq, current, "discarding out-of-order result");
                data
            }
        }
    }

    /// Call every subscriber of `key`. No map guard is held during callbacks.
    fn notify(&self, key: &S::Key, value: &S::Value) {
        let callbacks: Vec<Callback<S::Value>> = match self.subscriptions.get(key) {
            Some(subscribers) => subscribers
                .callbacks
                .iter()
                .map(|(_, cb)| Arc::clone(cb))
                .collect(),
            None => return,
        };

        trace!(kind = S::KIND, key = %key, subscribers = callbacks.len(), "notifying");
        for callback in callbacks {
            callback(value);
        }
    }

    fn release(&self, key: &S::Key, id: u64) {
        let channel = match self.subscriptions.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                occupied.get_mut().callbacks.retain(|(i, _)| *i != id);
                if occupied.get().callbacks.is_empty() {
                    occupied.remove().channel
                } else {
                    None
                }
            }
            Entry::Vacant(_) => None,
        };
        debug!(kind = S::KIND, key = %key, subscriber = id, "unsubscribed");

        if let Some(channel) = channel {
            debug!(kind = S::KIND, key = %key, "closing realtime channel");
            channel.close();
        }
    }
}

/// Live registration of a subscriber callback.
///
/// Released exactly once, by [`Subscription::unsubscribe`] or on drop.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new(release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    pub fn unsubscribe(mut self) {
        self.run_release();
    }

    fn run_release(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.release.is_some())
            .finish()
    }
}
