//! In-memory document store with realtime events and fault injection.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tally_appwrite::{
    AppwriteError, ChannelHandle, Collection, DocumentStore, EventHandler, Query, RealtimeEvent,
};

type Hook = Box<dyn FnOnce(&MemoryStore) + Send>;
type Handlers = Arc<Mutex<Vec<(u64, Collection, EventHandler)>>>;

#[derive(Default)]
struct State {
    docs: HashMap<Collection, Vec<Value>>,
    list_calls: HashMap<Collection, usize>,
    create_calls: HashMap<Collection, usize>,
    list_delays: HashMap<Collection, VecDeque<Duration>>,
    list_failures: HashMap<Collection, VecDeque<AppwriteError>>,
    update_failures: VecDeque<AppwriteError>,
    update_delays: VecDeque<Duration>,
    rejected: HashSet<(Collection, String)>,
    before_create: Option<Hook>,
}

/// A `DocumentStore` that keeps documents in memory.
///
/// Writes fire realtime events to subscribers after every lock is released.
/// Stores are unique per `(storeNumber, holiday)`.
#[allow(dead_code)]
pub struct MemoryStore {
    state: Mutex<State>,
    handlers: Handlers,
    next_handler: AtomicU64,
    next_id: AtomicU64,
}

#[allow(dead_code)]
impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::default()),
            handlers: Arc::new(Mutex::new(Vec::new())),
            next_handler: AtomicU64::new(0),
            next_id: AtomicU64::new(0),
        })
    }

    /// Insert a document directly, without events. Returns its id.
    pub fn insert(&self, collection: Collection, data: Value) -> String {
        let id = data
            .get("$id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| self.fresh_id());
        let doc = with_id(data, &id);
        self.state
            .lock()
            .unwrap()
            .docs
            .entry(collection)
            .or_default()
            .push(doc);
        id
    }

    /// Change one field in place, without events.
    pub fn set_field(&self, collection: Collection, id: &str, field: &str, value: Value) {
        let mut state = self.state.lock().unwrap();
        if let Some(doc) = state
            .docs
            .get_mut(&collection)
            .and_then(|docs| docs.iter_mut().find(|d| d["$id"] == id))
        {
            doc[field] = value;
        }
    }

    pub fn documents(&self, collection: Collection) -> Vec<Value> {
        self.state
            .lock()
            .unwrap()
            .docs
            .get(&collection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn document(&self, collection: Collection, id: &str) -> Option<Value> {
        self.documents(collection)
            .into_iter()
            .find(|d| d["$id"] == id)
    }

    pub fn list_calls(&self, collection: Collection) -> usize {
        self.state
            .lock()
            .unwrap()
            .list_calls
            .get(&collection)
            .copied()
            .unwrap_or(0)
    }

    pub fn create_calls(&self, collection: Collection) -> usize {
        self.state
            .lock()
            .unwrap()
            .create_calls
            .get(&collection)
            .copied()
            .unwrap_or(0)
    }

    pub fn open_channels(&self, collection: Collection) -> usize {
        self.handlers
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, c, _)| *c == collection)
            .count()
    }

    /// Delay the next list of `collection`. The result is read before sleeping.
    pub fn push_list_delay(&self, collection: Collection, delay: Duration) {
        self.state
            .lock()
            .unwrap()
            .list_delays
            .entry(collection)
            .or_default()
            .push_back(delay);
    }

    pub fn fail_next_list(&self, collection: Collection, err: AppwriteError) {
        self.state
            .lock()
            .unwrap()
            .list_failures
            .entry(collection)
            .or_default()
            .push_back(err);
    }

    pub fn fail_next_update(&self, err: AppwriteError) {
        self.state.lock().unwrap().update_failures.push_back(err);
    }

    /// Delay the next update. The write is applied after sleeping.
    pub fn push_update_delay(&self, delay: Duration) {
        self.state.lock().unwrap().update_delays.push_back(delay);
    }

    /// Reject writes to `collection` that carry `attribute`, like a schema
    /// that has not been migrated yet.
    pub fn reject_attribute(&self, collection: Collection, attribute: &str) {
        self.state
            .lock()
            .unwrap()
            .rejected
            .insert((collection, attribute.to_string()));
    }

    /// Run `hook` at the start of the next create, before any checks.
    pub fn before_next_create(&self, hook: impl FnOnce(&MemoryStore) + Send + 'static) {
        self.state.lock().unwrap().before_create = Some(Box::new(hook));
    }

    fn fresh_id(&self) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        format!("doc{}-{}", n, &uuid::Uuid::new_v4().simple().to_string()[..8])
    }

    fn emit(&self, collection: Collection, action: &str, doc: &Value) {
        let handlers: Vec<EventHandler> = self
            .handlers
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, c, _)| *c == collection)
            .map(|(_, _, h)| Arc::clone(h))
            .collect();

        let channel = format!("databases.test.collections.{}.documents", collection);
        let event = RealtimeEvent {
            events: vec![format!(
                "{}.{}.{}",
                channel,
                doc["$id"].as_str().unwrap_or_default(),
                action
            )],
            channels: vec![channel],
            timestamp: Value::Null,
            payload: doc.clone(),
        };
        for handler in handlers {
            handler(event.clone());
        }
    }

    fn check_attributes(&self, collection: Collection, data: &Value) -> Result<(), AppwriteError> {
        let state = self.state.lock().unwrap();
        if let Some(fields) = data.as_object() {
            for key in fields.keys() {
                if state.rejected.contains(&(collection, key.clone())) {
                    return Err(AppwriteError::Api {
                        code: 400,
                        kind: "document_invalid_structure".to_string(),
                        message: format!(
                            "Invalid document structure: Unknown attribute: \"{}\"",
                            key
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn list_documents(
        &self,
        collection: Collection,
        queries: &[Query],
    ) -> Result<Vec<Value>, AppwriteError> {
        let (snapshot, delay, failure) = {
            let mut state = self.state.lock().unwrap();
            *state.list_calls.entry(collection).or_default() += 1;
            let docs = state.docs.get(&collection).cloned().unwrap_or_default();
            let delay = state
                .list_delays
                .get_mut(&collection)
                .and_then(VecDeque::pop_front);
            let failure = state
                .list_failures
                .get_mut(&collection)
                .and_then(VecDeque::pop_front);
            (evaluate(docs, queries), delay, failure)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(snapshot),
        }
    }

    async fn create_document(
        &self,
        collection: Collection,
        id: Option<&str>,
        data: Value,
    ) -> Result<Value, AppwriteError> {
        let hook = {
            let mut state = self.state.lock().unwrap();
            *state.create_calls.entry(collection).or_default() += 1;
            state.before_create.take()
        };
        if let Some(hook) = hook {
            hook(self);
        }

        self.check_attributes(collection, &data)?;

        let doc = {
            let mut state = self.state.lock().unwrap();
            let docs = state.docs.entry(collection).or_default();

            if collection == Collection::Stores {
                let duplicate = docs.iter().any(|d| {
                    d["storeNumber"] == data["storeNumber"]
                        && !d["holiday"].is_null()
                        && d["holiday"] == data["holiday"]
                });
                if duplicate {
                    return Err(AppwriteError::Conflict {
                        collection: collection.to_string(),
                        message: "Document with the requested ID already exists.".to_string(),
                    });
                }
            }

            let id = id.map(str::to_string).unwrap_or_else(|| self.fresh_id());
            let doc = with_id(data, &id);
            docs.push(doc.clone());
            doc
        };

        self.emit(collection, "create", &doc);
        Ok(doc)
    }

    async fn update_document(
        &self,
        collection: Collection,
        id: &str,
        data: Value,
    ) -> Result<Value, AppwriteError> {
        let delay = self.state.lock().unwrap().update_delays.pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.state.lock().unwrap().update_failures.pop_front() {
            return Err(err);
        }
        self.check_attributes(collection, &data)?;

        let doc = {
            let mut state = self.state.lock().unwrap();
            let doc = state
                .docs
                .get_mut(&collection)
                .and_then(|docs| docs.iter_mut().find(|d| d["$id"] == id))
                .ok_or_else(|| AppwriteError::NotFound {
                    collection: collection.to_string(),
                    id: id.to_string(),
                })?;
            if let (Some(target), Some(fields)) = (doc.as_object_mut(), data.as_object()) {
                for (k, v) in fields {
                    target.insert(k.clone(), v.clone());
                }
            }
            doc.clone()
        };

        self.emit(collection, "update", &doc);
        Ok(doc)
    }

    async fn delete_document(&self, collection: Collection, id: &str) -> Result<(), AppwriteError> {
        let doc = {
            let mut state = self.state.lock().unwrap();
            let docs = state.docs.entry(collection).or_default();
            let index = docs
                .iter()
                .position(|d| d["$id"] == id)
                .ok_or_else(|| AppwriteError::NotFound {
                    collection: collection.to_string(),
                    id: id.to_string(),
                })?;
            docs.remove(index)
        };

        self.emit(collection, "delete", &doc);
        Ok(())
    }

    fn subscribe(&self, collection: Collection, handler: EventHandler) -> ChannelHandle {
        let id = self.next_handler.fetch_add(1, Ordering::SeqCst);
        self.handlers
            .lock()
            .unwrap()
            .push((id, collection, handler));

        let handlers = Arc::clone(&self.handlers);
        ChannelHandle::new(move || {
            handlers.lock().unwrap().retain(|(i, _, _)| *i != id);
        })
    }
}

fn with_id(data: Value, id: &str) -> Value {
    let mut fields = match data {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    fields.insert("$id".to_string(), json!(id));
    Value::Object(fields)
}

fn compare(a: &Value, b: &Value) -> CmpOrdering {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(CmpOrdering::Equal),
        _ => a.as_str().unwrap_or("").cmp(b.as_str().unwrap_or("")),
    }
}

/// Apply filters, ordering and paging the way the server does.
fn evaluate(mut docs: Vec<Value>, queries: &[Query]) -> Vec<Value> {
    let mut offset = 0usize;
    let mut limit = 25usize;

    for query in queries {
        match query {
            Query::Equal { attribute, values } => {
                docs.retain(|d| values.contains(&d[attribute.as_str()]));
            }
            Query::OrderAsc { attribute } => {
                docs.sort_by(|a, b| compare(&a[attribute.as_str()], &b[attribute.as_str()]));
            }
            Query::OrderDesc { attribute } => {
                docs.sort_by(|a, b| compare(&b[attribute.as_str()], &a[attribute.as_str()]));
            }
            Query::Limit { values } => limit = values[0] as usize,
            Query::Offset { values } => offset = values[0] as usize,
        }
    }

    docs.into_iter().skip(offset).take(limit).collect()
}
