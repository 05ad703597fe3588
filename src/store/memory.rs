use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Duration;
use dashmap::DashMap;
use itertools::Itertools;
use tracing::instrument;

use super::*;
use crate::time::{Clock, SystemClock};

/// The five store operations, used to aim injected faults and to count calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Get,
    List,
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone)]
struct Fault {
    operation: Operation,
    code: u16,
    message: String,
}

#[derive(Debug, Clone)]
struct Stored {
    document: Document,
    acl: Acl,
}

#[derive(Debug)]
struct Inner {
    collections: DashMap<String, HashMap<String, Stored>>,
    faults: Mutex<Vec<Fault>>,
    calls: DashMap<Operation, usize>,
    last_created: Mutex<Option<Timestamp>>,
    clock: Arc<dyn Clock>,
}

/// An in-process [DocumentStore].
///
/// Every call yields to the scheduler once before touching data, so concurrent callers
/// interleave at store calls the same way they do against a remote store. Creation times are
/// strictly increasing, which keeps `created_at` ordering free of ties.
///
/// Faults can be queued per operation with [MemoryStore::fail_next]; the next matching call
/// fails with the given code instead of running.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let inner = Inner {
            collections: DashMap::new(),
            faults: Mutex::new(Vec::new()),
            calls: DashMap::new(),
            last_created: Mutex::new(None),
            clock,
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    /// Makes the next `operation` call fail with `code`.
    pub fn fail_next(&self, operation: Operation, code: u16, message: impl Into<String>) {
        lock(&self.inner.faults).push(Fault {
            operation,
            code,
            message: message.into(),
        });
    }

    /// Number of `operation` calls made so far, failed ones included.
    pub fn calls(&self, operation: Operation) -> usize {
        self.inner.calls.get(&operation).map_or(0, |count| *count)
    }

    pub fn len(&self, collection: &str) -> usize {
        self.inner
            .collections
            .get(collection)
            .map_or(0, |documents| documents.len())
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    pub fn acl(&self, collection: &str, id: &str) -> Option<Acl> {
        let documents = self.inner.collections.get(collection)?;
        documents.get(id).map(|stored| stored.acl.clone())
    }

    async fn enter(&self, operation: Operation) -> Result<(), StoreError> {
        tokio::task::yield_now().await;

        *self.inner.calls.entry(operation).or_insert(0) += 1;

        let mut faults = lock(&self.inner.faults);
        if let Some(index) = faults.iter().position(|fault| fault.operation == operation) {
            let fault = faults.remove(index);
            tracing::debug!(?operation, code = fault.code, "injected store fault");
            return Err(StoreError::new(fault.code, fault.message));
        }

        Ok(())
    }

    fn next_creation_time(&self) -> Timestamp {
        let mut last = lock(&self.inner.last_created);
        let mut now = self.inner.clock.now();
        if let Some(previous) = *last {
            if now <= previous {
                now = previous + Duration::microseconds(1);
            }
        }
        *last = Some(now);
        now
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for MemoryStore {
    #[instrument(skip(self))]
    async fn get(&self, collection: &str, id: &str) -> Result<Document, StoreError> {
        self.enter(Operation::Get).await?;

        self.inner
            .collections
            .get(collection)
            .and_then(|documents| documents.get(id).map(|stored| stored.document.clone()))
            .ok_or_else(|| not_found(collection, id))
    }

    #[instrument(skip(self))]
    async fn list(
        &self, collection: &str, filters: &[Filter], limit: u32,
    ) -> Result<Page, StoreError> {
        self.enter(Operation::List).await?;

        let query = Query::parse(filters)?;
        let Some(documents) = self.inner.collections.get(collection) else {
            return Ok(Page::default());
        };

        let cursor = match &query.cursor {
            Some(id) => {
                let stored = documents.get(id).ok_or_else(|| {
                    StoreError::new(
                        code::BAD_REQUEST,
                        format!("cursor document `{id}` does not exist in `{collection}`"),
                    )
                })?;
                Some(stored.document.clone())
            }
            None => None,
        };

        let matching = documents
            .values()
            .map(|stored| &stored.document)
            .filter(|document| query.matches(document))
            .sorted_by(|a, b| query.compare(a, b))
            .collect_vec();

        let total = matching.len() as u64;
        let documents = matching
            .into_iter()
            .filter(|document| {
                cursor
                    .as_ref()
                    .map_or(true, |cursor| query.compare(document, cursor).is_gt())
            })
            .take(limit as usize)
            .map(|document| query.project(document.clone()))
            .collect();

        Ok(Page { documents, total })
    }

    #[instrument(skip(self, fields, acl))]
    async fn create(
        &self, collection: &str, id: DocumentId, fields: Fields, acl: Acl,
    ) -> Result<Document, StoreError> {
        self.enter(Operation::Create).await?;

        let id = id.resolve();
        let mut documents = self.inner.collections.entry(collection.to_string()).or_default();
        if documents.contains_key(&id) {
            return Err(StoreError::new(
                code::CONFLICT,
                format!("document `{id}` already exists in `{collection}`"),
            ));
        }

        let document = Document {
            id: id.clone(),
            created_at: self.next_creation_time(),
            fields,
        };
        documents.insert(
            id,
            Stored {
                document: document.clone(),
                acl,
            },
        );

        Ok(document)
    }

    #[instrument(skip(self, fields))]
    async fn update(
        &self, collection: &str, id: &str, fields: Fields,
    ) -> Result<Document, StoreError> {
        self.enter(Operation::Update).await?;

        let mut documents = self
            .inner
            .collections
            .get_mut(collection)
            .ok_or_else(|| not_found(collection, id))?;
        let stored = documents
            .get_mut(id)
            .ok_or_else(|| not_found(collection, id))?;

        stored.document.fields.extend(fields);
        Ok(stored.document.clone())
    }

    #[instrument(skip(self))]
    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        self.enter(Operation::Delete).await?;

        self.inner
            .collections
            .get_mut(collection)
            .and_then(|mut documents| documents.remove(id))
            .map(|_| ())
            .ok_or_else(|| not_found(collection, id))
    }
}

#[track_caller]
fn not_found(collection: &str, id: &str) -> StoreError {
    StoreError::new(
        code::NOT_FOUND,
        format!("document `{id}` does not exist in `{collection}`"),
    )
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
