//! In-process [`FirestoreApi`] used by the unit tests

use super::client::{FirestoreApi, StoredDocument, Write, MAX_BATCH_WRITES};
use super::value::{Fields, FirestoreValue};
use crate::descriptor::BackendKind;
use crate::error::{AdapterError, AdapterResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Default)]
pub struct MemoryFirestore {
    collections: Mutex<BTreeMap<String, BTreeMap<String, Fields>>>,
    /// Queries against these collections fail with an API error
    unreadable: Mutex<HashSet<String>>,
    next_id: AtomicUsize,
    commits: AtomicUsize,
}

impl MemoryFirestore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn make_unreadable(&self, collection: &str) {
        self.unreadable.lock().insert(collection.to_string());
    }

    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn document(&self, collection: &str, id: &str) -> Option<Fields> {
        self.collections
            .lock()
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned()
    }

    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .lock()
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    fn put(&self, collection: &str, id: &str, fields: Fields) {
        self.collections
            .lock()
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), fields);
    }

    fn patch(
        &self,
        collection: &str,
        id: &str,
        fields: &Fields,
        mask: &[String],
    ) -> Option<Fields> {
        let mut collections = self.collections.lock();
        let document = collections.get_mut(collection)?.get_mut(id)?;
        for path in mask {
            match fields.get(path) {
                Some(value) => document.insert(path.clone(), value.clone()),
                None => document.remove(path),
            };
        }
        Some(document.clone())
    }
}

#[async_trait]
impl FirestoreApi for MemoryFirestore {
    async fn ping(&self) -> AdapterResult<()> {
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> AdapterResult<Option<StoredDocument>> {
        Ok(self.document(collection, id).map(|fields| StoredDocument {
            id: id.to_string(),
            fields,
        }))
    }

    async fn create(
        &self,
        collection: &str,
        id: Option<&str>,
        fields: Fields,
    ) -> AdapterResult<StoredDocument> {
        let id = match id {
            Some(id) => id.to_string(),
            None => format!("auto{:016}", self.next_id.fetch_add(1, Ordering::SeqCst)),
        };
        self.put(collection, &id, fields.clone());
        Ok(StoredDocument { id, fields })
    }

    async fn set(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
        merge: bool,
    ) -> AdapterResult<()> {
        if merge {
            let mut existing = self.document(collection, id).unwrap_or_default();
            existing.extend(fields);
            self.put(collection, id, existing);
        } else {
            self.put(collection, id, fields);
        }
        Ok(())
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
        mask: &[String],
    ) -> AdapterResult<Option<StoredDocument>> {
        Ok(self
            .patch(collection, id, &fields, mask)
            .map(|fields| StoredDocument {
                id: id.to_string(),
                fields,
            }))
    }

    async fn delete(&self, collection: &str, id: &str) -> AdapterResult<()> {
        if let Some(docs) = self.collections.lock().get_mut(collection) {
            docs.remove(id);
        }
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        filters: &[(String, FirestoreValue)],
        limit: Option<i64>,
    ) -> AdapterResult<Vec<StoredDocument>> {
        if self.unreadable.lock().contains(collection) {
            return Err(AdapterError::Api {
                backend: BackendKind::Firebase,
                status: 403,
                message: "Missing or insufficient permissions.".to_string(),
            });
        }
        let collections = self.collections.lock();
        let limit = limit.map_or(usize::MAX, |n| n.max(0) as usize);
        Ok(collections
            .get(collection)
            .into_iter()
            .flat_map(|docs| docs.iter())
            .filter(|(_, fields)| {
                filters
                    .iter()
                    .all(|(field, value)| fields.get(field) == Some(value))
            })
            .take(limit)
            .map(|(id, fields)| StoredDocument {
                id: id.clone(),
                fields: fields.clone(),
            })
            .collect())
    }

    async fn commit(&self, writes: &[Write]) -> AdapterResult<()> {
        assert!(writes.len() <= MAX_BATCH_WRITES, "commit over the batch limit");
        self.commits.fetch_add(1, Ordering::SeqCst);
        for write in writes {
            match write {
                Write::Set {
                    collection,
                    id,
                    fields,
                } => self.put(collection, id, fields.clone()),
                Write::Update {
                    collection,
                    id,
                    fields,
                    mask,
                } => {
                    self.patch(collection, id, fields, mask);
                }
                Write::Delete { collection, id } => {
                    if let Some(docs) = self.collections.lock().get_mut(collection) {
                        docs.remove(id);
                    }
                }
            }
        }
        Ok(())
    }
}
