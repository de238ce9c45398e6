//! Confined handle to the local store.

use chrono::{DateTime, Utc};
use futures::stream::{self, Stream};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::Mutex;

use super::observer::{Change, ChangedRecord, Observers};
use super::scope::{Predicate, Scope};
use super::storage::{CacheEntry, RecordStore, SqliteStorage, WriteBatch, WriteOp};
use super::traits::Record;
use crate::error::StoreError;

/// Shared, cloneable handle to one store instance.
///
/// Write tasks run one at a time behind an async gate, and each one is saved
/// as a single batch. Observers registered here only hear about this store.
#[derive(Clone)]
pub struct Database {
  storage: Arc<dyn RecordStore>,
  write_gate: Arc<Mutex<()>>,
  observers: Arc<Observers>,
}

impl Database {
  pub fn new(storage: impl RecordStore + 'static) -> Self {
    Self::from_storage(Arc::new(storage))
  }

  pub fn from_storage(storage: Arc<dyn RecordStore>) -> Self {
    Self {
      storage,
      write_gate: Arc::new(Mutex::new(())),
      observers: Arc::new(Observers::default()),
    }
  }

  /// In-memory SQLite database.
  pub fn in_memory() -> Result<Self, StoreError> {
    Ok(Self::new(SqliteStorage::open_in_memory()?))
  }

  /// Records of `T` in `scope`, sorted by the scope's order.
  pub fn fetch<T: Record>(&self, scope: &Scope) -> Result<Vec<T>, StoreError> {
    let records = self.storage.fetch(T::entity_type(), &scope.predicate)?;
    decode_all(sorted_values(scope, records))
  }

  /// Records of `T` in `scope`, grouped by the scope's `section_by` key.
  pub fn fetch_sections<T: Record>(&self, scope: &Scope) -> Result<Vec<(Value, Vec<T>)>, StoreError> {
    let records = self.storage.fetch(T::entity_type(), &scope.predicate)?;

    let mut sections: Vec<(Value, Vec<T>)> = Vec::new();
    for record in sorted_values(scope, records) {
      let key = scope.section_of(&record);
      let record = decode::<T>(record)?;
      match sections.last_mut() {
        Some((last, items)) if *last == key => items.push(record),
        _ => sections.push((key, vec![record])),
      }
    }
    Ok(sections)
  }

  pub fn get<T: Record>(&self, id: &str) -> Result<Option<T>, StoreError> {
    self
      .storage
      .get(T::entity_type(), id)?
      .map(decode::<T>)
      .transpose()
  }

  pub fn cache_entry(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
    self.storage.cache_entry(key)
  }

  /// Forget every TTL stamp so the next fetch of each key goes to the network.
  pub fn clear_cache(&self) -> Result<usize, StoreError> {
    self.storage.clear_cache_entries()
  }

  /// Run a write task on the store's confined context and save it.
  ///
  /// The closure's mutations are committed as one batch only if it returns
  /// `Ok`; on error nothing is written. Observers are notified after the save.
  pub async fn perform_write<R, F>(&self, task: F) -> Result<R, StoreError>
  where
    F: FnOnce(&mut WriteContext<'_>) -> Result<R, StoreError> + Send,
    R: Send,
  {
    let _gate = self.write_gate.lock().await;

    let mut ctx = WriteContext::new(self.storage.as_ref());
    let result = task(&mut ctx)?;
    let (batch, changes) = ctx.into_batch();

    self.storage.apply(&batch)?;
    self.observers.notify(&changes);
    Ok(result)
  }

  /// Subscribe to changes of `entity_type` records inside `scope`.
  pub fn observe(&self, entity_type: &str, scope: &Scope) -> broadcast::Receiver<Change> {
    self.observers.subscribe(entity_type, scope)
  }

  pub fn observers(&self) -> &Observers {
    &self.observers
  }

  /// Live query: yields the scope's contents now and after every change.
  ///
  /// The stream does not end on its own; drop it to stop observing.
  pub fn watch<T: Record>(
    &self,
    scope: Scope,
  ) -> impl Stream<Item = Result<Vec<T>, StoreError>> + Send + 'static {
    let receiver = self.observe(T::entity_type(), &scope);
    let db = self.clone();

    stream::unfold(
      (db, scope, receiver, true),
      |(db, scope, mut receiver, first)| async move {
        if !first {
          match receiver.recv().await {
            // A lagged receiver missed changes, re-reading covers them
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => return None,
          }
        }
        let records = db.fetch::<T>(&scope);
        Some((records, (db, scope, receiver, false)))
      },
    )
  }
}

fn sorted_values(scope: &Scope, mut records: Vec<(String, Value)>) -> Vec<Value> {
  records.sort_by(|a, b| scope.compare(&a.1, &b.1));
  records.into_iter().map(|(_, value)| value).collect()
}

fn decode<T: Record>(value: Value) -> Result<T, StoreError> {
  serde_json::from_value(value).map_err(|e| StoreError::serialization(T::entity_type(), e))
}

fn decode_all<T: Record>(values: Vec<Value>) -> Result<Vec<T>, StoreError> {
  values.into_iter().map(decode::<T>).collect()
}

fn encode<T: Record>(record: &T) -> Result<Value, StoreError> {
  serde_json::to_value(record).map_err(|e| StoreError::serialization(T::entity_type(), e))
}

type RecordKey = (String, String);

#[derive(Debug, Clone)]
enum Pending {
  Upsert(Value),
  Delete,
}

/// Mutation view handed to write tasks.
///
/// Reads see the committed store overlaid with this task's pending writes.
pub struct WriteContext<'a> {
  storage: &'a dyn RecordStore,
  pending: BTreeMap<RecordKey, Pending>,
  /// Committed value of every touched record, for change notifications
  before: HashMap<RecordKey, Option<Value>>,
  /// Upsert order per entity type
  upserted: Vec<RecordKey>,
  touches: Vec<(String, DateTime<Utc>)>,
}

impl<'a> WriteContext<'a> {
  fn new(storage: &'a dyn RecordStore) -> Self {
    Self {
      storage,
      pending: BTreeMap::new(),
      before: HashMap::new(),
      upserted: Vec::new(),
      touches: Vec::new(),
    }
  }

  fn get_raw(&self, entity_type: &str, id: &str) -> Result<Option<Value>, StoreError> {
    match self.pending.get(&(entity_type.to_string(), id.to_string())) {
      Some(Pending::Upsert(value)) => Ok(Some(value.clone())),
      Some(Pending::Delete) => Ok(None),
      None => self.storage.get(entity_type, id),
    }
  }

  fn remember_before(&mut self, key: &RecordKey) -> Result<(), StoreError> {
    if !self.before.contains_key(key) {
      let committed = self.storage.get(&key.0, &key.1)?;
      self.before.insert(key.clone(), committed);
    }
    Ok(())
  }

  pub fn get<T: Record>(&self, id: &str) -> Result<Option<T>, StoreError> {
    self.get_raw(T::entity_type(), id)?.map(decode::<T>).transpose()
  }

  /// Records of `T` in `scope`, including this task's pending writes.
  pub fn fetch<T: Record>(&self, scope: &Scope) -> Result<Vec<T>, StoreError> {
    let records = self.fetch_raw(T::entity_type(), &scope.predicate)?;
    decode_all(sorted_values(scope, records))
  }

  /// Ids of `entity_type` records matching `predicate`, pending writes included.
  pub fn ids_matching(&self, entity_type: &str, predicate: &Predicate) -> Result<Vec<String>, StoreError> {
    Ok(
      self
        .fetch_raw(entity_type, predicate)?
        .into_iter()
        .map(|(id, _)| id)
        .collect(),
    )
  }

  fn fetch_raw(&self, entity_type: &str, predicate: &Predicate) -> Result<Vec<(String, Value)>, StoreError> {
    let mut by_id: BTreeMap<String, Value> = self
      .storage
      .fetch(entity_type, predicate)?
      .into_iter()
      .collect();

    for ((kind, id), pending) in &self.pending {
      if kind != entity_type {
        continue;
      }
      match pending {
        Pending::Upsert(value) if predicate.matches(value) => {
          by_id.insert(id.clone(), value.clone());
        }
        _ => {
          by_id.remove(id);
        }
      }
    }

    Ok(by_id.into_iter().collect())
  }

  /// Insert or replace `record`, matched by id.
  pub fn upsert<T: Record>(&mut self, record: &T) -> Result<(), StoreError> {
    let key = (T::entity_type().to_string(), record.id());
    self.remember_before(&key)?;
    self.pending.insert(key.clone(), Pending::Upsert(encode(record)?));
    self.upserted.push(key);
    Ok(())
  }

  /// Look up a related record by id, creating it with `make` when absent.
  ///
  /// This is the only path a write task should use to touch records outside
  /// its own scope.
  pub fn find_or_insert<T: Record>(&mut self, id: &str, make: impl FnOnce() -> T) -> Result<T, StoreError> {
    if let Some(existing) = self.get::<T>(id)? {
      return Ok(existing);
    }
    let record = make();
    self.upsert(&record)?;
    Ok(record)
  }

  /// Delete one record. Returns whether it existed.
  pub fn delete<T: Record>(&mut self, id: &str) -> Result<bool, StoreError> {
    self.delete_raw(T::entity_type(), id)
  }

  pub(crate) fn delete_raw(&mut self, entity_type: &str, id: &str) -> Result<bool, StoreError> {
    if self.get_raw(entity_type, id)?.is_none() {
      return Ok(false);
    }
    let key = (entity_type.to_string(), id.to_string());
    self.remember_before(&key)?;
    self.pending.insert(key, Pending::Delete);
    Ok(true)
  }

  /// Delete every `entity_type` record in `scope`. Returns how many.
  pub fn delete_matching(&mut self, entity_type: &str, scope: &Scope) -> Result<usize, StoreError> {
    let ids = self.ids_matching(entity_type, &scope.predicate)?;
    for id in &ids {
      self.delete_raw(entity_type, id)?;
    }
    Ok(ids.len())
  }

  /// Record a successful fetch of `key` at `at`, saved with this batch.
  pub fn touch_cache(&mut self, key: &str, at: DateTime<Utc>) {
    self.touches.push((key.to_string(), at));
  }

  /// Ids of `entity_type` records upserted so far, in order, without repeats.
  pub fn upserted_ids(&self, entity_type: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    self
      .upserted
      .iter()
      .filter(|(kind, _)| kind == entity_type)
      .filter(|(_, id)| seen.insert(id.clone()))
      .map(|(_, id)| id.clone())
      .collect()
  }

  fn into_batch(self) -> (WriteBatch, Vec<ChangedRecord>) {
    let mut batch = WriteBatch::default();
    let mut changes = Vec::new();

    for ((entity_type, id), pending) in self.pending {
      let before = self
        .before
        .get(&(entity_type.clone(), id.clone()))
        .cloned()
        .flatten();
      let after = match &pending {
        Pending::Upsert(value) => Some(value.clone()),
        Pending::Delete => None,
      };

      match pending {
        Pending::Upsert(data) => batch.push(WriteOp::Upsert {
          entity_type: entity_type.clone(),
          id: id.clone(),
          data,
        }),
        // Deleting something that never got committed is a no-op
        Pending::Delete if before.is_none() => continue,
        Pending::Delete => batch.push(WriteOp::Delete {
          entity_type: entity_type.clone(),
          id: id.clone(),
        }),
      }

      if before != after {
        changes.push(ChangedRecord {
          entity_type,
          id,
          before,
          after,
        });
      }
    }

    for (key, at) in self.touches {
      batch.push(WriteOp::TouchCache { key, at });
    }

    (batch, changes)
  }
}
