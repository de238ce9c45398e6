//! Fakes shared by the unit tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{StoreError, TransportError};
use crate::request::RequestDescriptor;
use crate::session::Session;
use crate::store::{CacheEntry, Predicate, Record, RecordStore, Scope, SqliteStorage, WriteBatch, WriteContext};
use crate::sync::{ReconcileMode, UseCase, DEFAULT_TTL};
use crate::transport::{HttpTransport, RawResponse, ResponseMeta, Transport};

pub const BASE_URL: &str = "https://lms.test/api/v1/";

pub fn session() -> Session {
  Session::new(BASE_URL, "self").unwrap()
}

#[derive(Debug, Clone)]
enum Scripted {
  Body { body: Value, next: Option<String> },
  Status(u16),
}

/// Transport answering from per-URL queues of canned responses.
///
/// URLs are keyed relative to [`BASE_URL`] (`"notes?page=2"`). The last
/// response of a queue is repeated for later calls.
#[derive(Default)]
pub struct ScriptedTransport {
  responses: Mutex<HashMap<String, VecDeque<Scripted>>>,
  calls: Mutex<Vec<String>>,
}

impl ScriptedTransport {
  pub fn new() -> Self {
    Self::default()
  }

  /// Queue a JSON body, with `next` as the `rel="next"` link.
  pub fn respond(&self, url: &str, body: Value, next: Option<&str>) {
    self.push(
      url,
      Scripted::Body {
        body,
        next: next.map(|n| format!("{}{}", BASE_URL, n)),
      },
    );
  }

  /// Queue a non-2xx status.
  pub fn fail(&self, url: &str, status: u16) {
    self.push(url, Scripted::Status(status));
  }

  fn push(&self, url: &str, scripted: Scripted) {
    self
      .responses
      .lock()
      .unwrap()
      .entry(url.to_string())
      .or_default()
      .push_back(scripted);
  }

  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self) -> usize {
    self.calls.lock().unwrap().len()
  }
}

#[async_trait]
impl Transport for ScriptedTransport {
  async fn send(&self, request: &RequestDescriptor, session: &Session) -> Result<RawResponse, TransportError> {
    let url = HttpTransport::resolve_url(request, session)?;
    let key = url
      .as_str()
      .strip_prefix(BASE_URL)
      .unwrap_or(url.as_str())
      .to_string();
    self.calls.lock().unwrap().push(key.clone());

    let scripted = {
      let mut responses = self.responses.lock().unwrap();
      let queue = responses.get_mut(&key);
      match queue {
        Some(queue) if queue.len() > 1 => queue.pop_front(),
        Some(queue) => queue.front().cloned(),
        None => None,
      }
    };

    match scripted {
      Some(Scripted::Body { body, next }) => {
        let mut meta = ResponseMeta::ok();
        if let Some(next) = next {
          meta = meta.with_next(next);
        }
        Ok(RawResponse {
          meta,
          body: serde_json::to_vec(&body).unwrap(),
        })
      }
      Some(Scripted::Status(status)) => Err(TransportError::status(status, "scripted failure")),
      None => Err(TransportError::status(404, format!("no script for {}", key))),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
  pub id: String,
  pub owner: String,
  pub text: String,
}

impl Record for Note {
  fn id(&self) -> String {
    self.id.clone()
  }

  fn entity_type() -> &'static str {
    "note"
  }
}

#[derive(Debug, Deserialize)]
pub struct RemoteNote {
  pub id: String,
  #[serde(default)]
  pub text: String,
}

/// Notes of one owner (`owners/:owner/notes`) or all notes (`notes`).
pub struct GetNotes {
  pub owner: Option<String>,
  pub mode: ReconcileMode,
  pub keyed: bool,
  pub ttl: Duration,
}

impl GetNotes {
  pub fn all() -> Self {
    Self {
      owner: None,
      mode: ReconcileMode::Collection,
      keyed: true,
      ttl: DEFAULT_TTL,
    }
  }

  pub fn owned_by(owner: &str) -> Self {
    Self {
      owner: Some(owner.to_string()),
      ..Self::all()
    }
  }

  pub fn with_mode(mut self, mode: ReconcileMode) -> Self {
    self.mode = mode;
    self
  }

  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = ttl;
    self
  }
}

impl UseCase for GetNotes {
  type Model = Note;
  type Remote = RemoteNote;

  fn request(&self) -> RequestDescriptor {
    match &self.owner {
      Some(owner) => RequestDescriptor::get(format!("owners/{}/notes", owner)),
      None => RequestDescriptor::get("notes"),
    }
  }

  fn scope(&self) -> Scope {
    match &self.owner {
      Some(owner) => Scope::where_eq("owner", owner.as_str(), "id"),
      None => Scope::all("id"),
    }
  }

  fn cache_key(&self) -> Option<String> {
    self.keyed.then(|| match &self.owner {
      Some(owner) => format!("notes-{}", owner),
      None => "notes".to_string(),
    })
  }

  fn ttl(&self) -> Duration {
    self.ttl
  }

  fn mode(&self) -> ReconcileMode {
    self.mode
  }

  fn write(&self, item: RemoteNote, ctx: &mut WriteContext<'_>) -> Result<(), StoreError> {
    ctx.upsert(&Note {
      id: item.id,
      owner: self.owner.clone().unwrap_or_default(),
      text: item.text,
    })
  }
}

/// SQLite storage whose saves start failing after a number of successes.
pub struct FlakyStore {
  inner: SqliteStorage,
  applies_left: AtomicUsize,
}

impl FlakyStore {
  pub fn new() -> Self {
    Self {
      inner: SqliteStorage::open_in_memory().unwrap(),
      applies_left: AtomicUsize::new(usize::MAX),
    }
  }

  pub fn fail_after(&self, applies: usize) {
    self.applies_left.store(applies, Ordering::SeqCst);
  }
}

impl RecordStore for FlakyStore {
  fn get(&self, entity_type: &str, id: &str) -> Result<Option<Value>, StoreError> {
    self.inner.get(entity_type, id)
  }

  fn fetch(&self, entity_type: &str, predicate: &Predicate) -> Result<Vec<(String, Value)>, StoreError> {
    self.inner.fetch(entity_type, predicate)
  }

  fn apply(&self, batch: &WriteBatch) -> Result<(), StoreError> {
    let allowed = self
      .applies_left
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
      .is_ok();
    if !allowed {
      return Err(StoreError::Backend("disk full".into()));
    }
    self.inner.apply(batch)
  }

  fn cache_entry(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
    self.inner.cache_entry(key)
  }

  fn clear_cache_entries(&self) -> Result<usize, StoreError> {
    self.inner.clear_cache_entries()
  }
}
