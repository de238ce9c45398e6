//! Store-scoped change notifications.

use serde_json::Value;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::trace;

use super::scope::Scope;

const CHANNEL_CAPACITY: usize = 64;

/// Records of one entity type that changed inside an observed scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
  pub entity_type: String,
  pub ids: Vec<String>,
}

/// A committed mutation, with the values before and after the save.
#[derive(Debug, Clone)]
pub(crate) struct ChangedRecord {
  pub entity_type: String,
  pub id: String,
  pub before: Option<Value>,
  pub after: Option<Value>,
}

impl ChangedRecord {
  fn touches(&self, scope: &Scope) -> bool {
    self.before.as_ref().is_some_and(|v| scope.matches(v))
      || self.after.as_ref().is_some_and(|v| scope.matches(v))
  }
}

struct Registration {
  entity_type: String,
  scope: Scope,
  sender: broadcast::Sender<Change>,
}

/// Observer registry owned by one [`Database`](super::Database).
///
/// One channel per distinct (entity type, scope) pair: observing the same
/// pair twice shares the channel, so a change is sent once per receiver.
#[derive(Default)]
pub struct Observers {
  registrations: Mutex<Vec<Registration>>,
}

impl Observers {
  pub fn subscribe(&self, entity_type: &str, scope: &Scope) -> broadcast::Receiver<Change> {
    let mut registrations = self
      .registrations
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());

    if let Some(existing) = registrations
      .iter()
      .find(|r| r.entity_type == entity_type && r.scope == *scope)
    {
      return existing.sender.subscribe();
    }

    let (sender, receiver) = broadcast::channel(CHANNEL_CAPACITY);
    registrations.push(Registration {
      entity_type: entity_type.to_string(),
      scope: scope.clone(),
      sender,
    });
    receiver
  }

  /// Number of live (entity type, scope) registrations.
  pub fn len(&self) -> usize {
    self
      .registrations
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
      .iter()
      .filter(|r| r.sender.receiver_count() > 0)
      .count()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Fan out committed changes. Never blocks on receivers.
  pub(crate) fn notify(&self, changes: &[ChangedRecord]) {
    if changes.is_empty() {
      return;
    }

    let mut registrations = self
      .registrations
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    registrations.retain(|r| r.sender.receiver_count() > 0);

    for registration in registrations.iter() {
      let ids: Vec<String> = changes
        .iter()
        .filter(|c| c.entity_type == registration.entity_type && c.touches(&registration.scope))
        .map(|c| c.id.clone())
        .collect();

      if ids.is_empty() {
        continue;
      }

      trace!(entity_type = %registration.entity_type, count = ids.len(), "notifying observers");
      // Receivers may have gone away between retain and send
      let _ = registration.sender.send(Change {
        entity_type: registration.entity_type.clone(),
        ids,
      });
    }
  }
}
