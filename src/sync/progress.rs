//! Download progress of a sync run.

use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SyncProgress {
  #[default]
  Idle,
  Loading {
    pages: usize,
    items: usize,
  },
  Error(String),
  Downloaded {
    pages: usize,
    items: usize,
    deleted: usize,
  },
}

impl SyncProgress {
  pub fn is_finished(&self) -> bool {
    matches!(self, SyncProgress::Error(_) | SyncProgress::Downloaded { .. })
  }
}

/// Publishes [`SyncProgress`] updates to any number of watchers.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
  tx: Arc<watch::Sender<SyncProgress>>,
}

impl ProgressReporter {
  pub fn new() -> (Self, watch::Receiver<SyncProgress>) {
    let (tx, rx) = watch::channel(SyncProgress::Idle);
    (Self { tx: Arc::new(tx) }, rx)
  }

  pub fn subscribe(&self) -> watch::Receiver<SyncProgress> {
    self.tx.subscribe()
  }

  pub fn current(&self) -> SyncProgress {
    self.tx.borrow().clone()
  }

  pub fn loading(&self, pages: usize, items: usize) {
    self.tx.send_replace(SyncProgress::Loading { pages, items });
  }

  pub fn failed(&self, message: impl Into<String>) {
    self.tx.send_replace(SyncProgress::Error(message.into()));
  }

  pub fn downloaded(&self, pages: usize, items: usize, deleted: usize) {
    self.tx.send_replace(SyncProgress::Downloaded { pages, items, deleted });
  }
}
