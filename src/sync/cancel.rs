//! Cooperative cancellation for sync runs.

use tokio::sync::watch;

/// Owner side: call [`cancel`](CancelHandle::cancel) to stop a run.
#[derive(Debug)]
pub struct CancelHandle {
  tx: watch::Sender<bool>,
}

/// Run side: checked before every page request.
#[derive(Debug, Clone)]
pub struct CancelToken {
  rx: watch::Receiver<bool>,
}

impl CancelHandle {
  pub fn new() -> Self {
    let (tx, _) = watch::channel(false);
    Self { tx }
  }

  pub fn token(&self) -> CancelToken {
    CancelToken {
      rx: self.tx.subscribe(),
    }
  }

  pub fn cancel(&self) {
    self.tx.send_replace(true);
  }
}

impl Default for CancelHandle {
  fn default() -> Self {
    Self::new()
  }
}

impl CancelToken {
  /// A token nobody can cancel.
  pub fn never() -> Self {
    let (_, rx) = watch::channel(false);
    Self { rx }
  }

  pub fn is_cancelled(&self) -> bool {
    *self.rx.borrow()
  }

  /// Resolves once cancelled. Pends forever if the handle is dropped first.
  pub async fn cancelled(&self) {
    let mut rx = self.rx.clone();
    loop {
      if *rx.borrow_and_update() {
        return;
      }
      if rx.changed().await.is_err() {
        std::future::pending::<()>().await;
      }
    }
  }
}
