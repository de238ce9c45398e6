//! Background sync runs with observable state.
//!
//! A `SyncTask<T>` owns the closure that starts a run (typically a call to
//! [`SyncEngine::get_entities`](super::SyncEngine::get_entities)) and the
//! spawned tokio task executing it.
//!
//! ```ignore
//! let engine = engine.clone();
//! let mut todos = SyncTask::new(move || {
//!     let (engine, session) = (engine.clone(), session.clone());
//!     async move {
//!         engine
//!             .get_entities(&session, &GetPlannables::todos("self"), FetchOptions::default())
//!             .await
//!     }
//! });
//!
//! todos.fetch();
//! // later, on every tick
//! if todos.poll() {
//!     redraw(todos.state());
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::SyncError;

/// State of a sync task
#[derive(Debug, Clone)]
pub enum TaskState<T> {
  /// Not started
  Idle,
  /// A run is in flight
  Loading,
  /// The last run completed
  Success(T),
  /// The last run failed
  Error(String),
}

impl<T> TaskState<T> {
  pub fn is_loading(&self) -> bool {
    matches!(self, TaskState::Loading)
  }

  pub fn is_success(&self) -> bool {
    matches!(self, TaskState::Success(_))
  }

  pub fn is_error(&self) -> bool {
    matches!(self, TaskState::Error(_))
  }

  pub fn data(&self) -> Option<&T> {
    match self {
      TaskState::Success(data) => Some(data),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&str> {
    match self {
      TaskState::Error(e) => Some(e),
      _ => None,
    }
  }
}

type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T, SyncError>> + Send>>;

type RunFn<T> = Box<dyn Fn() -> BoxFuture<T> + Send + Sync>;

/// Handle to a repeatable background sync run.
///
/// Aborting a run (through [`refetch`](SyncTask::refetch),
/// [`cancel`](SyncTask::cancel) or drop) stops further page requests. Pages
/// it already saved stay saved.
pub struct SyncTask<T> {
  state: TaskState<T>,
  run: RunFn<T>,
  receiver: Option<oneshot::Receiver<Result<T, SyncError>>>,
  handle: Option<JoinHandle<()>>,
  fetched_at: Option<Instant>,
  stale_time: Duration,
}

impl<T: Send + 'static> SyncTask<T> {
  pub fn new<F, Fut>(run: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, SyncError>> + Send + 'static,
  {
    Self {
      state: TaskState::Idle,
      run: Box::new(move || Box::pin(run())),
      receiver: None,
      handle: None,
      fetched_at: None,
      stale_time: Duration::from_secs(60),
    }
  }

  /// After this long a successful result reports [`is_stale`](SyncTask::is_stale).
  pub fn with_stale_time(mut self, duration: Duration) -> Self {
    self.stale_time = duration;
    self
  }

  pub fn state(&self) -> &TaskState<T> {
    &self.state
  }

  pub fn data(&self) -> Option<&T> {
    self.state.data()
  }

  pub fn is_loading(&self) -> bool {
    self.state.is_loading()
  }

  pub fn is_success(&self) -> bool {
    self.state.is_success()
  }

  pub fn is_error(&self) -> bool {
    self.state.is_error()
  }

  pub fn error(&self) -> Option<&str> {
    self.state.error()
  }

  pub fn is_stale(&self) -> bool {
    match &self.state {
      TaskState::Success(_) => self
        .fetched_at
        .map(|t| t.elapsed() > self.stale_time)
        .unwrap_or(true),
      _ => false,
    }
  }

  /// Start a run unless one is in flight.
  pub fn fetch(&mut self) {
    if self.state.is_loading() {
      return;
    }
    self.start();
  }

  /// Abort the in-flight run, if any, and start a new one.
  pub fn refetch(&mut self) {
    self.abort();
    self.start();
  }

  /// Abort the in-flight run and report it as cancelled.
  pub fn cancel(&mut self) {
    if self.abort() {
      self.state = TaskState::Error(SyncError::Cancelled.to_string());
    }
  }

  /// Collect the result of a finished run.
  ///
  /// Returns `true` if the state changed.
  pub fn poll(&mut self) -> bool {
    let receiver = match &mut self.receiver {
      Some(rx) => rx,
      None => return false,
    };

    match receiver.try_recv() {
      Ok(Ok(data)) => {
        self.state = TaskState::Success(data);
        self.fetched_at = Some(Instant::now());
        self.finish();
        true
      }
      Ok(Err(error)) => {
        self.state = TaskState::Error(error.to_string());
        self.finish();
        true
      }
      Err(oneshot::error::TryRecvError::Empty) => false,
      Err(oneshot::error::TryRecvError::Closed) => {
        // The run panicked or was aborted elsewhere
        self.state = TaskState::Error(SyncError::Cancelled.to_string());
        self.finish();
        true
      }
    }
  }

  /// Wait for the in-flight run and collect its result.
  pub async fn wait(&mut self) -> &TaskState<T> {
    if let Some(receiver) = self.receiver.as_mut() {
      self.state = match receiver.await {
        Ok(Ok(data)) => {
          self.fetched_at = Some(Instant::now());
          TaskState::Success(data)
        }
        Ok(Err(error)) => TaskState::Error(error.to_string()),
        Err(_) => TaskState::Error(SyncError::Cancelled.to_string()),
      };
      self.finish();
    }
    &self.state
  }

  fn start(&mut self) {
    let (tx, rx) = oneshot::channel();
    self.receiver = Some(rx);
    self.state = TaskState::Loading;

    let future = (self.run)();
    self.handle = Some(tokio::spawn(async move {
      // The receiver is gone when the task was aborted or dropped
      let _ = tx.send(future.await);
    }));
  }

  fn finish(&mut self) {
    self.receiver = None;
    self.handle = None;
  }

  fn abort(&mut self) -> bool {
    self.receiver = None;
    match self.handle.take() {
      Some(handle) => {
        handle.abort();
        true
      }
      None => false,
    }
  }
}

impl<T> Drop for SyncTask<T> {
  fn drop(&mut self) {
    if let Some(handle) = self.handle.take() {
      handle.abort();
    }
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for SyncTask<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SyncTask")
      .field("state", &self.state)
      .field("fetched_at", &self.fetched_at)
      .field("stale_time", &self.stale_time)
      .finish_non_exhaustive()
  }
}
