//! Orchestration of one sync run: gate, paginate, reconcile, stamp.

use chrono::Utc;
use futures::{Stream, TryStreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::cancel::CancelToken;
use super::paginate::fetch_pages;
use super::progress::ProgressReporter;
use super::reconcile::Reconciler;
use super::ttl::TtlGate;
use super::use_case::UseCase;
use crate::error::{Result, StoreError};
use crate::session::Session;
use crate::store::{CacheResult, Database, Record};
use crate::transport::Transport;

/// Per-call knobs of [`SyncEngine::fetch`].
#[derive(Debug, Clone)]
pub struct FetchOptions {
  /// Ignore the TTL gate
  pub force: bool,
  /// Follow next-page cursors; when off only the first page is fetched
  pub load_all_pages: bool,
  pub cancel: Option<CancelToken>,
  pub progress: Option<ProgressReporter>,
}

impl Default for FetchOptions {
  fn default() -> Self {
    Self {
      force: false,
      load_all_pages: true,
      cancel: None,
      progress: None,
    }
  }
}

impl FetchOptions {
  pub fn forced() -> Self {
    Self {
      force: true,
      ..Self::default()
    }
  }

  pub fn first_page_only(mut self) -> Self {
    self.load_all_pages = false;
    self
  }

  pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
    self.cancel = Some(cancel);
    self
  }

  pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
    self.progress = Some(progress);
    self
  }
}

/// What a completed run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOutcome {
  pub pages: usize,
  pub items: usize,
  pub deleted: usize,
  /// The network was not consulted (fresh TTL or offline mode)
  pub skipped: bool,
}

impl SyncOutcome {
  fn skipped() -> Self {
    Self {
      skipped: true,
      ..Self::default()
    }
  }
}

/// Runs use cases against a transport and one local database.
#[derive(Clone)]
pub struct SyncEngine {
  transport: Arc<dyn Transport>,
  db: Database,
  offline: bool,
  ttl: Option<Duration>,
}

impl SyncEngine {
  pub fn new(transport: Arc<dyn Transport>, db: Database) -> Self {
    Self {
      transport,
      db,
      offline: false,
      ttl: None,
    }
  }

  /// In offline mode nothing goes to the network; reads come from the store.
  pub fn with_offline_mode(mut self, offline: bool) -> Self {
    self.offline = offline;
    self
  }

  /// Use `ttl` for every use case instead of its own.
  pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
    self.ttl = ttl;
    self
  }

  pub fn is_offline(&self) -> bool {
    self.offline
  }

  pub fn database(&self) -> &Database {
    &self.db
  }

  /// Fetch every page of `use_case` and reconcile it into the store.
  ///
  /// Skipped when offline or when the use case's cache key is still fresh.
  /// On failure pages merged so far stay in the store, nothing is swept and
  /// the cache key is not stamped.
  pub async fn fetch<U: UseCase>(
    &self,
    session: &Session,
    use_case: &U,
    options: FetchOptions,
  ) -> Result<SyncOutcome> {
    let entity_type = U::Model::entity_type();

    if self.offline {
      debug!(entity_type, "offline, not fetching");
      return Ok(SyncOutcome::skipped());
    }

    if let Some(key) = use_case.cache_key() {
      let ttl = self.ttl.unwrap_or_else(|| use_case.ttl());
      if !TtlGate::new(&self.db).should_fetch(&key, ttl, options.force) {
        debug!(entity_type, key = %key, "cache fresh, skipping fetch");
        return Ok(SyncOutcome::skipped());
      }
    }

    let progress = options.progress.clone();
    if let Some(progress) = &progress {
      progress.loading(0, 0);
    }

    let result = self.run(session, use_case, &options).await;

    match &result {
      Ok(outcome) => {
        info!(
          entity_type,
          pages = outcome.pages,
          items = outcome.items,
          deleted = outcome.deleted,
          "sync complete"
        );
        if let Some(progress) = &progress {
          progress.downloaded(outcome.pages, outcome.items, outcome.deleted);
        }
      }
      Err(e) => {
        if e.is_cancelled() {
          info!(entity_type, "sync cancelled");
        } else {
          warn!(entity_type, error = %e, "sync failed");
        }
        if let Some(progress) = &progress {
          progress.failed(e.to_string());
        }
      }
    }

    result
  }

  async fn run<U: UseCase>(&self, session: &Session, use_case: &U, options: &FetchOptions) -> Result<SyncOutcome> {
    let cancel = options.cancel.clone().unwrap_or_else(CancelToken::never);
    let mut pages = Box::pin(fetch_pages(
      self.transport.as_ref(),
      session,
      use_case,
      options.load_all_pages,
      cancel,
    ));
    let mut reconciler = Reconciler::begin(&self.db, use_case);

    while let Some(page) = pages.try_next().await? {
      reconciler.merge_page(page).await?;
      if let Some(progress) = &options.progress {
        progress.loading(reconciler.pages(), reconciler.items());
      }
    }

    let (page_count, items) = (reconciler.pages(), reconciler.items());
    let touch = use_case.cache_key().map(|key| (key, Utc::now()));
    let deleted = reconciler.finish(touch).await?;

    Ok(SyncOutcome {
      pages: page_count,
      items,
      deleted,
      skipped: false,
    })
  }

  /// Fetch if needed, then read the use case's scope.
  pub async fn get_entities<U: UseCase>(
    &self,
    session: &Session,
    use_case: &U,
    options: FetchOptions,
  ) -> Result<CacheResult<Vec<U::Model>>> {
    let scope = use_case.scope();
    let cached_at = || {
      use_case
        .cache_key()
        .and_then(|key| TtlGate::new(&self.db).last_fetched_at(&key))
    };

    if self.offline {
      let data = self.db.fetch::<U::Model>(&scope)?;
      return Ok(CacheResult::offline(data, cached_at()));
    }

    let outcome = self.fetch(session, use_case, options).await?;
    let data = self.db.fetch::<U::Model>(&scope)?;
    if outcome.skipped {
      Ok(CacheResult::from_cache(data, cached_at()))
    } else {
      Ok(CacheResult::from_network(data))
    }
  }

  /// Fetch if needed, then observe the use case's scope as a live query.
  pub async fn stream_entities<U: UseCase>(
    &self,
    session: &Session,
    use_case: &U,
    options: FetchOptions,
  ) -> Result<impl Stream<Item = std::result::Result<Vec<U::Model>, StoreError>> + Send + 'static> {
    self.fetch(session, use_case, options).await?;
    Ok(self.db.watch::<U::Model>(use_case.scope()))
  }

  /// Forced fetch whose failure is only logged.
  pub async fn force_refresh<U: UseCase>(&self, session: &Session, use_case: &U) -> Option<SyncOutcome> {
    match self.fetch(session, use_case, FetchOptions::forced()).await {
      Ok(outcome) => Some(outcome),
      Err(e) => {
        warn!(entity_type = U::Model::entity_type(), error = %e, "refresh failed");
        None
      }
    }
  }

  /// Drop every TTL stamp.
  pub fn clear_cache(&self) -> Result<usize> {
    let cleared = self.db.clear_cache()?;
    info!(cleared, "cache entries cleared");
    Ok(cleared)
  }
}
