//! Per-feature fetch descriptions.

use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::error::{DecodeError, StoreError};
use crate::request::{Cursor, RequestDescriptor};
use crate::store::{Record, Scope, WriteContext};
use crate::transport::{RawResponse, ResponseMeta};

/// Default time-to-live of a cache key (2 hours).
pub const DEFAULT_TTL: Duration = Duration::from_secs(2 * 60 * 60);

/// How a completed fetch treats the records already in its scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileMode {
  /// The remote result replaces the scope: records not returned are deleted
  Collection,
  /// Upsert only; nothing is deleted
  Merge,
  /// On success delete every record in scope (remote deletes)
  DeleteScope,
}

/// One decoded response page.
#[derive(Debug, Clone)]
pub struct Page<R> {
  pub items: Vec<R>,
  pub next_cursor: Option<Cursor>,
  pub meta: ResponseMeta,
}

/// Everything the engine needs to sync one feature's data.
///
/// Implementors describe the request and the scope they own, and turn each
/// remote item into local records in [`write`](UseCase::write).
pub trait UseCase: Send + Sync {
  /// Record type whose scope this use case reconciles
  type Model: Record;
  /// One item of a decoded response page
  type Remote: DeserializeOwned + Send;

  fn request(&self) -> RequestDescriptor;

  fn scope(&self) -> Scope;

  /// Key for the TTL gate. `None` disables gating.
  fn cache_key(&self) -> Option<String> {
    None
  }

  fn ttl(&self) -> Duration {
    DEFAULT_TTL
  }

  fn mode(&self) -> ReconcileMode {
    ReconcileMode::Collection
  }

  /// Decode a response body into a page. The default expects a JSON array and
  /// takes the cursor from the `Link` header.
  fn decode_page(&self, response: &RawResponse) -> Result<Page<Self::Remote>, DecodeError> {
    let items = serde_json::from_slice(&response.body)
      .map_err(|e| DecodeError::new(format!("{} page", Self::Model::entity_type()), e))?;

    Ok(Page {
      items,
      next_cursor: response
        .meta
        .next_link()
        .map(|url| Cursor::Url(url.to_string())),
      meta: response.meta.clone(),
    })
  }

  /// Request for the page after `current`.
  fn next_request(&self, current: &RequestDescriptor, cursor: &Cursor) -> RequestDescriptor {
    current.follow(cursor)
  }

  /// Upsert the local records for one remote item.
  fn write(&self, item: Self::Remote, ctx: &mut WriteContext<'_>) -> Result<(), StoreError>;

  /// Whether the sweep must keep record `id` although the server no longer
  /// returned it, e.g. because other records still reference it.
  fn retains(&self, _id: &str, _ctx: &WriteContext<'_>) -> Result<bool, StoreError> {
    Ok(false)
  }
}
