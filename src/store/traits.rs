//! Core traits and types for the local store.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

/// A record that can live in the local store.
///
/// Remote and local forms share the stable `id`; the local form may carry
/// extra fields that only exist on this device.
pub trait Record: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Stable identifier shared with the server (e.g., course id)
  fn id(&self) -> String;

  /// Entity type name for storage organization (e.g., "course", "plannable")
  fn entity_type() -> &'static str;
}

/// Result from a store read, including metadata about where the data came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the scope was last fetched (if known)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Data that was just reconciled from the network.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: Some(Utc::now()),
    }
  }

  /// Data served from a cache that is still within its TTL.
  pub fn from_cache(data: T, cached_at: Option<DateTime<Utc>>) -> Self {
    Self {
      data,
      source: CacheSource::CacheFresh,
      cached_at,
    }
  }

  /// Data served from the store because offline mode is on.
  pub fn offline(data: T, cached_at: Option<DateTime<Utc>>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at,
    }
  }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CacheResult<U> {
    CacheResult {
      data: f(self.data),
      source: self.source,
      cached_at: self.cached_at,
    }
  }
}

/// Indicates where returned data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still within its TTL
  CacheFresh,
  /// Offline mode - network not consulted, serving stored data
  Offline,
}
