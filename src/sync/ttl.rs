//! Cache-key/TTL gate.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, warn};

use crate::store::{CacheEntry, Database};

/// Whether `entry` is at least `ttl` old at `now`.
pub fn is_expired(entry: &CacheEntry, ttl: Duration, now: DateTime<Utc>) -> bool {
  match chrono::Duration::from_std(ttl) {
    Ok(ttl) => now.signed_duration_since(entry.last_fetched_at) >= ttl,
    // Larger than chrono can represent: never expires
    Err(_) => false,
  }
}

/// Decides whether a keyed fetch may skip the network.
pub struct TtlGate<'a> {
  db: &'a Database,
}

impl<'a> TtlGate<'a> {
  pub fn new(db: &'a Database) -> Self {
    Self { db }
  }

  pub fn should_fetch(&self, key: &str, ttl: Duration, force: bool) -> bool {
    self.should_fetch_at(key, ttl, force, Utc::now())
  }

  pub fn should_fetch_at(&self, key: &str, ttl: Duration, force: bool, now: DateTime<Utc>) -> bool {
    if force {
      return true;
    }

    match self.db.cache_entry(key) {
      Ok(Some(entry)) => {
        let expired = is_expired(&entry, ttl, now);
        debug!(key, last_fetched_at = %entry.last_fetched_at, expired, "ttl check");
        expired
      }
      Ok(None) => true,
      Err(e) => {
        warn!(key, error = %e, "cache entry lookup failed, fetching");
        true
      }
    }
  }

  /// When `key` last completed a fetch, if ever.
  pub fn last_fetched_at(&self, key: &str) -> Option<DateTime<Utc>> {
    match self.db.cache_entry(key) {
      Ok(entry) => entry.map(|e| e.last_fetched_at),
      Err(e) => {
        warn!(key, error = %e, "cache entry lookup failed");
        None
      }
    }
  }
}
