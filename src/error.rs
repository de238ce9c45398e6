//! Error types for the sync layer.
//!
//! Each stage has its own error so callers can tell a dropped connection from
//! a malformed page or a failed save, and [`SyncError`] wraps them into the
//! single failure signal returned by the engine.

use thiserror::Error;

/// Network-level failure: connection problems, timeouts, non-2xx responses.
#[derive(Debug, Error)]
pub enum TransportError {
  /// HTTP client error
  #[error("HTTP error: {0}")]
  Http(#[from] reqwest::Error),

  /// Server answered with a non-success status
  #[error("API error ({status}): {message}")]
  Status { status: u16, message: String },

  /// The request could not be built (bad path, bad base URL)
  #[error("Invalid request: {0}")]
  InvalidRequest(String),

  /// Transport reported the network as unreachable
  #[error("Network unavailable: {0}")]
  Unavailable(String),
}

impl TransportError {
  pub fn status(status: u16, message: impl Into<String>) -> Self {
    Self::Status {
      status,
      message: message.into(),
    }
  }

  pub fn invalid_request(message: impl Into<String>) -> Self {
    Self::InvalidRequest(message.into())
  }

  /// HTTP status if the server responded.
  pub fn status_code(&self) -> Option<u16> {
    match self {
      Self::Status { status, .. } => Some(*status),
      Self::Http(e) => e.status().map(|s| s.as_u16()),
      _ => None,
    }
  }
}

/// Response body did not match the expected shape.
#[derive(Debug, Error)]
#[error("Failed to decode {what}: {source}")]
pub struct DecodeError {
  pub what: String,
  #[source]
  pub source: serde_json::Error,
}

impl DecodeError {
  pub fn new(what: impl Into<String>, source: serde_json::Error) -> Self {
    Self {
      what: what.into(),
      source,
    }
  }
}

/// Local persistence failure.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("SQLite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("Failed to (de)serialize {entity_type} record: {source}")]
  Serialization {
    entity_type: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("Stored timestamp '{0}' is not RFC 3339")]
  Timestamp(String),

  #[error("Lock poisoned: {0}")]
  LockPoisoned(String),

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  #[error("Storage error: {0}")]
  Backend(String),
}

impl StoreError {
  pub fn serialization(entity_type: impl Into<String>, source: serde_json::Error) -> Self {
    Self::Serialization {
      entity_type: entity_type.into(),
      source,
    }
  }
}

/// The single failure signal surfaced by a fetch, with its cause attached.
#[derive(Debug, Error)]
pub enum SyncError {
  #[error(transparent)]
  Transport(#[from] TransportError),

  #[error(transparent)]
  Decode(#[from] DecodeError),

  #[error(transparent)]
  Store(#[from] StoreError),

  /// The caller cancelled the run before it completed
  #[error("Sync cancelled")]
  Cancelled,
}

impl SyncError {
  pub fn is_cancelled(&self) -> bool {
    matches!(self, Self::Cancelled)
  }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
