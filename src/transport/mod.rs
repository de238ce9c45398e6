//! Network transport seam.
//!
//! The pagination driver only needs a status, the `Link` relations and the
//! raw body, so that is all a [`Transport`] returns.

mod http;
mod link;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::request::RequestDescriptor;
use crate::session::Session;

pub use http::HttpTransport;
pub use link::{parse_link_header, Links};

/// Response metadata the sync layer looks at.
#[derive(Debug, Clone, Default)]
pub struct ResponseMeta {
  pub status: u16,
  pub links: Links,
}

impl ResponseMeta {
  pub fn ok() -> Self {
    Self {
      status: 200,
      links: Links::new(),
    }
  }

  pub fn with_next(mut self, url: impl Into<String>) -> Self {
    self.links.insert("next".to_string(), url.into());
    self
  }

  pub fn next_link(&self) -> Option<&str> {
    self.links.get("next").map(String::as_str)
  }
}

#[derive(Debug, Clone)]
pub struct RawResponse {
  pub meta: ResponseMeta,
  pub body: Vec<u8>,
}

/// Sends one request and returns the raw response.
///
/// Implementations map non-2xx statuses to [`TransportError::Status`].
#[async_trait]
pub trait Transport: Send + Sync {
  async fn send(
    &self,
    request: &RequestDescriptor,
    session: &Session,
  ) -> Result<RawResponse, TransportError>;
}
