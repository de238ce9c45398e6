//! Explicit session context handed to every fetch.

use url::Url;

use crate::error::TransportError;

/// Who is talking to which server.
///
/// Every fetch and reconcile call takes a `&Session`; nothing reads a
/// process-wide current user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
  /// API root, e.g. `https://school.instructure.com/api/v1/`
  pub base_url: Url,
  pub access_token: Option<String>,
  /// User the session belongs to. `self` is accepted by the server.
  pub user_id: String,
  /// Masquerade target, sent as `as_user_id` on same-host requests
  pub act_as_user_id: Option<String>,
}

impl Session {
  pub fn new(base_url: &str, user_id: impl Into<String>) -> Result<Self, TransportError> {
    let mut base_url = Url::parse(base_url)
      .map_err(|e| TransportError::invalid_request(format!("bad base URL {}: {}", base_url, e)))?;

    // Url::join drops the last segment unless the path ends with a slash
    if !base_url.path().ends_with('/') {
      let path = format!("{}/", base_url.path());
      base_url.set_path(&path);
    }

    Ok(Self {
      base_url,
      access_token: None,
      user_id: user_id.into(),
      act_as_user_id: None,
    })
  }

  pub fn with_token(mut self, token: impl Into<String>) -> Self {
    self.access_token = Some(token.into());
    self
  }

  pub fn acting_as(mut self, user_id: Option<String>) -> Self {
    self.act_as_user_id = user_id;
    self
  }

  /// Whether `url` points at the session's own host (credentials may be sent).
  pub fn is_same_host(&self, url: &Url) -> bool {
    url.host_str() == self.base_url.host_str() && url.port_or_known_default() == self.base_url.port_or_known_default()
  }
}
