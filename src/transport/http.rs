//! reqwest-backed transport.

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, LINK};
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::link::parse_link_header;
use super::{RawResponse, ResponseMeta, Transport};
use crate::error::TransportError;
use crate::request::{BodyEncoding, Method, RequestDescriptor};
use crate::session::Session;

const MAX_ERROR_BODY_CHARS: usize = 512;

/// HTTP transport for the LMS REST API.
#[derive(Debug, Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
}

impl HttpTransport {
  pub fn new(timeout: Duration) -> Result<Self, TransportError> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .user_agent(concat!("lms-sync/", env!("CARGO_PKG_VERSION")))
      .build()?;

    Ok(Self { client })
  }

  /// Absolute URL for `request`, including its query and the masquerade param.
  pub fn resolve_url(request: &RequestDescriptor, session: &Session) -> Result<Url, TransportError> {
    let mut url = match Url::parse(&request.path) {
      Ok(url) => url,
      Err(url::ParseError::RelativeUrlWithoutBase) => session
        .base_url
        .join(request.path.trim_start_matches('/'))
        .map_err(|e| TransportError::invalid_request(format!("bad path {}: {}", request.path, e)))?,
      Err(e) => {
        return Err(TransportError::invalid_request(format!(
          "bad path {}: {}",
          request.path, e
        )))
      }
    };

    let pairs = request.query_pairs();
    let act_as = session
      .act_as_user_id
      .as_ref()
      .filter(|_| session.is_same_host(&url))
      .filter(|_| !url.query_pairs().any(|(k, _)| k == "as_user_id"));

    if !pairs.is_empty() || act_as.is_some() {
      let mut query = url.query_pairs_mut();
      for (name, value) in &pairs {
        match value {
          Some(value) => query.append_pair(name, value),
          None => query.append_key_only(name),
        };
      }
      if let Some(user) = act_as {
        query.append_pair("as_user_id", user);
      }
    }

    Ok(url)
  }
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
  match method {
    Method::Get => reqwest::Method::GET,
    Method::Post => reqwest::Method::POST,
    Method::Put => reqwest::Method::PUT,
    Method::Patch => reqwest::Method::PATCH,
    Method::Delete => reqwest::Method::DELETE,
    Method::Head => reqwest::Method::HEAD,
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn send(
    &self,
    request: &RequestDescriptor,
    session: &Session,
  ) -> Result<RawResponse, TransportError> {
    let url = Self::resolve_url(request, session)?;
    debug!(method = request.method.as_str(), %url, "sending request");

    let mut builder = self
      .client
      .request(to_reqwest_method(request.method), url.clone());

    if let Some(token) = session.access_token.as_ref().filter(|_| session.is_same_host(&url)) {
      builder = builder.bearer_auth(token);
    }

    builder = match &request.body {
      BodyEncoding::None => builder,
      BodyEncoding::Json(value) => {
        let body = serde_json::to_vec(value)
          .map_err(|e| TransportError::invalid_request(format!("bad JSON body: {}", e)))?;
        builder.header(CONTENT_TYPE, "application/json").body(body)
      }
      BodyEncoding::Form(pairs) => builder.form(pairs),
    };

    let response = builder.send().await?;
    let status = response.status();
    let links = response
      .headers()
      .get_all(LINK)
      .iter()
      .filter_map(|v| v.to_str().ok())
      .flat_map(|v| parse_link_header(v).into_iter())
      .collect();
    let body = response.bytes().await?.to_vec();

    if !status.is_success() {
      let message: String = String::from_utf8_lossy(&body)
        .chars()
        .take(MAX_ERROR_BODY_CHARS)
        .collect();
      return Err(TransportError::status(status.as_u16(), message));
    }

    Ok(RawResponse {
      meta: ResponseMeta {
        status: status.as_u16(),
        links,
      },
      body,
    })
  }
}
