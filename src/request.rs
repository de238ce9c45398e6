//! Immutable descriptions of remote fetches.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
  Get,
  Post,
  Put,
  Patch,
  Delete,
  Head,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Patch => "PATCH",
      Method::Delete => "DELETE",
      Method::Head => "HEAD",
    }
  }
}

/// One query parameter in the shapes the LMS API expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum QueryItem {
  /// `?name`
  Name(String),
  /// `?name=value`
  Value(String, String),
  /// Omitted when `None`
  OptionalValue(String, Option<String>),
  /// `?name[]=a&name[]=b`
  Array(String, Vec<String>),
  /// `?include[]=a&include[]=b`
  Include(Vec<String>),
  /// `?per_page=n`, omitted when `None`
  PerPage(Option<u32>),
  /// `?name=1` / `?name=0`
  Bool(String, bool),
  OptionalBool(String, Option<bool>),
}

impl QueryItem {
  pub fn value(name: impl Into<String>, value: impl Into<String>) -> Self {
    Self::Value(name.into(), value.into())
  }

  /// Flatten into URL query pairs. A `None` value means a bare name.
  pub fn to_pairs(&self) -> Vec<(String, Option<String>)> {
    match self {
      QueryItem::Name(name) => vec![(name.clone(), None)],
      QueryItem::Value(name, value) => vec![(name.clone(), Some(value.clone()))],
      QueryItem::OptionalValue(name, value) => value
        .as_ref()
        .map(|v| vec![(name.clone(), Some(v.clone()))])
        .unwrap_or_default(),
      QueryItem::Array(name, values) => values
        .iter()
        .map(|v| (format!("{}[]", name), Some(v.clone())))
        .collect(),
      QueryItem::Include(values) => QueryItem::Array("include".to_string(), values.clone()).to_pairs(),
      QueryItem::PerPage(per_page) => per_page
        .map(|n| vec![("per_page".to_string(), Some(n.to_string()))])
        .unwrap_or_default(),
      QueryItem::Bool(name, value) => vec![(name.clone(), Some(bool_param(*value)))],
      QueryItem::OptionalBool(name, value) => value
        .map(|v| vec![(name.clone(), Some(bool_param(v)))])
        .unwrap_or_default(),
    }
  }

  /// Parameter name as it appears on the wire (arrays carry a `[]` suffix).
  fn wire_name(&self) -> String {
    match self {
      QueryItem::Name(name)
      | QueryItem::Value(name, _)
      | QueryItem::OptionalValue(name, _)
      | QueryItem::Bool(name, _)
      | QueryItem::OptionalBool(name, _) => name.clone(),
      QueryItem::Array(name, _) => format!("{}[]", name),
      QueryItem::Include(_) => "include[]".to_string(),
      QueryItem::PerPage(_) => "per_page".to_string(),
    }
  }
}

fn bool_param(value: bool) -> String {
  let param = if value { "1" } else { "0" };
  param.to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub enum BodyEncoding {
  #[default]
  None,
  Json(Value),
  Form(Vec<(String, String)>),
}

/// Token pointing at the next page of a paginated result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Cursor {
  /// Absolute URL of the next page (from a `Link: <…>; rel="next"` header)
  Url(String),
  /// Set one query parameter on the current request (body-embedded cursors)
  Query { name: String, value: String },
}

/// An immutable remote fetch: method, path, ordered query, body.
///
/// Two descriptors that compare equal produce the same [`cache_key`].
///
/// [`cache_key`]: RequestDescriptor::cache_key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestDescriptor {
  pub method: Method,
  /// Relative to the session base URL, or absolute for follow-up pages
  pub path: String,
  pub query: Vec<QueryItem>,
  pub body: BodyEncoding,
}

impl RequestDescriptor {
  pub fn get(path: impl Into<String>) -> Self {
    Self::new(Method::Get, path)
  }

  pub fn delete(path: impl Into<String>) -> Self {
    Self::new(Method::Delete, path)
  }

  pub fn new(method: Method, path: impl Into<String>) -> Self {
    Self {
      method,
      path: path.into(),
      query: Vec::new(),
      body: BodyEncoding::None,
    }
  }

  pub fn with_query(mut self, item: QueryItem) -> Self {
    self.query.push(item);
    self
  }

  pub fn with_body(mut self, body: BodyEncoding) -> Self {
    self.body = body;
    self
  }

  /// Flattened query pairs in declaration order.
  pub fn query_pairs(&self) -> Vec<(String, Option<String>)> {
    self.query.iter().flat_map(QueryItem::to_pairs).collect()
  }

  /// Build the request for the page `cursor` points at.
  pub fn follow(&self, cursor: &Cursor) -> Self {
    match cursor {
      // The next link already carries the full query
      Cursor::Url(url) => Self::get(url.clone()),
      Cursor::Query { name, value } => {
        let mut next = self.clone();
        next.query.retain(|item| item.wire_name() != *name);
        next.query.push(QueryItem::value(name.clone(), value.clone()));
        next
      }
    }
  }

  /// Stable SHA-256 key for this descriptor.
  pub fn cache_key(&self) -> String {
    // Serialization of this type is deterministic, so the JSON form is canonical
    let canonical = serde_json::to_string(self).unwrap_or_else(|_| format!("{:?}", self));
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
  }
}
