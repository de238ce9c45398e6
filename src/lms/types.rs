//! Records kept in the local store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::Record;

/// A course the user can see
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
  pub id: String,
  pub name: Option<String>,
  pub course_code: Option<String>,
  pub workflow_state: Option<String>,
  #[serde(default)]
  pub is_favorite: bool,
  pub term_name: Option<String>,
  /// Local-only: content was downloaded for offline use on this device
  #[serde(default)]
  pub has_offline_content: bool,
}

impl Course {
  /// Placeholder for a course only known by id (referenced from a to-do).
  pub fn stub(id: &str) -> Self {
    Self {
      id: id.to_string(),
      name: None,
      course_code: None,
      workflow_state: None,
      is_favorite: false,
      term_name: None,
      has_offline_content: false,
    }
  }

  pub fn display_name(&self) -> &str {
    self
      .name
      .as_deref()
      .or(self.course_code.as_deref())
      .unwrap_or(&self.id)
  }
}

impl Record for Course {
  fn id(&self) -> String {
    self.id.clone()
  }

  fn entity_type() -> &'static str {
    "course"
  }
}

/// A planner item (to-do) belonging to one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plannable {
  /// `<plannable_type>/<plannable_id>`
  pub id: String,
  pub plannable_id: String,
  pub plannable_type: String,
  pub user_id: String,
  pub course_id: Option<String>,
  pub title: String,
  pub details: Option<String>,
  pub context_name: Option<String>,
  pub html_url: Option<String>,
  pub points_possible: Option<f64>,
  /// Unix seconds, so scopes order and filter on it numerically
  #[serde(with = "chrono::serde::ts_seconds")]
  pub plannable_date: DateTime<Utc>,
  #[serde(default)]
  pub marked_complete: bool,
}

impl Plannable {
  pub fn record_id(plannable_type: &str, plannable_id: &str) -> String {
    format!("{}/{}", plannable_type, plannable_id)
  }
}

impl Record for Plannable {
  fn id(&self) -> String {
    self.id.clone()
  }

  fn entity_type() -> &'static str {
    "plannable"
  }
}

/// An assignment of one course
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
  pub id: String,
  pub course_id: String,
  pub name: String,
  #[serde(with = "chrono::serde::ts_seconds_option")]
  pub due_at: Option<DateTime<Utc>>,
  pub points_possible: Option<f64>,
  pub html_url: Option<String>,
  pub position: Option<i64>,
}

impl Record for Assignment {
  fn id(&self) -> String {
    self.id.clone()
  }

  fn entity_type() -> &'static str {
    "assignment"
  }
}
