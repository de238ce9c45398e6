//! Serde-deserializable types matching LMS API responses.
//!
//! These types are separate from the stored records so decoding stays close
//! to the wire while records keep only what the client needs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

/// Ids arrive as JSON strings or numbers depending on the endpoint.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
  Text(String),
  Number(i64),
}

impl From<RawId> for String {
  fn from(id: RawId) -> Self {
    match id {
      RawId::Text(id) => id,
      RawId::Number(id) => id.to_string(),
    }
  }
}

pub fn id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
  RawId::deserialize(deserializer).map(String::from)
}

pub fn optional_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
  Option::<RawId>::deserialize(deserializer).map(|id| id.map(String::from))
}

// ============================================================================
// Courses
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiTerm {
  pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiCourse {
  #[serde(deserialize_with = "id")]
  pub id: String,
  pub name: Option<String>,
  pub course_code: Option<String>,
  pub workflow_state: Option<String>,
  pub is_favorite: Option<bool>,
  pub term: Option<ApiTerm>,
}

// ============================================================================
// Planner items
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct ApiPlannableDetails {
  pub title: Option<String>,
  pub details: Option<String>,
  pub points_possible: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct ApiPlannerOverride {
  #[serde(default)]
  pub marked_complete: bool,
  #[serde(default)]
  pub dismissed: bool,
}

#[derive(Debug, Deserialize)]
pub struct ApiPlannable {
  #[serde(deserialize_with = "id")]
  pub plannable_id: String,
  pub plannable_type: String,
  #[serde(default, deserialize_with = "optional_id")]
  pub course_id: Option<String>,
  pub context_name: Option<String>,
  pub html_url: Option<String>,
  pub plannable_date: DateTime<Utc>,
  #[serde(default)]
  pub plannable: ApiPlannableDetails,
  pub planner_override: Option<ApiPlannerOverride>,
}

// ============================================================================
// Assignments
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiAssignment {
  #[serde(deserialize_with = "id")]
  pub id: String,
  #[serde(deserialize_with = "id")]
  pub course_id: String,
  pub name: String,
  pub due_at: Option<DateTime<Utc>>,
  pub points_possible: Option<f64>,
  pub html_url: Option<String>,
  pub position: Option<i64>,
}
