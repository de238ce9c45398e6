//! Sync use cases for courses, planner to-dos and assignments.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use super::api_types::{ApiAssignment, ApiCourse, ApiPlannable};
use super::types::{Assignment, Course, Plannable};
use crate::error::{DecodeError, StoreError};
use crate::request::{QueryItem, RequestDescriptor};
use crate::store::{Predicate, Record, Scope, SortKey, WriteContext};
use crate::sync::{Page, ReconcileMode, UseCase};
use crate::transport::RawResponse;

/// Every course of the current user, ordered by name.
///
/// The request carries no enrollment filter: the scope is every local course,
/// so the server must be asked for all of them.
#[derive(Debug, Clone)]
pub struct GetCourses {
  pub per_page: Option<u32>,
}

impl GetCourses {
  pub fn new(per_page: Option<u32>) -> Self {
    Self { per_page }
  }
}

impl UseCase for GetCourses {
  type Model = Course;
  type Remote = ApiCourse;

  fn request(&self) -> RequestDescriptor {
    RequestDescriptor::get("courses")
      .with_query(QueryItem::Include(vec!["term".into(), "favorites".into()]))
      .with_query(QueryItem::PerPage(self.per_page))
  }

  fn scope(&self) -> Scope {
    Scope::new(Predicate::All, vec![SortKey::asc("name"), SortKey::asc("id")])
  }

  fn cache_key(&self) -> Option<String> {
    Some("get-courses".to_string())
  }

  fn write(&self, item: ApiCourse, ctx: &mut WriteContext<'_>) -> Result<(), StoreError> {
    // Local-only state survives the refresh
    let has_offline_content = ctx
      .get::<Course>(&item.id)?
      .is_some_and(|existing| existing.has_offline_content);

    ctx.upsert(&Course {
      id: item.id,
      name: item.name,
      course_code: item.course_code,
      workflow_state: item.workflow_state,
      is_favorite: item.is_favorite.unwrap_or(false),
      term_name: item.term.and_then(|term| term.name),
      has_offline_content,
    })
  }

  /// Courses that assignments or to-dos still point at stay in the store.
  fn retains(&self, id: &str, ctx: &WriteContext<'_>) -> Result<bool, StoreError> {
    let referenced = Predicate::eq("course_id", id);
    Ok(
      !ctx.ids_matching(Assignment::entity_type(), &referenced)?.is_empty()
        || !ctx.ids_matching(Plannable::entity_type(), &referenced)?.is_empty(),
    )
  }
}

/// Planner items of one user, optionally limited to `[start, end)`.
#[derive(Debug, Clone)]
pub struct GetPlannables {
  pub user_id: String,
  pub start: Option<DateTime<Utc>>,
  pub end: Option<DateTime<Utc>>,
  pub per_page: Option<u32>,
}

impl GetPlannables {
  pub fn new(user_id: impl Into<String>) -> Self {
    Self {
      user_id: user_id.into(),
      start: None,
      end: None,
      per_page: None,
    }
  }

  pub fn between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
    self.start = Some(start);
    self.end = Some(end);
    self
  }

  pub fn with_per_page(mut self, per_page: Option<u32>) -> Self {
    self.per_page = per_page;
    self
  }
}

fn api_date(date: &Option<DateTime<Utc>>) -> Option<String> {
  date.map(|d| d.to_rfc3339_opts(SecondsFormat::Secs, true))
}

impl UseCase for GetPlannables {
  type Model = Plannable;
  type Remote = ApiPlannable;

  fn request(&self) -> RequestDescriptor {
    RequestDescriptor::get("planner/items")
      .with_query(QueryItem::OptionalValue("start_date".into(), api_date(&self.start)))
      .with_query(QueryItem::OptionalValue("end_date".into(), api_date(&self.end)))
      .with_query(QueryItem::PerPage(self.per_page))
  }

  fn scope(&self) -> Scope {
    let mut predicate = Predicate::eq("user_id", self.user_id.as_str());
    if let Some(start) = self.start {
      predicate = predicate.and(Predicate::Ge("plannable_date".into(), start.timestamp().into()));
    }
    if let Some(end) = self.end {
      predicate = predicate.and(Predicate::Lt("plannable_date".into(), end.timestamp().into()));
    }
    Scope::new(
      predicate,
      vec![SortKey::asc("plannable_date"), SortKey::asc("id")],
    )
  }

  /// The window and page size live in the request; the user does not.
  fn cache_key(&self) -> Option<String> {
    Some(format!("get-plannables-{}-{}", self.user_id, self.request().cache_key()))
  }

  fn write(&self, item: ApiPlannable, ctx: &mut WriteContext<'_>) -> Result<(), StoreError> {
    if let Some(course_id) = &item.course_id {
      ctx.find_or_insert(course_id, || Course::stub(course_id))?;
    }

    let details = item.plannable;
    ctx.upsert(&Plannable {
      id: Plannable::record_id(&item.plannable_type, &item.plannable_id),
      plannable_id: item.plannable_id,
      plannable_type: item.plannable_type,
      user_id: self.user_id.clone(),
      course_id: item.course_id,
      title: details.title.unwrap_or_default(),
      details: details.details,
      context_name: item.context_name,
      html_url: item.html_url,
      points_possible: details.points_possible,
      plannable_date: item.plannable_date,
      marked_complete: item
        .planner_override
        .is_some_and(|o| o.marked_complete || o.dismissed),
    })
  }
}

/// Assignments of one course, in course order.
#[derive(Debug, Clone)]
pub struct GetAssignments {
  pub course_id: String,
  pub per_page: Option<u32>,
}

impl GetAssignments {
  pub fn new(course_id: impl Into<String>) -> Self {
    Self {
      course_id: course_id.into(),
      per_page: None,
    }
  }

  pub fn with_per_page(mut self, per_page: Option<u32>) -> Self {
    self.per_page = per_page;
    self
  }
}

impl UseCase for GetAssignments {
  type Model = Assignment;
  type Remote = ApiAssignment;

  fn request(&self) -> RequestDescriptor {
    RequestDescriptor::get(format!("courses/{}/assignments", self.course_id))
      .with_query(QueryItem::value("order_by", "position"))
      .with_query(QueryItem::PerPage(self.per_page))
  }

  fn scope(&self) -> Scope {
    Scope::new(
      Predicate::eq("course_id", self.course_id.as_str()),
      vec![SortKey::asc("position"), SortKey::asc("name")],
    )
  }

  fn cache_key(&self) -> Option<String> {
    Some(format!("get-assignments-{}", self.request().cache_key()))
  }

  fn write(&self, item: ApiAssignment, ctx: &mut WriteContext<'_>) -> Result<(), StoreError> {
    ctx.find_or_insert(&item.course_id, || Course::stub(&item.course_id))?;
    ctx.upsert(&Assignment {
      id: item.id,
      course_id: item.course_id,
      name: item.name,
      due_at: item.due_at,
      points_possible: item.points_possible,
      html_url: item.html_url,
      position: item.position,
    })
  }
}

/// Hide a to-do on the server, then drop it locally.
#[derive(Debug, Clone)]
pub struct IgnoreTodo {
  pub plannable_type: String,
  pub plannable_id: String,
}

impl IgnoreTodo {
  pub fn new(plannable_type: impl Into<String>, plannable_id: impl Into<String>) -> Self {
    Self {
      plannable_type: plannable_type.into(),
      plannable_id: plannable_id.into(),
    }
  }
}

impl UseCase for IgnoreTodo {
  type Model = Plannable;
  type Remote = Value;

  fn request(&self) -> RequestDescriptor {
    RequestDescriptor::delete(format!(
      "users/self/todo/{}_{}/submitting",
      self.plannable_type, self.plannable_id
    ))
    .with_query(QueryItem::Bool("permanent".into(), true))
  }

  fn scope(&self) -> Scope {
    Scope::where_eq(
      "id",
      Plannable::record_id(&self.plannable_type, &self.plannable_id),
      "id",
    )
  }

  fn mode(&self) -> ReconcileMode {
    ReconcileMode::DeleteScope
  }

  /// The response body is not needed; a 2xx status is the whole answer.
  fn decode_page(&self, response: &RawResponse) -> Result<Page<Value>, DecodeError> {
    Ok(Page {
      items: Vec::new(),
      next_cursor: None,
      meta: response.meta.clone(),
    })
  }

  fn write(&self, _item: Value, _ctx: &mut WriteContext<'_>) -> Result<(), StoreError> {
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::Database;
  use crate::sync::{FetchOptions, SyncEngine};
  use crate::test_support::{session, ScriptedTransport};
  use crate::transport::HttpTransport;
  use chrono::TimeZone;
  use serde_json::json;
  use std::sync::Arc;

  fn engine() -> (SyncEngine, Arc<ScriptedTransport>) {
    let transport = Arc::new(ScriptedTransport::new());
    let engine = SyncEngine::new(transport.clone(), Database::in_memory().unwrap());
    (engine, transport)
  }

  fn todo(id: &str, day: u32) -> Value {
    json!({
      "plannable_id": id,
      "plannable_type": "assignment",
      "course_id": "c1",
      "plannable_date": format!("2024-03-{:02}T12:00:00Z", day),
      "plannable": {"title": format!("todo {}", id)}
    })
  }

  fn todo_ids(engine: &SyncEngine, user: &str) -> Vec<String> {
    engine
      .database()
      .fetch::<Plannable>(&GetPlannables::new(user).scope())
      .unwrap()
      .into_iter()
      .map(|p| p.plannable_id)
      .collect()
  }

  #[tokio::test]
  async fn test_todo_refresh_drops_completed_items() {
    let (engine, transport) = engine();
    transport.respond("planner/items", json!([todo("t1", 3), todo("t2", 1)]), Some("planner/items?page=2"));
    transport.respond("planner/items", json!([todo("t1", 3), todo("t3", 2)]), None);
    transport.respond("planner/items?page=2", json!([todo("t3", 2)]), None);
    let todos = GetPlannables::new("u1");

    engine
      .fetch(&session(), &todos, FetchOptions::default())
      .await
      .unwrap();
    // Ordered by date
    assert_eq!(todo_ids(&engine, "u1"), vec!["t2", "t3", "t1"]);

    let outcome = engine
      .fetch(&session(), &todos, FetchOptions::forced())
      .await
      .unwrap();

    assert_eq!(outcome.deleted, 1);
    assert_eq!(todo_ids(&engine, "u1"), vec!["t3", "t1"]);
    // The referenced course exists as a stub
    let course = engine.database().get::<Course>("c1").unwrap().unwrap();
    assert_eq!(course.display_name(), "c1");
  }

  #[tokio::test]
  async fn test_todos_of_other_users_untouched() {
    let (engine, transport) = engine();
    transport.respond("planner/items", json!([todo("t1", 1)]), None);
    transport.respond("planner/items", json!([]), None);

    engine
      .fetch(&session(), &GetPlannables::new("u2"), FetchOptions::default())
      .await
      .unwrap();
    engine
      .fetch(&session(), &GetPlannables::new("u1"), FetchOptions::default())
      .await
      .unwrap();

    assert_eq!(todo_ids(&engine, "u2"), vec!["t1"]);
  }

  #[test]
  fn test_date_window_scope() {
    let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2024, 3, 8, 0, 0, 0).unwrap();
    let todos = GetPlannables::new("u1").between(start, end);
    let inside = json!({"user_id": "u1", "plannable_date": start.timestamp() + 60});
    let after = json!({"user_id": "u1", "plannable_date": end.timestamp()});

    assert!(todos.scope().matches(&inside));
    assert!(!todos.scope().matches(&after));

    let url = HttpTransport::resolve_url(&todos.request(), &session()).unwrap();
    assert_eq!(
      url.query(),
      Some("start_date=2024-03-01T00%3A00%3A00Z&end_date=2024-03-08T00%3A00%3A00Z")
    );
  }

  #[test]
  fn test_cache_keys_follow_the_request() {
    let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2024, 3, 8, 0, 0, 0).unwrap();
    let week = GetPlannables::new("u1").between(start, end);

    assert_eq!(week.cache_key(), GetPlannables::new("u1").between(start, end).cache_key());
    assert_ne!(week.cache_key(), GetPlannables::new("u1").cache_key());
    assert_ne!(week.cache_key(), GetPlannables::new("u2").between(start, end).cache_key());
    assert_ne!(
      GetAssignments::new("9").cache_key(),
      GetAssignments::new("10").cache_key()
    );
    assert_eq!(GetCourses::new(None).cache_key().as_deref(), Some("get-courses"));
  }

  #[tokio::test]
  async fn test_courses_keep_offline_flag() {
    let (engine, transport) = engine();
    let courses = GetCourses::new(None);
    let path = "courses?include%5B%5D=term&include%5B%5D=favorites";
    transport.respond(path, json!([{"id": 1, "name": "Biology"}, {"id": 2, "name": "Art"}]), None);
    transport.respond(path, json!([{"id": 1, "name": "Biology II"}]), None);

    engine
      .fetch(&session(), &courses, FetchOptions::default())
      .await
      .unwrap();
    engine
      .database()
      .perform_write(|ctx| {
        let mut course = ctx.get::<Course>("1")?.unwrap();
        course.has_offline_content = true;
        ctx.upsert(&course)
      })
      .await
      .unwrap();

    let result = engine
      .get_entities(&session(), &courses, FetchOptions::forced())
      .await
      .unwrap();

    assert_eq!(result.data.len(), 1);
    assert_eq!(result.data[0].name.as_deref(), Some("Biology II"));
    assert!(result.data[0].has_offline_content);
  }

  #[tokio::test]
  async fn test_assignments_create_course_stub() {
    let (engine, transport) = engine();
    transport.respond(
      "courses/9/assignments?order_by=position",
      json!([
        {"id": 2, "course_id": 9, "name": "Lab", "position": 2},
        {"id": 1, "course_id": 9, "name": "Quiz", "position": 1, "due_at": "2024-03-01T00:00:00Z"}
      ]),
      None,
    );

    engine
      .fetch(&session(), &GetAssignments::new("9"), FetchOptions::default())
      .await
      .unwrap();

    let assignments: Vec<Assignment> = engine
      .database()
      .fetch(&GetAssignments::new("9").scope())
      .unwrap();
    let names: Vec<_> = assignments.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["Quiz", "Lab"]);
    assert!(assignments[0].due_at.is_some());
    assert!(engine.database().get::<Course>("9").unwrap().is_some());
  }

  #[tokio::test]
  async fn test_course_sweep_keeps_referenced_courses() {
    let (engine, transport) = engine();
    let courses_path = "courses?include%5B%5D=term&include%5B%5D=favorites";
    transport.respond(
      "courses/9/assignments?order_by=position",
      json!([{"id": 1, "course_id": 9, "name": "Quiz"}]),
      None,
    );
    transport.respond("planner/items", json!([todo("t1", 1)]), None);
    transport.respond(courses_path, json!([{"id": 5, "name": "Old"}]), None);
    transport.respond(courses_path, json!([{"id": 1, "name": "Biology"}]), None);

    engine
      .fetch(&session(), &GetAssignments::new("9"), FetchOptions::default())
      .await
      .unwrap();
    engine
      .fetch(&session(), &GetPlannables::new("u1"), FetchOptions::default())
      .await
      .unwrap();
    engine
      .fetch(&session(), &GetCourses::new(None), FetchOptions::default())
      .await
      .unwrap();
    let outcome = engine
      .fetch(&session(), &GetCourses::new(None), FetchOptions::forced())
      .await
      .unwrap();

    // Only the unreferenced course goes
    assert_eq!(outcome.deleted, 1);
    let db = engine.database();
    assert!(db.get::<Course>("5").unwrap().is_none());
    assert!(db.get::<Course>("1").unwrap().is_some());
    assert!(db.get::<Course>("9").unwrap().is_some());
    assert!(db.get::<Course>("c1").unwrap().is_some());
    let assignments: Vec<Assignment> = db.fetch(&GetAssignments::new("9").scope()).unwrap();
    assert_eq!(assignments.len(), 1);
  }

  #[tokio::test]
  async fn test_ignore_todo_deletes_local_item() {
    let (engine, transport) = engine();
    transport.respond("planner/items", json!([todo("t1", 1), todo("t2", 2)]), None);
    transport.respond("users/self/todo/assignment_t1/submitting?permanent=1", json!({"ignored": true}), None);

    engine
      .fetch(&session(), &GetPlannables::new("u1"), FetchOptions::default())
      .await
      .unwrap();
    let outcome = engine
      .fetch(&session(), &IgnoreTodo::new("assignment", "t1"), FetchOptions::default())
      .await
      .unwrap();

    assert_eq!(outcome.deleted, 1);
    assert_eq!(todo_ids(&engine, "u1"), vec!["t2"]);
    assert!(transport
      .calls()
      .contains(&"users/self/todo/assignment_t1/submitting?permanent=1".to_string()));
  }
}
