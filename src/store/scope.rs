//! Local scopes: which cached records a fetch or an observer owns.
//!
//! Predicates are evaluated against the serialized JSON form of a record, so
//! field names are the serde field names. Dotted paths reach into nested
//! objects (`course.id`).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// Boolean expression over record fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
  All,
  Eq(String, Value),
  Ne(String, Value),
  Lt(String, Value),
  Le(String, Value),
  Gt(String, Value),
  Ge(String, Value),
  In(String, Vec<Value>),
  /// Field missing or `null`
  IsNull(String),
  And(Vec<Predicate>),
  Or(Vec<Predicate>),
  Not(Box<Predicate>),
}

impl Predicate {
  pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
    Self::Eq(field.into(), value.into())
  }

  pub fn and(self, other: Predicate) -> Self {
    match self {
      Predicate::All => other,
      Predicate::And(mut all) => {
        all.push(other);
        Predicate::And(all)
      }
      this => Predicate::And(vec![this, other]),
    }
  }

  #[allow(clippy::should_implement_trait)]
  pub fn not(self) -> Self {
    Predicate::Not(Box::new(self))
  }

  pub fn matches(&self, record: &Value) -> bool {
    match self {
      Predicate::All => true,
      Predicate::Eq(path, value) => values_equal(lookup(record, path), value),
      Predicate::Ne(path, value) => !values_equal(lookup(record, path), value),
      Predicate::Lt(path, value) => compare(lookup(record, path), value) == Some(Ordering::Less),
      Predicate::Le(path, value) => matches!(
        compare(lookup(record, path), value),
        Some(Ordering::Less | Ordering::Equal)
      ),
      Predicate::Gt(path, value) => {
        compare(lookup(record, path), value) == Some(Ordering::Greater)
      }
      Predicate::Ge(path, value) => matches!(
        compare(lookup(record, path), value),
        Some(Ordering::Greater | Ordering::Equal)
      ),
      Predicate::In(path, values) => {
        let field = lookup(record, path);
        values.iter().any(|v| values_equal(field, v))
      }
      Predicate::IsNull(path) => lookup(record, path).is_null(),
      Predicate::And(all) => all.iter().all(|p| p.matches(record)),
      Predicate::Or(any) => any.iter().any(|p| p.matches(record)),
      Predicate::Not(inner) => !inner.matches(record),
    }
  }
}

static NULL: Value = Value::Null;

fn lookup<'a>(record: &'a Value, path: &str) -> &'a Value {
  path
    .split('.')
    .try_fold(record, |value, segment| value.get(segment))
    .unwrap_or(&NULL)
}

fn values_equal(a: &Value, b: &Value) -> bool {
  a == b || compare(a, b) == Some(Ordering::Equal)
}

/// Ordering between two values of the same kind; `None` across kinds.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
  match (a, b) {
    (Value::Null, Value::Null) => Some(Ordering::Equal),
    (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
    (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
    (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
    _ => None,
  }
}

fn kind_rank(value: &Value) -> u8 {
  match value {
    Value::Null => 0,
    Value::Bool(_) => 1,
    Value::Number(_) => 2,
    Value::String(_) => 3,
    Value::Array(_) => 4,
    Value::Object(_) => 5,
  }
}

/// Total order used for sorting: nulls first, then by kind, then by value.
fn sort_compare(a: &Value, b: &Value) -> Ordering {
  compare(a, b).unwrap_or_else(|| kind_rank(a).cmp(&kind_rank(b)))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
  pub field: String,
  pub ascending: bool,
}

impl SortKey {
  pub fn asc(field: impl Into<String>) -> Self {
    Self {
      field: field.into(),
      ascending: true,
    }
  }

  pub fn desc(field: impl Into<String>) -> Self {
    Self {
      field: field.into(),
      ascending: false,
    }
  }
}

/// Predicate + sort order (+ optional grouping key) naming a set of records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scope {
  pub predicate: Predicate,
  pub order: Vec<SortKey>,
  pub section_by: Option<String>,
}

impl Scope {
  pub fn new(predicate: Predicate, order: Vec<SortKey>) -> Self {
    Self {
      predicate,
      order,
      section_by: None,
    }
  }

  /// Every record of the type, ascending by `order_by`.
  pub fn all(order_by: &str) -> Self {
    Self::new(Predicate::All, vec![SortKey::asc(order_by)])
  }

  pub fn where_eq(field: &str, value: impl Into<Value>, order_by: &str) -> Self {
    Self::new(Predicate::eq(field, value), vec![SortKey::asc(order_by)])
  }

  pub fn section_by(mut self, field: impl Into<String>) -> Self {
    self.section_by = Some(field.into());
    self
  }

  pub fn matches(&self, record: &Value) -> bool {
    self.predicate.matches(record)
  }

  /// Ordering of two records under this scope. Sections sort before the order keys.
  pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
    let section = self
      .section_by
      .as_deref()
      .map(|key| sort_compare(lookup(a, key), lookup(b, key)))
      .unwrap_or(Ordering::Equal);

    self.order.iter().fold(section, |ordering, key| {
      ordering.then_with(|| {
        let ord = sort_compare(lookup(a, &key.field), lookup(b, &key.field));
        if key.ascending {
          ord
        } else {
          ord.reverse()
        }
      })
    })
  }

  /// Stable sort by this scope's order.
  pub fn sort(&self, records: &mut [Value]) {
    records.sort_by(|a, b| self.compare(a, b));
  }

  /// Grouping value of `record` under `section_by` (null when ungrouped).
  pub fn section_of(&self, record: &Value) -> Value {
    self
      .section_by
      .as_deref()
      .map(|key| lookup(record, key).clone())
      .unwrap_or(Value::Null)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_predicate_matching() {
    let todo = json!({"id": "t1", "user_id": "u1", "points": 5, "course": {"id": "c1"}, "due_at": null});

    assert!(Predicate::eq("user_id", "u1").matches(&todo));
    assert!(!Predicate::eq("user_id", "u2").matches(&todo));
    assert!(Predicate::eq("course.id", "c1").matches(&todo));
    assert!(Predicate::eq("points", 5.0).matches(&todo));
    assert!(Predicate::Gt("points".into(), json!(4)).matches(&todo));
    assert!(!Predicate::Lt("points".into(), json!("a")).matches(&todo));
    assert!(Predicate::IsNull("due_at".into()).matches(&todo));
    assert!(Predicate::IsNull("missing".into()).matches(&todo));
    assert!(Predicate::In("id".into(), vec![json!("t0"), json!("t1")]).matches(&todo));
    assert!(Predicate::eq("user_id", "u1")
      .and(Predicate::eq("id", "t2").not())
      .matches(&todo));
    assert!(Predicate::Or(vec![Predicate::eq("id", "x"), Predicate::All]).matches(&todo));
  }

  #[test]
  fn test_and_flattens() {
    let p = Predicate::All
      .and(Predicate::eq("a", 1))
      .and(Predicate::eq("b", 2));
    assert_eq!(
      p,
      Predicate::And(vec![Predicate::eq("a", 1), Predicate::eq("b", 2)])
    );
  }

  #[test]
  fn test_sort_order_and_sections() {
    let mut records = vec![
      json!({"id": "3", "name": "b", "term": "fall"}),
      json!({"id": "1", "name": "c", "term": "spring"}),
      json!({"id": "2", "name": "a", "term": "spring"}),
      json!({"id": "4", "name": null, "term": "fall"}),
    ];

    Scope::all("name").sort(&mut records);
    let ids: Vec<_> = records.iter().map(|r| r["id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["4", "2", "3", "1"]);

    let scope = Scope::new(Predicate::All, vec![SortKey::desc("name")]).section_by("term");
    scope.sort(&mut records);
    let ids: Vec<_> = records.iter().map(|r| r["id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["3", "4", "1", "2"]);
    assert_eq!(scope.section_of(&records[0]), json!("fall"));
  }
}
