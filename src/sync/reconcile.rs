//! Merge fetched pages into a scope and sweep what the server no longer has.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::debug;

use super::use_case::{Page, ReconcileMode, UseCase};
use crate::error::StoreError;
use crate::store::{Database, Record, Scope};

/// Reconciliation state of one fetch run.
///
/// The ids in scope are snapshotted by the first merged page, under the same
/// write gate as that page's upserts. Every later upsert removes its id from
/// the candidate set; [`finish`](Reconciler::finish) deletes what is left.
pub struct Reconciler<'a, U: UseCase> {
  db: &'a Database,
  use_case: &'a U,
  scope: Scope,
  candidates: Option<HashSet<String>>,
  pages: usize,
  items: usize,
}

impl<'a, U: UseCase> Reconciler<'a, U> {
  pub fn begin(db: &'a Database, use_case: &'a U) -> Self {
    Self {
      db,
      use_case,
      scope: use_case.scope(),
      candidates: None,
      pages: 0,
      items: 0,
    }
  }

  pub fn pages(&self) -> usize {
    self.pages
  }

  pub fn items(&self) -> usize {
    self.items
  }

  /// Upsert one page in a single save. Returns how many items it held.
  ///
  /// When the save fails nothing of this page is written and the candidate
  /// set is left as it was.
  pub async fn merge_page(&mut self, page: Page<U::Remote>) -> Result<usize, StoreError> {
    let entity_type = U::Model::entity_type();
    let snapshot = self.candidates.is_none() && self.use_case.mode() == ReconcileMode::Collection;
    let count = page.items.len();
    let use_case = self.use_case;
    let scope = &self.scope;
    let items = page.items;

    let (existing, upserted) = self
      .db
      .perform_write(move |ctx| {
        let existing = if snapshot {
          Some(ctx.ids_matching(entity_type, &scope.predicate)?)
        } else {
          None
        };
        for item in items {
          use_case.write(item, ctx)?;
        }
        Ok((existing, ctx.upserted_ids(entity_type)))
      })
      .await?;

    if let Some(existing) = existing {
      self.candidates = Some(existing.into_iter().collect());
    }
    if let Some(candidates) = self.candidates.as_mut() {
      for id in &upserted {
        candidates.remove(id);
      }
    }

    self.pages += 1;
    self.items += count;
    debug!(
      entity_type,
      page = self.pages,
      items = count,
      pending_deletes = self.candidates.as_ref().map_or(0, HashSet::len),
      "merged page"
    );
    Ok(count)
  }

  /// Complete the run: sweep per the reconcile mode and stamp `touch` in the
  /// same save. Returns the number of deleted records.
  pub async fn finish(self, touch: Option<(String, DateTime<Utc>)>) -> Result<usize, StoreError> {
    let entity_type = U::Model::entity_type();
    let mode = self.use_case.mode();
    let use_case = self.use_case;
    let scope = self.scope;
    let candidates = self.candidates;

    let deleted = self
      .db
      .perform_write(move |ctx| {
        let deleted = match mode {
          ReconcileMode::Collection => {
            // Only what still belongs to the scope; another run may have moved it.
            // Without candidates no page was merged and the whole scope is stale.
            let mut deleted = 0;
            for id in ctx.ids_matching(entity_type, &scope.predicate)? {
              if candidates.as_ref().is_some_and(|c| !c.contains(&id)) {
                continue;
              }
              if use_case.retains(&id, ctx)? {
                debug!(entity_type, id = %id, "kept referenced record");
                continue;
              }
              if ctx.delete_raw(entity_type, &id)? {
                deleted += 1;
              }
            }
            deleted
          }
          ReconcileMode::DeleteScope => ctx.delete_matching(entity_type, &scope)?,
          ReconcileMode::Merge => 0,
        };
        if let Some((key, at)) = &touch {
          ctx.touch_cache(key, *at);
        }
        Ok(deleted)
      })
      .await?;

    debug!(entity_type, deleted, "reconciliation finished");
    Ok(deleted)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test_support::{GetNotes, Note, RemoteNote};
  use crate::transport::ResponseMeta;

  fn page(ids: &[&str]) -> Page<RemoteNote> {
    Page {
      items: ids
        .iter()
        .map(|id| RemoteNote {
          id: id.to_string(),
          text: format!("note {}", id),
        })
        .collect(),
      next_cursor: None,
      meta: ResponseMeta::ok(),
    }
  }

  async fn seed(db: &Database, owner: &str, ids: &[&str]) {
    let notes: Vec<Note> = ids
      .iter()
      .map(|id| Note {
        id: id.to_string(),
        owner: owner.to_string(),
        text: "old".to_string(),
      })
      .collect();
    db.perform_write(move |ctx| notes.iter().try_for_each(|note| ctx.upsert(note)))
      .await
      .unwrap();
  }

  fn ids(db: &Database, owner: &str) -> Vec<String> {
    db.fetch::<Note>(&Scope::where_eq("owner", owner, "id"))
      .unwrap()
      .into_iter()
      .map(|note| note.id)
      .collect()
  }

  #[tokio::test]
  async fn test_sweep_after_pages() {
    let db = Database::in_memory().unwrap();
    seed(&db, "a", &["1", "2", "3"]).await;
    let use_case = GetNotes::owned_by("a");

    let mut reconciler = Reconciler::begin(&db, &use_case);
    reconciler.merge_page(page(&["1"])).await.unwrap();
    reconciler.merge_page(page(&["4"])).await.unwrap();
    // Nothing is swept before the run finishes
    assert_eq!(ids(&db, "a"), vec!["1", "2", "3", "4"]);

    let deleted = reconciler
      .finish(Some(("notes-a".to_string(), Utc::now())))
      .await
      .unwrap();

    assert_eq!(deleted, 2);
    assert_eq!(ids(&db, "a"), vec!["1", "4"]);
    assert!(db.cache_entry("notes-a").unwrap().is_some());
  }

  #[tokio::test]
  async fn test_scope_isolation() {
    let db = Database::in_memory().unwrap();
    seed(&db, "a", &["a1", "a2"]).await;
    seed(&db, "b", &["b1"]).await;
    let use_case = GetNotes::owned_by("b");

    let mut reconciler = Reconciler::begin(&db, &use_case);
    reconciler.merge_page(page(&["b2"])).await.unwrap();
    reconciler.finish(None).await.unwrap();

    assert_eq!(ids(&db, "a"), vec!["a1", "a2"]);
    assert_eq!(ids(&db, "b"), vec!["b2"]);
  }

  #[tokio::test]
  async fn test_empty_result_clears_scope() {
    let db = Database::in_memory().unwrap();
    seed(&db, "a", &["1", "2"]).await;
    let use_case = GetNotes::owned_by("a");

    let mut reconciler = Reconciler::begin(&db, &use_case);
    reconciler.merge_page(page(&[])).await.unwrap();
    let deleted = reconciler.finish(None).await.unwrap();

    assert_eq!(deleted, 2);
    assert!(ids(&db, "a").is_empty());
  }

  #[tokio::test]
  async fn test_merge_mode_keeps_unlisted() {
    let db = Database::in_memory().unwrap();
    seed(&db, "a", &["1", "2"]).await;
    let use_case = GetNotes::owned_by("a").with_mode(ReconcileMode::Merge);

    let mut reconciler = Reconciler::begin(&db, &use_case);
    reconciler.merge_page(page(&["3"])).await.unwrap();
    let deleted = reconciler.finish(None).await.unwrap();

    assert_eq!(deleted, 0);
    assert_eq!(ids(&db, "a"), vec!["1", "2", "3"]);
  }

  #[tokio::test]
  async fn test_delete_scope_mode() {
    let db = Database::in_memory().unwrap();
    seed(&db, "a", &["1", "2"]).await;
    seed(&db, "b", &["3"]).await;
    let use_case = GetNotes::owned_by("a").with_mode(ReconcileMode::DeleteScope);

    let mut reconciler = Reconciler::begin(&db, &use_case);
    reconciler.merge_page(page(&[])).await.unwrap();
    assert_eq!(reconciler.finish(None).await.unwrap(), 2);

    assert!(ids(&db, "a").is_empty());
    assert_eq!(ids(&db, "b"), vec!["3"]);
  }

  #[tokio::test]
  async fn test_candidate_moved_out_of_scope_survives() {
    let db = Database::in_memory().unwrap();
    seed(&db, "a", &["1", "2"]).await;
    let use_case = GetNotes::owned_by("a");

    let mut reconciler = Reconciler::begin(&db, &use_case);
    reconciler.merge_page(page(&["1"])).await.unwrap();
    // Another run re-homes record 2 before this one finishes
    seed(&db, "b", &["2"]).await;
    let deleted = reconciler.finish(None).await.unwrap();

    assert_eq!(deleted, 0);
    assert_eq!(ids(&db, "b"), vec!["2"]);
  }
}
