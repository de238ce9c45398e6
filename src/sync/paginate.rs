//! Pagination driver: follow next-page cursors until exhausted.

use futures::stream::{self, Stream};
use tracing::debug;

use super::cancel::CancelToken;
use super::use_case::{Page, UseCase};
use crate::error::SyncError;
use crate::request::RequestDescriptor;
use crate::session::Session;
use crate::transport::Transport;

enum PageState {
  Next(RequestDescriptor, usize),
  Exhausted,
}

/// Lazily fetch every page of `use_case`'s request.
///
/// A request is only sent when the stream is polled, so the consumer decides
/// when the next page goes out (after it has merged the previous one). The
/// stream yields an error once and ends on transport or decode failure, or
/// when `cancel` fires before the next request. With `load_all_pages` off it
/// stops after the first page.
pub fn fetch_pages<'a, U: UseCase>(
  transport: &'a dyn Transport,
  session: &'a Session,
  use_case: &'a U,
  load_all_pages: bool,
  cancel: CancelToken,
) -> impl Stream<Item = Result<Page<U::Remote>, SyncError>> + Send + 'a {
  stream::try_unfold(PageState::Next(use_case.request(), 1), move |state| {
    next_page(transport, session, use_case, load_all_pages, cancel.clone(), state)
  })
}

async fn next_page<U: UseCase>(
  transport: &dyn Transport,
  session: &Session,
  use_case: &U,
  load_all_pages: bool,
  cancel: CancelToken,
  state: PageState,
) -> Result<Option<(Page<U::Remote>, PageState)>, SyncError> {
  let (request, number) = match state {
    PageState::Next(request, number) => (request, number),
    PageState::Exhausted => return Ok(None),
  };

  if cancel.is_cancelled() {
    debug!(page = number, "pagination cancelled");
    return Err(SyncError::Cancelled);
  }

  debug!(page = number, path = %request.path, "fetching page");
  let response = tokio::select! {
    biased;
    _ = cancel.cancelled() => return Err(SyncError::Cancelled),
    response = transport.send(&request, session) => response?,
  };
  let page = use_case.decode_page(&response)?;

  let next = match &page.next_cursor {
    Some(cursor) if load_all_pages => {
      PageState::Next(use_case.next_request(&request, cursor), number + 1)
    }
    _ => PageState::Exhausted,
  };
  debug!(page = number, items = page.items.len(), more = matches!(next, PageState::Next(..)), "page decoded");

  Ok(Some((page, next)))
}
