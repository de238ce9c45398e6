//! Remote-to-local synchronization.
//!
//! A [`UseCase`] describes one remote collection and the local scope it
//! owns. The [`SyncEngine`] runs it: the TTL gate decides whether to go to the
//! network, [`fetch_pages`] follows next-page cursors, and the [`Reconciler`]
//! merges every page and sweeps what the server no longer returns.

mod cancel;
mod engine;
mod paginate;
mod progress;
mod reconcile;
mod task;
mod ttl;
mod use_case;

pub use cancel::{CancelHandle, CancelToken};
pub use engine::{FetchOptions, SyncEngine, SyncOutcome};
pub use paginate::fetch_pages;
pub use progress::{ProgressReporter, SyncProgress};
pub use reconcile::Reconciler;
pub use task::{SyncTask, TaskState};
pub use ttl::{is_expired, TtlGate};
pub use use_case::{Page, ReconcileMode, UseCase, DEFAULT_TTL};
