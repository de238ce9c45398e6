//! Offline sync layer for learning-management data.
//!
//! Remote collections are fetched page by page through a [`transport`],
//! reconciled into a local [`store`] scope by scope, and skipped while their
//! cache key is still fresh. The [`lms`] module holds the concrete features.

pub mod error;
pub mod lms;
pub mod request;
pub mod session;
pub mod store;
pub mod sync;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;
