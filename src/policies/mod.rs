//! Restart scheduling policies: backoff computation and crash-window
//! loop detection.

mod backoff;
mod restart;

pub use backoff::Backoff;
pub use restart::{DenyReason, RestartBook, RestartDecision, RestartPolicy};
