//! Worker-side container reconciliation.

mod evaluate;
mod reconciler;
mod sync;

pub use evaluate::{evaluate, referenced_secrets, waiting_status, EvaluatedContainer};
pub use reconciler::{WorkerConfig, WorkerReconciler, WorkerStats};
pub use sync::{sync_worker, RuntimeMatch, SyncPlan};
