//! berth scheduler library.
//!
//! Decides which worker each container runs on and keeps each worker's
//! container runtime in line with that decision.
//!
//! ## Architecture
//!
//! ```text
//! SchedulerLoop (one per machine, ticks on change or interval)
//! ├── MasterScheduler   (leader only: evict, then place)
//! └── WorkerReconciler  (workers: secrets, evaluate, diff, boot/kill)
//! ```
//!
//! ## Modules
//!
//! - `placement`: placement rules, load heap and the master scheduler
//! - `worker`: secret substitution, runtime diff and the worker reconciler
//! - `runtime`, `secrets`, `dataplane`: external collaborator contracts with
//!   in-memory implementations
//! - `driver`: the per-machine control loop

pub mod config;
pub mod dataplane;
pub mod driver;
mod error;
pub mod placement;
pub mod runtime;
pub mod secrets;
pub mod worker;

pub use driver::{SchedulerLoop, SchedulerLoopConfig, TickOutcome};
pub use error::{SchedulerError, SchedulerResult};
