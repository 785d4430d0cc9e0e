//! Container placement on the leader.
//!
//! Placement decides which worker each container runs on:
//! - Evicting containers whose placement rules no longer hold
//! - Assigning unassigned containers to the least loaded valid worker
//!
//! The resulting assignment is the `minion` field of each container row.

mod constraint;
mod context;
mod heap;
mod master;

pub use constraint::valid_placement;
pub use context::PlacementContext;
pub use master::{MasterScheduler, PlacementStats};
