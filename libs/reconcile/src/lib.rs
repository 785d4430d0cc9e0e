//! Reconciliation primitives.
//!
//! Every loop that converges actual state toward desired state needs to line
//! up two differently-shaped collections and decide what to keep, what to
//! create, and what to tear down. This library provides:
//!
//! - [`join`]: pairs elements by a caller-supplied compatibility score.
//! - [`hash_join`]: pairs elements by exact key equality in linear time.
//! - [`ContentDigest`]: a stable digest of file contents, used to label
//!   running containers so their mounted files can be compared later.
//!
//! # Invariants
//!
//! - No element is ever placed in more than one pair.
//! - A negative score forbids a pairing outright.
//! - Given the same inputs, [`join`] always produces the same output.

mod digest;
mod join;

pub use digest::ContentDigest;
pub use join::{hash_join, hash_join_by_value, join, Joined, Pair, Score};
