//! Stored version log.
//!
//! Versions are stored in an append-only log with an identity index
//! for O(1) lookup of the latest version of a sample.

mod index;
mod log;

pub use index::{IdentityIndex, IndexEntry};
pub use log::{VersionIterator, VersionLog};
