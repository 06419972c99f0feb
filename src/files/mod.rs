//! Logical files and their revision histories.
//!
//! A logical file is identified by its case-insensitive filename; every
//! accepted detection appends one revision. Retention caps the number of
//! tracked files (oldest-first eviction) and, optionally, revisions per file.

pub mod storage;
pub mod types;

pub use types::*;
