//! Local cache of LIMS entities backed by JSON fixture files.
//!
//! This module provides the offline half of the client:
//! - In-memory tables for run info, sample sheets and result records
//! - Loading from and flushing to one fixture file per table
//! - Surrogate ids for records created without the LIMS
//! - A guard against overwriting fixtures that were never loaded

mod layer;
mod storage;
mod traits;

pub use layer::{LocalStore, RecordTable, SURROGATE_ID_MIN};
pub use storage::{FixtureStorage, DEFAULT_FIXTURE_DIR};
pub use traits::{Record, Table};
