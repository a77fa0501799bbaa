//! LIMS data model, HTTP client and the mode-aware connection facade.

pub mod api_types;
mod cache;
pub mod client;
pub mod connection;
pub mod mode;
pub mod types;

pub use api_types::{LaneResultFilter, RecordMap, ALL_LANES_KEY};
pub use client::{LimsApi, LimsClient};
pub use connection::{Connection, ConnectionOptions, RunObjects};
pub use mode::{Mode, Policy};
pub use types::*;
