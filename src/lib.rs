//! Client for a sequencing-center LIMS.
//!
//! [`Connection`] answers reads from a local JSON fixture cache and the
//! remote LIMS, and routes writes to one of them according to its [`Mode`].

pub mod cache;
pub mod config;
pub mod error;
pub mod lims;

pub use config::{Config, Credentials};
pub use error::{LimsError, LimsResult};
pub use lims::{Connection, ConnectionOptions, LaneResultFilter, LimsApi, LimsClient, Mode, Policy};
