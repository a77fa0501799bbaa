//! Error types for the LIMS client library.

use std::path::PathBuf;

/// Top-level error enum for the LIMS client library.
#[derive(Debug, thiserror::Error)]
pub enum LimsError {
  /// Missing credentials, conflicting mode flags, bad override email, bad config file.
  #[error("Configuration error: {0}")]
  Config(String),

  /// Neither the local cache nor the remote LIMS had the requested record.
  #[error("{what} for {key} could not be found")]
  NotFound { what: &'static str, key: String },

  /// The LIMS answered with a non-success HTTP status.
  #[error("{status} response. {reason}. {url}")]
  Status {
    status: u16,
    reason: String,
    url: String,
  },

  #[error("HTTP request failed: {0}")]
  Http(#[from] reqwest::Error),

  #[error("Invalid argument: {0}")]
  InvalidArgument(String),

  /// A create or update came back empty.
  #[error("Failed to {operation}: {detail}")]
  WriteFailed {
    operation: &'static str,
    detail: String,
  },

  /// Flushing an in-memory table that was never loaded from disk.
  #[error(
    "Local testdata was not loaded, so writing {} would overwrite the current testdata. Stopping without save.",
    path.display()
  )]
  PersistenceGuard { path: PathBuf },

  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),

  #[error("JSON error: {0}")]
  Json(#[from] serde_json::Error),
}

impl LimsError {
  pub(crate) fn not_found(what: &'static str, key: impl ToString) -> Self {
    Self::NotFound {
      what,
      key: key.to_string(),
    }
  }

  pub(crate) fn write_failed(operation: &'static str, detail: impl Into<String>) -> Self {
    Self::WriteFailed {
      operation,
      detail: detail.into(),
    }
  }
}

pub type LimsResult<T> = Result<T, LimsError>;
