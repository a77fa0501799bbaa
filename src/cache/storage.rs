//! JSON fixture-file storage for the local cache.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::ser::PrettyFormatter;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::traits::Table;
use crate::error::{LimsError, LimsResult};

/// Default fixture directory, relative to the working directory.
pub const DEFAULT_FIXTURE_DIR: &str = "testdata";

/// Fixture directory holding one pretty-printed JSON file per table.
///
/// Writing is refused unless the tables were loaded from this directory
/// first, so partial runtime state can't replace curated fixtures.
#[derive(Debug, Clone)]
pub struct FixtureStorage {
  root: PathBuf,
  loaded: bool,
}

impl FixtureStorage {
  pub fn new(root: impl Into<PathBuf>, loaded: bool) -> Self {
    Self {
      root: root.into(),
      loaded,
    }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn path(&self, table: Table) -> PathBuf {
    self.root.join(table.file_name())
  }

  /// Load a table; a missing or malformed file yields an empty table.
  pub fn load<T: DeserializeOwned + Default>(&self, table: Table) -> T {
    let path = self.path(table);

    let contents = match fs::read_to_string(&path) {
      Ok(contents) => contents,
      Err(e) => {
        warn!(path = %path.display(), error = %e, "Could not load testdata");
        return T::default();
      }
    };

    match serde_json::from_str(&contents) {
      Ok(data) => {
        debug!(path = %path.display(), "Loaded testdata");
        data
      }
      Err(e) => {
        warn!(path = %path.display(), error = %e, "Could not parse testdata");
        T::default()
      }
    }
  }

  /// Replace a table's file with a snapshot of `data`.
  ///
  /// Output is indented by four spaces with object keys sorted.
  pub fn write<T: Serialize>(&self, table: Table, data: &T) -> LimsResult<()> {
    let path = self.path(table);
    if !self.loaded {
      return Err(LimsError::PersistenceGuard { path });
    }

    // Going through Value sorts struct fields along with map keys.
    let value = serde_json::to_value(data)?;
    let mut buf = Vec::new();
    let mut serializer =
      serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
    value.serialize(&mut serializer)?;
    buf.push(b'\n');

    fs::create_dir_all(&self.root)?;
    fs::write(&path, buf)?;
    debug!(path = %path.display(), "Wrote testdata");

    Ok(())
  }
}
