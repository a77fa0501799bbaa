//! Operating modes of a [`Connection`](super::connection::Connection).

use crate::error::{LimsError, LimsResult};

/// How a connection splits work between the LIMS and the local cache.
///
/// Resolved once at construction; every routing decision reads the
/// [`Policy`] derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
  /// No LIMS access at all; serve and record everything locally from fixtures.
  LocalOnly,
  /// Read from fixtures first, then the LIMS, and save every read back to fixtures.
  TestdataUpdate,
  /// Read through to the LIMS but keep every write in the local cache.
  RemoteReadOnly,
  /// Talk to the LIMS only.
  Normal,
}

/// The routing switches fixed by a [`Mode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
  pub write_remote: bool,
  pub read_remote: bool,
  pub disable_local: bool,
  pub persist_reads_to_local: bool,
}

impl Mode {
  /// Pick the mode from the constructor flags.
  ///
  /// `local_only` and `testdata_update_mode` conflict. Otherwise the first
  /// set flag wins in the order local-only, testdata-update, remote-read-only.
  pub fn resolve(
    local_only: bool,
    testdata_update_mode: bool,
    remote_is_read_only: bool,
  ) -> LimsResult<Self> {
    match (local_only, testdata_update_mode, remote_is_read_only) {
      (true, true, _) => Err(LimsError::Config(
        "You cannot use local_only with testdata_update_mode".to_string(),
      )),
      (true, false, _) => Ok(Mode::LocalOnly),
      (false, true, _) => Ok(Mode::TestdataUpdate),
      (false, false, true) => Ok(Mode::RemoteReadOnly),
      (false, false, false) => Ok(Mode::Normal),
    }
  }

  pub const fn policy(self) -> Policy {
    match self {
      Mode::LocalOnly => Policy {
        write_remote: false,
        read_remote: false,
        disable_local: false,
        persist_reads_to_local: false,
      },
      Mode::TestdataUpdate => Policy {
        write_remote: false,
        read_remote: true,
        disable_local: false,
        persist_reads_to_local: true,
      },
      Mode::RemoteReadOnly => Policy {
        write_remote: false,
        read_remote: true,
        disable_local: false,
        persist_reads_to_local: false,
      },
      Mode::Normal => Policy {
        write_remote: true,
        read_remote: true,
        disable_local: true,
        persist_reads_to_local: false,
      },
    }
  }

  /// Whether the local tables are seeded from the fixture directory.
  pub const fn loads_fixtures(self) -> bool {
    matches!(self, Mode::LocalOnly | Mode::TestdataUpdate)
  }

  /// Whether LIMS credentials must be present.
  pub const fn requires_credentials(self) -> bool {
    !matches!(self, Mode::LocalOnly)
  }

  pub fn description(self) -> &'static str {
    match self {
      Mode::LocalOnly => "Running in local only mode",
      Mode::TestdataUpdate => "Running in testdata update mode",
      Mode::RemoteReadOnly => {
        "Running in remote is read only mode. No changes will be made to the remote LIMS"
      }
      Mode::Normal => "Running in normal mode, reading from and writing to remote LIMS",
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn switches(mode: Mode) -> (bool, bool, bool, bool) {
    let p = mode.policy();
    (
      p.write_remote,
      p.read_remote,
      p.disable_local,
      p.persist_reads_to_local,
    )
  }

  #[test]
  fn test_policy_table() {
    assert_eq!(switches(Mode::LocalOnly), (false, false, false, false));
    assert_eq!(switches(Mode::TestdataUpdate), (false, true, false, true));
    assert_eq!(switches(Mode::RemoteReadOnly), (false, true, false, false));
    assert_eq!(switches(Mode::Normal), (true, true, true, false));
  }

  #[test]
  fn test_resolve() {
    assert_eq!(Mode::resolve(true, false, false).unwrap(), Mode::LocalOnly);
    assert_eq!(Mode::resolve(true, false, true).unwrap(), Mode::LocalOnly);
    assert_eq!(
      Mode::resolve(false, true, true).unwrap(),
      Mode::TestdataUpdate
    );
    assert_eq!(
      Mode::resolve(false, false, true).unwrap(),
      Mode::RemoteReadOnly
    );
    assert_eq!(Mode::resolve(false, false, false).unwrap(), Mode::Normal);
  }

  #[test]
  fn test_local_only_conflicts_with_testdata_update() {
    assert!(matches!(
      Mode::resolve(true, true, false),
      Err(LimsError::Config(_))
    ));
  }

  #[test]
  fn test_fixture_loading_and_credentials() {
    assert!(Mode::LocalOnly.loads_fixtures());
    assert!(Mode::TestdataUpdate.loads_fixtures());
    assert!(!Mode::RemoteReadOnly.loads_fixtures());
    assert!(!Mode::Normal.loads_fixtures());
    assert!(!Mode::LocalOnly.requires_credentials());
    assert!(Mode::Normal.requires_credentials());
  }
}
