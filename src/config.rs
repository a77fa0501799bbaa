use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{LimsError, LimsResult};

/// Environment variables consulted for the LIMS base URL, in order.
pub const URL_ENV_VARS: [&str; 2] = ["LIMS_URL", "UHTS_LIMS_URL"];
/// Environment variables consulted for the LIMS access token, in order.
pub const TOKEN_ENV_VARS: [&str; 2] = ["LIMS_TOKEN", "UHTS_LIMS_TOKEN"];

pub const DEFAULT_API_VERSION: &str = "v1";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub lims: LimsConfig,
  /// Address that replaces every notification email in run info
  pub override_owner: Option<String>,
  /// Directory holding the JSON fixture files (defaults to ./testdata)
  pub fixture_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimsConfig {
  pub url: Option<String>,
  #[serde(default = "default_api_version")]
  pub api_version: String,
  /// Validate the server's TLS certificate
  #[serde(default)]
  pub verify_cert: bool,
}

impl Default for LimsConfig {
  fn default() -> Self {
    Self {
      url: None,
      api_version: default_api_version(),
      verify_cert: false,
    }
  }
}

fn default_api_version() -> String {
  DEFAULT_API_VERSION.to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided (must exist)
  /// 2. ./lims.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/lims/config.yaml
  ///
  /// The file is optional; with none found every setting takes its default.
  pub fn load(explicit_path: Option<&Path>) -> LimsResult<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(LimsError::Config(format!(
          "Config file not found: {}",
          p.display()
        )));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("lims.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("lims").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  pub fn load_from_path(path: &Path) -> LimsResult<Self> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
      LimsError::Config(format!(
        "Failed to read config file {}: {}",
        path.display(),
        e
      ))
    })?;

    let config: Config = serde_yaml::from_str(&contents).map_err(|e| {
      LimsError::Config(format!(
        "Failed to parse config file {}: {}",
        path.display(),
        e
      ))
    })?;

    Ok(config)
  }
}

/// LIMS base URL and access token.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
  pub url: String,
  pub token: String,
}

impl fmt::Debug for Credentials {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Credentials")
      .field("url", &self.url)
      .field("token", &"<redacted>")
      .finish()
  }
}

impl Credentials {
  /// Resolve credentials from explicit values, falling back to `lookup`
  /// for the environment.
  ///
  /// Empty values count as missing.
  pub fn resolve_with(
    url: Option<&str>,
    token: Option<&str>,
    lookup: impl Fn(&str) -> Option<String>,
  ) -> LimsResult<Self> {
    let pick = |explicit: Option<&str>, vars: &[&str]| -> Option<String> {
      explicit
        .filter(|v| !v.is_empty())
        .map(String::from)
        .or_else(|| {
          vars
            .iter()
            .filter_map(|name| lookup(*name))
            .find(|v| !v.is_empty())
        })
    };

    let url = pick(url, &URL_ENV_VARS).ok_or_else(|| {
      LimsError::Config(format!(
        "lims_url is required unless running in local_only mode. Pass it explicitly or set {}",
        URL_ENV_VARS.join(" or ")
      ))
    })?;
    let token = pick(token, &TOKEN_ENV_VARS).ok_or_else(|| {
      LimsError::Config(format!(
        "lims_token is required unless running in local_only mode. Pass it explicitly or set {}",
        TOKEN_ENV_VARS.join(" or ")
      ))
    })?;

    Ok(Self { url, token })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect();
    move |name| map.get(name).cloned()
  }

  #[test]
  fn test_explicit_credentials_win() {
    let creds = Credentials::resolve_with(
      Some("https://a"),
      Some("t1"),
      env(&[("LIMS_URL", "https://b"), ("LIMS_TOKEN", "t2")]),
    )
    .unwrap();
    assert_eq!(creds.url, "https://a");
    assert_eq!(creds.token, "t1");
  }

  #[test]
  fn test_env_fallback_order() {
    let creds = Credentials::resolve_with(
      None,
      Some(""),
      env(&[
        ("UHTS_LIMS_URL", "https://old"),
        ("LIMS_URL", "https://new"),
        ("UHTS_LIMS_TOKEN", "legacy"),
      ]),
    )
    .unwrap();
    assert_eq!(creds.url, "https://new");
    assert_eq!(creds.token, "legacy");
  }

  #[test]
  fn test_missing_credentials_is_config_error() {
    let err = Credentials::resolve_with(Some("https://a"), None, env(&[])).unwrap_err();
    assert!(matches!(err, LimsError::Config(msg) if msg.contains("lims_token")));
  }

  #[test]
  fn test_debug_hides_token() {
    let creds = Credentials {
      url: "https://a".to_string(),
      token: "secret".to_string(),
    };
    assert!(!format!("{:?}", creds).contains("secret"));
  }

  #[test]
  fn test_load_yaml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lims.yaml");
    std::fs::write(
      &path,
      "lims:\n  url: https://lims.example.org\n  verify_cert: true\noverride_owner: qa@example.org\nfixture_dir: /tmp/fixtures\n",
    )
    .unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.lims.url.as_deref(), Some("https://lims.example.org"));
    assert_eq!(config.lims.api_version, "v1");
    assert!(config.lims.verify_cert);
    assert_eq!(config.override_owner.as_deref(), Some("qa@example.org"));
    assert_eq!(config.fixture_dir, Some(PathBuf::from("/tmp/fixtures")));
  }

  #[test]
  fn test_explicit_missing_file_is_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(Config::load(Some(&dir.path().join("nope.yaml"))).is_err());
  }
}
