//! Helpers for the LIMS REST wire contract.
//!
//! Index endpoints answer with JSON lists; the client works with maps keyed
//! by the string form of each record id, which is also how fixture files
//! store them.

use std::collections::BTreeMap;
use url::Url;

use crate::cache::Record;

/// Records keyed by the string form of their id.
pub type RecordMap<T> = BTreeMap<String, T>;

/// Sample-sheet sub-key meaning "all lanes of the run".
pub const ALL_LANES_KEY: &str = "null";

pub fn sample_sheet_key(lane: Option<u32>) -> String {
  lane
    .map(|l| l.to_string())
    .unwrap_or_else(|| ALL_LANES_KEY.to_string())
}

/// Convert an index response into a map keyed by record id.
pub fn list_to_map<T: Record>(records: Vec<T>) -> RecordMap<T> {
  records
    .into_iter()
    .map(|record| (record.record_id().to_string(), record))
    .collect()
}

/// Filters accepted by the lane-result index.
///
/// The LIMS only honours `barcode` together with `lane`, and `read_number`
/// together with `barcode`; the local index applies the same nesting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaneResultFilter {
  pub lane: Option<u32>,
  pub barcode: Option<String>,
  pub read_number: Option<u32>,
}

impl LaneResultFilter {
  pub fn lane(lane: u32) -> Self {
    Self {
      lane: Some(lane),
      ..Self::default()
    }
  }

  /// The filters that take effect, with nesting applied.
  pub fn effective(&self) -> Self {
    let lane = self.lane;
    let barcode = lane.and(self.barcode.clone());
    let read_number = barcode.as_ref().and(self.read_number);
    Self {
      lane,
      barcode,
      read_number,
    }
  }

  pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
    let effective = self.effective();
    let mut pairs = Vec::new();
    if let Some(lane) = effective.lane {
      pairs.push(("lane", lane.to_string()));
    }
    if let Some(barcode) = effective.barcode {
      pairs.push(("barcode", barcode));
    }
    if let Some(read_number) = effective.read_number {
      pairs.push(("read_number", read_number.to_string()));
    }
    pairs
  }
}

/// Render a request URL for error messages without leaking the access token.
pub fn redact_token(url: &Url) -> String {
  let mut redacted = url.clone();
  let pairs: Vec<(String, String)> = url
    .query_pairs()
    .map(|(k, v)| {
      let value = if k == "token" {
        "REDACTED".to_string()
      } else {
        v.into_owned()
      };
      (k.into_owned(), value)
    })
    .collect();

  if pairs.is_empty() {
    return redacted.to_string();
  }

  redacted.query_pairs_mut().clear().extend_pairs(pairs);
  redacted.to_string()
}
