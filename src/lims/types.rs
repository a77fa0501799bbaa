//! Domain records exchanged with the LIMS.
//!
//! Each record names the fields the client actually reasons about and keeps
//! everything else in a flattened `extra` map, so records round-trip through
//! the fixture files without losing LIMS fields we don't model.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use crate::error::{LimsError, LimsResult};

// ============================================================================
// Identifiers
// ============================================================================

/// Numeric LIMS identifier.
///
/// The LIMS hands out integers, fixture files key records by their string
/// form, and some payloads quote ids. All lookups go through `to_string()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl FromStr for RecordId {
  type Err = std::num::ParseIntError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    s.trim().parse().map(RecordId)
  }
}

impl From<u64> for RecordId {
  fn from(value: u64) -> Self {
    RecordId(value)
  }
}

impl Serialize for RecordId {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(self.0)
  }
}

impl<'de> Deserialize<'de> for RecordId {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
      Number(u64),
      Text(String),
    }

    match Raw::deserialize(deserializer)? {
      Raw::Number(n) => Ok(RecordId(n)),
      Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
  }
}

/// Treat an explicit JSON `null` like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
  D: Deserializer<'de>,
  T: Default + Deserialize<'de>,
{
  Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn set<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
  if let Some(v) = value {
    *slot = Some(v.clone());
  }
}

/// Copy open-ended update fields into a record, skipping the record's own
/// named fields (those are either immutable or set through the typed slots).
fn merge_extra(target: &mut Map<String, Value>, updates: &Map<String, Value>, named: &[&str]) {
  for (key, value) in updates {
    if named.contains(&key.as_str()) {
      warn!(field = %key, "Ignoring update to a field that cannot be changed");
      continue;
    }
    target.insert(key.clone(), value.clone());
  }
}

// ============================================================================
// Run info
// ============================================================================

/// Allowed values of `run_info.sequencing_run_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencingRunStatus {
  Preprocessing,
  Sequencing,
  Done,
  Failed,
  Exception,
}

impl SequencingRunStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Preprocessing => "preprocessing",
      Self::Sequencing => "sequencing",
      Self::Done => "sequencing_done",
      Self::Failed => "sequencing_failed",
      Self::Exception => "sequencing_exception",
    }
  }
}

impl FromStr for SequencingRunStatus {
  type Err = LimsError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "preprocessing" => Ok(Self::Preprocessing),
      "sequencing" => Ok(Self::Sequencing),
      "sequencing_done" => Ok(Self::Done),
      "sequencing_failed" => Ok(Self::Failed),
      "sequencing_exception" => Ok(Self::Exception),
      other => Err(LimsError::InvalidArgument(format!(
        "unknown sequencing run status \"{}\"",
        other
      ))),
    }
  }
}

/// Pipeline run progress as derived from its `started`/`finished` flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineRunState {
  Done,
  InProgress,
  New,
}

impl PipelineRunState {
  /// A missing `finished` flag counts as not finished.
  pub fn classify(status: &PipelineRunStatus) -> Option<Self> {
    let finished = status.finished.unwrap_or(false);
    match (status.started, finished) {
      (_, true) => Some(Self::Done),
      (Some(true), false) => Some(Self::InProgress),
      (Some(false), false) => Some(Self::New),
      (None, false) => None,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Done => "done",
      Self::InProgress => "inprogress",
      Self::New => "new",
    }
  }
}

impl FromStr for PipelineRunState {
  type Err = LimsError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "done" => Ok(Self::Done),
      "inprogress" => Ok(Self::InProgress),
      "new" => Ok(Self::New),
      other => Err(LimsError::InvalidArgument(format!(
        "Invalid pipeline run status \"{}\" was requested. Valid values are done, inprogress, new",
        other
      ))),
    }
  }
}

/// A notification contact on a lane.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contact {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub email: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

/// One lane of a run, keyed by lane number inside `RunDetails::lanes`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Lane {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<RecordId>,
  #[serde(default, deserialize_with = "null_as_default")]
  pub notify: Vec<Contact>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub submitter_email: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

/// Pipeline run summary embedded in run info.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineRunStatus {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub started: Option<bool>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub finished: Option<bool>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunDetails {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub run_name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub sequencing_run_status: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub platform_name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub analysis_done: Option<bool>,
  #[serde(default, deserialize_with = "null_as_default")]
  pub lanes: BTreeMap<String, Lane>,
  #[serde(
    default,
    deserialize_with = "null_as_default",
    skip_serializing_if = "BTreeMap::is_empty"
  )]
  pub pipeline_runs: BTreeMap<String, PipelineRunStatus>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

/// Run metadata as returned by the `run_info` endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<RecordId>,
  #[serde(default)]
  pub run_info: RunDetails,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl RunInfo {
  pub fn run_name(&self) -> Option<&str> {
    self.run_info.run_name.as_deref()
  }

  /// Parsed sequencing status; `None` if absent or unrecognised.
  pub fn run_status(&self) -> Option<SequencingRunStatus> {
    self
      .run_info
      .sequencing_run_status
      .as_deref()
      .and_then(|s| s.parse().ok())
  }

  pub fn lane(&self, lane: u32) -> Option<&Lane> {
    self.run_info.lanes.get(&lane.to_string())
  }

  pub fn lane_id(&self, lane: u32) -> Option<RecordId> {
    self.lane(lane).and_then(|l| l.id)
  }

  pub fn lane_ids(&self) -> Vec<RecordId> {
    self.run_info.lanes.values().filter_map(|l| l.id).collect()
  }

  /// Lane numbers present in this run, in numeric order.
  pub fn lane_numbers(&self) -> Vec<u32> {
    let mut numbers: Vec<u32> = self
      .run_info
      .lanes
      .keys()
      .filter_map(|k| match k.parse() {
        Ok(n) => Some(n),
        Err(_) => {
          warn!(lane = %k, "Skipping lane with a non-numeric key");
          None
        }
      })
      .collect();
    numbers.sort_unstable();
    numbers
  }

  /// Redirect every notification address on every lane to `email`.
  pub fn override_owner(&mut self, email: &str) {
    for lane in self.run_info.lanes.values_mut() {
      for contact in &mut lane.notify {
        contact.email = Some(email.to_string());
      }
      lane.submitter_email = Some(email.to_string());
    }
  }

  /// The pipeline run with the highest id in the requested state.
  pub fn latest_pipeline_run(
    &self,
    state: PipelineRunState,
  ) -> LimsResult<(&str, &PipelineRunStatus)> {
    self
      .run_info
      .pipeline_runs
      .iter()
      .filter(|(_, run)| PipelineRunState::classify(run) == Some(state))
      .max_by(|(a, _), (b, _)| (a.parse::<u64>().ok(), *a).cmp(&(b.parse::<u64>().ok(), *b)))
      .map(|(id, run)| (id.as_str(), run))
      .ok_or_else(|| LimsError::not_found("pipeline run with status", state.as_str()))
  }

  /// Sequencing finished, nothing analysed yet, and the platform is supported
  /// by the analysis pipeline.
  pub fn needs_analysis(&self) -> bool {
    self.run_status() == Some(SequencingRunStatus::Done)
      && self.run_info.analysis_done != Some(true)
      && self.run_info.pipeline_runs.is_empty()
      && !self
        .run_info
        .platform_name
        .as_deref()
        .is_some_and(is_hiseq_4000)
  }
}

fn is_hiseq_4000(platform: &str) -> bool {
  let normalized: String = platform
    .chars()
    .filter(|c| c.is_ascii_alphanumeric())
    .collect::<String>()
    .to_ascii_lowercase();
  normalized.contains("hiseq4000")
}

// ============================================================================
// Result records
// ============================================================================

/// A sequencing instrument run (`solexa_runs`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolexaRun {
  pub id: RecordId,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub sequencing_run_status: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub analysis_done: Option<bool>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolexaRunUpdate {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub sequencing_run_status: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub analysis_done: Option<bool>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl SolexaRun {
  const NAMED: &'static [&'static str] = &["id", "name", "sequencing_run_status", "analysis_done"];

  pub fn apply(&mut self, update: &SolexaRunUpdate) {
    set(&mut self.sequencing_run_status, &update.sequencing_run_status);
    set(&mut self.analysis_done, &update.analysis_done);
    merge_extra(&mut self.extra, &update.extra, Self::NAMED);
  }
}

/// One execution of the analysis pipeline (`solexa_pipeline_runs`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
  pub id: RecordId,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub solexa_run_id: Option<RecordId>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub started: Option<bool>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub finished: Option<bool>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub active: Option<bool>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub start_time: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub created_at: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub pass_read_count: Option<u64>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineRunUpdate {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub started: Option<bool>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub finished: Option<bool>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub active: Option<bool>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub start_time: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub pass_read_count: Option<u64>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl PipelineRun {
  const NAMED: &'static [&'static str] = &[
    "id",
    "solexa_run_id",
    "started",
    "finished",
    "active",
    "start_time",
    "created_at",
    "pass_read_count",
  ];

  pub fn apply(&mut self, update: &PipelineRunUpdate) {
    set(&mut self.started, &update.started);
    set(&mut self.finished, &update.finished);
    set(&mut self.active, &update.active);
    set(&mut self.start_time, &update.start_time);
    set(&mut self.pass_read_count, &update.pass_read_count);
    merge_extra(&mut self.extra, &update.extra, Self::NAMED);
  }
}

/// Demultiplexing/analysis output for one lane (`solexa_lane_results`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaneResult {
  pub id: RecordId,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub solexa_lane_id: Option<RecordId>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub solexa_pipeline_run_id: Option<RecordId>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub barcode: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub read_number: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub active: Option<bool>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub created_at: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LaneResultUpdate {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub solexa_pipeline_run_id: Option<RecordId>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub barcode: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub read_number: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub active: Option<bool>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl LaneResult {
  const NAMED: &'static [&'static str] = &[
    "id",
    "solexa_lane_id",
    "solexa_pipeline_run_id",
    "barcode",
    "read_number",
    "active",
    "created_at",
  ];

  pub fn apply(&mut self, update: &LaneResultUpdate) {
    set(&mut self.solexa_pipeline_run_id, &update.solexa_pipeline_run_id);
    set(&mut self.barcode, &update.barcode);
    set(&mut self.read_number, &update.read_number);
    set(&mut self.active, &update.active);
    merge_extra(&mut self.extra, &update.extra, Self::NAMED);
  }
}

/// Alignment output attached to a lane result (`mapper_results`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapperResult {
  pub id: RecordId,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub dataset_id: Option<RecordId>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub active: Option<bool>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub created_at: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapperResultUpdate {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub dataset_id: Option<RecordId>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub active: Option<bool>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl MapperResult {
  const NAMED: &'static [&'static str] = &["id", "dataset_id", "active", "created_at"];

  pub fn apply(&mut self, update: &MapperResultUpdate) {
    set(&mut self.dataset_id, &update.dataset_id);
    set(&mut self.active, &update.active);
    merge_extra(&mut self.extra, &update.extra, Self::NAMED);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn sample_run_info() -> RunInfo {
    serde_json::from_value(json!({
      "id": 77,
      "run_info": {
        "run_name": "141117_MONK_0387_AC4JCDACXX",
        "sequencing_run_status": "sequencing_done",
        "platform_name": "HiSeq 2000",
        "flow_cell": "AC4JCDACXX",
        "lanes": {
          "1": {
            "id": 701,
            "notify": [{"email": "pi@lab.edu", "name": "PI"}, {"email": "tech@lab.edu"}],
            "submitter_email": "sub@lab.edu",
            "sample_name": "liver"
          },
          "2": {"id": 702, "notify": null, "submitter_email": "other@lab.edu"}
        }
      }
    }))
    .unwrap()
  }

  #[test]
  fn test_record_id_accepts_numbers_and_strings() {
    let a: RecordId = serde_json::from_value(json!(42)).unwrap();
    let b: RecordId = serde_json::from_value(json!("42")).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.to_string(), "42");
    assert_eq!(serde_json::to_value(a).unwrap(), json!(42));
  }

  #[test]
  fn test_run_info_keeps_unmodelled_fields() {
    let info = sample_run_info();
    assert_eq!(info.run_info.extra["flow_cell"], json!("AC4JCDACXX"));
    assert_eq!(info.run_info.lanes["1"].extra["sample_name"], json!("liver"));
    assert_eq!(info.run_info.lanes["1"].notify[0].extra["name"], json!("PI"));
    assert!(info.run_info.lanes["2"].notify.is_empty());

    let back: RunInfo = serde_json::from_value(serde_json::to_value(&info).unwrap()).unwrap();
    assert_eq!(back, info);
  }

  #[test]
  fn test_override_owner_replaces_only_emails() {
    let mut info = sample_run_info();
    info.override_owner("qa@example.org");

    let lane1 = &info.run_info.lanes["1"];
    assert!(lane1
      .notify
      .iter()
      .all(|c| c.email.as_deref() == Some("qa@example.org")));
    assert_eq!(lane1.submitter_email.as_deref(), Some("qa@example.org"));
    assert_eq!(lane1.notify[0].extra["name"], json!("PI"));
    assert_eq!(lane1.extra["sample_name"], json!("liver"));
    assert_eq!(
      info.run_info.lanes["2"].submitter_email.as_deref(),
      Some("qa@example.org")
    );
    assert_eq!(info.run_name(), Some("141117_MONK_0387_AC4JCDACXX"));
  }

  #[test]
  fn test_lane_lookups() {
    let info = sample_run_info();
    assert_eq!(info.lane_id(1), Some(RecordId(701)));
    assert_eq!(info.lane_id(3), None);
    assert_eq!(info.lane_numbers(), vec![1, 2]);
    assert_eq!(info.lane_ids(), vec![RecordId(701), RecordId(702)]);
  }

  #[test]
  fn test_run_status() {
    let info = sample_run_info();
    assert_eq!(info.run_status(), Some(SequencingRunStatus::Done));
  }

  #[test]
  fn test_latest_pipeline_run_uses_numeric_order() {
    let mut info = sample_run_info();
    info.run_info.pipeline_runs = serde_json::from_value(json!({
      "9": {"started": true, "finished": true},
      "10": {"started": true, "finished": true},
      "11": {"started": true, "finished": false},
      "12": {"started": false, "finished": false}
    }))
    .unwrap();

    let (id, _) = info.latest_pipeline_run(PipelineRunState::Done).unwrap();
    assert_eq!(id, "10");
    let (id, _) = info
      .latest_pipeline_run(PipelineRunState::InProgress)
      .unwrap();
    assert_eq!(id, "11");
    let (id, _) = info.latest_pipeline_run(PipelineRunState::New).unwrap();
    assert_eq!(id, "12");
  }

  #[test]
  fn test_latest_pipeline_run_missing_state_is_not_found() {
    let info = sample_run_info();
    let err = info.latest_pipeline_run(PipelineRunState::Done).unwrap_err();
    assert!(matches!(err, LimsError::NotFound { .. }));
  }

  #[test]
  fn test_pipeline_run_state_parse() {
    assert_eq!(
      "inprogress".parse::<PipelineRunState>().unwrap(),
      PipelineRunState::InProgress
    );
    assert!("finished".parse::<PipelineRunState>().is_err());
  }

  #[test]
  fn test_needs_analysis() {
    let mut info = sample_run_info();
    assert!(info.needs_analysis());

    info.run_info.platform_name = Some("HiSeq_4000".to_string());
    assert!(!info.needs_analysis());

    let mut info = sample_run_info();
    info.run_info.analysis_done = Some(true);
    assert!(!info.needs_analysis());

    let mut info = sample_run_info();
    info.run_info.sequencing_run_status = Some("sequencing".to_string());
    assert!(!info.needs_analysis());

    let mut info = sample_run_info();
    info
      .run_info
      .pipeline_runs
      .insert("5".to_string(), PipelineRunStatus::default());
    assert!(!info.needs_analysis());
  }

  #[test]
  fn test_update_merges_named_and_open_fields() {
    let mut run: PipelineRun = serde_json::from_value(json!({
      "id": 5,
      "solexa_run_id": 77,
      "started": true,
      "finished": false,
      "comment": "old"
    }))
    .unwrap();

    let update: PipelineRunUpdate = serde_json::from_value(json!({
      "finished": true,
      "comment": "new",
      "id": 9999,
      "lane": 3
    }))
    .unwrap();
    run.apply(&update);

    assert_eq!(run.id, RecordId(5));
    assert_eq!(run.started, Some(true));
    assert_eq!(run.finished, Some(true));
    assert_eq!(run.extra["comment"], json!("new"));
    assert_eq!(run.extra["lane"], json!(3));
    assert!(!run.extra.contains_key("id"));
  }

  #[test]
  fn test_update_serializes_only_set_fields() {
    let update = LaneResultUpdate {
      active: Some(false),
      ..Default::default()
    };
    assert_eq!(serde_json::to_value(&update).unwrap(), json!({"active": false}));
  }
}
