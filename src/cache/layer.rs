//! In-memory entity tables backed by fixture files.

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use super::storage::FixtureStorage;
use super::traits::{Record, Table};
use crate::error::LimsResult;
use crate::lims::api_types::{sample_sheet_key, LaneResultFilter, RecordMap};
use crate::lims::types::{
  LaneResult, LaneResultUpdate, MapperResult, MapperResultUpdate, PipelineRun, PipelineRunUpdate,
  RecordId, RunInfo, SolexaRun,
};

/// Lower bound (inclusive) of locally generated ids.
pub const SURROGATE_ID_MIN: u64 = 1_000_000_000_000;
/// Upper bound (exclusive) of locally generated ids.
pub const SURROGATE_ID_MAX: u64 = 2_000_000_000_000;

/// Records of one entity type keyed by the string form of their id.
#[derive(Debug, Clone)]
pub struct RecordTable<T> {
  records: RecordMap<T>,
}

impl<T> Default for RecordTable<T> {
  fn default() -> Self {
    Self {
      records: RecordMap::new(),
    }
  }
}

impl<T: Record> RecordTable<T> {
  pub fn from_map(records: RecordMap<T>) -> Self {
    Self { records }
  }

  pub fn get(&self, id: &str) -> Option<&T> {
    self.records.get(id)
  }

  pub fn insert(&mut self, key: impl Into<String>, record: T) {
    self.records.insert(key.into(), record);
  }

  /// Upsert every entry of `records`.
  pub fn extend(&mut self, records: RecordMap<T>) {
    self.records.extend(records);
  }

  /// Merge `update` into an existing record; `None` if there is no such id.
  pub fn update(&mut self, id: &str, update: &T::Update) -> Option<T> {
    let record = self.records.get_mut(id)?;
    record.apply_update(update);
    Some(record.clone())
  }

  /// Matching records, keyed by their own id.
  pub fn filter(&self, mut predicate: impl FnMut(&T) -> bool) -> RecordMap<T> {
    self
      .records
      .values()
      .filter(|r| predicate(r))
      .map(|r| (r.record_id().to_string(), r.clone()))
      .collect()
  }

  pub fn ids(&self) -> impl Iterator<Item = RecordId> + '_ {
    self.records.values().map(|r| r.record_id())
  }

  pub fn values_mut(&mut self) -> impl Iterator<Item = &mut T> {
    self.records.values_mut()
  }

  pub fn as_map(&self) -> &RecordMap<T> {
    &self.records
  }

  pub fn len(&self) -> usize {
    self.records.len()
  }

  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }
}

/// Local data accessor.
///
/// Holds every entity table in memory, optionally seeded from a fixture
/// directory. A disabled store answers every read with "not found" and
/// every index with an empty map.
#[derive(Debug)]
pub struct LocalStore {
  storage: FixtureStorage,
  disabled: bool,
  run_info: BTreeMap<String, RunInfo>,
  sample_sheets: BTreeMap<String, BTreeMap<String, String>>,
  pub(crate) solexa_runs: RecordTable<SolexaRun>,
  pub(crate) pipeline_runs: RecordTable<PipelineRun>,
  pub(crate) lane_results: RecordTable<LaneResult>,
  pub(crate) mapper_results: RecordTable<MapperResult>,
}

impl LocalStore {
  /// Create a store over `fixture_dir`, loading every table when `load_fixtures` is set.
  pub fn new(fixture_dir: impl Into<PathBuf>, load_fixtures: bool, disabled: bool) -> Self {
    let storage = FixtureStorage::new(fixture_dir, load_fixtures);
    let mut store = Self {
      storage,
      disabled,
      run_info: BTreeMap::new(),
      sample_sheets: BTreeMap::new(),
      solexa_runs: RecordTable::default(),
      pipeline_runs: RecordTable::default(),
      lane_results: RecordTable::default(),
      mapper_results: RecordTable::default(),
    };

    if load_fixtures {
      store.load_all();
    }

    store
  }

  fn load_all(&mut self) {
    self.run_info = self.storage.load(Table::RunInfo);
    self.sample_sheets = self.storage.load(Table::SampleSheets);
    self.solexa_runs = RecordTable::from_map(self.storage.load(Table::SolexaRuns));
    self.pipeline_runs = RecordTable::from_map(self.storage.load(Table::PipelineRuns));
    self.lane_results = RecordTable::from_map(self.storage.load(Table::LaneResults));
    self.mapper_results = RecordTable::from_map(self.storage.load(Table::MapperResults));
    info!(
      dir = %self.storage.root().display(),
      runs = self.run_info.len(),
      pipeline_runs = self.pipeline_runs.len(),
      lane_results = self.lane_results.len(),
      mapper_results = self.mapper_results.len(),
      "Loaded local testdata"
    );
  }

  pub fn is_disabled(&self) -> bool {
    self.disabled
  }

  // --------------------------------------------------------------------------
  // Reads
  // --------------------------------------------------------------------------

  pub fn get_run_info(&self, run: &str) -> Option<RunInfo> {
    if self.disabled {
      return None;
    }
    self.run_info.get(run).cloned()
  }

  pub fn get_sample_sheet(&self, run: &str, lane: Option<u32>) -> Option<String> {
    if self.disabled {
      return None;
    }
    self
      .sample_sheets
      .get(run)
      .and_then(|lanes| lanes.get(&sample_sheet_key(lane)))
      .cloned()
  }

  pub fn show<T: Record>(&self, id: &str) -> Option<T> {
    if self.disabled {
      return None;
    }
    T::table(self).get(id).cloned()
  }

  pub fn get_run_id(&self, run: &str) -> Option<RecordId> {
    if self.disabled {
      return None;
    }
    self.run_info.get(run).and_then(|info| info.id)
  }

  pub fn get_lane_id(&self, run: &str, lane: u32) -> Option<RecordId> {
    if self.disabled {
      return None;
    }
    self.run_info.get(run).and_then(|info| info.lane_id(lane))
  }

  // --------------------------------------------------------------------------
  // Indexes
  // --------------------------------------------------------------------------

  pub fn index_solexa_runs(&self, run: &str) -> RecordMap<SolexaRun> {
    if self.disabled {
      return RecordMap::new();
    }
    let run_id = self.get_run_id(run);
    self
      .solexa_runs
      .filter(|r| Some(r.id) == run_id || r.name.as_deref() == Some(run))
  }

  pub fn index_pipeline_runs(&self, run: &str) -> RecordMap<PipelineRun> {
    if self.disabled {
      return RecordMap::new();
    }
    let Some(run_id) = self.get_run_id(run) else {
      return RecordMap::new();
    };
    self
      .pipeline_runs
      .filter(|r| r.solexa_run_id == Some(run_id))
  }

  pub fn index_lane_results(&self, run: &str, filter: &LaneResultFilter) -> RecordMap<LaneResult> {
    if self.disabled {
      return RecordMap::new();
    }
    let Some(info) = self.run_info.get(run) else {
      return RecordMap::new();
    };

    let filter = filter.effective();
    let lane_ids: BTreeSet<RecordId> = match filter.lane {
      Some(lane) => info.lane_id(lane).into_iter().collect(),
      None => info.lane_ids().into_iter().collect(),
    };

    self.lane_results.filter(|r| {
      r.solexa_lane_id.is_some_and(|id| lane_ids.contains(&id))
        && filter
          .barcode
          .as_ref()
          .map_or(true, |b| r.barcode.as_ref() == Some(b))
        && filter.read_number.map_or(true, |n| r.read_number == Some(n))
    })
  }

  pub fn index_mapper_results(&self, run: &str) -> RecordMap<MapperResult> {
    if self.disabled {
      return RecordMap::new();
    }
    let lane_result_ids: BTreeSet<RecordId> = self
      .index_lane_results(run, &LaneResultFilter::default())
      .values()
      .map(|r| r.id)
      .collect();
    self
      .mapper_results
      .filter(|r| r.dataset_id.is_some_and(|id| lane_result_ids.contains(&id)))
  }

  // --------------------------------------------------------------------------
  // Writes
  // --------------------------------------------------------------------------

  pub fn create_pipeline_run(
    &mut self,
    run_id: RecordId,
    params: Option<&PipelineRunUpdate>,
  ) -> Option<PipelineRun> {
    if self.disabled {
      return None;
    }
    let now = Utc::now().to_rfc3339();
    let id = self.next_surrogate_id()?;
    let defaults = json!({
      "id": id,
      "solexa_run_id": run_id,
      "started": true,
      "active": true,
      "start_time": now,
      "created_at": now,
    });
    let run: PipelineRun = build_record(defaults, params)?;
    self.pipeline_runs.insert(id.to_string(), run.clone());
    Some(run)
  }

  pub fn create_lane_result(
    &mut self,
    lane_id: RecordId,
    params: &LaneResultUpdate,
  ) -> Option<LaneResult> {
    if self.disabled {
      return None;
    }
    let id = self.next_surrogate_id()?;
    let defaults = json!({
      "id": id,
      "solexa_lane_id": lane_id,
      "created_at": Utc::now().to_rfc3339(),
      "active": true,
    });
    let result: LaneResult = build_record(defaults, Some(params))?;
    self.lane_results.insert(id.to_string(), result.clone());
    Some(result)
  }

  pub fn create_mapper_result(&mut self, params: &MapperResultUpdate) -> Option<MapperResult> {
    if self.disabled {
      return None;
    }
    let id = self.next_surrogate_id()?;
    let defaults = json!({
      "id": id,
      "created_at": Utc::now().to_rfc3339(),
      "active": true,
    });
    let result: MapperResult = build_record(defaults, Some(params))?;
    self.mapper_results.insert(id.to_string(), result.clone());
    Some(result)
  }

  /// Merge `update` into the record with this id; `None` when it doesn't exist.
  pub fn update<T: Record>(&mut self, id: &str, update: &T::Update) -> Option<T> {
    if self.disabled {
      return None;
    }
    T::table_mut(self).update(id, update)
  }

  /// Deactivate the lane's results along with the pipeline runs and mapper
  /// results that hang off them. Returns the number of records touched.
  pub fn reset_lane(&mut self, lane_id: RecordId) -> usize {
    if self.disabled {
      return 0;
    }

    let mut lane_result_ids = BTreeSet::new();
    let mut pipeline_run_ids = BTreeSet::new();
    let mut touched = 0;

    for result in self.lane_results.values_mut() {
      if result.solexa_lane_id == Some(lane_id) {
        lane_result_ids.insert(result.id);
        pipeline_run_ids.extend(result.solexa_pipeline_run_id);
        result.active = Some(false);
        touched += 1;
      }
    }

    for run in self.pipeline_runs.values_mut() {
      if pipeline_run_ids.contains(&run.id) {
        run.active = Some(false);
        touched += 1;
      }
    }

    for mapper in self.mapper_results.values_mut() {
      if mapper.dataset_id.is_some_and(|id| lane_result_ids.contains(&id)) {
        mapper.active = Some(false);
        touched += 1;
      }
    }

    debug!(lane_id = %lane_id, touched, "Reset local lane results");
    touched
  }

  /// Next free id in the surrogate range; `None` once the range is used up.
  fn next_surrogate_id(&self) -> Option<RecordId> {
    let highest = self
      .solexa_runs
      .ids()
      .chain(self.pipeline_runs.ids())
      .chain(self.lane_results.ids())
      .chain(self.mapper_results.ids())
      .map(|id| id.0)
      .filter(|id| (SURROGATE_ID_MIN..SURROGATE_ID_MAX).contains(id))
      .max();

    let next = highest.map_or(SURROGATE_ID_MIN, |id| id + 1);
    if next >= SURROGATE_ID_MAX {
      warn!("Local surrogate id range is exhausted");
      return None;
    }
    Some(RecordId(next))
  }

  // --------------------------------------------------------------------------
  // Capturing fetched data
  // --------------------------------------------------------------------------

  pub fn add_run_info(&mut self, run: &str, info: RunInfo) {
    self.run_info.insert(run.to_string(), info);
  }

  pub fn add_sample_sheet(&mut self, run: &str, lane: Option<u32>, sample_sheet: String) {
    self
      .sample_sheets
      .entry(run.to_string())
      .or_default()
      .insert(sample_sheet_key(lane), sample_sheet);
  }

  pub fn add<T: Record>(&mut self, key: &str, record: T) {
    T::table_mut(self).insert(key, record);
  }

  pub fn add_all<T: Record>(&mut self, records: RecordMap<T>) {
    T::table_mut(self).extend(records);
  }

  // --------------------------------------------------------------------------
  // Disk
  // --------------------------------------------------------------------------

  pub fn write_run_info_to_disk(&self) -> LimsResult<()> {
    self.storage.write(Table::RunInfo, &self.run_info)
  }

  pub fn write_sample_sheets_to_disk(&self) -> LimsResult<()> {
    self.storage.write(Table::SampleSheets, &self.sample_sheets)
  }

  pub fn write_to_disk<T: Record>(&self) -> LimsResult<()> {
    self.storage.write(T::TABLE, T::table(self).as_map())
  }
}

/// Overlay caller parameters onto default fields and build the record.
///
/// Caller values win on collision, except for `id`.
fn build_record<T: Record, P: Serialize>(defaults: Value, params: Option<&P>) -> Option<T> {
  let mut fields = match defaults {
    Value::Object(map) => map,
    _ => Map::new(),
  };

  if let Some(params) = params {
    match serde_json::to_value(params) {
      Ok(Value::Object(overrides)) => {
        for (key, value) in overrides {
          if key == "id" {
            warn!(entity = T::NAME, "Ignoring caller-supplied id for a new record");
            continue;
          }
          fields.insert(key, value);
        }
      }
      Ok(_) => {}
      Err(e) => {
        warn!(entity = T::NAME, error = %e, "Could not serialize parameters");
        return None;
      }
    }
  }

  match serde_json::from_value(Value::Object(fields)) {
    Ok(record) => Some(record),
    Err(e) => {
      warn!(entity = T::NAME, error = %e, "Could not build record from parameters");
      None
    }
  }
}
