//! Connection facade over the LIMS and the local fixture cache.

use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::cache::{LocalStore, Record, DEFAULT_FIXTURE_DIR};
use crate::config::{Config, Credentials, DEFAULT_API_VERSION};
use crate::error::{LimsError, LimsResult};

use super::api_types::{sample_sheet_key, LaneResultFilter, RecordMap};
use super::client::{LimsApi, LimsClient};
use super::mode::{Mode, Policy};
use super::types::{
  LaneResult, LaneResultUpdate, MapperResult, MapperResultUpdate, PipelineRun, PipelineRunUpdate,
  RecordId, RunInfo, SolexaRun, SolexaRunUpdate,
};

/// Pattern an override owner must match.
const OVERRIDE_OWNER_PATTERN: &str = r"^\S+@\S+\.\S+$";

/// Everything needed to open a [`Connection`].
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
  /// LIMS base URL; falls back to `LIMS_URL` / `UHTS_LIMS_URL`
  pub lims_url: Option<String>,
  /// LIMS access token; falls back to `LIMS_TOKEN` / `UHTS_LIMS_TOKEN`
  pub lims_token: Option<String>,
  pub api_version: String,
  /// Replace every notification email in run info with this address
  pub override_owner: Option<String>,
  pub local_only: bool,
  pub remote_is_read_only: bool,
  pub testdata_update_mode: bool,
  /// Validate the LIMS TLS certificate
  pub verify_cert: bool,
  pub fixture_dir: PathBuf,
}

impl Default for ConnectionOptions {
  fn default() -> Self {
    Self {
      lims_url: None,
      lims_token: None,
      api_version: DEFAULT_API_VERSION.to_string(),
      override_owner: None,
      local_only: false,
      remote_is_read_only: false,
      testdata_update_mode: false,
      verify_cert: false,
      fixture_dir: PathBuf::from(DEFAULT_FIXTURE_DIR),
    }
  }
}

impl ConnectionOptions {
  /// Options seeded from a config file; mode flags stay off.
  pub fn from_config(config: &Config) -> Self {
    Self {
      lims_url: config.lims.url.clone(),
      api_version: config.lims.api_version.clone(),
      override_owner: config.override_owner.clone(),
      verify_cert: config.lims.verify_cert,
      fixture_dir: config
        .fixture_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_FIXTURE_DIR)),
      ..Self::default()
    }
  }
}

/// Everything captured for one run by [`Connection::get_all_run_objects`].
#[derive(Debug, Clone)]
pub struct RunObjects {
  pub run_info: RunInfo,
  /// Sample sheets keyed like the fixture file (`"null"` for all lanes)
  pub sample_sheets: BTreeMap<String, String>,
  pub solexa_runs: RecordMap<SolexaRun>,
  pub pipeline_runs: RecordMap<PipelineRun>,
  pub lane_results: RecordMap<LaneResult>,
  pub mapper_results: RecordMap<MapperResult>,
}

/// Single entry point for LIMS data.
///
/// Reads look in the local cache first and fall back to the LIMS; indexes
/// merge both with local records winning; writes go to exactly one side as
/// dictated by the [`Mode`]. In testdata-update mode every read is saved
/// back to the fixture files.
pub struct Connection<R: LimsApi = LimsClient> {
  mode: Mode,
  policy: Policy,
  local: LocalStore,
  remote: Option<R>,
  override_owner: Option<String>,
}

impl Connection<LimsClient> {
  /// Open a connection, reading missing credentials from the environment.
  pub fn open(options: ConnectionOptions) -> LimsResult<Self> {
    Self::open_with_env(options, |name| std::env::var(name).ok())
  }

  /// Open a connection with a custom environment lookup for credentials.
  pub fn open_with_env(
    options: ConnectionOptions,
    lookup: impl Fn(&str) -> Option<String>,
  ) -> LimsResult<Self> {
    let mode = Mode::resolve(
      options.local_only,
      options.testdata_update_mode,
      options.remote_is_read_only,
    )?;

    let remote = if mode.requires_credentials() {
      let credentials = Credentials::resolve_with(
        options.lims_url.as_deref(),
        options.lims_token.as_deref(),
        lookup,
      )?;
      Some(LimsClient::new(
        &credentials.url,
        &credentials.token,
        &options.api_version,
        options.verify_cert,
      )?)
    } else {
      None
    };

    Self::assemble(mode, &options, remote)
  }
}

impl<R: LimsApi> Connection<R> {
  /// Open a connection over an already-built remote accessor.
  ///
  /// The remote is dropped in local-only mode.
  pub fn with_remote(options: ConnectionOptions, remote: R) -> LimsResult<Self> {
    let mode = Mode::resolve(
      options.local_only,
      options.testdata_update_mode,
      options.remote_is_read_only,
    )?;
    let remote = mode.requires_credentials().then_some(remote);
    Self::assemble(mode, &options, remote)
  }

  fn assemble(mode: Mode, options: &ConnectionOptions, remote: Option<R>) -> LimsResult<Self> {
    let override_owner = options
      .override_owner
      .as_deref()
      .map(clean_override_owner)
      .transpose()?;

    let policy = mode.policy();
    info!("{}", mode.description());

    let local = LocalStore::new(
      &options.fixture_dir,
      mode.loads_fixtures(),
      policy.disable_local,
    );

    Ok(Self {
      mode,
      policy,
      local,
      remote,
      override_owner,
    })
  }

  pub fn mode(&self) -> Mode {
    self.mode
  }

  pub fn policy(&self) -> Policy {
    self.policy
  }

  pub fn local(&self) -> &LocalStore {
    &self.local
  }

  pub fn override_owner(&self) -> Option<&str> {
    self.override_owner.as_deref()
  }

  fn remote_reader(&self) -> Option<&R> {
    if self.policy.read_remote {
      self.remote.as_ref()
    } else {
      None
    }
  }

  fn remote_writer(&self) -> Option<&R> {
    if self.policy.write_remote {
      self.remote.as_ref()
    } else {
      None
    }
  }

  /// Use the local answer if there is one, otherwise ask the LIMS when reads are allowed.
  fn local_then_remote<T>(
    &self,
    local: Option<T>,
    remote: impl FnOnce(&R) -> LimsResult<Option<T>>,
  ) -> LimsResult<Option<T>> {
    if local.is_some() {
      return Ok(local);
    }
    match self.remote_reader() {
      Some(r) => remote(r),
      None => Ok(None),
    }
  }

  // --------------------------------------------------------------------------
  // Single fetches
  // --------------------------------------------------------------------------

  pub fn get_sample_sheet(&mut self, run: &str, lane: Option<u32>) -> LimsResult<String> {
    let what = describe_lane(run, lane);
    info!("Getting samplesheet for {}", what);

    let sample_sheet = self
      .local_then_remote(self.local.get_sample_sheet(run, lane), |r| {
        r.get_sample_sheet(run, lane)
      })?
      .filter(|s| !s.is_empty())
      .ok_or_else(|| LimsError::not_found("samplesheet", &what))?;

    if self.policy.persist_reads_to_local {
      self
        .local
        .add_sample_sheet(run, lane, sample_sheet.clone());
      self.local.write_sample_sheets_to_disk()?;
      info!("Added samplesheet for {} to testdata", what);
    }

    debug!("{}", sample_sheet);
    Ok(sample_sheet)
  }

  /// Fetch a sample sheet and write it to `path`.
  pub fn save_sample_sheet(
    &mut self,
    run: &str,
    lane: Option<u32>,
    path: &Path,
  ) -> LimsResult<String> {
    let sample_sheet = self.get_sample_sheet(run, lane)?;
    info!(path = %path.display(), "Writing samplesheet for {}", describe_lane(run, lane));
    std::fs::write(path, &sample_sheet)?;
    Ok(sample_sheet)
  }

  pub fn get_run_info(&mut self, run: &str) -> LimsResult<RunInfo> {
    info!("Getting run info for run {}", run);

    let mut run_info = self
      .local_then_remote(self.local.get_run_info(run), |r| r.get_run_info(run))?
      .filter(|info| *info != RunInfo::default())
      .ok_or_else(|| LimsError::not_found("runinfo", format!("run {}", run)))?;

    if let Some(owner) = &self.override_owner {
      run_info.override_owner(owner);
    }

    if self.policy.persist_reads_to_local {
      self.local.add_run_info(run, run_info.clone());
      self.local.write_run_info_to_disk()?;
      info!("Added runinfo for {} to testdata", run);
    }

    debug!(?run_info);
    Ok(run_info)
  }

  fn show<T: Record + std::fmt::Debug>(
    &mut self,
    id: RecordId,
    remote: impl FnOnce(&R, RecordId) -> LimsResult<Option<T>>,
  ) -> LimsResult<T> {
    info!("Showing {} with id={}", T::NAME, id);
    let key = id.to_string();

    let record = self
      .local_then_remote(self.local.show::<T>(&key), |r| remote(r, id))?
      .ok_or_else(|| LimsError::not_found(T::NAME, format!("id {}", id)))?;

    if self.policy.persist_reads_to_local {
      self.local.add(&key, record.clone());
      self.local.write_to_disk::<T>()?;
      info!("Added {} id {} to testdata", T::NAME, id);
    }

    debug!(?record);
    Ok(record)
  }

  pub fn show_solexa_run(&mut self, id: RecordId) -> LimsResult<SolexaRun> {
    self.show(id, |r, id| r.show_solexa_run(id))
  }

  pub fn show_pipeline_run(&mut self, id: RecordId) -> LimsResult<PipelineRun> {
    self.show(id, |r, id| r.show_pipeline_run(id))
  }

  pub fn show_lane_result(&mut self, id: RecordId) -> LimsResult<LaneResult> {
    self.show(id, |r, id| r.show_lane_result(id))
  }

  pub fn show_mapper_result(&mut self, id: RecordId) -> LimsResult<MapperResult> {
    self.show(id, |r, id| r.show_mapper_result(id))
  }

  // --------------------------------------------------------------------------
  // Indexes
  // --------------------------------------------------------------------------

  /// Remote results overlaid with local ones; an empty result is not an error.
  fn merge_index<T: Record>(
    &mut self,
    remote: impl FnOnce(&R) -> LimsResult<RecordMap<T>>,
    local: impl FnOnce(&LocalStore) -> RecordMap<T>,
  ) -> LimsResult<RecordMap<T>> {
    let mut records = match self.remote_reader() {
      Some(r) => remote(r)?,
      None => RecordMap::new(),
    };
    records.extend(local(&self.local));

    if self.policy.persist_reads_to_local {
      self.local.add_all(records.clone());
      self.local.write_to_disk::<T>()?;
      info!("Added {} {} records to testdata", records.len(), T::NAME);
    }

    debug!(count = records.len(), "Indexed {}", T::NAME);
    Ok(records)
  }

  pub fn index_solexa_runs(&mut self, run: &str) -> LimsResult<RecordMap<SolexaRun>> {
    info!("Indexing solexa runs where run={}", run);
    self.merge_index(
      |r| r.index_solexa_runs(run),
      |local| local.index_solexa_runs(run),
    )
  }

  pub fn index_pipeline_runs(&mut self, run: &str) -> LimsResult<RecordMap<PipelineRun>> {
    info!("Indexing pipeline runs where run={}", run);
    self.merge_index(
      |r| r.index_pipeline_runs(run),
      |local| local.index_pipeline_runs(run),
    )
  }

  pub fn index_lane_results(
    &mut self,
    run: &str,
    filter: &LaneResultFilter,
  ) -> LimsResult<RecordMap<LaneResult>> {
    info!(
      "Indexing lane results where run={}, lane={:?}, barcode={:?}, read_number={:?}",
      run, filter.lane, filter.barcode, filter.read_number
    );
    self.merge_index(
      |r| r.index_lane_results(run, filter),
      |local| local.index_lane_results(run, filter),
    )
  }

  pub fn index_mapper_results(&mut self, run: &str) -> LimsResult<RecordMap<MapperResult>> {
    info!("Indexing mapper results where run={}", run);
    self.merge_index(
      |r| r.index_mapper_results(run),
      |local| local.index_mapper_results(run),
    )
  }

  // --------------------------------------------------------------------------
  // Identifier resolution
  // --------------------------------------------------------------------------

  pub fn get_run_id(&self, run: &str) -> LimsResult<RecordId> {
    self
      .local_then_remote(self.local.get_run_id(run), |r| {
        Ok(r.get_run_info(run)?.and_then(|info| info.id))
      })?
      .ok_or_else(|| LimsError::not_found("id", format!("run {}", run)))
  }

  pub fn get_lane_id(&self, run: &str, lane: u32) -> LimsResult<RecordId> {
    self
      .find_lane_id(run, lane)?
      .ok_or_else(|| LimsError::not_found("lane_id", format!("run={} lane={}", run, lane)))
  }

  fn find_lane_id(&self, run: &str, lane: u32) -> LimsResult<Option<RecordId>> {
    self.local_then_remote(self.local.get_lane_id(run, lane), |r| {
      Ok(r.get_run_info(run)?.and_then(|info| info.lane_id(lane)))
    })
  }

  // --------------------------------------------------------------------------
  // Writes
  // --------------------------------------------------------------------------

  /// Invalidate existing results for a run/lane.
  pub fn delete_lane_results(&mut self, run: &str, lane: u32) -> LimsResult<()> {
    info!("Resetting old results for run={} lane={}", run, lane);
    match self.remote_writer() {
      Some(remote) => remote.delete_lane_results(run, lane)?,
      None => match self.find_lane_id(run, lane)? {
        Some(lane_id) => {
          let touched = self.local.reset_lane(lane_id);
          debug!(touched, "Deactivated local results");
        }
        None => debug!("Lane id unknown; no local results to reset"),
      },
    }
    Ok(())
  }

  /// Create a pipeline run for a lane, first resetting that lane's results.
  pub fn create_pipeline_run(
    &mut self,
    run: &str,
    lane: u32,
    params: Option<&PipelineRunUpdate>,
  ) -> LimsResult<PipelineRun> {
    info!("Resetting any old results before creating pipeline run");
    self.delete_lane_results(run, lane)?;

    info!(
      "Creating pipeline run object for run={}, lane={}, paramdict={}",
      run,
      lane,
      params_json(&params)
    );
    let created = match self.remote_writer() {
      Some(remote) => remote.create_pipeline_run(run, lane, params)?,
      None => {
        let run_id = self.get_run_id(run)?;
        self.local.create_pipeline_run(run_id, params)
      }
    };

    let created = created.ok_or_else(|| {
      LimsError::write_failed(
        "create pipelinerun",
        format!("run={} lane={} paramdict={}", run, lane, params_json(&params)),
      )
    })?;
    debug!(?created);
    Ok(created)
  }

  pub fn create_lane_result(
    &mut self,
    run: &str,
    lane: u32,
    params: &LaneResultUpdate,
  ) -> LimsResult<LaneResult> {
    info!(
      "Creating lane result for run={}, lane={}, paramdict={}",
      run,
      lane,
      params_json(params)
    );
    let created = match self.remote_writer() {
      Some(remote) => remote.create_lane_result(run, lane, params)?,
      None => {
        let lane_id = self.get_lane_id(run, lane)?;
        self.local.create_lane_result(lane_id, params)
      }
    };

    let created = created.ok_or_else(|| {
      LimsError::write_failed(
        "create laneresult",
        format!("run={} lane={} paramdict={}", run, lane, params_json(params)),
      )
    })?;
    debug!(?created);
    Ok(created)
  }

  pub fn create_mapper_result(&mut self, params: &MapperResultUpdate) -> LimsResult<MapperResult> {
    info!("Creating mapper result with paramdict={}", params_json(params));
    let created = match self.remote_writer() {
      Some(remote) => remote.create_mapper_result(params)?,
      None => self.local.create_mapper_result(params),
    };

    let created = created.ok_or_else(|| {
      LimsError::write_failed(
        "create mapperresult",
        format!("paramdict={}", params_json(params)),
      )
    })?;
    debug!(?created);
    Ok(created)
  }

  fn update<T: Record + std::fmt::Debug>(
    &mut self,
    id: RecordId,
    params: &T::Update,
    remote: impl FnOnce(&R, RecordId, &T::Update) -> LimsResult<Option<T>>,
  ) -> LimsResult<T> {
    info!(
      "Updating {} id={} with paramdict={}",
      T::NAME,
      id,
      params_json(params)
    );
    let updated = match self.remote_writer() {
      Some(r) => remote(r, id, params)?,
      None => self.local.update::<T>(&id.to_string(), params),
    };

    let updated = updated.ok_or_else(|| {
      LimsError::write_failed(
        "update",
        format!("{} id={} paramdict={}", T::NAME, id, params_json(params)),
      )
    })?;
    debug!(?updated);
    Ok(updated)
  }

  pub fn update_solexa_run(
    &mut self,
    id: RecordId,
    params: &SolexaRunUpdate,
  ) -> LimsResult<SolexaRun> {
    self.update(id, params, |r, id, p| r.update_solexa_run(id, p))
  }

  pub fn update_pipeline_run(
    &mut self,
    id: RecordId,
    params: &PipelineRunUpdate,
  ) -> LimsResult<PipelineRun> {
    self.update(id, params, |r, id, p| r.update_pipeline_run(id, p))
  }

  pub fn update_lane_result(
    &mut self,
    id: RecordId,
    params: &LaneResultUpdate,
  ) -> LimsResult<LaneResult> {
    self.update(id, params, |r, id, p| r.update_lane_result(id, p))
  }

  pub fn update_mapper_result(
    &mut self,
    id: RecordId,
    params: &MapperResultUpdate,
  ) -> LimsResult<MapperResult> {
    self.update(id, params, |r, id, p| r.update_mapper_result(id, p))
  }

  // --------------------------------------------------------------------------
  // Whole-run helpers
  // --------------------------------------------------------------------------

  /// Fetch run info, every sample sheet and every index for a run.
  ///
  /// In testdata-update mode this captures the run into the fixture files.
  pub fn get_all_run_objects(&mut self, run: &str) -> LimsResult<RunObjects> {
    let run_info = self.get_run_info(run)?;

    let mut sample_sheets = BTreeMap::new();
    sample_sheets.insert(sample_sheet_key(None), self.get_sample_sheet(run, None)?);
    for lane in run_info.lane_numbers() {
      sample_sheets.insert(
        sample_sheet_key(Some(lane)),
        self.get_sample_sheet(run, Some(lane))?,
      );
    }

    Ok(RunObjects {
      solexa_runs: self.index_solexa_runs(run)?,
      pipeline_runs: self.index_pipeline_runs(run)?,
      lane_results: self.index_lane_results(run, &LaneResultFilter::default())?,
      mapper_results: self.index_mapper_results(run)?,
      sample_sheets,
      run_info,
    })
  }

  /// Check the LIMS answers; trivially succeeds when remote reads are off.
  pub fn test_connection(&self) -> LimsResult<()> {
    match self.remote_reader() {
      Some(r) => r.test_connection(),
      None => Ok(()),
    }
  }
}

fn clean_override_owner(email: &str) -> LimsResult<String> {
  let pattern = Regex::new(OVERRIDE_OWNER_PATTERN)
    .map_err(|e| LimsError::Config(format!("Invalid override owner pattern: {}", e)))?;
  if pattern.is_match(email) {
    Ok(email.to_string())
  } else {
    Err(LimsError::Config(format!(
      "override_owner setting \"{}\" is not a valid email address.",
      email
    )))
  }
}

fn describe_lane(run: &str, lane: Option<u32>) -> String {
  match lane {
    Some(lane) => format!("run {} lane {}", run, lane),
    None => format!("run {}, all lanes", run),
  }
}

fn params_json<P: Serialize>(params: &P) -> String {
  serde_json::to_string(params).unwrap_or_else(|_| "<unserializable>".to_string())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SURROGATE_ID_MIN;
  use serde_json::json;
  use std::cell::RefCell;
  use std::fs;

  /// In-memory LIMS that records every call it receives.
  #[derive(Default)]
  struct FakeLims {
    run_info: BTreeMap<String, RunInfo>,
    sample_sheets: BTreeMap<String, String>,
    pipeline_runs: RecordMap<PipelineRun>,
    lane_results: RecordMap<LaneResult>,
    calls: RefCell<Vec<String>>,
  }

  impl FakeLims {
    fn log(&self, call: impl Into<String>) {
      self.calls.borrow_mut().push(call.into());
    }

    fn calls(&self) -> Vec<String> {
      self.calls.borrow().clone()
    }
  }

  impl LimsApi for FakeLims {
    fn get_run_info(&self, run: &str) -> LimsResult<Option<RunInfo>> {
      self.log(format!("get_run_info {}", run));
      Ok(self.run_info.get(run).cloned())
    }

    fn get_sample_sheet(&self, run: &str, lane: Option<u32>) -> LimsResult<Option<String>> {
      self.log(format!("get_sample_sheet {} {:?}", run, lane));
      Ok(
        self
          .sample_sheets
          .get(&format!("{}/{}", run, sample_sheet_key(lane)))
          .cloned(),
      )
    }

    fn show_solexa_run(&self, _id: RecordId) -> LimsResult<Option<SolexaRun>> {
      Ok(None)
    }

    fn show_pipeline_run(&self, id: RecordId) -> LimsResult<Option<PipelineRun>> {
      self.log(format!("show_pipeline_run {}", id));
      Ok(self.pipeline_runs.get(&id.to_string()).cloned())
    }

    fn show_lane_result(&self, id: RecordId) -> LimsResult<Option<LaneResult>> {
      Ok(self.lane_results.get(&id.to_string()).cloned())
    }

    fn show_mapper_result(&self, _id: RecordId) -> LimsResult<Option<MapperResult>> {
      Ok(None)
    }

    fn index_solexa_runs(&self, _run: &str) -> LimsResult<RecordMap<SolexaRun>> {
      self.log("index_solexa_runs");
      Ok(RecordMap::new())
    }

    fn index_pipeline_runs(&self, _run: &str) -> LimsResult<RecordMap<PipelineRun>> {
      self.log("index_pipeline_runs");
      Ok(self.pipeline_runs.clone())
    }

    fn index_lane_results(
      &self,
      _run: &str,
      _filter: &LaneResultFilter,
    ) -> LimsResult<RecordMap<LaneResult>> {
      self.log("index_lane_results");
      Ok(self.lane_results.clone())
    }

    fn index_mapper_results(&self, _run: &str) -> LimsResult<RecordMap<MapperResult>> {
      self.log("index_mapper_results");
      Ok(RecordMap::new())
    }

    fn create_pipeline_run(
      &self,
      run: &str,
      lane: u32,
      _params: Option<&PipelineRunUpdate>,
    ) -> LimsResult<Option<PipelineRun>> {
      self.log(format!("create_pipeline_run {} {}", run, lane));
      Ok(Some(pipeline_run(json!({"id": 42, "started": true}))))
    }

    fn create_lane_result(
      &self,
      _run: &str,
      _lane: u32,
      _params: &LaneResultUpdate,
    ) -> LimsResult<Option<LaneResult>> {
      self.log("create_lane_result");
      Ok(None)
    }

    fn create_mapper_result(
      &self,
      _params: &MapperResultUpdate,
    ) -> LimsResult<Option<MapperResult>> {
      self.log("create_mapper_result");
      Ok(None)
    }

    fn update_solexa_run(
      &self,
      _id: RecordId,
      _params: &SolexaRunUpdate,
    ) -> LimsResult<Option<SolexaRun>> {
      Ok(None)
    }

    fn update_pipeline_run(
      &self,
      id: RecordId,
      params: &PipelineRunUpdate,
    ) -> LimsResult<Option<PipelineRun>> {
      self.log(format!("update_pipeline_run {}", id));
      Ok(self.pipeline_runs.get(&id.to_string()).cloned().map(|mut run| {
        run.apply(params);
        run
      }))
    }

    fn update_lane_result(
      &self,
      _id: RecordId,
      _params: &LaneResultUpdate,
    ) -> LimsResult<Option<LaneResult>> {
      Ok(None)
    }

    fn update_mapper_result(
      &self,
      _id: RecordId,
      _params: &MapperResultUpdate,
    ) -> LimsResult<Option<MapperResult>> {
      Ok(None)
    }

    fn delete_lane_results(&self, run: &str, lane: u32) -> LimsResult<()> {
      self.log(format!("delete_lane_results {} {}", run, lane));
      Ok(())
    }

    fn test_connection(&self) -> LimsResult<()> {
      self.log("test_connection");
      Ok(())
    }
  }

  fn pipeline_run(value: serde_json::Value) -> PipelineRun {
    serde_json::from_value(value).unwrap()
  }

  fn run_info(value: serde_json::Value) -> RunInfo {
    serde_json::from_value(value).unwrap()
  }

  fn r1_run_info() -> serde_json::Value {
    json!({
      "id": 10,
      "run_info": {
        "run_name": "R1",
        "lanes": {
          "1": {
            "id": 101,
            "notify": [{"email": "pi@lab.edu"}],
            "submitter_email": "sub@lab.edu",
            "sample_name": "liver"
          }
        }
      }
    })
  }

  fn seeded_fixtures() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
      dir.path().join("runinfo.json"),
      json!({"R1": r1_run_info()}).to_string(),
    )
    .unwrap();
    fs::write(
      dir.path().join("samplesheets.json"),
      json!({"R1": {"null": "lane,sample\n1,liver\n"}}).to_string(),
    )
    .unwrap();
    fs::write(
      dir.path().join("pipelineruns.json"),
      json!({
        "2": {"id": 2, "solexa_run_id": 10, "comment": "local"},
        "3": {"id": 3, "solexa_run_id": 10},
        "1000000000000": {"id": 1_000_000_000_000u64, "solexa_run_id": 10}
      })
      .to_string(),
    )
    .unwrap();
    fs::write(
      dir.path().join("laneresults.json"),
      json!({"600": {"id": 600, "solexa_lane_id": 101, "active": true}}).to_string(),
    )
    .unwrap();
    dir
  }

  fn options(dir: &Path) -> ConnectionOptions {
    ConnectionOptions {
      fixture_dir: dir.to_path_buf(),
      ..ConnectionOptions::default()
    }
  }

  fn local_only(dir: &Path) -> Connection<FakeLims> {
    let opts = ConnectionOptions {
      local_only: true,
      ..options(dir)
    };
    Connection::with_remote(opts, FakeLims::default()).unwrap()
  }

  fn remote_with_r2() -> FakeLims {
    let mut remote = FakeLims::default();
    remote.run_info.insert(
      "R2".to_string(),
      run_info(json!({
        "id": 20,
        "run_info": {
          "run_name": "R2",
          "lanes": {"1": {"id": 201, "notify": [{"email": "real@lab.edu"}], "submitter_email": "real@lab.edu"}}
        }
      })),
    );
    remote
      .sample_sheets
      .insert("R2/null".to_string(), "all\n".to_string());
    remote
      .sample_sheets
      .insert("R2/1".to_string(), "lane1\n".to_string());
    remote
  }

  fn switches(conn: &Connection<FakeLims>) -> (bool, bool, bool, bool) {
    let p = conn.policy();
    (
      p.write_remote,
      p.read_remote,
      p.disable_local,
      p.persist_reads_to_local,
    )
  }

  #[test]
  fn test_each_mode_yields_its_switches() {
    let dir = tempfile::tempdir().unwrap();
    let base = options(dir.path());

    let conn = Connection::with_remote(
      ConnectionOptions {
        local_only: true,
        ..base.clone()
      },
      FakeLims::default(),
    )
    .unwrap();
    assert_eq!(switches(&conn), (false, false, false, false));

    let conn = Connection::with_remote(
      ConnectionOptions {
        testdata_update_mode: true,
        ..base.clone()
      },
      FakeLims::default(),
    )
    .unwrap();
    assert_eq!(switches(&conn), (false, true, false, true));

    let conn = Connection::with_remote(
      ConnectionOptions {
        remote_is_read_only: true,
        ..base.clone()
      },
      FakeLims::default(),
    )
    .unwrap();
    assert_eq!(switches(&conn), (false, true, false, false));

    let conn = Connection::with_remote(base, FakeLims::default()).unwrap();
    assert_eq!(switches(&conn), (true, true, true, false));
    assert_eq!(conn.mode(), Mode::Normal);
  }

  #[test]
  fn test_local_only_with_testdata_update_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let opts = ConnectionOptions {
      local_only: true,
      testdata_update_mode: true,
      ..options(dir.path())
    };
    let result = Connection::open_with_env(opts, |_| None);
    assert!(matches!(result, Err(LimsError::Config(_))));
  }

  #[test]
  fn test_missing_credentials_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = Connection::open_with_env(options(dir.path()), |_| None);
    assert!(matches!(result, Err(LimsError::Config(_))));
  }

  #[test]
  fn test_local_only_needs_no_credentials() {
    let dir = seeded_fixtures();
    let opts = ConnectionOptions {
      local_only: true,
      ..options(dir.path())
    };
    let conn = Connection::open_with_env(opts, |_| None).unwrap();
    assert_eq!(conn.mode(), Mode::LocalOnly);
    assert!(conn.test_connection().is_ok());
  }

  #[test]
  fn test_open_with_env_credentials() {
    let dir = tempfile::tempdir().unwrap();
    let opts = ConnectionOptions {
      remote_is_read_only: true,
      ..options(dir.path())
    };
    let conn = Connection::open_with_env(opts, |name| match name {
      "LIMS_URL" => Some("https://lims.example.org".to_string()),
      "LIMS_TOKEN" => Some("t0k".to_string()),
      _ => None,
    })
    .unwrap();
    assert_eq!(conn.mode(), Mode::RemoteReadOnly);
  }

  #[test]
  fn test_invalid_override_owner_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let opts = ConnectionOptions {
      local_only: true,
      override_owner: Some("not-an-email".to_string()),
      ..options(dir.path())
    };
    let result = Connection::with_remote(opts, FakeLims::default());
    assert!(matches!(result, Err(LimsError::Config(_))));
  }

  #[test]
  fn test_local_run_info_is_returned_unmodified() {
    let dir = seeded_fixtures();
    let mut conn = local_only(dir.path());

    let info = conn.get_run_info("R1").unwrap();
    assert_eq!(info, run_info(r1_run_info()));

    let err = conn.get_run_info("R404").unwrap_err();
    assert!(matches!(err, LimsError::NotFound { what: "runinfo", .. }));
    assert!(conn.remote.is_none());
  }

  #[test]
  fn test_override_owner_rewrites_contacts() {
    let dir = seeded_fixtures();
    let opts = ConnectionOptions {
      local_only: true,
      override_owner: Some("qa@example.org".to_string()),
      ..options(dir.path())
    };
    let mut conn = Connection::with_remote(opts, FakeLims::default()).unwrap();

    let info = conn.get_run_info("R1").unwrap();
    let lane = &info.run_info.lanes["1"];
    assert_eq!(lane.notify[0].email.as_deref(), Some("qa@example.org"));
    assert_eq!(lane.submitter_email.as_deref(), Some("qa@example.org"));
    assert_eq!(lane.extra["sample_name"], json!("liver"));
    assert_eq!(info.id, Some(RecordId(10)));
  }

  #[test]
  fn test_index_merge_prefers_local_records() {
    let dir = seeded_fixtures();
    let mut remote = FakeLims::default();
    remote.pipeline_runs = crate::lims::api_types::list_to_map(vec![
      pipeline_run(json!({"id": 1, "solexa_run_id": 10})),
      pipeline_run(json!({"id": 2, "solexa_run_id": 10, "comment": "remote"})),
    ]);
    let opts = ConnectionOptions {
      testdata_update_mode: true,
      ..options(dir.path())
    };
    let mut conn = Connection::with_remote(opts, remote).unwrap();

    let merged = conn.index_pipeline_runs("R1").unwrap();
    assert_eq!(
      merged.keys().collect::<Vec<_>>(),
      vec!["1", "1000000000000", "2", "3"]
    );
    assert_eq!(merged["2"].extra["comment"], json!("local"));

    let on_disk: serde_json::Value =
      serde_json::from_str(&fs::read_to_string(dir.path().join("pipelineruns.json")).unwrap())
        .unwrap();
    assert!(on_disk.get("1").is_some());
    assert_eq!(on_disk["2"]["comment"], json!("local"));
  }

  #[test]
  fn test_index_with_nothing_anywhere_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let mut conn = local_only(dir.path());
    assert!(conn.index_mapper_results("R1").unwrap().is_empty());
  }

  #[test]
  fn test_testdata_update_captures_run_info() {
    let dir = seeded_fixtures();
    let opts = ConnectionOptions {
      testdata_update_mode: true,
      override_owner: Some("qa@example.org".to_string()),
      ..options(dir.path())
    };
    let mut conn = Connection::with_remote(opts, remote_with_r2()).unwrap();

    let fetched = conn.get_run_info("R2").unwrap();
    assert_eq!(
      fetched.run_info.lanes["1"].submitter_email.as_deref(),
      Some("qa@example.org")
    );

    let on_disk: BTreeMap<String, RunInfo> =
      serde_json::from_str(&fs::read_to_string(dir.path().join("runinfo.json")).unwrap()).unwrap();
    assert_eq!(on_disk["R2"], fetched);
    assert!(on_disk.contains_key("R1"));

    let fresh = LocalStore::new(dir.path(), true, false);
    assert_eq!(fresh.get_run_info("R2"), Some(fetched));
  }

  #[test]
  fn test_empty_run_info_is_not_found() {
    let dir = seeded_fixtures();
    let mut remote = FakeLims::default();
    remote
      .run_info
      .insert("EMPTY".to_string(), RunInfo::default());
    let opts = ConnectionOptions {
      testdata_update_mode: true,
      ..options(dir.path())
    };
    let mut conn = Connection::with_remote(opts, remote).unwrap();

    let err = conn.get_run_info("EMPTY").unwrap_err();
    assert!(matches!(err, LimsError::NotFound { what: "runinfo", .. }));

    let on_disk = fs::read_to_string(dir.path().join("runinfo.json")).unwrap();
    assert!(!on_disk.contains("EMPTY"));
  }

  #[test]
  fn test_read_only_mode_does_not_persist() {
    let dir = seeded_fixtures();
    let before = fs::read_to_string(dir.path().join("runinfo.json")).unwrap();
    let opts = ConnectionOptions {
      remote_is_read_only: true,
      ..options(dir.path())
    };
    let mut conn = Connection::with_remote(opts, remote_with_r2()).unwrap();

    conn.get_run_info("R2").unwrap();
    assert_eq!(
      fs::read_to_string(dir.path().join("runinfo.json")).unwrap(),
      before
    );
    assert!(matches!(
      conn.local().write_run_info_to_disk(),
      Err(LimsError::PersistenceGuard { .. })
    ));
  }

  #[test]
  fn test_local_fetch_short_circuits_remote() {
    let dir = seeded_fixtures();
    let mut remote = FakeLims::default();
    remote
      .pipeline_runs
      .insert("2".to_string(), pipeline_run(json!({"id": 2, "comment": "remote"})));
    let opts = ConnectionOptions {
      testdata_update_mode: true,
      ..options(dir.path())
    };
    let mut conn = Connection::with_remote(opts, remote).unwrap();

    let run = conn.show_pipeline_run(RecordId(2)).unwrap();
    assert_eq!(run.extra["comment"], json!("local"));
    assert!(conn.remote.as_ref().unwrap().calls().is_empty());

    let err = conn.show_pipeline_run(RecordId(99)).unwrap_err();
    assert!(matches!(err, LimsError::NotFound { what: "pipelinerun", .. }));
    assert_eq!(
      conn.remote.as_ref().unwrap().calls(),
      vec!["show_pipeline_run 99"]
    );
  }

  #[test]
  fn test_local_create_pipeline_run_uses_surrogate_ids() {
    let dir = seeded_fixtures();
    let mut conn = local_only(dir.path());

    let run = conn.create_pipeline_run("R1", 1, None).unwrap();
    assert!(run.id.0 >= SURROGATE_ID_MIN);
    assert_ne!(run.id, RecordId(1_000_000_000_000));
    assert_eq!(run.solexa_run_id, Some(RecordId(10)));
    assert_eq!(conn.show_pipeline_run(run.id).unwrap(), run);

    // The lane was reset before the run was created.
    assert_eq!(
      conn.show_lane_result(RecordId(600)).unwrap().active,
      Some(false)
    );
  }

  #[test]
  fn test_local_create_lane_result_resolves_lane_id() {
    let dir = seeded_fixtures();
    let mut conn = local_only(dir.path());

    let result = conn
      .create_lane_result("R1", 1, &LaneResultUpdate::default())
      .unwrap();
    assert_eq!(result.solexa_lane_id, Some(RecordId(101)));

    let err = conn
      .create_lane_result("R1", 7, &LaneResultUpdate::default())
      .unwrap_err();
    assert!(matches!(err, LimsError::NotFound { what: "lane_id", .. }));
  }

  #[test]
  fn test_local_update_of_unknown_id_is_write_failure() {
    let dir = seeded_fixtures();
    let mut conn = local_only(dir.path());
    let params = PipelineRunUpdate {
      finished: Some(true),
      ..Default::default()
    };

    let err = conn.update_pipeline_run(RecordId(31337), &params).unwrap_err();
    match err {
      LimsError::WriteFailed { detail, .. } => {
        assert!(detail.contains("31337"));
        assert!(detail.contains("\"finished\":true"));
      }
      other => panic!("unexpected error: {:?}", other),
    }

    let updated = conn.update_pipeline_run(RecordId(3), &params).unwrap();
    assert_eq!(updated.finished, Some(true));
  }

  #[test]
  fn test_solexa_run_update_targets_solexa_table() {
    let dir = seeded_fixtures();
    fs::write(
      dir.path().join("solexaruns.json"),
      json!({"10": {"id": 10, "name": "R1", "analysis_done": false}}).to_string(),
    )
    .unwrap();
    let mut conn = local_only(dir.path());

    let params = SolexaRunUpdate {
      analysis_done: Some(true),
      ..Default::default()
    };
    let updated = conn.update_solexa_run(RecordId(10), &params).unwrap();
    assert_eq!(updated.analysis_done, Some(true));
    assert!(conn.show_pipeline_run(RecordId(10)).is_err());
    assert_eq!(conn.index_solexa_runs("R1").unwrap().len(), 1);
  }

  #[test]
  fn test_normal_mode_writes_go_to_remote_only() {
    let dir = seeded_fixtures();
    let mut remote = FakeLims::default();
    remote
      .pipeline_runs
      .insert("5".to_string(), pipeline_run(json!({"id": 5})));
    let mut conn = Connection::with_remote(options(dir.path()), remote).unwrap();

    let run = conn.create_pipeline_run("R1", 2, None).unwrap();
    assert_eq!(run.id, RecordId(42));
    assert_eq!(
      conn.remote.as_ref().unwrap().calls(),
      vec!["delete_lane_results R1 2", "create_pipeline_run R1 2"]
    );

    let err = conn
      .create_mapper_result(&MapperResultUpdate::default())
      .unwrap_err();
    assert!(matches!(
      err,
      LimsError::WriteFailed {
        operation: "create mapperresult",
        ..
      }
    ));

    // Local fixtures are disabled in normal mode.
    assert!(conn.get_run_info("R1").is_err());
    assert!(conn.local().is_disabled());

    let params = PipelineRunUpdate {
      active: Some(false),
      ..Default::default()
    };
    assert_eq!(
      conn.update_pipeline_run(RecordId(5), &params).unwrap().active,
      Some(false)
    );
    assert!(conn.update_pipeline_run(RecordId(6), &params).is_err());
  }

  #[test]
  fn test_read_only_mode_creates_locally_for_remote_runs() {
    let dir = tempfile::tempdir().unwrap();
    let opts = ConnectionOptions {
      remote_is_read_only: true,
      ..options(dir.path())
    };
    let mut conn = Connection::with_remote(opts, remote_with_r2()).unwrap();

    let run = conn.create_pipeline_run("R2", 1, None).unwrap();
    assert_eq!(run.solexa_run_id, Some(RecordId(20)));
    assert!(run.id.0 >= SURROGATE_ID_MIN);

    let calls = conn.remote.as_ref().unwrap().calls();
    assert!(calls.iter().all(|c| !c.starts_with("create")));
    assert!(calls.iter().all(|c| !c.starts_with("delete")));
    assert_eq!(conn.show_pipeline_run(run.id).unwrap(), run);
  }

  #[test]
  fn test_get_all_run_objects_queries_each_index_once() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("runinfo.json"), "{}").unwrap();
    let opts = ConnectionOptions {
      testdata_update_mode: true,
      ..options(dir.path())
    };
    let mut conn = Connection::with_remote(opts, remote_with_r2()).unwrap();

    let objects = conn.get_all_run_objects("R2").unwrap();
    assert_eq!(objects.sample_sheets["null"], "all\n");
    assert_eq!(objects.sample_sheets["1"], "lane1\n");

    let calls = conn.remote.as_ref().unwrap().calls();
    for index in [
      "index_solexa_runs",
      "index_pipeline_runs",
      "index_lane_results",
      "index_mapper_results",
    ] {
      assert_eq!(calls.iter().filter(|c| *c == index).count(), 1, "{}", index);
    }

    let sheets: serde_json::Value =
      serde_json::from_str(&fs::read_to_string(dir.path().join("samplesheets.json")).unwrap())
        .unwrap();
    assert_eq!(sheets["R2"]["1"], json!("lane1\n"));
  }

  #[test]
  fn test_save_sample_sheet_writes_file() {
    let dir = seeded_fixtures();
    let mut conn = local_only(dir.path());
    let out = dir.path().join("R1_samplesheet.csv");

    conn.save_sample_sheet("R1", None, &out).unwrap();
    assert_eq!(fs::read_to_string(&out).unwrap(), "lane,sample\n1,liver\n");

    let err = conn.get_sample_sheet("R1", Some(3)).unwrap_err();
    assert!(matches!(err, LimsError::NotFound { what: "samplesheet", .. }));
  }

  #[test]
  fn test_connection_check_uses_remote() {
    let dir = tempfile::tempdir().unwrap();
    let conn = Connection::with_remote(options(dir.path()), FakeLims::default()).unwrap();
    conn.test_connection().unwrap();
    assert_eq!(
      conn.remote.as_ref().unwrap().calls(),
      vec!["test_connection"]
    );
  }
}
