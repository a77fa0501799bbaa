//! Local-table bindings for LIMS record types.

use crate::cache::{LocalStore, Record, RecordTable, Table};

use super::types::{
  LaneResult, LaneResultUpdate, MapperResult, MapperResultUpdate, PipelineRun, PipelineRunUpdate,
  RecordId, SolexaRun, SolexaRunUpdate,
};

impl Record for SolexaRun {
  type Update = SolexaRunUpdate;
  const NAME: &'static str = "solexarun";
  const TABLE: Table = Table::SolexaRuns;

  fn record_id(&self) -> RecordId {
    self.id
  }

  fn apply_update(&mut self, update: &Self::Update) {
    self.apply(update);
  }

  fn table(store: &LocalStore) -> &RecordTable<Self> {
    &store.solexa_runs
  }

  fn table_mut(store: &mut LocalStore) -> &mut RecordTable<Self> {
    &mut store.solexa_runs
  }
}

impl Record for PipelineRun {
  type Update = PipelineRunUpdate;
  const NAME: &'static str = "pipelinerun";
  const TABLE: Table = Table::PipelineRuns;

  fn record_id(&self) -> RecordId {
    self.id
  }

  fn apply_update(&mut self, update: &Self::Update) {
    self.apply(update);
  }

  fn table(store: &LocalStore) -> &RecordTable<Self> {
    &store.pipeline_runs
  }

  fn table_mut(store: &mut LocalStore) -> &mut RecordTable<Self> {
    &mut store.pipeline_runs
  }
}

impl Record for LaneResult {
  type Update = LaneResultUpdate;
  const NAME: &'static str = "laneresult";
  const TABLE: Table = Table::LaneResults;

  fn record_id(&self) -> RecordId {
    self.id
  }

  fn apply_update(&mut self, update: &Self::Update) {
    self.apply(update);
  }

  fn table(store: &LocalStore) -> &RecordTable<Self> {
    &store.lane_results
  }

  fn table_mut(store: &mut LocalStore) -> &mut RecordTable<Self> {
    &mut store.lane_results
  }
}

impl Record for MapperResult {
  type Update = MapperResultUpdate;
  const NAME: &'static str = "mapperresult";
  const TABLE: Table = Table::MapperResults;

  fn record_id(&self) -> RecordId {
    self.id
  }

  fn apply_update(&mut self, update: &Self::Update) {
    self.apply(update);
  }

  fn table(store: &LocalStore) -> &RecordTable<Self> {
    &store.mapper_results
  }

  fn table_mut(store: &mut LocalStore) -> &mut RecordTable<Self> {
    &mut store.mapper_results
  }
}
