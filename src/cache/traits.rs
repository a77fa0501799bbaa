//! Core traits and types for the local fixture cache.

use serde::{de::DeserializeOwned, Serialize};

use super::layer::{LocalStore, RecordTable};
use crate::lims::types::RecordId;

/// One on-disk fixture file, holding one entity table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
  RunInfo,
  SampleSheets,
  SolexaRuns,
  PipelineRuns,
  LaneResults,
  MapperResults,
}

impl Table {
  pub fn file_name(&self) -> &'static str {
    match self {
      Table::RunInfo => "runinfo.json",
      Table::SampleSheets => "samplesheets.json",
      Table::SolexaRuns => "solexaruns.json",
      Table::PipelineRuns => "pipelineruns.json",
      Table::LaneResults => "laneresults.json",
      Table::MapperResults => "mapperresults.json",
    }
  }
}

/// Trait for id-keyed records that live in a `RecordTable`.
///
/// Implementors name their table, expose their id, and know how to merge
/// their patch type into themselves.
pub trait Record: Clone + Serialize + DeserializeOwned {
  /// Partial update accepted by the update operations.
  type Update: Serialize;

  /// Human-readable entity name used in logs and errors (e.g. "pipelinerun").
  const NAME: &'static str;

  /// Fixture file backing this entity.
  const TABLE: Table;

  fn record_id(&self) -> RecordId;

  /// Merge a partial update in place.
  fn apply_update(&mut self, update: &Self::Update);

  fn table(store: &LocalStore) -> &RecordTable<Self>;

  fn table_mut(store: &mut LocalStore) -> &mut RecordTable<Self>;
}
