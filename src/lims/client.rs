use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::error::{LimsError, LimsResult};
use crate::lims::api_types::{list_to_map, redact_token, LaneResultFilter, RecordMap};
use crate::lims::types::{
  LaneResult, LaneResultUpdate, MapperResult, MapperResultUpdate, PipelineRun, PipelineRunUpdate,
  RecordId, RunInfo, SolexaRun, SolexaRunUpdate,
};

/// Remote data accessor.
///
/// Single fetches, creates and updates return `Ok(None)` when the LIMS answers
/// with an empty body, `null` or `{}`; non-success statuses surface as
/// [`LimsError::Status`].
pub trait LimsApi {
  fn get_run_info(&self, run: &str) -> LimsResult<Option<RunInfo>>;

  fn get_sample_sheet(&self, run: &str, lane: Option<u32>) -> LimsResult<Option<String>>;

  fn show_solexa_run(&self, id: RecordId) -> LimsResult<Option<SolexaRun>>;

  fn show_pipeline_run(&self, id: RecordId) -> LimsResult<Option<PipelineRun>>;

  fn show_lane_result(&self, id: RecordId) -> LimsResult<Option<LaneResult>>;

  fn show_mapper_result(&self, id: RecordId) -> LimsResult<Option<MapperResult>>;

  fn index_solexa_runs(&self, run: &str) -> LimsResult<RecordMap<SolexaRun>>;

  fn index_pipeline_runs(&self, run: &str) -> LimsResult<RecordMap<PipelineRun>>;

  fn index_lane_results(
    &self,
    run: &str,
    filter: &LaneResultFilter,
  ) -> LimsResult<RecordMap<LaneResult>>;

  fn index_mapper_results(&self, run: &str) -> LimsResult<RecordMap<MapperResult>>;

  fn create_pipeline_run(
    &self,
    run: &str,
    lane: u32,
    params: Option<&PipelineRunUpdate>,
  ) -> LimsResult<Option<PipelineRun>>;

  fn create_lane_result(
    &self,
    run: &str,
    lane: u32,
    params: &LaneResultUpdate,
  ) -> LimsResult<Option<LaneResult>>;

  fn create_mapper_result(&self, params: &MapperResultUpdate) -> LimsResult<Option<MapperResult>>;

  fn update_solexa_run(
    &self,
    id: RecordId,
    params: &SolexaRunUpdate,
  ) -> LimsResult<Option<SolexaRun>>;

  fn update_pipeline_run(
    &self,
    id: RecordId,
    params: &PipelineRunUpdate,
  ) -> LimsResult<Option<PipelineRun>>;

  fn update_lane_result(
    &self,
    id: RecordId,
    params: &LaneResultUpdate,
  ) -> LimsResult<Option<LaneResult>>;

  fn update_mapper_result(
    &self,
    id: RecordId,
    params: &MapperResultUpdate,
  ) -> LimsResult<Option<MapperResult>>;

  /// Invalidate every result recorded for a run/lane.
  fn delete_lane_results(&self, run: &str, lane: u32) -> LimsResult<()>;

  /// Check that the LIMS is reachable and accepts the token.
  fn test_connection(&self) -> LimsResult<()>;
}

/// Blocking HTTP client for the LIMS REST API.
#[derive(Clone)]
pub struct LimsClient {
  http: Client,
  prefix: Url,
  token: String,
}

impl LimsClient {
  /// Build a client for `{lims_url}/api/{api_version}/`.
  ///
  /// With `verify_cert` off the server certificate is not validated.
  pub fn new(
    lims_url: &str,
    lims_token: &str,
    api_version: &str,
    verify_cert: bool,
  ) -> LimsResult<Self> {
    let prefix = url_prefix(lims_url, api_version)?;

    let http = Client::builder()
      .danger_accept_invalid_certs(!verify_cert)
      .build()?;

    Ok(Self {
      http,
      prefix,
      token: lims_token.to_string(),
    })
  }

  fn endpoint(&self, path: &str) -> LimsResult<Url> {
    self
      .prefix
      .join(path)
      .map_err(|e| LimsError::Config(format!("Invalid LIMS endpoint {}: {}", path, e)))
  }

  fn send(&self, request: RequestBuilder, query: &[(&str, String)]) -> LimsResult<Response> {
    let response = request
      .query(&[("token", self.token.as_str())])
      .query(query)
      .send()?;
    check_status(response)
  }

  fn get(&self, path: &str, query: &[(&str, String)]) -> LimsResult<Response> {
    let url = self.endpoint(path)?;
    debug!(%path, "GET");
    self.send(self.http.get(url), query)
  }

  fn get_json<T: DeserializeOwned>(
    &self,
    path: &str,
    query: &[(&str, String)],
  ) -> LimsResult<Option<T>> {
    decode_optional(&self.get(path, query)?.text()?)
  }

  fn post_json<B: Serialize, T: DeserializeOwned>(
    &self,
    path: &str,
    query: &[(&str, String)],
    body: Option<&B>,
  ) -> LimsResult<Option<T>> {
    let url = self.endpoint(path)?;
    debug!(%path, "POST");
    let mut request = self.http.post(url);
    if let Some(body) = body {
      request = request.json(body);
    }
    decode_optional(&self.send(request, query)?.text()?)
  }

  fn patch_json<B: Serialize, T: DeserializeOwned>(
    &self,
    path: &str,
    body: &B,
  ) -> LimsResult<Option<T>> {
    let url = self.endpoint(path)?;
    debug!(%path, "PATCH");
    decode_optional(&self.send(self.http.patch(url).json(body), &[])?.text()?)
  }

  fn index<T: crate::cache::Record>(
    &self,
    path: &str,
    query: &[(&str, String)],
  ) -> LimsResult<RecordMap<T>> {
    let records: Option<Vec<T>> = self.get_json(path, query)?;
    Ok(list_to_map(records.unwrap_or_default()))
  }
}

impl LimsApi for LimsClient {
  fn get_run_info(&self, run: &str) -> LimsResult<Option<RunInfo>> {
    self.get_json("run_info", &[("run", run.to_string())])
  }

  fn get_sample_sheet(&self, run: &str, lane: Option<u32>) -> LimsResult<Option<String>> {
    let mut query = vec![("run", run.to_string())];
    if let Some(lane) = lane {
      query.push(("lane", lane.to_string()));
    }
    let text = self.get("samplesheets", &query)?.text()?;
    Ok(if text.is_empty() { None } else { Some(text) })
  }

  fn show_solexa_run(&self, id: RecordId) -> LimsResult<Option<SolexaRun>> {
    self.get_json(&format!("solexa_runs/{}", id), &[])
  }

  fn show_pipeline_run(&self, id: RecordId) -> LimsResult<Option<PipelineRun>> {
    self.get_json(&format!("solexa_pipeline_runs/{}", id), &[])
  }

  fn show_lane_result(&self, id: RecordId) -> LimsResult<Option<LaneResult>> {
    self.get_json(&format!("solexa_lane_results/{}", id), &[])
  }

  fn show_mapper_result(&self, id: RecordId) -> LimsResult<Option<MapperResult>> {
    self.get_json(&format!("mapper_results/{}", id), &[])
  }

  fn index_solexa_runs(&self, run: &str) -> LimsResult<RecordMap<SolexaRun>> {
    self.index("solexa_runs", &[("run", run.to_string())])
  }

  fn index_pipeline_runs(&self, run: &str) -> LimsResult<RecordMap<PipelineRun>> {
    self.index("solexa_pipeline_runs", &[("run", run.to_string())])
  }

  fn index_lane_results(
    &self,
    run: &str,
    filter: &LaneResultFilter,
  ) -> LimsResult<RecordMap<LaneResult>> {
    let mut query = vec![("run", run.to_string())];
    query.extend(filter.query_pairs());
    self.index("solexa_lane_results", &query)
  }

  fn index_mapper_results(&self, run: &str) -> LimsResult<RecordMap<MapperResult>> {
    self.index("mapper_results", &[("run", run.to_string())])
  }

  fn create_pipeline_run(
    &self,
    run: &str,
    lane: u32,
    params: Option<&PipelineRunUpdate>,
  ) -> LimsResult<Option<PipelineRun>> {
    self.post_json(
      "solexa_pipeline_runs",
      &[("run", run.to_string()), ("lane", lane.to_string())],
      params,
    )
  }

  fn create_lane_result(
    &self,
    run: &str,
    lane: u32,
    params: &LaneResultUpdate,
  ) -> LimsResult<Option<LaneResult>> {
    self.post_json(
      "solexa_lane_results",
      &[("run", run.to_string()), ("lane", lane.to_string())],
      Some(params),
    )
  }

  fn create_mapper_result(&self, params: &MapperResultUpdate) -> LimsResult<Option<MapperResult>> {
    self.post_json("mapper_results", &[], Some(params))
  }

  fn update_solexa_run(
    &self,
    id: RecordId,
    params: &SolexaRunUpdate,
  ) -> LimsResult<Option<SolexaRun>> {
    self.patch_json(&format!("solexa_runs/{}", id), params)
  }

  fn update_pipeline_run(
    &self,
    id: RecordId,
    params: &PipelineRunUpdate,
  ) -> LimsResult<Option<PipelineRun>> {
    self.patch_json(&format!("solexa_pipeline_runs/{}", id), params)
  }

  fn update_lane_result(
    &self,
    id: RecordId,
    params: &LaneResultUpdate,
  ) -> LimsResult<Option<LaneResult>> {
    self.patch_json(&format!("solexa_lane_results/{}", id), params)
  }

  fn update_mapper_result(
    &self,
    id: RecordId,
    params: &MapperResultUpdate,
  ) -> LimsResult<Option<MapperResult>> {
    self.patch_json(&format!("mapper_results/{}", id), params)
  }

  fn delete_lane_results(&self, run: &str, lane: u32) -> LimsResult<()> {
    let url = self.endpoint("delete_lane_results")?;
    debug!(%run, lane, "POST delete_lane_results");
    self.send(
      self.http.post(url),
      &[("run", run.to_string()), ("lane", lane.to_string())],
    )?;
    Ok(())
  }

  fn test_connection(&self) -> LimsResult<()> {
    self.get("ok", &[])?;
    Ok(())
  }
}

/// `{root}/api/{version}/`, tolerating a trailing slash on the root.
fn url_prefix(lims_url: &str, api_version: &str) -> LimsResult<Url> {
  let raw = format!("{}/api/{}/", lims_url.trim_end_matches('/'), api_version);
  Url::parse(&raw).map_err(|e| LimsError::Config(format!("Invalid LIMS url {}: {}", lims_url, e)))
}

/// Decode a response body, treating an empty body, `null` and `{}` as no record.
fn decode_optional<T: DeserializeOwned>(body: &str) -> LimsResult<Option<T>> {
  if body.trim().is_empty() {
    return Ok(None);
  }
  match serde_json::from_str::<Value>(body)? {
    Value::Null => Ok(None),
    Value::Object(map) if map.is_empty() => Ok(None),
    value => Ok(Some(serde_json::from_value(value)?)),
  }
}

fn check_status(response: Response) -> LimsResult<Response> {
  let status = response.status();
  if status.is_success() {
    return Ok(response);
  }

  Err(LimsError::Status {
    status: status.as_u16(),
    reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
    url: redact_token(response.url()),
  })
}
