//! Subcommands of the `lims` binary.

use chrono::Local;
use color_eyre::{eyre::eyre, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{info, warn};

use lims_client::lims::RunObjects;
use lims_client::{Connection, LimsApi, LimsError};

/// Analysis launcher; `{run}` is replaced by the run name.
pub const DEFAULT_ANALYSIS_COMMAND: &str =
  "run_analysis.rb start_illumina_run --run {run} --force --verbose";

/// Log file name under the home directory for launched analyses.
pub const DEFAULT_ANALYSIS_LOG: &str = "lims_automated_analyses.txt";

/// `R_samplesheet.csv`, or `R_L3_samplesheet.csv` for a single lane.
pub fn default_sample_sheet_name(run: &str, lane: Option<u32>) -> String {
  match lane {
    Some(lane) => format!("{}_L{}_samplesheet.csv", run, lane),
    None => format!("{}_samplesheet.csv", run),
  }
}

/// Save a run's sample sheet and return where it went.
pub fn samplesheet<R: LimsApi>(
  conn: &mut Connection<R>,
  run: &str,
  lane: Option<u32>,
  output: Option<&Path>,
) -> Result<PathBuf> {
  let path = output
    .map(Path::to_path_buf)
    .unwrap_or_else(|| PathBuf::from(default_sample_sheet_name(run, lane)));
  conn.save_sample_sheet(run, lane, &path)?;
  Ok(path)
}

/// Pull everything the LIMS has on a run into the fixture files.
pub fn capture<R: LimsApi>(conn: &mut Connection<R>, run: &str) -> Result<RunObjects> {
  let objects = conn.get_all_run_objects(run)?;
  info!(
    run,
    sample_sheets = objects.sample_sheets.len(),
    solexa_runs = objects.solexa_runs.len(),
    pipeline_runs = objects.pipeline_runs.len(),
    lane_results = objects.lane_results.len(),
    mapper_results = objects.mapper_results.len(),
    "Captured run"
  );
  Ok(objects)
}

/// Keep the runs that are sequenced but have no analysis yet.
///
/// Runs the LIMS doesn't know are skipped with a warning.
pub fn runs_needing_analysis<R: LimsApi>(
  conn: &mut Connection<R>,
  runs: &[String],
) -> Result<Vec<String>> {
  let mut ready = Vec::new();
  for run in runs {
    match conn.get_run_info(run) {
      Ok(info) if info.needs_analysis() => ready.push(run.clone()),
      Ok(_) => info!(run = %run, "Run does not need analysis"),
      Err(e @ LimsError::NotFound { .. }) => warn!("Skipping {}: {}", run, e),
      Err(e) => return Err(e.into()),
    }
  }
  Ok(ready)
}

/// Split a command template into argv with `{run}` substituted.
pub fn render_command(template: &str, run: &str) -> Result<Vec<String>> {
  let argv: Vec<String> = template
    .split_whitespace()
    .map(|part| part.replace("{run}", run))
    .collect();
  if argv.is_empty() {
    return Err(eyre!("Analysis command template is empty"));
  }
  Ok(argv)
}

/// Spawn `argv` in the background with its output appended to `log_file`.
pub fn launch_analysis(argv: &[String], log_file: &Path) -> Result<u32> {
  let (program, args) = argv
    .split_first()
    .ok_or_else(|| eyre!("Nothing to launch"))?;

  let mut log = OpenOptions::new()
    .create(true)
    .append(true)
    .open(log_file)
    .map_err(|e| eyre!("Failed to open {}: {}", log_file.display(), e))?;
  writeln!(log, "{}  {}", Local::now(), argv.join(" "))?;

  let stderr = log.try_clone()?;
  let child = Command::new(program)
    .args(args)
    .stdout(Stdio::from(log))
    .stderr(Stdio::from(stderr))
    .spawn()
    .map_err(|e| eyre!("Failed to start {}: {}", program, e))?;

  Ok(child.id())
}

/// Default analysis log location, falling back to the working directory.
pub fn default_analysis_log() -> PathBuf {
  dirs::home_dir()
    .map(|home| home.join(DEFAULT_ANALYSIS_LOG))
    .unwrap_or_else(|| PathBuf::from(DEFAULT_ANALYSIS_LOG))
}

pub fn start_analyses<R: LimsApi>(
  conn: &mut Connection<R>,
  runs: &[String],
  template: &str,
  log_file: &Path,
  dry_run: bool,
) -> Result<Vec<String>> {
  let ready = runs_needing_analysis(conn, runs)?;
  for run in &ready {
    let argv = render_command(template, run)?;
    if dry_run {
      println!("{}", argv.join(" "));
      continue;
    }
    let pid = launch_analysis(&argv, log_file)?;
    info!(run = %run, pid, "Started analysis");
  }
  Ok(ready)
}
