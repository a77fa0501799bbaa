mod commands;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use lims_client::{Config, Connection, ConnectionOptions};

#[derive(Parser, Debug)]
#[command(name = "lims")]
#[command(about = "Query the sequencing LIMS and capture runs as local testdata")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./lims.yaml or $XDG_CONFIG_HOME/lims/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// LIMS base URL (falls back to config, then LIMS_URL / UHTS_LIMS_URL)
  #[arg(long, global = true)]
  lims_url: Option<String>,

  /// LIMS access token (falls back to LIMS_TOKEN / UHTS_LIMS_TOKEN)
  #[arg(long, global = true)]
  lims_token: Option<String>,

  /// API version path segment
  #[arg(long, global = true)]
  api_version: Option<String>,

  /// Replace every notification email in run info with this address
  #[arg(long, global = true)]
  override_owner: Option<String>,

  /// Never contact the LIMS; serve everything from testdata
  #[arg(long, global = true)]
  local_only: bool,

  /// Read from the LIMS but keep all writes local
  #[arg(long, global = true)]
  remote_read_only: bool,

  /// Validate the LIMS TLS certificate
  #[arg(long, global = true)]
  verify_cert: bool,

  /// Directory holding the JSON testdata files
  #[arg(long, global = true)]
  fixture_dir: Option<PathBuf>,

  /// Increase log verbosity (-v info, -vv debug)
  #[arg(short, long, global = true, action = clap::ArgAction::Count)]
  verbose: u8,

  /// Write logs to a daily file in this directory instead of stderr
  #[arg(long, global = true)]
  log_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
  /// Download a run's sample sheet
  Samplesheet {
    #[arg(short, long)]
    run: String,
    /// Single lane; all lanes when omitted
    #[arg(short, long)]
    lane: Option<u32>,
    /// Output file (default: RUN[_LN]_samplesheet.csv)
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
  /// Save everything the LIMS has on a run into the testdata files
  Capture {
    #[arg(short, long)]
    run: String,
  },
  /// Launch the analysis pipeline for runs that are ready for it
  StartAnalyses {
    #[arg(required = true)]
    runs: Vec<String>,
    /// Command template; {run} is replaced by the run name
    #[arg(long, default_value = commands::DEFAULT_ANALYSIS_COMMAND)]
    command: String,
    /// Print the commands instead of running them
    #[arg(long)]
    dry_run: bool,
    /// Where launched commands and their output are appended
    #[arg(long)]
    log_file: Option<PathBuf>,
  },
  /// Check that the LIMS is reachable
  Ping,
}

impl Args {
  fn connection_options(&self, config: &Config) -> ConnectionOptions {
    let mut options = ConnectionOptions::from_config(config);
    if let Some(url) = &self.lims_url {
      options.lims_url = Some(url.clone());
    }
    if let Some(version) = &self.api_version {
      options.api_version = version.clone();
    }
    if let Some(owner) = &self.override_owner {
      options.override_owner = Some(owner.clone());
    }
    if let Some(dir) = &self.fixture_dir {
      options.fixture_dir = dir.clone();
    }
    options.lims_token = self.lims_token.clone();
    options.local_only = self.local_only;
    options.remote_is_read_only = self.remote_read_only;
    options.verify_cert |= self.verify_cert;
    options
  }
}

fn init_tracing(verbose: u8, log_dir: Option<&Path>) -> Option<WorkerGuard> {
  let level = match verbose {
    0 => "warn",
    1 => "info",
    _ => "debug",
  };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

  match log_dir {
    Some(dir) => {
      let appender = tracing_appender::rolling::daily(dir, "lims.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
      Some(guard)
    }
    None => {
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
      None
    }
  }
}

fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = init_tracing(args.verbose, args.log_dir.as_deref());

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let mut options = args.connection_options(&config);

  match args.command {
    Cmd::Samplesheet { run, lane, output } => {
      let mut conn = Connection::open(options)?;
      let path = commands::samplesheet(&mut conn, &run, lane, output.as_deref())?;
      println!("{}", path.display());
    }
    Cmd::Capture { run } => {
      options.testdata_update_mode = true;
      let mut conn = Connection::open(options)?;
      commands::capture(&mut conn, &run)?;
    }
    Cmd::StartAnalyses {
      runs,
      command,
      dry_run,
      log_file,
    } => {
      let mut conn = Connection::open(options)?;
      let log_file = log_file.unwrap_or_else(commands::default_analysis_log);
      let started = commands::start_analyses(&mut conn, &runs, &command, &log_file, dry_run)?;
      println!("{:?}", started);
    }
    Cmd::Ping => {
      let conn = Connection::open(options)?;
      conn.test_connection()?;
      println!("ok");
    }
  }

  Ok(())
}
