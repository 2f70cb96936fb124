use crate::config::SolverMode;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(version, about = "Orchestrator of SAT-solver experiment sweeps")]
pub struct Cli {
  #[command(subcommand)]
  pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
  /// Run the sweep on the local machine.
  Run(RunArgs),

  /// Distribute the sweep across a fleet of remote hosts.
  Fleet(FleetArgs),

  /// Copy a curated benchmark list into a target directory.
  Curate(CurateArgs),

  /// Summarise an existing results ledger.
  Report(ReportArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
  /// Folder containing the input *.cnf files.
  #[arg(long, default_value = "satcomp_benchmarks_target")]
  pub folder: PathBuf,

  /// Space-separated flag-family names selecting the configuration space.
  /// Example: "filter time bcp"
  #[arg(long, required = true)]
  pub families: String,

  /// Timeout in seconds for each solver run.
  #[arg(long, default_value_t = 10)]
  pub timeout: u64,

  /// Timeout in seconds for the pre-learning phase (staged mode only).
  #[arg(long, default_value_t = 100)]
  pub prelearn_timeout: u64,

  /// Maximum parallel jobs. Defaults to the number of logical CPUs.
  #[arg(short = 'j', long)]
  pub jobs: Option<usize>,

  /// CSV file the results ledger is appended to.
  #[arg(long, default_value = "results.csv")]
  pub out: PathBuf,

  /// Which solver pipeline to run.
  #[arg(long, value_enum, default_value_t = SolverMode::Preprocess)]
  pub solver_mode: SolverMode,

  /// Ask the solver to emit a proof artifact.
  #[arg(long)]
  pub produce_proofs: bool,

  /// Re-check UNSAT proofs with the external checker.
  #[arg(long)]
  pub check_proofs: bool,

  /// Repetitions per base combination.
  #[arg(long, default_value_t = 10)]
  pub reps: u32,

  /// Repetitions per augmented (ordering-flag) combination.
  #[arg(long, default_value_t = 1)]
  pub augmented_reps: u32,

  /// Path to a JSON experiment profile overriding the built-in defaults.
  /// Profile values can also be overridden via SWEEP_* env vars.
  #[arg(long, env = "SWEEP_PROFILE")]
  pub profile: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct FleetArgs {
  #[command(flatten)]
  pub run: RunArgs,

  /// TOML file describing the remote hosts and their core budgets.
  #[arg(long, default_value = "fleet.toml")]
  pub hosts: PathBuf,

  /// Skip copying sources and building on the remote machines.
  #[arg(long)]
  pub skip_setup: bool,

  /// Compress file transfers (slower, less bandwidth).
  #[arg(long)]
  pub compress: bool,

  /// Patterns excluded from file transfer.
  #[arg(long, num_args = 1..)]
  pub exclude: Vec<String>,
}

#[derive(Debug, Args)]
pub struct CurateArgs {
  /// TOML manifest listing source directories and file names.
  #[arg(long, default_value = "curation.toml")]
  pub manifest: PathBuf,

  /// Overrides the manifest's target directory.
  #[arg(long)]
  pub target: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct ReportArgs {
  /// The ledger CSV to summarise.
  #[arg(long, default_value = "results.csv")]
  pub ledger: PathBuf,

  /// Emit one JSON object per option set instead of the table.
  #[arg(long)]
  pub json: bool,
}
