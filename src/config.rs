use crate::cli::RunArgs;
use crate::error::ConfigError;
use crate::space;
use crate::space::ConfigSpace;
use crate::space::FamilyRegistry;
use clap::ValueEnum;
use figment::Figment;
use figment::providers::Env;
use figment::providers::Format;
use figment::providers::Json;
use figment::providers::Serialized;
use rand::RngCore;
use serde::Deserialize;
use serde::Serialize;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

/// Which execution pipeline each job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SolverMode {
  /// Plain solver invocation.
  Plain,

  /// Solver with the global-preprocessing flag and filename-tag env.
  Preprocess,

  /// Two-phase pipeline: pre-learn derived clauses, merge, then solve.
  Staged,
}

/// Experiment profile: executable paths, fixed flags, markers and the flag
/// family registry. Loaded from built-in defaults, overlaid with an optional
/// JSON file, overlaid with `SWEEP_*` env vars.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
  /// Plain solver binary. Also used for phase 2 of the staged pipeline.
  pub solver: PathBuf,

  /// Solver build used in preprocess mode.
  pub preprocess_solver: PathBuf,

  /// Pre-learning binary for phase 1 of the staged pipeline.
  pub prelearner: PathBuf,

  /// External proof checker.
  pub verifier: PathBuf,

  /// Flags prepended to every plain/preprocess invocation.
  pub base_args: Vec<String>,

  /// Extra flags for preprocess mode.
  pub preprocess_args: Vec<String>,

  /// Flags for the pre-learning phase.
  pub prelearn_args: Vec<String>,

  /// Fixed flag appended to every augmented combination.
  pub ordering_flag: String,

  /// Env var the solver reads as a filename tag for its own diagnostics.
  /// Set to the trailing 15 characters of the input path when present.
  pub filename_env: Option<String>,

  /// Substring of the checker's stdout that signals a verified proof.
  pub verified_marker: String,

  /// Prefix of solver stdout lines carrying the satisfying assignment.
  pub assignment_marker: String,

  /// Name of the derived-clause artifact the pre-learner writes.
  pub derived_clauses_name: String,

  /// Flag-family registry keyed by the names given to --families.
  pub families: FamilyRegistry,

  /// Local directory proof artifacts are written under.
  pub proof_dir: PathBuf,

  /// Local directory per-job scratch directories are created under.
  pub scratch_dir: PathBuf,

  pub remote: RemoteProfile,
}

/// Remote-execution half of the profile. Paths are relative to `workdir`
/// on each host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteProfile {
  /// Working directory on every host, relative to the remote home.
  pub workdir: String,

  /// Local directories rsynced to every host before the build step.
  pub sync_dirs: Vec<PathBuf>,

  /// Shell commands run on every host after the transfer. A failing step
  /// aborts the whole distributed run.
  pub build_steps: Vec<String>,

  pub solver: String,
  pub preprocess_solver: String,
  pub prelearner: String,
  pub verifier: String,
}

fn default_families() -> FamilyRegistry {
  let table: &[(&str, &[&str])] = &[
    (
      "filter",
      &[
        "--globalfiltertriv=false",
        "--globalfiltertriv=true",
        "--globalfiltertriv=true --globalmaxlen=2",
        "--globalfiltertriv=true --globalmaxlen=4",
        "--globalfiltertriv=true --globalmaxlen=8",
        "--globalfiltertriv=true --globalmaxlen=16",
      ],
    ),
    (
      "time",
      &["--globaltimelim=5", "--globaltimelim=30", "--globaltimelim=120"],
    ),
    ("bcp", &["--globalbcp=true", "--globalbcp=false"]),
    ("touch", &["--globaltouch=true", "--globaltouch=false"]),
    ("polarity", &["--globalbothpol=true", "--globalbothpol=false"]),
    (
      "alpha-order",
      &["--globalalphaasort=true", "--globalalphaarandom=true", ""],
    ),
    ("alpha-greedy", &["--globalalphaagreedy=true", ""]),
  ];

  table
    .iter()
    .map(|(name, opts)| {
      (
        name.to_string(),
        opts.iter().map(|o| o.to_string()).collect(),
      )
    })
    .collect()
}

impl Default for Profile {
  fn default() -> Self {
    Profile {
      solver: PathBuf::from("../cadical/build/cadical"),
      preprocess_solver: PathBuf::from("build/cadical"),
      prelearner: PathBuf::from("../PReLearn/PReLearn/sadical"),
      verifier: PathBuf::from("../dpr-trim/dpr-trim"),
      base_args: vec![
        "--report=true".to_string(),
        "--chrono=false".to_string(),
        "--global=true".to_string(),
        "--globalpreprocess=true".to_string(),
        "--globalrecord=false".to_string(),
      ],
      preprocess_args: vec!["--globalpreprocess".to_string()],
      prelearn_args: vec!["--pre_iterations=50".to_string()],
      ordering_flag: "--globalorderi=true".to_string(),
      filename_env: Some("CADICAL_FILENAME".to_string()),
      verified_marker: "s VERIFIED".to_string(),
      assignment_marker: "v ".to_string(),
      derived_clauses_name: "pr_clauses.cnf".to_string(),
      families: default_families(),
      proof_dir: PathBuf::from("proofs"),
      scratch_dir: PathBuf::from("scratch"),
      remote: RemoteProfile::default(),
    }
  }
}

impl Default for RemoteProfile {
  fn default() -> Self {
    RemoteProfile {
      workdir: "satsweep".to_string(),
      sync_dirs: vec![
        PathBuf::from("../cadical"),
        PathBuf::from("../cautical"),
        PathBuf::from("../dpr-trim"),
        PathBuf::from("../PReLearn"),
      ],
      build_steps: vec![
        "cd cautical && rm -rf build && mkdir -p build && cd build && ../configure && make"
          .to_string(),
        "cd dpr-trim && make clean && make".to_string(),
      ],
      solver: "cadical/build/cadical".to_string(),
      preprocess_solver: "cautical/build/cadical".to_string(),
      prelearner: "PReLearn/PReLearn/sadical".to_string(),
      verifier: "dpr-trim/dpr-trim".to_string(),
    }
  }
}

impl Profile {
  /// Resolves the profile: defaults, then the JSON file (the given path, or
  /// `sweep.json` if present), then `SWEEP_*` env overrides.
  pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
    let figment = Figment::from(Serialized::defaults(Profile::default()));
    let figment = match path {
      Some(file) => figment.merge(Json::file_exact(file)),
      None => figment.merge(Json::file("sweep.json")),
    };
    figment
      .merge(Env::prefixed("SWEEP_").split("__"))
      .extract()
      .map_err(|e| ConfigError::Profile(Box::new(e)))
  }
}

/// Fully validated and resolved run configuration.
#[derive(Debug)]
pub struct Config {
  pub input_dir: PathBuf,
  pub files: Vec<PathBuf>,
  pub space: ConfigSpace,
  pub reps: u32,
  pub augmented_reps: u32,
  pub jobs: usize,
  pub timeout: Duration,
  pub prelearn_timeout: Duration,
  pub mode: SolverMode,
  pub produce_proofs: bool,
  pub check_proofs: bool,
  pub out: PathBuf,

  /// Per-run proof artifact directory (nonce-keyed).
  pub proof_dir: PathBuf,

  /// Per-run scratch root (nonce-keyed) for staged-pipeline directories.
  pub scratch_root: PathBuf,

  pub profile: Profile,
}

/// Generates the per-run nonce keying scratch and proof directories, so
/// concurrent invocations never collide on artifact paths.
fn run_nonce() -> String {
  let mut rng = rand::rng();
  format!("{:016x}", rng.next_u64())
}

fn available_cores() -> usize {
  std::thread::available_parallelism()
    .map(|n| n.get())
    .unwrap_or(1)
}

/// Gathers the sorted *.cnf corpus from the input folder.
fn scan_inputs(dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
  if !dir.is_dir() {
    return Err(ConfigError::InputDirNotFound(dir.to_path_buf()));
  }

  let entries = std::fs::read_dir(dir).map_err(|source| ConfigError::ScanInputs {
    path: dir.to_path_buf(),
    source,
  })?;

  let mut files = Vec::new();
  for entry in entries {
    let entry = entry.map_err(|source| ConfigError::ScanInputs {
      path: dir.to_path_buf(),
      source,
    })?;
    let path = entry.path();
    if path.is_file() && path.extension().is_some_and(|ext| ext == "cnf") {
      files.push(path);
    }
  }
  files.sort();

  if files.is_empty() {
    return Err(ConfigError::NoInputFiles(dir.to_path_buf()));
  }
  Ok(files)
}

impl TryFrom<RunArgs> for Config {
  type Error = ConfigError;

  fn try_from(
    RunArgs {
      folder,
      families,
      timeout,
      prelearn_timeout,
      jobs,
      out,
      solver_mode,
      produce_proofs,
      check_proofs,
      reps,
      augmented_reps,
      profile,
    }: RunArgs,
  ) -> Result<Self, Self::Error> {
    if check_proofs && !produce_proofs {
      return Err(ConfigError::CheckWithoutProduce);
    }
    if check_proofs && solver_mode == SolverMode::Staged {
      tracing::warn!("Proof verification is not supported in staged mode; proofs will not be checked");
    }

    let profile = Profile::load(profile.as_deref())?;

    let selected: Vec<String> = families.split_whitespace().map(str::to_string).collect();
    let space = space::build_option_sets(&selected, &profile.families, &profile.ordering_flag)?;

    let files = scan_inputs(&folder)?;

    let nonce = run_nonce();
    let proof_dir = profile.proof_dir.join(format!("run_{nonce}"));
    let scratch_root = profile.scratch_dir.join(format!("run_{nonce}"));

    Ok(Config {
      input_dir: folder,
      files,
      space,
      reps,
      augmented_reps,
      jobs: jobs.unwrap_or_else(available_cores),
      timeout: Duration::from_secs(timeout),
      prelearn_timeout: Duration::from_secs(prelearn_timeout),
      mode: solver_mode,
      produce_proofs,
      check_proofs,
      out,
      proof_dir,
      scratch_root,
      profile,
    })
  }
}

impl Config {
  /// Proof checking is active only when proofs are produced, checking was
  /// requested, and the pipeline supports it.
  pub fn verification_active(&self) -> bool {
    self.produce_proofs && self.check_proofs && self.mode != SolverMode::Staged
  }

  /// The nonce-keyed identifier of this run, shared by the scratch root,
  /// the proof directory and the per-host staging directories.
  pub fn run_id(&self) -> String {
    self
      .scratch_root
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_else(|| "run".to_string())
  }
}
