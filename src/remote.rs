use crate::cnf;
use crate::config::Config;
use crate::config::RemoteProfile;
use crate::config::SolverMode;
use crate::error::SetupError;
use crate::error::SweepError;
use crate::job::Job;
use crate::job::JobOutput;
use crate::job::Outcome;
use crate::job::classify_exit;
use crate::ledger::Ledger;
use crate::pool;
use crate::solver::Invocation;
use crate::solver::RunStatus;
use crate::solver::filename_tag;
use crate::solver::parse_assignment;
use crate::solver::run_with_timeout;
use crate::verify;
use crate::verify::ProofCheck;
use crate::verify::ProofStatus;
use std::path::Path;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// One remote machine and its core budget. The core count sizes the host's
/// dedicated pool; nothing else throttles it.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct HostSpec {
  pub addr: String,
  pub cores: usize,
}

/// The fleet description parsed from the hosts TOML file.
#[derive(Debug, serde::Deserialize)]
pub struct Fleet {
  pub hosts: Vec<HostSpec>,
}

pub fn load_fleet(path: &Path) -> Result<Fleet, SetupError> {
  let text = std::fs::read_to_string(path).map_err(|source| SetupError::FleetRead {
    path: path.to_path_buf(),
    source,
  })?;
  let fleet: Fleet = toml::from_str(&text).map_err(|source| SetupError::FleetParse {
    path: path.to_path_buf(),
    source: Box::new(source),
  })?;
  if fleet.hosts.is_empty() {
    return Err(SetupError::NoHosts);
  }
  Ok(fleet)
}

/// Transfer/setup options for the distributed run.
#[derive(Debug, Clone)]
pub struct FleetOpts {
  pub skip_setup: bool,
  pub compress: bool,
  pub exclude: Vec<String>,
}

impl FleetOpts {
  pub fn default_excludes() -> Vec<String> {
    [".git", "*.o", "*.a", "*.so", "*.dylib", "*.dll", "*.exe"]
      .iter()
      .map(|s| s.to_string())
      .collect()
  }
}

/// Round-robins input files over the host list. The file is the
/// partitioning key: each host runs the full flag sweep for its files.
pub fn assign_files(files: &[PathBuf], hosts: usize) -> Vec<Vec<PathBuf>> {
  let mut buckets = vec![Vec::new(); hosts];
  for (i, file) in files.iter().enumerate() {
    buckets[i % hosts].push(file.clone());
  }
  buckets
}

/// Path of a workdir-relative executable as seen from a remote login shell.
fn rpath(workdir: &str, rel: &str) -> String {
  format!("$HOME/{workdir}/{rel}")
}

async fn ssh_output(host: &str, script: &str) -> std::io::Result<std::process::Output> {
  Command::new("ssh")
    .arg(host)
    .arg(script)
    .stdin(Stdio::null())
    .output()
    .await
}

/// Copies local files into a remote directory as one bulk transfer.
async fn scp_to(host: &str, locals: &[PathBuf], remote_dir: &str) -> std::io::Result<bool> {
  let mut cmd = Command::new("scp");
  for local in locals {
    cmd.arg(local);
  }
  let status = cmd
    .arg(format!("{host}:{remote_dir}/"))
    .stdin(Stdio::null())
    .status()
    .await?;
  Ok(status.success())
}

/// Fetches one remote file into a local directory.
async fn scp_from(host: &str, remote: &str, local_dir: &Path) -> std::io::Result<bool> {
  let status = Command::new("scp")
    .arg(format!("{host}:{remote}"))
    .arg(local_dir)
    .stdin(Stdio::null())
    .status()
    .await?;
  Ok(status.success())
}

/// One-time setup of every host: transfer the solver sources and run the
/// build steps. Failure on any host aborts the distributed run, since a
/// fleet where only some hosts carry working executables produces
/// incomparable results.
pub async fn setup_fleet(
  profile: &RemoteProfile,
  fleet: &Fleet,
  opts: &FleetOpts,
) -> Result<(), SetupError> {
  for host in &fleet.hosts {
    setup_host(profile, host, opts).await?;
  }
  Ok(())
}

async fn setup_host(
  profile: &RemoteProfile,
  host: &HostSpec,
  opts: &FleetOpts,
) -> Result<(), SetupError> {
  tracing::info!(host = %host.addr, "Setting up remote host");
  let workdir = &profile.workdir;

  let mkdir = format!("mkdir -p {workdir}/tmp {workdir}/scratch {workdir}/proofs");
  let out = ssh_output(&host.addr, &mkdir)
    .await
    .map_err(|source| SetupError::Spawn {
      host: host.addr.clone(),
      command: mkdir.clone(),
      source,
    })?;
  if !out.status.success() {
    return Err(SetupError::Build {
      host: host.addr.clone(),
      command: mkdir,
      stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
      stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
    });
  }

  for dir in &profile.sync_dirs {
    tracing::info!(host = %host.addr, dir = %dir.display(), "Copying directory");
    let mut cmd = Command::new("rsync");
    cmd.arg("-av");
    if opts.compress {
      cmd.arg("-z");
    } else {
      cmd.arg("--no-compress");
    }
    for pattern in &opts.exclude {
      cmd.arg("--exclude").arg(pattern);
    }
    let status = cmd
      .arg(dir)
      .arg(format!("{}:{workdir}/", host.addr))
      .stdin(Stdio::null())
      .status()
      .await
      .map_err(|source| SetupError::Spawn {
        host: host.addr.clone(),
        command: format!("rsync {}", dir.display()),
        source,
      })?;
    if !status.success() {
      return Err(SetupError::Transfer {
        host: host.addr.clone(),
        dir: dir.clone(),
      });
    }
  }

  for step in &profile.build_steps {
    tracing::info!(host = %host.addr, %step, "Running build step");
    let script = format!("cd {workdir} && {step}");
    let out = ssh_output(&host.addr, &script)
      .await
      .map_err(|source| SetupError::Spawn {
        host: host.addr.clone(),
        command: script.clone(),
        source,
      })?;
    if !out.status.success() {
      return Err(SetupError::Build {
        host: host.addr.clone(),
        command: script,
        stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
      });
    }
  }

  Ok(())
}

/// Stages a host's assigned input files under the run's staging directory
/// in one bulk transfer.
async fn stage_inputs(
  cfg: &Config,
  host: &HostSpec,
  files: &[PathBuf],
) -> Result<(), SetupError> {
  let workdir = &cfg.profile.remote.workdir;
  let run_id = cfg.run_id();
  let script = format!(
    "mkdir -p {workdir}/tmp/{run_id} {workdir}/scratch/{run_id} {workdir}/proofs/{run_id}"
  );
  let out = ssh_output(&host.addr, &script)
    .await
    .map_err(|source| SetupError::Spawn {
      host: host.addr.clone(),
      command: script,
      source,
    })?;
  if !out.status.success() {
    return Err(SetupError::StageInputs {
      host: host.addr.clone(),
    });
  }

  tracing::info!(host = %host.addr, files = files.len(), "Staging input files");
  let staged = scp_to(&host.addr, files, &format!("{workdir}/tmp/{run_id}"))
    .await
    .map_err(|source| SetupError::Spawn {
      host: host.addr.clone(),
      command: "scp".to_string(),
      source,
    })?;
  if !staged {
    return Err(SetupError::StageInputs {
      host: host.addr.clone(),
    });
  }
  Ok(())
}

/// Removes the run's staging, scratch and proof directories from a host.
async fn cleanup_host(cfg: &Config, host: &HostSpec) {
  let workdir = &cfg.profile.remote.workdir;
  let run_id = cfg.run_id();
  let script = format!(
    "rm -rf {workdir}/tmp/{run_id} {workdir}/scratch/{run_id} {workdir}/proofs/{run_id}"
  );
  if let Err(e) = ssh_output(&host.addr, &script).await {
    tracing::warn!(host = %host.addr, error = %e, "Failed to clean up remote run directories");
  }
}

/// Runs the sweep across the fleet: setup, per-host staging, one bounded
/// pool per host (sized to its core budget, all pools active concurrently),
/// completion-order persistence.
pub async fn run_fleet(
  cfg: Arc<Config>,
  fleet: Fleet,
  opts: FleetOpts,
  ledger: &Ledger,
) -> Result<(), SweepError> {
  if opts.skip_setup {
    tracing::info!("Skipping remote setup");
  } else {
    setup_fleet(&cfg.profile.remote, &fleet, &opts).await?;
  }

  std::fs::create_dir_all(&cfg.scratch_root)?;

  let assignments = assign_files(&cfg.files, fleet.hosts.len());
  let mut tasks: JoinSet<(String, JobOutput)> = JoinSet::new();

  for (host, files) in fleet.hosts.iter().zip(&assignments) {
    if files.is_empty() {
      continue;
    }
    stage_inputs(&cfg, host, files).await?;

    let jobs = pool::expand_for(&cfg, files);
    tracing::info!(
      host = %host.addr,
      files = files.len(),
      jobs = jobs.len(),
      cores = host.cores,
      "Dispatching to host pool"
    );

    let limit = Arc::new(Semaphore::new(host.cores));
    for job in jobs {
      let cfg = Arc::clone(&cfg);
      let host = host.clone();
      let limit = Arc::clone(&limit);
      tasks.spawn(async move {
        let _permit = limit
          .acquire_owned()
          .await
          .expect("host semaphore never closes");
        let output = match cfg.mode {
          SolverMode::Staged => run_remote_staged(&cfg, &host.addr, &job).await,
          _ => run_remote_plain(&cfg, &host.addr, &job).await,
        };
        (host.addr, output)
      });
    }
  }

  while let Some(joined) = tasks.join_next().await {
    match joined {
      Ok((host, output)) => ledger.record(&output, Some(&host)).await?,
      Err(e) => tracing::error!(error = %e, "Remote worker task panicked"),
    }
  }

  for host in &fleet.hosts {
    cleanup_host(&cfg, host).await;
  }
  let _ = std::fs::remove_dir_all(&cfg.scratch_root);

  Ok(())
}

/// Wraps a remote shell script in an ssh invocation bounded by a timeout.
async fn run_ssh(host: &str, script: &str, budget: std::time::Duration) -> std::io::Result<RunStatus> {
  let inv = Invocation::new("ssh").arg(host).arg(script);
  run_with_timeout(&inv, budget).await
}

fn remote_input_path(cfg: &Config, job: &Job) -> String {
  format!(
    "{}/tmp/{}/{}",
    cfg.profile.remote.workdir,
    cfg.run_id(),
    job.file_name()
  )
}

fn remote_proof_path(cfg: &Config, job: &Job) -> String {
  format!(
    "{}/proofs/{}/{}",
    cfg.profile.remote.workdir,
    cfg.run_id(),
    job.proof_name()
  )
}

/// A plain/preprocess job executed over ssh, classified exactly like a
/// local one (the solver's exit code travels back as the ssh exit code).
async fn run_remote_plain(cfg: &Config, host: &str, job: &Job) -> JobOutput {
  let workdir = &cfg.profile.remote.workdir;
  let remote_file = remote_input_path(cfg, job);
  let proof = cfg.produce_proofs.then(|| remote_proof_path(cfg, job));

  let (solver, mode_args) = match cfg.mode {
    SolverMode::Preprocess => (
      cfg.profile.remote.preprocess_solver.as_str(),
      cfg.profile.preprocess_args.as_slice(),
    ),
    _ => (cfg.profile.remote.solver.as_str(), &[][..]),
  };

  let mut script = String::new();
  if let Some(var) = &cfg.profile.filename_env {
    script.push_str(&format!("{var}='{}' ", filename_tag(&job.file)));
  }
  script.push_str(&rpath(workdir, solver));
  for arg in cfg.profile.base_args.iter().chain(mode_args) {
    script.push(' ');
    script.push_str(arg);
  }
  for arg in job.options.split_whitespace() {
    script.push(' ');
    script.push_str(arg);
  }
  script.push(' ');
  script.push_str(&remote_file);
  if let Some(proof) = &proof {
    script.push(' ');
    script.push_str(proof);
  }

  let start = Instant::now();
  let mut output = match run_ssh(host, &script, cfg.timeout).await {
    Err(e) => {
      tracing::error!(error = %e, %host, "Failed to spawn ssh");
      JobOutput::plain(
        job.clone(),
        Outcome::Error(format!("ssh spawn: {e}")),
        start.elapsed().as_secs_f64(),
        script.clone(),
      )
    }
    Ok(RunStatus::TimedOut) => JobOutput::plain(
      job.clone(),
      Outcome::Timeout,
      cfg.timeout.as_secs_f64(),
      script.clone(),
    ),
    Ok(RunStatus::Completed(proc_out)) => {
      let seconds = start.elapsed().as_secs_f64();
      let outcome = classify_exit(proc_out.status.code());
      let mut out = JobOutput::plain(job.clone(), outcome, seconds, script.clone());
      match &out.outcome {
        Outcome::Sat => {
          let stdout = String::from_utf8_lossy(&proc_out.stdout);
          out.assignment = parse_assignment(&stdout, &cfg.profile.assignment_marker);
        }
        Outcome::Error(_) => {
          tracing::error!(
            %host,
            cmd = %script,
            stdout = %String::from_utf8_lossy(&proc_out.stdout),
            stderr = %String::from_utf8_lossy(&proc_out.stderr),
            "Remote solver exited with an unexpected code"
          );
        }
        _ => {}
      }
      out
    }
  };

  if let Some(proof) = &proof {
    if verify::should_verify(cfg.verification_active(), &output.outcome) {
      output.proof_check = Some(check_proof_remote(cfg, host, &remote_file, proof).await);
    }
    // The proof artifact is job-owned; remove it on every outcome branch.
    let _ = ssh_output(host, &format!("rm -f {proof}")).await;
  }

  output
}

/// Remote proof check: same contract as the local verifier call, issued
/// over ssh against the staged input and proof paths.
async fn check_proof_remote(cfg: &Config, host: &str, remote_file: &str, proof: &str) -> ProofCheck {
  let script = format!(
    "{} {remote_file} {proof}",
    rpath(&cfg.profile.remote.workdir, &cfg.profile.remote.verifier)
  );

  let start = Instant::now();
  match run_ssh(host, &script, cfg.timeout).await {
    Ok(RunStatus::Completed(out)) => {
      let stdout = String::from_utf8_lossy(&out.stdout);
      ProofCheck {
        status: verify::classify_checker_stdout(&stdout, &cfg.profile.verified_marker),
        seconds: start.elapsed().as_secs_f64(),
      }
    }
    Ok(RunStatus::TimedOut) => ProofCheck {
      status: ProofStatus::Timeout,
      seconds: cfg.timeout.as_secs_f64(),
    },
    Err(e) => {
      tracing::error!(error = %e, %host, "Failed to spawn remote proof checker");
      ProofCheck {
        status: ProofStatus::NotVerified,
        seconds: start.elapsed().as_secs_f64(),
      }
    }
  }
}

/// A staged job executed over ssh. The merge is synthesized locally from
/// one bulk fetch of the derived clauses and shipped back as one bulk
/// transfer, instead of one round-trip per clause line.
async fn run_remote_staged(cfg: &Config, host: &str, job: &Job) -> JobOutput {
  let local_scratch = cfg.scratch_root.join(job.scratch_key());
  if let Err(e) = std::fs::create_dir_all(&local_scratch) {
    return JobOutput::plain(
      job.clone(),
      Outcome::Error(format!("scratch dir: {e}")),
      0.0,
      String::new(),
    );
  }

  let output = remote_phases(cfg, host, job, &local_scratch).await;

  // Scratch on both sides is job-owned and never survives the job.
  let workdir = &cfg.profile.remote.workdir;
  let remote_scratch = format!("{workdir}/scratch/{}/{}", cfg.run_id(), job.scratch_key());
  let mut cleanup = format!("rm -rf {remote_scratch}");
  if cfg.produce_proofs {
    cleanup.push_str(&format!(" && rm -f {}", remote_proof_path(cfg, job)));
  }
  let _ = ssh_output(host, &cleanup).await;
  let _ = std::fs::remove_dir_all(&local_scratch);

  output
}

async fn remote_phases(cfg: &Config, host: &str, job: &Job, local_scratch: &Path) -> JobOutput {
  let workdir = &cfg.profile.remote.workdir;
  let remote_scratch = format!("{workdir}/scratch/{}/{}", cfg.run_id(), job.scratch_key());
  let remote_file = remote_input_path(cfg, job);

  // --- Phase 1: pre-learn on the host ---
  let mut phase1 = format!(
    "mkdir -p {remote_scratch} && cd {remote_scratch} && {}",
    rpath(workdir, &cfg.profile.remote.prelearner)
  );
  for arg in &cfg.profile.prelearn_args {
    phase1.push(' ');
    phase1.push_str(arg);
  }
  phase1.push_str(&format!(" $HOME/{remote_file}"));

  let start1 = Instant::now();
  let status1 = match run_ssh(host, &phase1, cfg.prelearn_timeout).await {
    Ok(status) => status,
    Err(e) => {
      tracing::error!(error = %e, %host, "Failed to spawn ssh for pre-learner");
      return staged_remote_failure(job, format!("ssh spawn: {e}"), 0.0, phase1);
    }
  };

  let (phase1_seconds, remote_input) = match status1 {
    RunStatus::Completed(out) if !out.status.success() => {
      let elapsed = start1.elapsed().as_secs_f64();
      tracing::error!(
        %host,
        code = ?out.status.code(),
        stderr = %String::from_utf8_lossy(&out.stderr),
        "Remote pre-learner failed"
      );
      return staged_remote_failure(job, "prelearn failed".to_string(), elapsed, phase1);
    }
    RunStatus::TimedOut => {
      // Over budget: solve the staged original unchanged, skip the merge.
      (cfg.prelearn_timeout.as_secs_f64(), remote_file.clone())
    }
    RunStatus::Completed(_) => {
      let elapsed = start1.elapsed().as_secs_f64();
      match merge_remote(cfg, host, job, &remote_scratch, local_scratch).await {
        Ok(combined) => (elapsed, combined),
        Err(reason) => {
          tracing::error!(%host, file = %job.file.display(), %reason, "Remote staged merge failed");
          return staged_remote_failure(job, reason, elapsed, phase1);
        }
      }
    }
  };

  // --- Phase 2: solve on the host ---
  let mut phase2 = format!(
    "cd {remote_scratch} && {}",
    rpath(workdir, &cfg.profile.remote.solver)
  );
  for arg in job.options.split_whitespace() {
    phase2.push(' ');
    phase2.push_str(arg);
  }
  phase2.push_str(&format!(" $HOME/{remote_input}"));
  if cfg.produce_proofs {
    phase2.push_str(&format!(" $HOME/{}", remote_proof_path(cfg, job)));
  }

  let start2 = Instant::now();
  let status2 = match run_ssh(host, &phase2, cfg.timeout).await {
    Ok(status) => status,
    Err(e) => {
      tracing::error!(error = %e, %host, "Failed to spawn ssh for solver");
      return staged_remote_failure(job, format!("ssh spawn: {e}"), phase1_seconds, phase2);
    }
  };

  match status2 {
    RunStatus::TimedOut => {
      let phase2_seconds = cfg.timeout.as_secs_f64();
      JobOutput {
        job: job.clone(),
        outcome: Outcome::Timeout,
        seconds: phase1_seconds + phase2_seconds,
        phase1_seconds: Some(phase1_seconds),
        phase2_seconds: Some(phase2_seconds),
        proof_check: None,
        assignment: Vec::new(),
        command: phase2,
      }
    }
    RunStatus::Completed(proc_out) => {
      let phase2_seconds = start2.elapsed().as_secs_f64();
      let outcome = classify_exit(proc_out.status.code());
      let assignment = if outcome == Outcome::Sat {
        let stdout = String::from_utf8_lossy(&proc_out.stdout);
        parse_assignment(&stdout, &cfg.profile.assignment_marker)
      } else {
        Vec::new()
      };
      if outcome.is_error() {
        tracing::error!(
          %host,
          cmd = %phase2,
          stdout = %String::from_utf8_lossy(&proc_out.stdout),
          stderr = %String::from_utf8_lossy(&proc_out.stderr),
          "Remote solver exited with an unexpected code"
        );
      }
      JobOutput {
        job: job.clone(),
        outcome,
        seconds: phase1_seconds + phase2_seconds,
        phase1_seconds: Some(phase1_seconds),
        phase2_seconds: Some(phase2_seconds),
        proof_check: None,
        assignment,
        command: phase2,
      }
    }
  }
}

/// Fetches the derived clauses, synthesizes the combined input locally and
/// ships it back: two transfers total, independent of clause count.
async fn merge_remote(
  cfg: &Config,
  host: &str,
  job: &Job,
  remote_scratch: &str,
  local_scratch: &Path,
) -> Result<String, String> {
  if !job.file.exists() {
    return Err("original file missing".to_string());
  }

  let derived_name = &cfg.profile.derived_clauses_name;
  let fetched = scp_from(
    host,
    &format!("{remote_scratch}/{derived_name}"),
    local_scratch,
  )
  .await
  .map_err(|e| format!("scp spawn: {e}"))?;
  if !fetched {
    return Err("derived clauses missing".to_string());
  }

  let header = cnf::parse_header(&job.file).map_err(|e| e.to_string())?;
  let derived = cnf::read_clause_lines(&local_scratch.join(derived_name)).map_err(|e| e.to_string())?;

  let combined_name = format!("{}_with_pr.cnf", job.file_stem());
  let combined_local = local_scratch.join(&combined_name);
  cnf::write_combined(&job.file, header, &derived, &combined_local).map_err(|e| e.to_string())?;

  let shipped = scp_to(host, &[combined_local], remote_scratch)
    .await
    .map_err(|e| format!("scp spawn: {e}"))?;
  if !shipped {
    return Err("combined file transfer failed".to_string());
  }

  Ok(format!("{remote_scratch}/{combined_name}"))
}

fn staged_remote_failure(job: &Job, reason: String, phase1_seconds: f64, command: String) -> JobOutput {
  JobOutput {
    job: job.clone(),
    outcome: Outcome::Error(reason),
    seconds: phase1_seconds,
    phase1_seconds: Some(phase1_seconds),
    phase2_seconds: Some(0.0),
    proof_check: None,
    assignment: Vec::new(),
    command,
  }
}
