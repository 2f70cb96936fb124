use crate::config::Config;
use crate::config::SolverMode;
use crate::job::Job;
use crate::job::JobOutput;
use crate::job::Outcome;
use crate::job::classify_exit;
use crate::verify;
use std::path::Path;
use std::path::PathBuf;
use std::process::Output;
use std::process::Stdio;
use std::time::Duration;
use std::time::Instant;
use tokio::process::Command;

/// How many trailing stdout lines are scanned for assignment lines.
const ASSIGNMENT_TAIL: usize = 1000;

/// A fully assembled external-process invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
  pub program: PathBuf,
  pub args: Vec<String>,
  pub env: Vec<(String, String)>,
  pub cwd: Option<PathBuf>,
}

impl Invocation {
  pub fn new(program: impl Into<PathBuf>) -> Self {
    Invocation {
      program: program.into(),
      args: Vec::new(),
      env: Vec::new(),
      cwd: None,
    }
  }

  pub fn arg(mut self, arg: impl Into<String>) -> Self {
    self.args.push(arg.into());
    self
  }

  pub fn args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.args.extend(args.into_iter().map(Into::into));
    self
  }

  pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.env.push((key.into(), value.into()));
    self
  }

  pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
    self.cwd = Some(dir.into());
    self
  }

  /// The command as one display string, for the ledger and diagnostics.
  pub fn command_line(&self) -> String {
    let mut line = self.program.display().to_string();
    for arg in &self.args {
      line.push(' ');
      line.push_str(arg);
    }
    line
  }
}

/// Result of running an invocation under a wall-clock budget. Timeout is a
/// typed variant, not an error.
#[derive(Debug)]
pub enum RunStatus {
  Completed(Output),
  TimedOut,
}

/// Runs the invocation to completion or until the budget expires, capturing
/// stdout and stderr.
pub async fn run_with_timeout(inv: &Invocation, budget: Duration) -> std::io::Result<RunStatus> {
  let mut cmd = Command::new(&inv.program);
  cmd
    .args(&inv.args)
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);
  for (key, value) in &inv.env {
    cmd.env(key, value);
  }
  if let Some(dir) = &inv.cwd {
    cmd.current_dir(dir);
  }

  tracing::debug!(cmd = ?cmd, "Spawning process");
  let child = cmd.spawn()?;

  match tokio::time::timeout(budget, child.wait_with_output()).await {
    Ok(output) => Ok(RunStatus::Completed(output?)),
    // Dropping the wait future drops the child; kill_on_drop terminates it.
    Err(_) => Ok(RunStatus::TimedOut),
  }
}

/// The filename tag injected into the solver's environment: the trailing
/// 15 characters of the input path.
pub fn filename_tag(path: &Path) -> String {
  let text = path.display().to_string();
  let chars: Vec<char> = text.chars().collect();
  let start = chars.len().saturating_sub(15);
  chars[start..].iter().collect()
}

/// Collects assignment literals from the trailing solver output: every line
/// beginning with the marker contributes its whitespace-separated tokens.
pub fn parse_assignment(stdout: &str, marker: &str) -> Vec<String> {
  let lines: Vec<&str> = stdout.lines().collect();
  let start = lines.len().saturating_sub(ASSIGNMENT_TAIL);

  let mut literals = Vec::new();
  for line in &lines[start..] {
    if let Some(rest) = line.strip_prefix(marker) {
      literals.extend(rest.split_whitespace().map(str::to_string));
    }
  }
  literals
}

/// Builds the solver invocation for a plain or preprocess job.
pub fn build_invocation(cfg: &Config, job: &Job, proof_path: Option<&Path>) -> Invocation {
  let (program, mode_args) = match cfg.mode {
    SolverMode::Preprocess => (
      cfg.profile.preprocess_solver.as_path(),
      cfg.profile.preprocess_args.as_slice(),
    ),
    _ => (cfg.profile.solver.as_path(), &[][..]),
  };

  let mut inv = Invocation::new(program)
    .args(cfg.profile.base_args.iter().cloned())
    .args(mode_args.iter().cloned())
    .args(job.options.split_whitespace())
    .arg(job.file.display().to_string());

  if let Some(proof) = proof_path {
    inv = inv.arg(proof.display().to_string());
  }
  if let Some(var) = &cfg.profile.filename_env {
    inv = inv.env(var.clone(), filename_tag(&job.file));
  }
  inv
}

/// Runs one plain/preprocess job end to end: solve under the timeout,
/// classify the exit, optionally verify an UNSAT proof, and remove the
/// proof artifact on every outcome branch.
pub async fn run_job(cfg: &Config, job: &Job) -> JobOutput {
  let proof_path = cfg
    .produce_proofs
    .then(|| cfg.proof_dir.join(job.proof_name()));

  let mut output = solve(cfg, job, proof_path.as_deref()).await;

  if let Some(proof) = proof_path.as_deref() {
    if verify::should_verify(cfg.verification_active(), &output.outcome) {
      let check = verify::check_proof(
        &cfg.profile.verifier,
        &job.file,
        proof,
        cfg.timeout,
        &cfg.profile.verified_marker,
      )
      .await;
      output.proof_check = Some(check);
    }

    // The artifact is job-owned and must not survive the job.
    let _ = std::fs::remove_file(proof);
  }

  output
}

/// The solve half of [`run_job`]: never fails, every problem becomes an
/// outcome variant.
async fn solve(cfg: &Config, job: &Job, proof_path: Option<&Path>) -> JobOutput {
  let inv = build_invocation(cfg, job, proof_path);
  let command = inv.command_line();

  let start = Instant::now();
  let status = match run_with_timeout(&inv, cfg.timeout).await {
    Ok(status) => status,
    Err(e) => {
      tracing::error!(error = %e, cmd = %command, "Failed to spawn solver");
      return JobOutput::plain(
        job.clone(),
        Outcome::Error(format!("spawn: {e}")),
        start.elapsed().as_secs_f64(),
        command,
      );
    }
  };

  match status {
    RunStatus::TimedOut => JobOutput::plain(
      job.clone(),
      Outcome::Timeout,
      cfg.timeout.as_secs_f64(),
      command,
    ),
    RunStatus::Completed(proc_out) => {
      let seconds = start.elapsed().as_secs_f64();
      let outcome = classify_exit(proc_out.status.code());

      let mut output = JobOutput::plain(job.clone(), outcome, seconds, command);
      match &output.outcome {
        Outcome::Sat => {
          let stdout = String::from_utf8_lossy(&proc_out.stdout);
          output.assignment = parse_assignment(&stdout, &cfg.profile.assignment_marker);
        }
        Outcome::Error(_) => {
          // Surface the raw output so the failure can be diagnosed
          // without re-running.
          tracing::error!(
            cmd = %output.command,
            stdout = %String::from_utf8_lossy(&proc_out.stdout),
            stderr = %String::from_utf8_lossy(&proc_out.stderr),
            "Solver exited with an unexpected code"
          );
        }
        _ => {}
      }
      output
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn assignment_parsing_collects_marker_lines() {
    let stdout = "c stats\nv 1 -2 3\nv 4 0\ns SATISFIABLE\n";
    let lits = parse_assignment(stdout, "v ");
    assert_eq!(lits, vec!["1", "-2", "3", "4", "0"]);
  }

  #[test]
  fn assignment_parsing_without_marker_lines_is_empty() {
    let stdout = "c stats\ns UNSATISFIABLE\n";
    assert!(parse_assignment(stdout, "v ").is_empty());
  }

  #[test]
  fn filename_tag_is_the_path_tail() {
    assert_eq!(filename_tag(Path::new("a.cnf")), "a.cnf");
    let tag = filename_tag(Path::new("/very/long/path/to/benchmark_file.cnf"));
    assert_eq!(tag.chars().count(), 15);
    assert!(tag.ends_with("file.cnf"));
  }

  #[test]
  fn command_line_joins_program_and_args() {
    let inv = Invocation::new("build/cadical")
      .arg("--global=true")
      .arg("input.cnf");
    assert_eq!(inv.command_line(), "build/cadical --global=true input.cnf");
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn completed_run_reports_exit_code() {
    let inv = Invocation::new("sh").arg("-c").arg("exit 10");
    match run_with_timeout(&inv, Duration::from_secs(5)).await.unwrap() {
      RunStatus::Completed(out) => assert_eq!(out.status.code(), Some(10)),
      RunStatus::TimedOut => panic!("should not time out"),
    }
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn over_budget_run_times_out_near_the_budget() {
    let inv = Invocation::new("sh").arg("-c").arg("sleep 30");
    let start = Instant::now();
    match run_with_timeout(&inv, Duration::from_millis(200)).await.unwrap() {
      RunStatus::TimedOut => {}
      RunStatus::Completed(_) => panic!("should time out"),
    }
    assert!(start.elapsed() < Duration::from_secs(5));
  }
}
