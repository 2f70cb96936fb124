use crate::cnf;
use crate::config::Config;
use crate::job::Job;
use crate::job::JobOutput;
use crate::job::Outcome;
use crate::job::classify_exit;
use crate::solver::Invocation;
use crate::solver::RunStatus;
use crate::solver::parse_assignment;
use crate::solver::run_with_timeout;
use std::path::Path;
use std::path::PathBuf;
use std::time::Instant;

/// Runs one staged (pre-learning) job: phase 1 derives clauses into a
/// per-job scratch directory, the merge step folds them into the original
/// input, phase 2 solves the result.
///
/// The scratch directory is keyed by (file stem, repetition) and is removed
/// when the pipeline returns, on every outcome branch.
pub async fn run_staged_job(cfg: &Config, job: &Job) -> JobOutput {
  let scratch = cfg.scratch_root.join(job.scratch_key());
  if let Err(e) = std::fs::create_dir_all(&scratch) {
    return staged_failure(
      job,
      format!("scratch dir: {e}"),
      0.0,
      0.0,
      String::new(),
    );
  }

  let proof_path = cfg
    .produce_proofs
    .then(|| cfg.proof_dir.join(job.proof_name()));

  let output = run_phases(cfg, job, &scratch, proof_path.as_deref()).await;

  // Scratch and proof artifacts never survive the job.
  let _ = std::fs::remove_dir_all(&scratch);
  if let Some(proof) = proof_path.as_deref() {
    let _ = std::fs::remove_file(proof);
  }

  output
}

async fn run_phases(
  cfg: &Config,
  job: &Job,
  scratch: &Path,
  proof_path: Option<&Path>,
) -> JobOutput {
  // --- Phase 1: pre-learn derived clauses ---
  let phase1 = Invocation::new(&cfg.profile.prelearner)
    .args(cfg.profile.prelearn_args.iter().cloned())
    .arg(absolute_or(&job.file).display().to_string())
    .cwd(scratch);
  let phase1_cmd = phase1.command_line();

  let start1 = Instant::now();
  let status1 = match run_with_timeout(&phase1, cfg.prelearn_timeout).await {
    Ok(status) => status,
    Err(e) => {
      tracing::error!(error = %e, cmd = %phase1_cmd, "Failed to spawn pre-learner");
      return staged_failure(
        job,
        format!("prelearn spawn: {e}"),
        start1.elapsed().as_secs_f64(),
        0.0,
        phase1_cmd,
      );
    }
  };

  let (phase1_seconds, solve_input) = match status1 {
    RunStatus::Completed(out) if !out.status.success() => {
      let elapsed = start1.elapsed().as_secs_f64();
      tracing::error!(
        cmd = %phase1_cmd,
        code = ?out.status.code(),
        stderr = %String::from_utf8_lossy(&out.stderr),
        "Pre-learner failed"
      );
      return staged_failure(job, "prelearn failed".to_string(), elapsed, 0.0, phase1_cmd);
    }
    // Over budget: skip the merge and solve the original file unchanged.
    RunStatus::TimedOut => (cfg.prelearn_timeout.as_secs_f64(), job.file.clone()),
    RunStatus::Completed(_) => {
      let elapsed = start1.elapsed().as_secs_f64();
      match merge(cfg, job, scratch) {
        Ok(combined) => (elapsed, combined),
        Err(reason) => {
          tracing::error!(file = %job.file.display(), %reason, "Staged merge failed");
          return staged_failure(job, reason, elapsed, 0.0, phase1_cmd);
        }
      }
    }
  };

  // --- Phase 2: solve the merged (or original) input ---
  let mut phase2 = Invocation::new(&cfg.profile.solver)
    .args(job.options.split_whitespace())
    .arg(absolute_or(&solve_input).display().to_string())
    .cwd(scratch);
  if let Some(proof) = proof_path {
    phase2 = phase2.arg(absolute_or(proof).display().to_string());
  }
  let phase2_cmd = phase2.command_line();

  let start2 = Instant::now();
  let status2 = match run_with_timeout(&phase2, cfg.timeout).await {
    Ok(status) => status,
    Err(e) => {
      tracing::error!(error = %e, cmd = %phase2_cmd, "Failed to spawn solver");
      return staged_failure(
        job,
        format!("spawn: {e}"),
        phase1_seconds,
        start2.elapsed().as_secs_f64(),
        phase2_cmd,
      );
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
        command: phase2_cmd,
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
          cmd = %phase2_cmd,
          stdout = %String::from_utf8_lossy(&proc_out.stdout),
          stderr = %String::from_utf8_lossy(&proc_out.stderr),
          "Solver exited with an unexpected code"
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
        command: phase2_cmd,
      }
    }
  }
}

/// Synthesizes the combined input from the original file and the derived
/// clauses the pre-learner left in the scratch directory. Every missing
/// expected file is a hard failure; the pipeline never silently proceeds.
fn merge(cfg: &Config, job: &Job, scratch: &Path) -> Result<PathBuf, String> {
  if !job.file.exists() {
    return Err("original file missing".to_string());
  }
  let header = cnf::parse_header(&job.file).map_err(|e| e.to_string())?;

  let derived_path = scratch.join(&cfg.profile.derived_clauses_name);
  if !derived_path.exists() {
    return Err("derived clauses missing".to_string());
  }
  let derived = cnf::read_clause_lines(&derived_path).map_err(|e| e.to_string())?;

  let combined = scratch.join(format!("{}_with_pr.cnf", job.file_stem()));
  cnf::write_combined(&job.file, header, &derived, &combined).map_err(|e| e.to_string())?;
  if !combined.exists() {
    return Err("combined file creation failed".to_string());
  }

  tracing::debug!(
    file = %job.file.display(),
    derived = derived.len(),
    "Merged derived clauses into combined input"
  );
  Ok(combined)
}

fn staged_failure(
  job: &Job,
  reason: String,
  phase1_seconds: f64,
  phase2_seconds: f64,
  command: String,
) -> JobOutput {
  JobOutput {
    job: job.clone(),
    outcome: Outcome::Error(reason),
    seconds: phase1_seconds + phase2_seconds,
    phase1_seconds: Some(phase1_seconds),
    phase2_seconds: Some(phase2_seconds),
    proof_check: None,
    assignment: Vec::new(),
    command,
  }
}

fn absolute_or(path: &Path) -> PathBuf {
  std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::Profile;
  use crate::config::SolverMode;
  use crate::space::ConfigSpace;
  use std::fs;
  use std::path::Path;
  use std::time::Duration;

  #[cfg(unix)]
  fn write_script(path: &Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;
    fs::write(path, body).unwrap();
    let mut perms = fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).unwrap();
  }

  fn test_config(
    dir: &Path,
    prelearner: &Path,
    solver: &Path,
    prelearn_timeout: Duration,
  ) -> Config {
    let profile = Profile {
      solver: solver.to_path_buf(),
      prelearner: prelearner.to_path_buf(),
      base_args: Vec::new(),
      ..Profile::default()
    };
    Config {
      input_dir: dir.to_path_buf(),
      files: Vec::new(),
      space: ConfigSpace {
        base: Vec::new(),
        augmented: Vec::new(),
      },
      reps: 1,
      augmented_reps: 0,
      jobs: 1,
      timeout: Duration::from_secs(5),
      prelearn_timeout,
      mode: SolverMode::Staged,
      produce_proofs: false,
      check_proofs: false,
      out: dir.join("out.csv"),
      proof_dir: dir.join("proofs"),
      scratch_root: dir.join("scratch"),
      profile,
    }
  }

  fn test_job(dir: &Path) -> Job {
    let file = dir.join("input.cnf");
    fs::write(&file, "c test\np cnf 2 2\n1 2 0\n-1 -2 0\n").unwrap();
    Job {
      file,
      options: String::new(),
      rep: 1,
      augmented: false,
    }
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn successful_phases_solve_the_merged_input() {
    let dir = tempfile::tempdir().unwrap();
    let prelearner = dir.path().join("prelearner.sh");
    // Writes the derived-clause artifact into its working directory.
    write_script(&prelearner, "#!/bin/sh\necho 'c derived' > pr_clauses.cnf\necho '1 0' >> pr_clauses.cnf\nexit 0\n");
    let solver = dir.path().join("solver.sh");
    // UNSAT only when handed the combined file; anything else is an error.
    write_script(
      &solver,
      "#!/bin/sh\ncase \"$*\" in *_with_pr.cnf*) exit 20;; *) exit 1;; esac\n",
    );

    let cfg = test_config(dir.path(), &prelearner, &solver, Duration::from_secs(10));
    let job = test_job(dir.path());
    let out = run_staged_job(&cfg, &job).await;

    assert_eq!(out.outcome, Outcome::Unsat);
    assert!(out.phase1_seconds.is_some());
    assert!(out.phase2_seconds.is_some());
    assert!(!cfg.scratch_root.join(job.scratch_key()).exists());
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn failed_phase1_skips_phase2_and_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let prelearner = dir.path().join("prelearner.sh");
    write_script(&prelearner, "#!/bin/sh\nexit 1\n");
    let solver = dir.path().join("solver.sh");
    write_script(&solver, "#!/bin/sh\nexit 10\n");

    let cfg = test_config(dir.path(), &prelearner, &solver, Duration::from_secs(10));
    let job = test_job(dir.path());
    let out = run_staged_job(&cfg, &job).await;

    assert_eq!(out.outcome, Outcome::Error("prelearn failed".to_string()));
    assert_eq!(out.phase2_seconds, Some(0.0));
    assert!(!cfg.scratch_root.join(job.scratch_key()).exists());
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn missing_derived_artifact_fails_before_phase2() {
    let dir = tempfile::tempdir().unwrap();
    let prelearner = dir.path().join("prelearner.sh");
    // Exits cleanly without writing pr_clauses.cnf.
    write_script(&prelearner, "#!/bin/sh\nexit 0\n");
    let solver = dir.path().join("solver.sh");
    write_script(&solver, "#!/bin/sh\nexit 10\n");

    let cfg = test_config(dir.path(), &prelearner, &solver, Duration::from_secs(10));
    let job = test_job(dir.path());
    let out = run_staged_job(&cfg, &job).await;

    assert_eq!(out.outcome, Outcome::Error("derived clauses missing".to_string()));
    assert_eq!(out.phase2_seconds, Some(0.0));
    assert!(!cfg.scratch_root.join(job.scratch_key()).exists());
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn phase1_timeout_feeds_the_original_file_to_phase2() {
    let dir = tempfile::tempdir().unwrap();
    let prelearner = dir.path().join("prelearner.sh");
    write_script(&prelearner, "#!/bin/sh\nsleep 30\n");
    let solver = dir.path().join("solver.sh");
    // SAT only when handed the original input; the combined file would fail.
    write_script(
      &solver,
      "#!/bin/sh\ncase \"$*\" in *input.cnf*) echo 'v 1 -2 0'; exit 10;; *) exit 1;; esac\n",
    );

    let budget = Duration::from_millis(200);
    let cfg = test_config(dir.path(), &prelearner, &solver, budget);
    let job = test_job(dir.path());
    let out = run_staged_job(&cfg, &job).await;

    assert_eq!(out.outcome, Outcome::Sat);
    assert_eq!(out.phase1_seconds, Some(budget.as_secs_f64()));
    assert_eq!(out.assignment, vec!["1", "-2", "0"]);
    assert!(!cfg.scratch_root.join(job.scratch_key()).exists());
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn missing_prelearner_binary_is_a_job_failure() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(
      dir.path(),
      Path::new("/nonexistent/prelearner"),
      Path::new("/nonexistent/solver"),
      Duration::from_secs(1),
    );
    let job = test_job(dir.path());
    let out = run_staged_job(&cfg, &job).await;

    assert!(out.outcome.is_error());
    assert!(!cfg.scratch_root.join(job.scratch_key()).exists());
  }
}
