use crate::config::Config;
use crate::config::SolverMode;
use crate::error::SweepError;
use crate::job::Job;
use crate::job::JobOutput;
use crate::ledger::Ledger;
use crate::solver;
use crate::staged;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Expands the sweep over the given files into its job set.
///
/// Submission order is deterministic and documented: file outer loop,
/// combination inner loop, repetition innermost, and all base combinations
/// before any augmented one. Scratch-directory and proof naming rely on
/// this ordering being stable.
pub fn expand_for(cfg: &Config, files: &[PathBuf]) -> Vec<Job> {
  let mut jobs = Vec::new();

  for file in files {
    for options in &cfg.space.base {
      for rep in 1..=cfg.reps {
        jobs.push(Job {
          file: file.clone(),
          options: options.clone(),
          rep,
          augmented: false,
        });
      }
    }
  }
  for file in files {
    for options in &cfg.space.augmented {
      for rep in 1..=cfg.augmented_reps {
        jobs.push(Job {
          file: file.clone(),
          options: options.clone(),
          rep,
          augmented: true,
        });
      }
    }
  }

  jobs
}

/// The full job set of the configured run.
pub fn expand_jobs(cfg: &Config) -> Vec<Job> {
  expand_for(cfg, &cfg.files)
}

/// Runs one job through the pipeline selected by the solver mode.
pub async fn dispatch_one(cfg: &Config, job: &Job) -> JobOutput {
  match cfg.mode {
    SolverMode::Staged => staged::run_staged_job(cfg, job).await,
    _ => solver::run_job(cfg, job).await,
  }
}

/// Runs the whole sweep on the local machine through one bounded pool.
///
/// Results are consumed in completion order, not submission order, and each
/// is persisted to the ledger as soon as it arrives.
pub async fn run_local(cfg: Arc<Config>, ledger: &Ledger) -> Result<(), SweepError> {
  std::fs::create_dir_all(&cfg.proof_dir)?;
  std::fs::create_dir_all(&cfg.scratch_root)?;

  let jobs = expand_jobs(&cfg);
  tracing::info!(
    files = cfg.files.len(),
    base_combinations = cfg.space.base.len(),
    reps = cfg.reps,
    augmented_combinations = cfg.space.augmented.len(),
    augmented_reps = cfg.augmented_reps,
    jobs = jobs.len(),
    parallelism = cfg.jobs,
    "Starting local sweep"
  );

  let limit = Arc::new(Semaphore::new(cfg.jobs));
  let mut tasks: JoinSet<JobOutput> = JoinSet::new();
  for job in jobs {
    let cfg = Arc::clone(&cfg);
    let limit = Arc::clone(&limit);
    tasks.spawn(async move {
      let _permit = limit
        .acquire_owned()
        .await
        .expect("worker semaphore never closes");
      dispatch_one(&cfg, &job).await
    });
  }

  while let Some(joined) = tasks.join_next().await {
    match joined {
      Ok(output) => ledger.record(&output, None).await?,
      Err(e) => tracing::error!(error = %e, "Worker task panicked"),
    }
  }

  // Both run-scoped directories are empty now unless a job was interrupted.
  let _ = std::fs::remove_dir_all(&cfg.scratch_root);
  let _ = std::fs::remove_dir_all(&cfg.proof_dir);

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::Profile;
  use crate::space::ConfigSpace;
  use std::time::Duration;

  fn test_config(files: &[&str], base: &[&str], augmented: &[&str], reps: u32, augmented_reps: u32) -> Config {
    Config {
      input_dir: PathBuf::from("."),
      files: files.iter().map(PathBuf::from).collect(),
      space: ConfigSpace {
        base: base.iter().map(|s| s.to_string()).collect(),
        augmented: augmented.iter().map(|s| s.to_string()).collect(),
      },
      reps,
      augmented_reps,
      jobs: 1,
      timeout: Duration::from_secs(1),
      prelearn_timeout: Duration::from_secs(1),
      mode: SolverMode::Plain,
      produce_proofs: false,
      check_proofs: false,
      out: PathBuf::from("results.csv"),
      proof_dir: PathBuf::from("proofs/run_test"),
      scratch_root: PathBuf::from("scratch/run_test"),
      profile: Profile::default(),
    }
  }

  #[test]
  fn expansion_counts_files_times_combos_times_reps() {
    let cfg = test_config(&["a.cnf", "b.cnf"], &["--x=1", "--x=2"], &["--x=1 --z", "--x=2 --z"], 3, 1);
    let jobs = expand_jobs(&cfg);
    assert_eq!(jobs.len(), 2 * 2 * 3 + 2 * 2 * 1);
  }

  #[test]
  fn expansion_order_is_file_combo_rep_then_augmented() {
    let cfg = test_config(&["a.cnf", "b.cnf"], &["--x=1", "--x=2"], &["--x=1 --z"], 2, 1);
    let jobs = expand_jobs(&cfg);

    // Base jobs: file outer, combination inner, repetition innermost.
    assert_eq!(
      (&jobs[0].file, jobs[0].options.as_str(), jobs[0].rep, jobs[0].augmented),
      (&PathBuf::from("a.cnf"), "--x=1", 1, false)
    );
    assert_eq!(jobs[1].rep, 2);
    assert_eq!(jobs[2].options, "--x=2");
    assert_eq!(jobs[4].file, PathBuf::from("b.cnf"));

    // Augmented jobs come after every base job.
    let first_augmented = jobs.iter().position(|j| j.augmented).unwrap();
    assert_eq!(first_augmented, 2 * 2 * 2);
    assert!(jobs[first_augmented..].iter().all(|j| j.augmented));
  }

  #[test]
  fn repetitions_start_at_one() {
    let cfg = test_config(&["a.cnf"], &[""], &["--z"], 2, 1);
    let jobs = expand_jobs(&cfg);
    assert!(jobs.iter().all(|j| j.rep >= 1));
  }
}
