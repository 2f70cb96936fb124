use crate::job::Outcome;
use crate::solver::Invocation;
use crate::solver::RunStatus;
use crate::solver::run_with_timeout;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use std::time::Instant;

/// Verdict of the external proof checker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProofStatus {
  Verified,
  NotVerified,
  Timeout,
}

impl fmt::Display for ProofStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ProofStatus::Verified => write!(f, "VERIFIED"),
      ProofStatus::NotVerified => write!(f, "NOT VERIFIED"),
      ProofStatus::Timeout => write!(f, "TIMEOUT"),
    }
  }
}

/// Outcome of one proof-check invocation. Recorded alongside the solve
/// outcome; never changes it.
#[derive(Debug, Clone, Copy)]
pub struct ProofCheck {
  pub status: ProofStatus,
  pub seconds: f64,
}

/// Verification runs if and only if it was requested and the solve outcome
/// is UNSAT.
pub fn should_verify(check_requested: bool, outcome: &Outcome) -> bool {
  check_requested && *outcome == Outcome::Unsat
}

/// Classifies checker stdout by the presence of the verified marker.
pub fn classify_checker_stdout(stdout: &str, verified_marker: &str) -> ProofStatus {
  if stdout.contains(verified_marker) {
    ProofStatus::Verified
  } else {
    ProofStatus::NotVerified
  }
}

/// Invokes the checker on (original file, proof artifact) under the same
/// timeout budget as the solve, and classifies its stdout by the verified
/// marker substring.
pub async fn check_proof(
  verifier: &Path,
  file: &Path,
  proof: &Path,
  budget: Duration,
  verified_marker: &str,
) -> ProofCheck {
  let inv = Invocation::new(verifier)
    .arg(file.display().to_string())
    .arg(proof.display().to_string());

  let start = Instant::now();
  match run_with_timeout(&inv, budget).await {
    Ok(RunStatus::Completed(out)) => {
      let stdout = String::from_utf8_lossy(&out.stdout);
      ProofCheck {
        status: classify_checker_stdout(&stdout, verified_marker),
        seconds: start.elapsed().as_secs_f64(),
      }
    }
    Ok(RunStatus::TimedOut) => ProofCheck {
      status: ProofStatus::Timeout,
      seconds: budget.as_secs_f64(),
    },
    Err(e) => {
      tracing::error!(error = %e, verifier = %verifier.display(), "Failed to spawn proof checker");
      ProofCheck {
        status: ProofStatus::NotVerified,
        seconds: start.elapsed().as_secs_f64(),
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn verification_gating_truth_table() {
    assert!(should_verify(true, &Outcome::Unsat));
    assert!(!should_verify(true, &Outcome::Sat));
    assert!(!should_verify(true, &Outcome::Timeout));
    assert!(!should_verify(true, &Outcome::Error("1".to_string())));
    assert!(!should_verify(false, &Outcome::Unsat));
    assert!(!should_verify(false, &Outcome::Sat));
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn marker_in_stdout_means_verified() {
    let dir = tempfile::tempdir().unwrap();
    let checker = dir.path().join("checker.sh");
    std::fs::write(&checker, "#!/bin/sh\necho 's VERIFIED'\n").unwrap();
    make_executable(&checker);

    let check = check_proof(
      &checker,
      Path::new("orig.cnf"),
      Path::new("orig.pr"),
      Duration::from_secs(5),
      "s VERIFIED",
    )
    .await;
    assert_eq!(check.status, ProofStatus::Verified);
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn missing_marker_means_not_verified() {
    let dir = tempfile::tempdir().unwrap();
    let checker = dir.path().join("checker.sh");
    std::fs::write(&checker, "#!/bin/sh\necho 's NOT OK'\n").unwrap();
    make_executable(&checker);

    let check = check_proof(
      &checker,
      Path::new("orig.cnf"),
      Path::new("orig.pr"),
      Duration::from_secs(5),
      "s VERIFIED",
    )
    .await;
    assert_eq!(check.status, ProofStatus::NotVerified);
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn checker_timeout_reports_the_budget() {
    let dir = tempfile::tempdir().unwrap();
    let checker = dir.path().join("checker.sh");
    std::fs::write(&checker, "#!/bin/sh\nsleep 30\n").unwrap();
    make_executable(&checker);

    let budget = Duration::from_millis(200);
    let check = check_proof(
      &checker,
      Path::new("orig.cnf"),
      Path::new("orig.pr"),
      budget,
      "s VERIFIED",
    )
    .await;
    assert_eq!(check.status, ProofStatus::Timeout);
    assert!((check.seconds - budget.as_secs_f64()).abs() < 1e-9);
  }

  #[cfg(unix)]
  fn make_executable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms).unwrap();
  }
}
