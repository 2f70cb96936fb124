// Copyright 2025 Chisomo Makombo Sakala
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
use crate::verify::ProofCheck;
use serde::Deserialize;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// One solver invocation of the sweep.
///
/// A job's identity is the full `(file, options, rep, augmented)` tuple and
/// is unique within a run. Jobs are immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
  /// The target CNF file.
  pub file: PathBuf,

  /// Combined argument string, one choice per selected flag family.
  pub options: String,

  /// Repetition index, starting at 1.
  pub rep: u32,

  /// Whether the ordering flag was appended to this combination.
  pub augmented: bool,
}

impl Job {
  /// File name component of the target, for progress and ledger display.
  pub fn file_name(&self) -> String {
    self
      .file
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_else(|| self.file.display().to_string())
  }

  /// File stem of the target.
  pub fn file_stem(&self) -> String {
    self
      .file
      .file_stem()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_else(|| self.file_name())
  }

  /// Key for per-job scratch directories and proof artifacts.
  ///
  /// Includes the repetition index so concurrent repetitions of the same
  /// file never share a directory.
  pub fn scratch_key(&self) -> String {
    format!("{}_r{}", self.file_stem(), self.rep)
  }

  /// Name of this job's proof artifact file.
  pub fn proof_name(&self) -> String {
    format!("{}.pr", self.scratch_key())
  }
}

/// Classified result of one completed job. Exhaustive: every job that ran
/// maps to exactly one variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
  Sat,
  Unsat,
  Timeout,
  Error(String),
}

impl Outcome {
  pub fn is_error(&self) -> bool {
    matches!(self, Outcome::Error(_))
  }
}

impl fmt::Display for Outcome {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Outcome::Sat => write!(f, "SAT"),
      Outcome::Unsat => write!(f, "UNSAT"),
      Outcome::Timeout => write!(f, "TIMEOUT"),
      Outcome::Error(reason) => write!(f, "ERR({})", reason),
    }
  }
}

/// Maps a solver exit status to an outcome: 10 is SAT, 20 is UNSAT, anything
/// else is an error carrying the code. `None` means the process died on a
/// signal before producing an exit code.
pub fn classify_exit(code: Option<i32>) -> Outcome {
  match code {
    Some(10) => Outcome::Sat,
    Some(20) => Outcome::Unsat,
    Some(other) => Outcome::Error(other.to_string()),
    None => Outcome::Error("signal".to_string()),
  }
}

/// Everything recorded about one finished job. Produced exactly once per job
/// and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct JobOutput {
  pub job: Job,
  pub outcome: Outcome,

  /// Wall-clock seconds. For staged jobs this is phase1 + phase2; for a
  /// timeout it equals the timeout budget.
  pub seconds: f64,

  /// Pre-learning pass duration (staged pipeline only).
  pub phase1_seconds: Option<f64>,

  /// Main solve duration (staged pipeline only).
  pub phase2_seconds: Option<f64>,

  /// Proof-checker verdict, when verification ran for this job.
  pub proof_check: Option<ProofCheck>,

  /// Satisfying-assignment literals parsed from the solver output (SAT only).
  pub assignment: Vec<String>,

  /// The full command that was executed, for the ledger and for debugging.
  pub command: String,
}

impl JobOutput {
  /// A plain (non-staged) output with no verification attached.
  pub fn plain(job: Job, outcome: Outcome, seconds: f64, command: String) -> Self {
    JobOutput {
      job,
      outcome,
      seconds,
      phase1_seconds: None,
      phase2_seconds: None,
      proof_check: None,
      assignment: Vec::new(),
      command,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn classify_exit_maps_solver_codes() {
    assert_eq!(classify_exit(Some(10)), Outcome::Sat);
    assert_eq!(classify_exit(Some(20)), Outcome::Unsat);
    assert_eq!(classify_exit(Some(0)), Outcome::Error("0".to_string()));
    assert_eq!(classify_exit(Some(1)), Outcome::Error("1".to_string()));
    assert_eq!(classify_exit(Some(127)), Outcome::Error("127".to_string()));
    assert_eq!(classify_exit(Some(-6)), Outcome::Error("-6".to_string()));
    assert_eq!(classify_exit(None), Outcome::Error("signal".to_string()));
  }

  #[test]
  fn outcome_display_matches_ledger_format() {
    assert_eq!(Outcome::Sat.to_string(), "SAT");
    assert_eq!(Outcome::Unsat.to_string(), "UNSAT");
    assert_eq!(Outcome::Timeout.to_string(), "TIMEOUT");
    assert_eq!(Outcome::Error("42".to_string()).to_string(), "ERR(42)");
  }

  #[test]
  fn scratch_key_disambiguates_repetitions() {
    let a = Job {
      file: PathBuf::from("bench/mchess_16.cnf"),
      options: String::new(),
      rep: 1,
      augmented: false,
    };
    let b = Job { rep: 2, ..a.clone() };
    assert_eq!(a.scratch_key(), "mchess_16_r1");
    assert_ne!(a.scratch_key(), b.scratch_key());
    assert_eq!(a.proof_name(), "mchess_16_r1.pr");
  }
}
