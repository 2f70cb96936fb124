use crate::error::LedgerError;
use crate::job::JobOutput;
use crate::job::Outcome;
use serde::Deserialize;
use serde::Serialize;
use std::fs::File;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column order of the persisted ledger.
pub const LEDGER_HEADER: [&str; 7] = [
  "file",
  "options",
  "augmented",
  "rep",
  "outcome",
  "seconds",
  "cmd",
];

/// Longest command echoed on a progress line before truncation.
const CMD_DISPLAY_LEN: usize = 140;

/// One persisted ledger record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerRow {
  pub file: String,
  pub options: String,
  pub augmented: bool,
  pub rep: u32,
  pub outcome: String,
  pub seconds: String,
  pub cmd: String,
}

impl LedgerRow {
  pub fn from_output(output: &JobOutput) -> Self {
    LedgerRow {
      file: output.job.file.display().to_string(),
      options: output.job.options.clone(),
      augmented: output.job.augmented,
      rep: output.job.rep,
      outcome: output.outcome.to_string(),
      seconds: format!("{:.2}", output.seconds),
      cmd: output.command.clone(),
    }
  }
}

/// Running aggregates over all recorded results.
#[derive(Debug, Clone, Default)]
pub struct Aggregates {
  pub sat: usize,
  pub unsat: usize,
  pub timeout: usize,
  pub error: usize,
  pub sat_times: Vec<f64>,
  pub unsat_times: Vec<f64>,
}

impl Aggregates {
  pub fn fold(&mut self, outcome: &Outcome, seconds: f64) {
    match outcome {
      Outcome::Sat => {
        self.sat += 1;
        self.sat_times.push(seconds);
      }
      Outcome::Unsat => {
        self.unsat += 1;
        self.unsat_times.push(seconds);
      }
      Outcome::Timeout => self.timeout += 1,
      Outcome::Error(_) => self.error += 1,
    }
  }

  pub fn total(&self) -> usize {
    self.sat + self.unsat + self.timeout + self.error
  }

  pub fn sat_median(&self) -> Option<f64> {
    median(&self.sat_times)
  }

  pub fn unsat_median(&self) -> Option<f64> {
    median(&self.unsat_times)
  }

  pub fn log_summary(&self) {
    let fmt_median = |m: Option<f64>| match m {
      Some(secs) => format!("{secs:.2}s"),
      None => "N/A".to_string(),
    };
    tracing::info!(
      total = self.total(),
      sat = self.sat,
      unsat = self.unsat,
      timeout = self.timeout,
      error = self.error,
      "Sweep complete"
    );
    tracing::info!(
      sat_median = %fmt_median(self.sat_median()),
      unsat_median = %fmt_median(self.unsat_median()),
      "Median runtimes"
    );
  }
}

/// Median of the recorded times: the element at `len / 2` of the sorted
/// list, i.e. the upper middle element for even lengths.
pub fn median(times: &[f64]) -> Option<f64> {
  if times.is_empty() {
    return None;
  }
  let mut sorted = times.to_vec();
  sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
  Some(sorted[sorted.len() / 2])
}

struct LedgerInner {
  writer: csv::Writer<File>,
  stats: Aggregates,
}

/// The append-only results ledger plus its running aggregates.
///
/// The underlying file is shared by every pool worker; all appends go
/// through one mutex-guarded writer and are flushed per record, so an
/// interrupt loses at most the in-flight row.
#[derive(Clone)]
pub struct Ledger {
  inner: Arc<Mutex<LedgerInner>>,
}

impl Ledger {
  /// Opens the ledger in append mode, writing the header only if the file
  /// does not already hold one. Repeated runs against the same path keep
  /// appending rows under the original header.
  pub fn open(path: &Path) -> Result<Self, LedgerError> {
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent).map_err(|source| LedgerError::Open {
          path: path.to_path_buf(),
          source,
        })?;
      }
    }

    let needs_header = match std::fs::metadata(path) {
      Ok(meta) => meta.len() == 0,
      Err(_) => true,
    };

    let file = OpenOptions::new()
      .create(true)
      .append(true)
      .open(path)
      .map_err(|source| LedgerError::Open {
        path: path.to_path_buf(),
        source,
      })?;

    let mut writer = csv::WriterBuilder::new()
      .has_headers(false)
      .from_writer(file);
    if needs_header {
      writer.write_record(LEDGER_HEADER)?;
      writer.flush().map_err(LedgerError::Flush)?;
    }

    Ok(Ledger {
      inner: Arc::new(Mutex::new(LedgerInner {
        writer,
        stats: Aggregates::default(),
      })),
    })
  }

  /// Records one finished job: emits the progress line, appends the row,
  /// flushes, and folds the outcome into the running aggregates.
  pub async fn record(&self, output: &JobOutput, host: Option<&str>) -> Result<(), LedgerError> {
    // Progress goes out first and unconditionally, so an interrupted run
    // still shows everything that completed.
    print_progress(output, host);

    let row = LedgerRow::from_output(output);
    let mut inner = self.inner.lock().await;
    inner.writer.serialize(&row)?;
    inner.writer.flush().map_err(LedgerError::Flush)?;
    inner.stats.fold(&output.outcome, output.seconds);
    Ok(())
  }

  /// Flushes and returns the final aggregates.
  pub async fn finish(&self) -> Result<Aggregates, LedgerError> {
    let mut inner = self.inner.lock().await;
    inner.writer.flush().map_err(LedgerError::Flush)?;
    Ok(inner.stats.clone())
  }
}

fn truncate_command(cmd: &str) -> String {
  let mut display: String = cmd.chars().take(CMD_DISPLAY_LEN).collect();
  if cmd.chars().count() > CMD_DISPLAY_LEN {
    display.push('…');
  }
  display
}

fn print_progress(output: &JobOutput, host: Option<&str>) {
  let host_tag = host.map(|h| format!(" [{h}]")).unwrap_or_default();
  let variant = if output.job.augmented { "orderi" } else { "base" };

  let mut line = format!(
    "[{:<8}] {:<35}{} {} rep{:<2} {:.2}s  |  {}",
    output.outcome.to_string(),
    output.job.file_name(),
    host_tag,
    variant,
    output.job.rep,
    output.seconds,
    truncate_command(&output.command),
  );
  if let (Some(p1), Some(p2)) = (output.phase1_seconds, output.phase2_seconds) {
    line.push_str(&format!("  [prelearn: {p1:.2}s, solve: {p2:.2}s]"));
  }
  println!("{line}");

  if output.outcome == Outcome::Sat && !output.assignment.is_empty() {
    println!("v {}", output.assignment.join(" "));
  }
  if let Some(check) = &output.proof_check {
    println!(
      "{}{}: proof {} ({:.2}s)",
      output.job.file_name(),
      host_tag,
      check.status,
      check.seconds
    );
  }
  if output.outcome.is_error() {
    // Full command to stderr so failures can be re-run by hand.
    eprintln!("   ↳ cmd: {}", output.command);
  }
}
