use crate::error::LedgerError;
use crate::job::Outcome;
use crate::ledger::Aggregates;
use crate::ledger::LedgerRow;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// One summary line of the JSON report.
#[derive(Debug, Serialize)]
struct ReportLine<'a> {
  options: &'a str,
  augmented: bool,
  sat: usize,
  unsat: usize,
  timeout: usize,
  error: usize,
  sat_median: Option<f64>,
  unsat_median: Option<f64>,
}

/// Statistics grouped by option set: one entry per (options, augmented)
/// pair found in the ledger.
pub type OptionSetStats = BTreeMap<(String, bool), Aggregates>;

fn parse_outcome(text: &str) -> Outcome {
  match text {
    "SAT" => Outcome::Sat,
    "UNSAT" => Outcome::Unsat,
    "TIMEOUT" => Outcome::Timeout,
    other => {
      let reason = other
        .strip_prefix("ERR(")
        .and_then(|rest| rest.strip_suffix(')'))
        .unwrap_or(other);
      Outcome::Error(reason.to_string())
    }
  }
}

/// Folds an existing ledger into per-option-set aggregates.
pub fn summarize(path: &Path) -> Result<OptionSetStats, LedgerError> {
  let mut reader = csv::Reader::from_path(path).map_err(|source| LedgerError::Read {
    path: path.to_path_buf(),
    source,
  })?;

  let mut groups: OptionSetStats = BTreeMap::new();
  for row in reader.deserialize::<LedgerRow>() {
    let row = row.map_err(|source| LedgerError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let outcome = parse_outcome(&row.outcome);
    let seconds: f64 = row.seconds.parse().unwrap_or(0.0);
    groups
      .entry((row.options, row.augmented))
      .or_default()
      .fold(&outcome, seconds);
  }
  Ok(groups)
}

/// Prints one JSON object per option set, for downstream tooling.
pub fn print_json_report(path: &Path) -> Result<(), LedgerError> {
  let groups = summarize(path)?;
  for ((options, augmented), stats) in &groups {
    let line = ReportLine {
      options: options.as_str(),
      augmented: *augmented,
      sat: stats.sat,
      unsat: stats.unsat,
      timeout: stats.timeout,
      error: stats.error,
      sat_median: stats.sat_median(),
      unsat_median: stats.unsat_median(),
    };
    match serde_json::to_string(&line) {
      Ok(json) => println!("{json}"),
      Err(e) => tracing::warn!(error = %e, "Failed to serialize report line"),
    }
  }
  Ok(())
}

/// Prints the per-option-set summary table for an existing ledger.
pub fn print_report(path: &Path) -> Result<(), LedgerError> {
  let groups = summarize(path)?;

  let fmt_median = |m: Option<f64>| match m {
    Some(secs) => format!("{secs:.2}"),
    None => "N/A".to_string(),
  };

  println!(
    "{:<60} {:>8} {:>6} {:>6} {:>8} {:>6} {:>10} {:>12}",
    "options", "variant", "SAT", "UNSAT", "TIMEOUT", "ERR", "med SAT", "med UNSAT"
  );
  let mut overall = Aggregates::default();
  for ((options, augmented), stats) in &groups {
    let shown = if options.is_empty() { "(none)" } else { options };
    println!(
      "{:<60} {:>8} {:>6} {:>6} {:>8} {:>6} {:>10} {:>12}",
      shown,
      if *augmented { "orderi" } else { "base" },
      stats.sat,
      stats.unsat,
      stats.timeout,
      stats.error,
      fmt_median(stats.sat_median()),
      fmt_median(stats.unsat_median()),
    );
    overall.sat += stats.sat;
    overall.unsat += stats.unsat;
    overall.timeout += stats.timeout;
    overall.error += stats.error;
    overall.sat_times.extend_from_slice(&stats.sat_times);
    overall.unsat_times.extend_from_slice(&stats.unsat_times);
  }

  println!(
    "total: {} rows | SAT {} | UNSAT {} | TIMEOUT {} | ERR {} | med SAT {} | med UNSAT {}",
    overall.total(),
    overall.sat,
    overall.unsat,
    overall.timeout,
    overall.error,
    fmt_median(overall.sat_median()),
    fmt_median(overall.unsat_median()),
  );
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;

  #[test]
  fn outcome_strings_round_trip() {
    assert_eq!(parse_outcome("SAT"), Outcome::Sat);
    assert_eq!(parse_outcome("UNSAT"), Outcome::Unsat);
    assert_eq!(parse_outcome("TIMEOUT"), Outcome::Timeout);
    assert_eq!(parse_outcome("ERR(42)"), Outcome::Error("42".to_string()));
    assert_eq!(
      parse_outcome("ERR(prelearn failed)"),
      Outcome::Error("prelearn failed".to_string())
    );
  }

  #[test]
  fn ledger_rows_group_by_option_set() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("results.csv");
    fs::write(
      &path,
      "file,options,augmented,rep,outcome,seconds,cmd\n\
       a.cnf,--x=1,false,1,SAT,1.00,cmd\n\
       a.cnf,--x=1,false,2,TIMEOUT,10.00,cmd\n\
       b.cnf,--x=1,false,1,SAT,3.00,cmd\n\
       a.cnf,--x=1,true,1,UNSAT,2.00,cmd\n",
    )
    .unwrap();

    let groups = summarize(&path).unwrap();
    assert_eq!(groups.len(), 2);

    let base = &groups[&("--x=1".to_string(), false)];
    assert_eq!(base.sat, 2);
    assert_eq!(base.timeout, 1);
    assert_eq!(base.sat_median(), Some(3.0));

    let augmented = &groups[&("--x=1".to_string(), true)];
    assert_eq!(augmented.unsat, 1);
  }
}
