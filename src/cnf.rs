use crate::error::CnfError;
use std::fs::File;
use std::io::BufRead;
use std::io::BufReader;
use std::io::BufWriter;
use std::io::Write;
use std::path::Path;

/// Variable and clause counts declared by a DIMACS `p cnf` header line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CnfHeader {
  pub vars: u64,
  pub clauses: u64,
}

/// Reads the header of a CNF file, tolerating leading `c` comment lines.
pub fn parse_header(path: &Path) -> Result<CnfHeader, CnfError> {
  let file = File::open(path).map_err(|source| CnfError::Read {
    path: path.to_path_buf(),
    source,
  })?;

  for line in BufReader::new(file).lines() {
    let line = line.map_err(|source| CnfError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let line = line.trim();
    if line.is_empty() || line.starts_with('c') {
      continue;
    }

    // First non-comment line must be "p cnf <vars> <clauses>".
    let fields: Vec<&str> = line.split_whitespace().collect();
    return match fields.as_slice() {
      ["p", "cnf", vars, clauses] => {
        let vars = vars.parse().map_err(|_| CnfError::BadHeader {
          path: path.to_path_buf(),
          line: line.to_string(),
        })?;
        let clauses = clauses.parse().map_err(|_| CnfError::BadHeader {
          path: path.to_path_buf(),
          line: line.to_string(),
        })?;
        Ok(CnfHeader { vars, clauses })
      }
      _ => Err(CnfError::BadHeader {
        path: path.to_path_buf(),
        line: line.to_string(),
      }),
    };
  }

  Err(CnfError::MissingHeader(path.to_path_buf()))
}

/// Reads the clause lines of a derived-clause artifact, skipping comment
/// and blank lines.
pub fn read_clause_lines(path: &Path) -> Result<Vec<String>, CnfError> {
  let file = File::open(path).map_err(|source| CnfError::Read {
    path: path.to_path_buf(),
    source,
  })?;

  let mut clauses = Vec::new();
  for line in BufReader::new(file).lines() {
    let line = line.map_err(|source| CnfError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    if line.starts_with('c') || line.trim().is_empty() {
      continue;
    }
    clauses.push(line);
  }
  Ok(clauses)
}

/// Synthesizes the combined input for phase 2 of the staged pipeline:
/// a new header whose clause count is the sum of original and derived
/// counts, the original file with its header line stripped, then the
/// derived clauses.
pub fn write_combined(
  original: &Path,
  header: CnfHeader,
  derived: &[String],
  out: &Path,
) -> Result<(), CnfError> {
  let write_err = |source| CnfError::Write {
    path: out.to_path_buf(),
    source,
  };

  let out_file = File::create(out).map_err(write_err)?;
  let mut writer = BufWriter::new(out_file);

  let total = header.clauses + derived.len() as u64;
  writeln!(writer, "p cnf {} {}", header.vars, total).map_err(write_err)?;

  let in_file = File::open(original).map_err(|source| CnfError::Read {
    path: original.to_path_buf(),
    source,
  })?;
  for line in BufReader::new(in_file).lines() {
    let line = line.map_err(|source| CnfError::Read {
      path: original.to_path_buf(),
      source,
    })?;
    if line.starts_with("p cnf") {
      continue;
    }
    writeln!(writer, "{line}").map_err(write_err)?;
  }

  for clause in derived {
    writeln!(writer, "{clause}").map_err(write_err)?;
  }

  writer.flush().map_err(write_err)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;

  #[test]
  fn parses_header_behind_leading_comments() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.cnf");
    fs::write(&path, "c generated\nc by a tool\np cnf 3 2\n1 -2 0\n2 3 0\n").unwrap();

    let header = parse_header(&path).unwrap();
    assert_eq!(header, CnfHeader { vars: 3, clauses: 2 });
  }

  #[test]
  fn missing_and_malformed_headers_are_errors() {
    let dir = tempfile::tempdir().unwrap();

    let empty = dir.path().join("empty.cnf");
    fs::write(&empty, "c only comments\n").unwrap();
    assert!(matches!(parse_header(&empty), Err(CnfError::MissingHeader(_))));

    let bad = dir.path().join("bad.cnf");
    fs::write(&bad, "p cnf three two\n").unwrap();
    assert!(matches!(parse_header(&bad), Err(CnfError::BadHeader { .. })));
  }

  #[test]
  fn derived_clause_read_skips_comments_and_blanks() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pr_clauses.cnf");
    fs::write(&path, "c derived\n1 2 0\n\n-1 0\nc trailing\n").unwrap();

    let clauses = read_clause_lines(&path).unwrap();
    assert_eq!(clauses, vec!["1 2 0", "-1 0"]);
  }

  #[test]
  fn combined_file_sums_counts_and_strips_header() {
    let dir = tempfile::tempdir().unwrap();
    let original = dir.path().join("orig.cnf");
    fs::write(&original, "c orig\np cnf 4 2\n1 2 0\n-3 4 0\n").unwrap();

    let out = dir.path().join("combined.cnf");
    let header = parse_header(&original).unwrap();
    let derived = vec!["1 -4 0".to_string()];
    write_combined(&original, header, &derived, &out).unwrap();

    let text = fs::read_to_string(&out).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "p cnf 4 3");
    // Original comments pass through, the old header does not.
    assert_eq!(lines[1], "c orig");
    assert_eq!(lines[2], "1 2 0");
    assert_eq!(lines[3], "-3 4 0");
    assert_eq!(lines[4], "1 -4 0");
    assert!(!text.contains("p cnf 4 2"));
  }
}
