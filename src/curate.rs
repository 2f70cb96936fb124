use anyhow::Context;
use anyhow::Result;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;

/// Manifest of the benchmark curation: where to collect files from, and
/// which directory receives them.
#[derive(Debug, Deserialize)]
pub struct CurationManifest {
  pub target: PathBuf,

  #[serde(default)]
  pub sources: Vec<CurationSource>,
}

#[derive(Debug, Deserialize)]
pub struct CurationSource {
  pub dir: PathBuf,
  pub files: Vec<String>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CurationReport {
  pub copied: usize,
  pub missing: usize,
}

/// Copies the manifest's file lists into the target directory.
///
/// File names are deduplicated across sources; a name listed under several
/// source directories is copied from the first one that has it. Missing
/// files are reported and skipped, not fatal.
pub fn curate(manifest_path: &Path, target_override: Option<PathBuf>) -> Result<CurationReport> {
  let text = std::fs::read_to_string(manifest_path)
    .with_context(|| format!("Failed to read manifest {}", manifest_path.display()))?;
  let manifest: CurationManifest = toml::from_str(&text)
    .with_context(|| format!("Failed to parse manifest {}", manifest_path.display()))?;

  let target = target_override.unwrap_or(manifest.target);
  std::fs::create_dir_all(&target)
    .with_context(|| format!("Failed to create target directory {}", target.display()))?;

  let mut options = fs_extra::file::CopyOptions::new();
  options.overwrite = true;

  let cwd = std::env::current_dir().ok();
  let mut seen = HashSet::new();
  let mut report = CurationReport::default();

  for source in &manifest.sources {
    for name in &source.files {
      if !seen.insert(name.clone()) {
        continue;
      }
      let src = source.dir.join(name);
      let dst = target.join(name);
      if src.is_file() {
        fs_extra::file::copy(&src, &dst, &options)
          .with_context(|| format!("Failed to copy {}", src.display()))?;
        let shown = cwd
          .as_deref()
          .and_then(|base| pathdiff::diff_paths(&dst, base))
          .unwrap_or_else(|| dst.clone());
        tracing::info!("Copied: {} -> {}", src.display(), shown.display());
        report.copied += 1;
      } else {
        tracing::warn!("Missing: {} (not copied)", src.display());
        report.missing += 1;
      }
    }
  }

  tracing::info!(
    copied = report.copied,
    missing = report.missing,
    target = %target.display(),
    "Curation complete"
  );
  Ok(report)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;

  #[test]
  fn copies_listed_files_and_reports_missing_ones() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("pool");
    fs::create_dir_all(&source).unwrap();
    fs::write(source.join("present.cnf"), "p cnf 1 1\n1 0\n").unwrap();

    let manifest_path = dir.path().join("curation.toml");
    fs::write(
      &manifest_path,
      format!(
        r#"
target = "{target}"

[[sources]]
dir = "{dir}"
files = ["present.cnf", "absent.cnf"]
"#,
        target = dir.path().join("curated").display(),
        dir = source.display(),
      ),
    )
    .unwrap();

    let report = curate(&manifest_path, None).unwrap();
    assert_eq!(report.copied, 1);
    assert_eq!(report.missing, 1);
    assert!(dir.path().join("curated/present.cnf").is_file());
  }

  #[test]
  fn duplicate_names_are_copied_once() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a");
    let b = dir.path().join("b");
    fs::create_dir_all(&a).unwrap();
    fs::create_dir_all(&b).unwrap();
    fs::write(a.join("same.cnf"), "from a\n").unwrap();
    fs::write(b.join("same.cnf"), "from b\n").unwrap();

    let manifest_path = dir.path().join("curation.toml");
    fs::write(
      &manifest_path,
      format!(
        r#"
target = "{target}"

[[sources]]
dir = "{a}"
files = ["same.cnf"]

[[sources]]
dir = "{b}"
files = ["same.cnf"]
"#,
        target = dir.path().join("curated").display(),
        a = a.display(),
        b = b.display(),
      ),
    )
    .unwrap();

    let report = curate(&manifest_path, None).unwrap();
    assert_eq!(report.copied, 1);
    let text = fs::read_to_string(dir.path().join("curated/same.cnf")).unwrap();
    assert_eq!(text, "from a\n");
  }
}
