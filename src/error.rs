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
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error enum for the satsweep library.
#[derive(Error, Debug)]
pub enum SweepError {
  #[error("Configuration error")]
  Config(#[from] ConfigError),

  #[error("Remote setup failed")]
  Setup(#[from] SetupError),

  #[error("Results ledger error")]
  Ledger(#[from] LedgerError),

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
}

/// Errors raised while resolving the run configuration (src/config.rs,
/// src/space.rs). All of these are fatal before any job is submitted.
#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("Unknown flag families: {keys:?}. Known families: {known:?}")]
  UnknownFamilies { keys: Vec<String>, known: Vec<String> },

  #[error("No flag families selected. Pass e.g. --families \"filter time bcp\"")]
  NoFamiliesSelected,

  #[error("Flag family '{0}' has an empty option list")]
  EmptyFamily(String),

  #[error("Input folder '{0}' does not exist or is not a directory")]
  InputDirNotFound(PathBuf),

  #[error("No .cnf files found in '{0}'")]
  NoInputFiles(PathBuf),

  #[error("--check-proofs requires --produce-proofs")]
  CheckWithoutProduce,

  #[error("Failed to load experiment profile")]
  Profile(#[from] Box<figment::Error>),

  #[error("Failed to scan input folder '{path}'")]
  ScanInputs {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// Errors from parsing or synthesizing CNF files (src/cnf.rs).
#[derive(Error, Debug)]
pub enum CnfError {
  #[error("No 'p cnf' header line found in {0}")]
  MissingHeader(PathBuf),

  #[error("Malformed header line in {path}: '{line}'")]
  BadHeader { path: PathBuf, line: String },

  #[error("Failed to read {path}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("Failed to write {path}")]
  Write {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// Errors from the one-time remote fleet setup (src/remote.rs).
///
/// Any of these aborts the whole distributed run: a fleet where only some
/// hosts carry the built executables produces incomparable results.
#[derive(Error, Debug)]
pub enum SetupError {
  #[error("Failed to read fleet file {path}")]
  FleetRead {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("Failed to parse fleet file {path}")]
  FleetParse {
    path: PathBuf,
    #[source]
    source: Box<toml::de::Error>,
  },

  #[error("Fleet file lists no hosts")]
  NoHosts,

  #[error("Failed to run '{command}' against {host}")]
  Spawn {
    host: String,
    command: String,
    #[source]
    source: std::io::Error,
  },

  #[error("Transfer of {dir} to {host} failed")]
  Transfer { host: String, dir: PathBuf },

  #[error(
    "Build step failed on {host}: {command}\n--- STDOUT ---\n{stdout}\n--- STDERR ---\n{stderr}"
  )]
  Build {
    host: String,
    command: String,
    stdout: String,
    stderr: String,
  },

  #[error("Staging input files to {host} failed")]
  StageInputs { host: String },
}

/// Errors from the results ledger (src/ledger.rs).
#[derive(Error, Debug)]
pub enum LedgerError {
  #[error("Failed to open ledger file {path}")]
  Open {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("Failed to append ledger row")]
  Append(#[from] csv::Error),

  #[error("Failed to flush ledger file")]
  Flush(#[source] std::io::Error),

  #[error("Failed to read ledger file {path}")]
  Read {
    path: PathBuf,
    #[source]
    source: csv::Error,
  },
}
