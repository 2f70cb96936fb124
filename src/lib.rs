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

//! # Satsweep
//!
//! `satsweep` orchestrates large combinatorial sweeps of an external SAT
//! solver over a corpus of CNF files, on local CPU cores or across a fleet
//! of remote machines, and keeps a durable, resumable ledger of every
//! outcome and timing.
//!
//! This crate contains the main library logic for the `sweep` CLI, but its
//! core modules (`space`, `pool`, `ledger`) could be used independently.
//!
//! ## Core Modules
//!
//! * [`space`]: Expands named flag families into the cartesian product of
//!   argument strings, plus the augmented (ordering-flag) variant set.
//! * [`pool`]: Expands the job set in its documented submission order and
//!   drives the bounded local worker pool.
//! * [`remote`]: Fleet setup (transfer + build), per-host bounded pools,
//!   and the ssh/scp execution of remote jobs.
//! * [`solver`]: The per-job execution contract: timeout, environment
//!   injection, exit-code classification, assignment parsing.
//! * [`staged`]: The two-phase pre-learning pipeline (derive, merge, solve).
//! * [`verify`]: Optional re-checking of UNSAT proof artifacts.
//! * [`ledger`]: The append-only CSV results ledger and running aggregates.
//! * [`cnf`]: DIMACS header parsing and combined-input synthesis.
//! * [`curate`]: Benchmark-list curation into a target directory.
//! * [`report`]: Offline statistics over an existing ledger.
//! * [`cli`]: Defines the `clap`-based command-line interface.
//! * [`config`]: Experiment profile and resolved run configuration.
//! * [`job`]: The immutable job description and outcome classification.
//! * [`error`]: Defines the custom error types for the library.
//! * [`logging`]: Provides the `setup_tracing` utility.

pub mod cli;
pub mod cnf;
pub mod config;
pub mod curate;
pub mod error;
pub mod job;
pub mod ledger;
pub mod logging;
pub mod pool;
pub mod remote;
pub mod report;
pub mod solver;
pub mod space;
pub mod staged;
pub mod verify;
