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
use Commands::Curate;
use Commands::Fleet;
use Commands::Report;
use Commands::Run;
use anyhow::Result;
use clap::Parser;
use satsweep::cli::Cli;
use satsweep::cli::Commands;
use satsweep::config::Config;
use satsweep::curate::curate;
use satsweep::ledger::Ledger;
use satsweep::logging::setup_tracing;
use satsweep::pool;
use satsweep::remote;
use satsweep::remote::FleetOpts;
use satsweep::report::print_json_report;
use satsweep::report::print_report;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
  setup_tracing()?;

  let Cli { command } = Cli::parse();
  let main_span = tracing::info_span!("orchestrator");
  let _enter = main_span.enter();

  match command {
    Run(run_args) => {
      tracing::info!("Initializing Sweep Run...");

      let config = Arc::new(Config::try_from(run_args)?);
      let ledger = Ledger::open(&config.out)?;

      pool::run_local(Arc::clone(&config), &ledger).await?;

      let stats = ledger.finish().await?;
      stats.log_summary();
      tracing::info!(out = %config.out.display(), "Results saved");
    }
    Fleet(fleet_args) => {
      tracing::info!("Initializing Distributed Sweep...");

      let fleet = remote::load_fleet(&fleet_args.hosts)?;
      let opts = FleetOpts {
        skip_setup: fleet_args.skip_setup,
        compress: fleet_args.compress,
        exclude: if fleet_args.exclude.is_empty() {
          FleetOpts::default_excludes()
        } else {
          fleet_args.exclude
        },
      };

      let config = Arc::new(Config::try_from(fleet_args.run)?);
      let ledger = Ledger::open(&config.out)?;

      remote::run_fleet(Arc::clone(&config), fleet, opts, &ledger).await?;

      let stats = ledger.finish().await?;
      stats.log_summary();
      tracing::info!(out = %config.out.display(), "Results saved");
    }
    Curate(curate_args) => {
      tracing::info!("Starting Benchmark Curation...");

      curate(&curate_args.manifest, curate_args.target)?;

      tracing::info!("Curation Complete.");
    }
    Report(report_args) => {
      if report_args.json {
        print_json_report(&report_args.ledger)?;
      } else {
        print_report(&report_args.ledger)?;
      }
    }
  }

  Ok(())
}
