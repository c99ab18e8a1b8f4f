mod config;
mod error;
mod experiment;
mod params;
mod stats;
mod topology;
mod traffic;
mod util;

use crate::config::cli::{CliOpt, Command, ParkingLotOpt};
use crate::config::json::BatchJsonConfig;
use crate::experiment::run_experiment;
use crate::topology::TopologyKind;
use clap::Parser;
use fastrand::Rng;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let options = CliOpt::parse();
    let seed = if options.non_deterministic {
        Rng::new().u64(..)
    } else {
        options.seed
    };

    // Everything gets resolved upfront, so a bad batch entry aborts before any run
    let configs = match &options.command {
        Command::Dumbbell => vec![config::resolve(
            TopologyKind::Dumbbell,
            &options.experiment,
            &ParkingLotOpt::default(),
            seed,
            options.json_summary.clone(),
        )?],
        Command::ParkingLot(parking_lot) => vec![config::resolve(
            TopologyKind::ParkingLot,
            &options.experiment,
            parking_lot,
            seed,
            options.json_summary.clone(),
        )?],
        Command::Batch(batch) => BatchJsonConfig::load(&batch.config)?
            .experiments
            .into_iter()
            .map(|entry| {
                config::resolve(
                    entry.topology,
                    &entry.experiment.or(&options.experiment),
                    &entry.parking_lot,
                    entry.seed.unwrap_or(seed),
                    options.json_summary.clone(),
                )
            })
            .collect::<Result<Vec<_>, _>>()?,
    };

    for config in &configs {
        util::print_params(config);
        let report = run_experiment(config)?;
        util::print_report(&report);
    }

    Ok(())
}
