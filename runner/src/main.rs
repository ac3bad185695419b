use clap::Parser;
use std::{io, process::exit};
use testrun::{config::Args, HarnessError};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let result = Args::parse()
        .into_config()
        .map_err(HarnessError::from)
        .and_then(testrun::run);

    match result {
        Ok(summary) => info!("Finished {} runs", summary.total()),
        Err(e) => {
            error!("{}", e.report());
            exit(1);
        }
    }
}
