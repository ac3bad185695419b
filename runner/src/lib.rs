pub mod collector;
pub mod config;
pub mod executors;
pub mod scheduler;
pub mod sink;

use crate::{
    collector::{CollectorError, SampledDataSet},
    config::{ConfigErrors, RunConfig},
    executors::LocalExecutor,
    scheduler::{Plan, RunSummary, Scheduler, SchedulerError},
    sink::{ResultSink, SinkError},
};
use std::error::Error as _;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error(transparent)]
    Config(#[from] ConfigErrors),
    #[error(transparent)]
    Collector(#[from] CollectorError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

impl HarnessError {
    /// the error with all of its sources, separated by `: `
    pub fn report(&self) -> String {
        let mut message = self.to_string();
        let mut source = self.source();

        while let Some(inner) = source {
            message.push_str(": ");
            message.push_str(&inner.to_string());
            source = inner.source();
        }

        message
    }
}

/// Select the test data, persist the selection and execute every task of the run
pub fn run(mut config: RunConfig) -> Result<RunSummary, HarnessError> {
    if config.preflight_checks() {
        return Err(ConfigErrors::Preflight.into());
    }

    let scheduler = Scheduler::new(config.execution.jobs)?;

    let data = SampledDataSet::resolve(&config.data)?;
    data.persist(&config.data_output)?;

    let plan = Plan {
        programs: config.programs,
        files: data.files,
        repeats: config.execution.runs,
        timeout: config.execution.timeout(),
    };
    if plan.len().is_none() {
        return Err(ConfigErrors::TooManyTasks.into());
    }

    // created up front, so even an empty run leaves a valid results file
    let sink = ResultSink::create(&config.output)?;

    info!(
        "Running {} programs on {} files, {} times each with {} jobs",
        plan.programs.len(),
        plan.files.len(),
        plan.repeats,
        scheduler.parallelism()
    );

    Ok(scheduler.run(&LocalExecutor, &plan, &sink)?)
}
