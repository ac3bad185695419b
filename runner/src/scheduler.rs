use crate::{
    executors::{Executor, Outcome, Task},
    sink::{ResultSink, SinkError},
};
use itertools::iproduct;
use rayon::{prelude::*, ThreadPool, ThreadPoolBuilder};
use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, info, instrument};

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("At least one worker is required")]
    NoWorkers,
    #[error("Failed to build thread pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("Failed to record a result")]
    Sink(#[from] SinkError),
    #[error("Too many tasks, repeats x programs x files overflows")]
    TooManyTasks,
}

/// Everything that has to run: repeats x programs x files
#[derive(Clone, Debug)]
pub struct Plan {
    pub programs: Vec<PathBuf>,
    pub files: Vec<PathBuf>,
    pub repeats: usize,
    pub timeout: Duration,
}

impl Plan {
    /// number of tasks, None if it doesn't fit into a usize
    pub fn len(&self) -> Option<usize> {
        self.repeats
            .checked_mul(self.programs.len())?
            .checked_mul(self.files.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    /// one wave per (repeat, program) pair with a task for every file, in submission order
    pub fn waves(&self) -> impl Iterator<Item = (usize, &Path, Vec<Task>)> + '_ {
        iproduct!(0..self.repeats, self.programs.iter()).map(move |(repeat, program)| {
            let tasks = self
                .files
                .iter()
                .map(|file| Task {
                    program: program.clone(),
                    data_file: file.clone(),
                    timeout: self.timeout,
                })
                .collect();

            (repeat, program.as_path(), tasks)
        })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub completed: usize,
    pub non_zero_exit: usize,
    pub timed_out: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.completed + self.non_zero_exit + self.timed_out + self.failed
    }
}

#[derive(Debug, Default)]
struct Tally {
    completed: AtomicUsize,
    non_zero_exit: AtomicUsize,
    timed_out: AtomicUsize,
    failed: AtomicUsize,
    processed: AtomicUsize,
}

impl Tally {
    /// count a recorded outcome, returns the number of tasks processed so far
    fn count(&self, outcome: &Outcome) -> usize {
        let counter = match outcome {
            Outcome::Completed { .. } => &self.completed,
            Outcome::NonZeroExit { .. } => &self.non_zero_exit,
            Outcome::TimedOut => &self.timed_out,
            Outcome::Failed { .. } => &self.failed,
        };
        counter.fetch_add(1, Ordering::SeqCst);

        self.processed.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn summary(&self) -> RunSummary {
        RunSummary {
            completed: self.completed.load(Ordering::SeqCst),
            non_zero_exit: self.non_zero_exit.load(Ordering::SeqCst),
            timed_out: self.timed_out.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }
}

/// Drives a `Plan` through a fixed number of worker threads.
///
/// Each (repeat, program) wave is a barrier: its results are all recorded before the next
/// wave is dispatched. Inside a wave results arrive in completion order.
pub struct Scheduler {
    pool: ThreadPool,
    parallelism: usize,
}

impl Scheduler {
    pub fn new(parallelism: usize) -> Result<Self, SchedulerError> {
        if parallelism == 0 {
            return Err(SchedulerError::NoWorkers);
        }

        debug!("Starting thread pool with {parallelism} threads");

        let pool = ThreadPoolBuilder::new()
            .num_threads(parallelism)
            .thread_name(|index| format!("testrun-worker-{index}"))
            .build()?;

        Ok(Self { pool, parallelism })
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// execute every task of the plan, stops dispatching on the first sink failure
    #[instrument(skip_all, level = "info", fields(parallelism = self.parallelism, tasks = ?plan.len()))]
    pub fn run<E, W>(
        &self,
        executor: &E,
        plan: &Plan,
        sink: &ResultSink<W>,
    ) -> Result<RunSummary, SchedulerError>
    where
        E: Executor + Sync,
        W: Write + Send,
    {
        let total = plan.len().ok_or(SchedulerError::TooManyTasks)?;
        let tally = Tally::default();

        if total == 0 {
            info!("Nothing to execute");

            return Ok(RunSummary::default());
        }

        for (repeat, program, tasks) in plan.waves() {
            debug!(
                "Dispatching run {}/{} of {program:?} over {} files",
                repeat + 1,
                plan.repeats,
                tasks.len()
            );

            // par_bridge hands out one task at a time, a slow task never holds back queued ones
            self.pool.install(|| {
                tasks.into_iter().par_bridge().try_for_each(|task| {
                    debug!(
                        "Processing {:?} with {:?} with timeout {}",
                        task.data_file,
                        task.program,
                        task.timeout.as_secs()
                    );

                    let result = executor.execute(task);
                    let outcome = result.outcome.clone();
                    sink.record(result)?;

                    info!("Done with {}/{total}", tally.count(&outcome));

                    Ok::<(), SchedulerError>(())
                })
            })?;
        }

        let summary = tally.summary();
        info!(
            completed = summary.completed,
            non_zero_exit = summary.non_zero_exit,
            timed_out = summary.timed_out,
            failed = summary.failed,
            "Done with processing"
        );

        Ok(summary)
    }
}
