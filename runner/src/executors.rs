pub mod local;

pub use local::LocalExecutor;

use std::{path::PathBuf, time::Duration};

/// A single run of a program on a single data file
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Task {
    pub program: PathBuf,
    pub data_file: PathBuf,
    pub timeout: Duration,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    /// exited with status 0 before the deadline
    Completed { output: String, duration: Duration },
    /// exited before the deadline with a non-zero status, `code` is None if killed by a signal
    NonZeroExit {
        output: String,
        duration: Duration,
        code: Option<i32>,
    },
    /// still running at the deadline, the process group was killed
    TimedOut,
    /// never started or its output could not be collected
    Failed { reason: String },
}

/// container for everything learned from running a task
#[derive(Clone, Debug, PartialEq)]
pub struct ExecutionResult {
    pub program: PathBuf,
    pub data_file: PathBuf,
    pub outcome: Outcome,
}

impl ExecutionResult {
    pub fn new(task: Task, outcome: Outcome) -> Self {
        Self {
            program: task.program,
            data_file: task.data_file,
            outcome,
        }
    }
}

/// Runs tasks, one at a time per call. Implementations must not panic on a failing
/// program, every task has to end up as an `ExecutionResult`.
pub trait Executor {
    fn execute(&self, task: Task) -> ExecutionResult;
}
