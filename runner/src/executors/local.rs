use super::{ExecutionResult, Executor, Outcome, Task};
use nix::{
    sys::signal::{killpg, Signal},
    unistd::Pid,
};
use std::{
    io::{self, Read},
    os::unix::process::CommandExt,
    process::{Child, ChildStdout, Command, Stdio},
    sync::mpsc::{self, Receiver, RecvTimeoutError},
    thread,
    time::{Duration, Instant},
};
use tracing::{debug, instrument, trace, warn};
use wait_timeout::ChildExt;

/// a child exiting right at the deadline still gets its output read
const DRAIN_GRACE: Duration = Duration::from_millis(100);

/// Executor that runs programs as child processes of the current process
#[derive(Clone, Debug, Default)]
pub struct LocalExecutor;

impl Executor for LocalExecutor {
    #[instrument(skip_all, level = "debug", fields(program = ?task.program, data = ?task.data_file))]
    fn execute(&self, task: Task) -> ExecutionResult {
        let outcome = run(&task);

        ExecutionResult::new(task, outcome)
    }
}

fn run(task: &Task) -> Outcome {
    let start = Instant::now();

    // own process group, so a timeout can take down everything the program started
    let mut child = match Command::new(&task.program)
        .arg(&task.data_file)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .process_group(0)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            warn!("Failed to spawn {:?}: {e}", task.program);

            return Outcome::Failed {
                reason: format!("failed to spawn: {e}"),
            };
        }
    };

    let receiver = match child.stdout.take().map(drain) {
        Some(Ok(receiver)) => receiver,
        Some(Err(e)) => {
            terminate(&mut child);

            return Outcome::Failed {
                reason: format!("failed to start output reader: {e}"),
            };
        }
        None => {
            terminate(&mut child);

            return Outcome::Failed {
                reason: "stdout was not captured".to_string(),
            };
        }
    };

    let status = match child.wait_timeout(task.timeout) {
        Ok(Some(status)) => status,
        Ok(None) => {
            // child hasn't exited yet
            terminate(&mut child);
            warn!(
                "Timeout after {}s for {:?}",
                task.timeout.as_secs(),
                task.data_file
            );

            return Outcome::TimedOut;
        }
        Err(e) => {
            terminate(&mut child);

            return Outcome::Failed {
                reason: format!("failed to wait for child: {e}"),
            };
        }
    };
    let duration = start.elapsed();

    // a descendant may still hold stdout open, it gets what is left until the deadline
    let output = match receiver.recv_timeout(drain_timeout(task.timeout, duration)) {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).trim().to_string(),
        Ok(Err(e)) => {
            return Outcome::Failed {
                reason: format!("failed to read output: {e}"),
            }
        }
        Err(RecvTimeoutError::Timeout) => {
            kill_group(child.id());
            warn!(
                "Output of {:?} still open at the deadline, counting as timeout",
                task.data_file
            );

            return Outcome::TimedOut;
        }
        Err(RecvTimeoutError::Disconnected) => {
            return Outcome::Failed {
                reason: "output reader stopped unexpectedly".to_string(),
            }
        }
    };

    debug!(
        "Finished in {} ns | status: {}",
        duration.as_nanos(),
        status
    );
    trace!("Output: {output}");

    if status.success() {
        Outcome::Completed { output, duration }
    } else {
        warn!(
            "{:?} exited with {status} on {:?}",
            task.program, task.data_file
        );

        Outcome::NonZeroExit {
            output,
            duration,
            code: status.code(),
        }
    }
}

/// time left for collecting output once the child exited, never less than `DRAIN_GRACE`
fn drain_timeout(timeout: Duration, elapsed: Duration) -> Duration {
    timeout.saturating_sub(elapsed).max(DRAIN_GRACE)
}

/// read stdout to the end on a separate thread, a full pipe would otherwise stall the child
fn drain(mut stdout: ChildStdout) -> io::Result<Receiver<io::Result<Vec<u8>>>> {
    let (sender, receiver) = mpsc::channel();

    thread::Builder::new()
        .name("stdout-reader".to_string())
        .spawn(move || {
            let mut buffer = Vec::new();
            let result = stdout.read_to_end(&mut buffer).map(|_| buffer);

            // nobody is listening anymore if the run already timed out
            let _ = sender.send(result);
        })?;

    Ok(receiver)
}

fn kill_group(pid: u32) {
    if let Err(errno) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        // ESRCH once every member is gone
        debug!(pid = pid, errno = ?errno, "Failed to kill process group");
    }
}

/// kill the process group and reap the child
fn terminate(child: &mut Child) {
    kill_group(child.id());

    if let Err(e) = child.kill() {
        debug!("Failed to kill child {}: {e}", child.id());
    }
    if let Err(e) = child.wait() {
        debug!("Failed to reap child {}: {e}", child.id());
    }
}
