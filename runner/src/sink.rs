use crate::executors::{ExecutionResult, Outcome};
use csv::{QuoteStyle, Writer, WriterBuilder};
use parking_lot::FairMutex;
use std::{
    borrow::Cow,
    fs::File,
    io::{self, Write},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, error};

pub const UNKNOWN_OUTPUT: &str = "unknown";
pub const TIMEOUT_MARKER: &str = "timeout";
pub const FAILED_MARKER: &str = "failed";

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to create results file {path:?}")]
    Create { path: PathBuf, source: io::Error },
    #[error("Failed to write result record")]
    Write(#[from] csv::Error),
    #[error("Failed to flush results")]
    Flush(#[from] io::Error),
}

/// Serialized, append-only writer for result records.
///
/// Every call to `record` formats, writes and flushes a single row while holding the lock,
/// so rows from concurrent workers never interleave and a completed row survives a crash of
/// the harness.
#[derive(Debug)]
pub struct ResultSink<W: Write = File> {
    writer: FairMutex<Writer<W>>,
}

impl ResultSink<File> {
    /// truncate or create the results file
    pub fn create(path: &Path) -> Result<Self, SinkError> {
        let file = File::create(path).map_err(|source| SinkError::Create {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Writing results to {path:?}");

        Ok(Self::new(file))
    }
}

impl<W: Write> ResultSink<W> {
    pub fn new(inner: W) -> Self {
        let writer = WriterBuilder::new()
            .delimiter(b',')
            .quote(b'\'')
            .quote_style(QuoteStyle::Necessary)
            .has_headers(false)
            .from_writer(inner);

        Self {
            writer: FairMutex::new(writer),
        }
    }

    pub fn record(&self, result: ExecutionResult) -> Result<(), SinkError> {
        let row = row(&result);
        let mut writer = self.writer.lock();

        if let Err(e) = writer.write_record(row.iter().map(|field| field.as_bytes())) {
            error!("Failed to write record for {:?}: {e}", result.data_file);

            return Err(e.into());
        }

        writer.flush().map_err(|e| {
            error!("Failed to flush record for {:?}: {e}", result.data_file);

            SinkError::Flush(e)
        })
    }

    pub fn into_inner(self) -> Result<W, SinkError> {
        self.writer
            .into_inner()
            .into_inner()
            .map_err(|e| SinkError::Flush(e.into_error()))
    }
}

/// program, data file, output or "unknown", duration in seconds or a marker
fn row(result: &ExecutionResult) -> [Cow<'_, str>; 4] {
    let (output, duration) = match &result.outcome {
        Outcome::Completed { output, duration } | Outcome::NonZeroExit { output, duration, .. } => (
            Cow::from(output.as_str()),
            Cow::from(duration.as_secs_f64().to_string()),
        ),
        Outcome::TimedOut => (Cow::from(UNKNOWN_OUTPUT), Cow::from(TIMEOUT_MARKER)),
        Outcome::Failed { .. } => (Cow::from(UNKNOWN_OUTPUT), Cow::from(FAILED_MARKER)),
    };

    [
        result.program.to_string_lossy(),
        result.data_file.to_string_lossy(),
        output,
        duration,
    ]
}
