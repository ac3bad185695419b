use clap::Parser;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    io::Error,
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, error, warn};

// check if a file is executable
pub fn check_executable(path: &Path) -> Result<bool, ConfigErrors> {
    if !path.is_file() {
        Err(ConfigErrors::FileNotFound(path.to_path_buf()))
    } else {
        Ok((fs::metadata(path)?.mode() & 0o111) != 0)
    }
}

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("File not found: {0:?}")]
    FileNotFound(PathBuf),
    #[error("Metadata not found")]
    MetadataNotFound(#[from] Error),
    #[error("Failed to read config file {path:?}")]
    ReadConfig { path: PathBuf, source: Error },
    #[error("Failed to parse config file")]
    ParseConfig(#[from] serde_yaml::Error),
    #[error("Configuration failed preflight checks, see the log above")]
    Preflight,
    #[error("Too many tasks, runs x programs x data files overflows")]
    TooManyTasks,
}

/// Command line interface, every value here overrides the config file
#[derive(Parser, Debug, Default)]
#[command(
    name = "testrun",
    version,
    about = "Run programs over a corpus of test data and record output and runtime",
    infer_long_args = true
)]
pub struct Args {
    /// Path to the program[s] to test
    #[arg(
        long = "program",
        num_args = 1..,
        value_name = "PATH",
        required_unless_present = "config"
    )]
    pub programs: Vec<PathBuf>,
    /// Where to write the results [default: out.txt]
    #[arg(long)]
    pub output: Option<PathBuf>,
    /// Where to write the selected test data [default: data-out.txt]
    #[arg(long)]
    pub data_output: Option<PathBuf>,
    /// YAML file with defaults for every option
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Where the test data lives [default: .]
    #[arg(long, help_heading = "Input data handling")]
    pub data: Option<PathBuf>,
    /// What file types to allow for test data, e.g. `.smt2`
    #[arg(long = "filetype", num_args = 1.., help_heading = "Input data handling")]
    pub filetypes: Vec<String>,
    /// How many files from the data directory to use
    #[arg(long, help_heading = "Input data handling")]
    pub limit_data: Option<usize>,
    /// Path to a file where each line is a path to a test file
    #[arg(long, help_heading = "Input data handling")]
    pub data_file: Option<PathBuf>,
    /// Seed for sampling with --limit-data
    #[arg(long, help_heading = "Input data handling")]
    pub seed: Option<u64>,

    /// How many jobs to execute in parallel [default: 1]
    #[arg(short = 'j', help_heading = "Execution options")]
    pub jobs: Option<usize>,
    /// How many runs to execute [default: 1]
    #[arg(short = 'n', help_heading = "Execution options")]
    pub runs: Option<usize>,
    /// Seconds before a process is killed [default: 600]
    #[arg(long, help_heading = "Execution options")]
    pub timeout: Option<u64>,
}

impl Args {
    /// Merge the command line on top of the config file (or the defaults)
    pub fn into_config(self) -> Result<RunConfig, ConfigErrors> {
        let Args {
            programs,
            output,
            data_output,
            config,
            data,
            filetypes,
            limit_data,
            data_file,
            seed,
            jobs,
            runs,
            timeout,
        } = self;

        let mut run_config = match config {
            Some(path) => RunConfig::load(&path)?,
            None => RunConfig::default(),
        };

        if !programs.is_empty() {
            run_config.programs = programs;
        }
        if let Some(output) = output {
            run_config.output = output;
        }
        if let Some(data_output) = data_output {
            run_config.data_output = data_output;
        }

        if let Some(root) = data {
            if data_file.is_some() {
                warn!("Both --data and --data-file are set, --data will be ignored");
            }
            run_config.data.root = root;
        }
        if data_file.is_some() {
            run_config.data.file = data_file;
        }
        if !filetypes.is_empty() {
            run_config.data.filetypes = filetypes;
        }
        if limit_data.is_some() {
            run_config.data.limit = limit_data;
        }
        if seed.is_some() {
            run_config.data.seed = seed;
        }

        if let Some(jobs) = jobs {
            run_config.execution.jobs = jobs;
        }
        if let Some(runs) = runs {
            run_config.execution.runs = runs;
        }
        if let Some(timeout) = timeout {
            run_config.execution.timeout = timeout;
        }

        Ok(run_config)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    // programs as generic executables, each one receives a single data file as argument
    #[serde(default, alias = "program")]
    pub programs: Vec<PathBuf>,
    #[serde(default = "default_output")]
    pub output: PathBuf,
    #[serde(default = "default_data_output")]
    pub data_output: PathBuf,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default, alias = "exec")]
    pub execution: ExecutionConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct DataConfig {
    #[serde(default = "default_data_root")]
    pub root: PathBuf,
    // takes precedence over `root` if set
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default)]
    pub filetypes: Vec<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct ExecutionConfig {
    #[serde(default = "default_jobs")]
    pub jobs: usize,
    #[serde(default = "default_runs")]
    pub runs: usize,
    // seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            programs: Vec::new(),
            output: default_output(),
            data_output: default_data_output(),
            data: DataConfig::default(),
            execution: ExecutionConfig::default(),
        }
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            root: default_data_root(),
            file: None,
            filetypes: Vec::new(),
            limit: None,
            seed: None,
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            jobs: default_jobs(),
            runs: default_runs(),
            timeout: default_timeout(),
        }
    }
}

impl ExecutionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        let content = fs::read_to_string(path).map_err(|source| ConfigErrors::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(serde_yaml::from_str(&content)?)
    }

    /// Validate the merged configuration, returns true if any error was found
    pub fn preflight_checks(&mut self) -> bool {
        // attempt to catch all errors instead of piece-by-piece to make debugging easier for users
        let mut contains_error = false;

        if self.programs.is_empty() {
            error!("No program was defined, unable to build a queue of tests");
            contains_error = true;
        }

        for program in self.programs.iter() {
            if program.is_file() {
                match check_executable(program) {
                    Ok(true) => {}
                    Ok(false) => warn!(
                        "Program {} is not executable, every run of it will be recorded as failed",
                        program.to_string_lossy()
                    ),
                    Err(e) => warn!(
                        "Failed to determine if {} is an executable: {e}",
                        program.to_string_lossy()
                    ),
                }
            } else if program.components().count() > 1 {
                warn!(
                    "Program {} was not found, every run of it will be recorded as failed",
                    program.to_string_lossy()
                );
            } else {
                debug!("Program {program:?} will be resolved through PATH");
            }
        }

        // accept both `smt2` and `.smt2`
        for filetype in self.data.filetypes.iter_mut() {
            if !filetype.starts_with('.') {
                filetype.insert(0, '.');
            }
        }

        if self.data.limit == Some(0) {
            warn!("data.limit is 0, no test data will be selected");
        }

        if self.execution.jobs == 0 {
            error!("execution.jobs cannot be 0, at least one job has to run at a time");
            contains_error = true;
        }

        if self.execution.runs == 0 {
            warn!("execution.runs is 0, nothing will be executed");
        }

        if self.execution.timeout == 0 {
            error!("execution.timeout cannot be 0, every run would time out");
            contains_error = true;
        }

        contains_error
    }
}

fn default_output() -> PathBuf {
    PathBuf::from("out.txt")
}

fn default_data_output() -> PathBuf {
    PathBuf::from("data-out.txt")
}

fn default_data_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_jobs() -> usize {
    1
}

fn default_runs() -> usize {
    1
}

fn default_timeout() -> u64 {
    600
}
