use crate::config::DataConfig;
use ignore::WalkBuilder;
use itertools::Itertools;
use rand::{rngs::StdRng, seq::index, SeedableRng};
use std::{
    ffi::OsStr,
    fs::{self, File},
    io::{self, BufWriter, Write},
    mem,
    os::unix::ffi::OsStrExt,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("Failed to read data file list {path:?}")]
    ReadList { path: PathBuf, source: io::Error },
    #[error("Failed to write selected data to {path:?}")]
    Persist { path: PathBuf, source: io::Error },
}

#[derive(Debug, Clone)]
/// Where the test data comes from
/// These should be initialized from `Collector::load`
pub enum Collector {
    /// every regular file below `root`
    Directory { root: PathBuf },
    /// one path per line
    FileList { list: PathBuf },
}

impl Collector {
    pub fn load(config: &DataConfig) -> Self {
        match &config.file {
            Some(list) => Self::FileList { list: list.clone() },
            None => Self::Directory {
                root: config.root.clone(),
            },
        }
    }

    /// list all candidate files in a stable order
    pub fn collect(&self) -> Result<Vec<PathBuf>, CollectorError> {
        match self {
            Self::Directory { root } => {
                if !root.exists() {
                    warn!(root = ?root, "Data directory does not exist, no test data selected");

                    return Ok(Vec::new());
                }

                let mut builder = WalkBuilder::new(root);
                // hidden and ignored files are test data as well
                builder
                    .standard_filters(false)
                    .follow_links(false)
                    .sort_by_file_name(|a, b| a.cmp(b));

                Ok(builder
                    .build()
                    .filter_map(|entry| match entry {
                        Ok(entry) => Some(entry),
                        Err(e) => {
                            warn!("Failed to search for test data: {e}");
                            None
                        }
                    })
                    .map(|entry| entry.into_path())
                    .filter(|path| path.is_file())
                    .collect_vec())
            }
            Self::FileList { list } => {
                let content = fs::read(list).map_err(|source| CollectorError::ReadList {
                    path: list.clone(),
                    source,
                })?;

                Ok(content
                    .split(|byte| *byte == b'\n')
                    .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
                    .filter(|line| !line.is_empty())
                    .map(|line| PathBuf::from(OsStr::from_bytes(line)))
                    .filter(|path| {
                        let exists = path.exists();
                        if !exists {
                            warn!(path = ?path, "Skipped since it wasn't found");
                        }
                        exists
                    })
                    .collect_vec())
            }
        }
    }
}

/// keep files whose last extension (with leading dot) is one of `filetypes`, an empty set keeps all
pub fn filter_filetypes(files: Vec<PathBuf>, filetypes: &[String]) -> Vec<PathBuf> {
    if filetypes.is_empty() {
        return files;
    }

    files
        .into_iter()
        .filter(|path| match path.extension() {
            Some(extension) => filetypes.iter().any(|filetype| {
                filetype
                    .strip_prefix('.')
                    .map_or(false, |filetype| OsStr::new(filetype) == extension)
            }),
            None => false,
        })
        .collect_vec()
}

/// choose `limit` files without replacement, the chosen files keep their relative order
pub fn sample(mut files: Vec<PathBuf>, limit: usize, seed: u64) -> Vec<PathBuf> {
    if files.len() <= limit {
        return files;
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut chosen = index::sample(&mut rng, files.len(), limit).into_vec();
    chosen.sort_unstable();

    chosen
        .into_iter()
        .map(|index| mem::take(&mut files[index]))
        .collect_vec()
}

/// The finalized, ordered list of data files for a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampledDataSet {
    pub files: Vec<PathBuf>,
    /// seed used for sampling, if sampling happened
    pub seed: Option<u64>,
}

impl SampledDataSet {
    /// collect, filter, sample and resolve to absolute paths
    pub fn resolve(config: &DataConfig) -> Result<Self, CollectorError> {
        let collector = Collector::load(config);
        debug!("Collecting test data with {collector:?}");

        let files = filter_filetypes(collector.collect()?, &config.filetypes);

        let (files, seed) = match config.limit {
            Some(limit) if files.len() > limit => {
                let seed = config.seed.unwrap_or_else(rand::random);
                info!(seed = seed, "Sampling {limit} of {} files", files.len());

                (sample(files, limit, seed), Some(seed))
            }
            _ => (files, None),
        };

        let files = files
            .into_iter()
            .filter_map(|path| match path.canonicalize() {
                Ok(resolved) => Some(resolved),
                Err(e) => {
                    warn!(path = ?path, "Skipped since it couldn't be resolved: {e}");
                    None
                }
            })
            .collect_vec();

        info!("Selected {} data files", files.len());

        Ok(Self { files, seed })
    }

    /// write one path per line, this file can be passed back as the data file list
    pub fn persist(&self, path: &Path) -> Result<(), CollectorError> {
        let write = || -> io::Result<()> {
            let mut writer = BufWriter::new(File::create(path)?);

            for file in self.files.iter() {
                writer.write_all(file.as_os_str().as_bytes())?;
                writer.write_all(b"\n")?;
            }

            writer.flush()
        };

        write().map_err(|source| CollectorError::Persist {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Saved selected data to {path:?}");

        Ok(())
    }
}
