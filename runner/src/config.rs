use crate::{
    session::layout::{SlotLayout, DEFAULT_PREFIX, DEFAULT_WIDTH},
    sync::{BackoffConfig, GrantPolicy},
};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::Error,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, error, warn};

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("File count {files} must be between 1 and the number of ranks ({ranks})")]
    InvalidFileCount { ranks: usize, files: usize },
    #[error("Executor not supported: {0}")]
    UnsupportedExecutor(String),
    #[error("Config file not readable")]
    Unreadable(#[from] Error),
    #[error("Config file is not valid YAML: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Config failed the preflight checks")]
    FailedPreflight,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RoundConfig {
    // number of output files, the `N` of the round
    pub files: usize,
    // output files are named `<prefix><zero padded slot>`
    #[serde(default = "default_prefix")]
    pub prefix: PathBuf,
    #[serde(default = "default_width")]
    pub width: usize,
    // keep every writer on its topology slot instead of spreading over free slots
    #[serde(default)]
    pub group_sets: bool,
    // collect writes in a local buffer of `buffer_size` bytes
    #[serde(default = "default_set_buf")]
    pub set_buf: bool,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ExecutorConfig {
    // Name of the selected executor, see Executors::load for the selection proccess
    #[serde(default = "default_executor")]
    pub name: String,
    // number of ranks, the `P` of the round
    #[serde(default = "default_ranks")]
    pub ranks: usize,
    // benchmark payload size in 4 byte integers per rank
    #[serde(default = "default_ints")]
    pub ints: usize,
    #[serde(default = "default_rounds")]
    pub rounds: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            name: default_executor(),
            ranks: default_ranks(),
            ints: default_ints(),
            rounds: default_rounds(),
        }
    }
}

impl RoundConfig {
    /// config with defaults everywhere except the file count
    pub fn new(files: usize) -> Self {
        Self {
            files,
            prefix: default_prefix(),
            width: default_width(),
            group_sets: false,
            set_buf: default_set_buf(),
            buffer_size: default_buffer_size(),
            backoff: BackoffConfig::default(),
            executor: ExecutorConfig::default(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        let file = File::open(path)?;
        let config = serde_yaml::from_reader(file)?;
        debug!(path = ?path, "Loaded round config");

        Ok(config)
    }

    pub fn layout(&self) -> SlotLayout {
        SlotLayout::new(self.prefix.clone(), self.width, self.files)
    }

    pub fn policy(&self) -> GrantPolicy {
        GrantPolicy::from_group_sets(self.group_sets)
    }

    /// validate everything at once so users see all problems in one go,
    /// returns whether an error was found
    pub fn preflight_checks(&mut self) -> bool {
        let mut contains_error = false;

        self.executor.name = self.executor.name.to_lowercase();

        if self.executor.name != "local" {
            error!(
                "executor.name ({}) is not supported, please use `local` for now",
                self.executor.name
            );
            contains_error = true;
        }

        if self.executor.ranks == 0 {
            error!("executor.ranks must be at least 1");
            contains_error = true;
        }

        if self.files == 0 || self.files > self.executor.ranks {
            error!(
                "files ({}) must be between 1 and executor.ranks ({})",
                self.files, self.executor.ranks
            );
            contains_error = true;
        }

        if self.prefix.as_os_str().is_empty() {
            error!("prefix must not be empty, the slot files need a name");
            contains_error = true;
        }

        let digits = self.files.saturating_sub(1).to_string().len();
        if self.width < digits {
            warn!(
                "width ({}) is too small for {} files, widening to {digits} digits",
                self.width, self.files
            );
            self.width = digits;
        }

        if self.set_buf && self.buffer_size == 0 {
            warn!("set_buf is enabled with a buffer_size of 0, writing unbuffered instead");
            self.set_buf = false;
        }

        if self.backoff.min_sleep_us > self.backoff.max_sleep_us {
            error!(
                "backoff.min_sleep_us ({}) exceeds backoff.max_sleep_us ({})",
                self.backoff.min_sleep_us, self.backoff.max_sleep_us
            );
            contains_error = true;
        }

        if self.executor.ints == 0 {
            warn!("executor.ints is 0, every rank writes an empty payload");
        }

        if self.executor.rounds == 0 {
            error!("executor.rounds must be at least 1");
            contains_error = true;
        }

        contains_error
    }
}

fn default_prefix() -> PathBuf {
    DEFAULT_PREFIX.clone()
}

fn default_width() -> usize {
    DEFAULT_WIDTH
}

fn default_set_buf() -> bool {
    true
}

fn default_buffer_size() -> usize {
    8 * 1024 * 1024
}

fn default_executor() -> String {
    String::from("local")
}

fn default_ranks() -> usize {
    6
}

fn default_ints() -> usize {
    32
}

fn default_rounds() -> u32 {
    1
}
