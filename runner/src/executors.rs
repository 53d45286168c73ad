pub mod local;


use crate::{
    config::{ConfigErrors, RoundConfig},
    message::Tag,
    round::{RankReport, RoundError},
    sync::GrantPolicy,
    topology::Rank,
};
use itertools::{Itertools, MinMaxResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Executor failed to load: {0}")]
    Config(#[from] ConfigErrors),
    #[error("Failed to build the rank thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("Rank {rank} failed: {source}")]
    Rank { rank: Rank, source: RoundError },
    #[error("Round finished without a coordinator report")]
    MissingCoordinator,
}

/// Result of one round over all ranks
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct RoundSummary {
    pub round: u32,
    pub ranks: usize,
    pub files: usize,
    /// most writers any single file takes
    pub sets: usize,
    pub policy: GrantPolicy,
    pub coordinator: Rank,
    pub peak_open_files: usize,
    pub collisions: usize,
    pub bytes_written: u64,
    /// finished write sessions, one per rank
    pub writes: usize,
    pub elapsed_secs: f64,
    /// frames sent during this round per wire tag
    pub messages: BTreeMap<Tag, u64>,
    pub reports: Vec<RankReport>,
}

impl RoundSummary {
    pub fn megabytes_per_second(&self) -> f64 {
        if self.elapsed_secs > 0.0 {
            self.bytes_written as f64 / 1.0e6 / self.elapsed_secs
        } else {
            0.0
        }
    }

    /// fastest and slowest rank wall time, `None` without reports
    pub fn rank_wall_times(&self) -> Option<(f64, f64)> {
        match self
            .reports
            .iter()
            .map(|report| report.elapsed_secs)
            .minmax_by(f64::total_cmp)
        {
            MinMaxResult::NoElements => None,
            MinMaxResult::OneElement(secs) => Some((secs, secs)),
            MinMaxResult::MinMax(min, max) => Some((min, max)),
        }
    }
}

#[derive(Debug)]
pub enum Executors {
    Local(local::LocalExecutor),
}

impl Executors {
    pub fn load(config: RoundConfig) -> Result<Self, ExecutorError> {
        match config.executor.name.as_str() {
            "local" => Ok(Self::Local(local::LocalExecutor::load(config)?)),
            _ => Err(ConfigErrors::UnsupportedExecutor(config.executor.name).into()),
        }
    }

    /// run one round, `payload` produces the bytes of every rank
    pub fn execute<F>(&mut self, payload: F) -> Result<RoundSummary, ExecutorError>
    where
        F: Fn(Rank) -> Vec<u8> + Sync,
    {
        match self {
            Self::Local(executor) => executor.execute(payload),
        }
    }
}

/// Benchmark payload of a rank: `ints` little endian `i32` values `100 * rank + i`
pub fn rank_payload(rank: Rank, ints: usize) -> Vec<u8> {
    (0..ints)
        .flat_map(|i| ((100 * rank + i) as i32).to_le_bytes())
        .collect()
}
