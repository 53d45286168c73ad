use super::{ExecutorError, RoundSummary};
use crate::{
    config::RoundConfig,
    round::{RankReport, Round, RoundError},
    session::monitor::RoundMonitor,
    sync::Role,
    topology::{Rank, Topology},
    transport::{
        local::{LocalCluster, LocalTransport},
        Transport, TransportError,
    },
};
use itertools::Itertools;
use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::{fmt, sync::Arc, time::Instant};
use tracing::{debug, info, instrument, warn};

/// Executor that runs every rank as a thread of a local pool, talking
/// through an in-process `LocalCluster`
pub struct LocalExecutor {
    config: RoundConfig,
    topology: Topology,
    cluster: Arc<LocalCluster>,
    pool: ThreadPool,
    sequence: u32,
}

impl fmt::Debug for LocalExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalExecutor")
            .field("config", &self.config)
            .field("topology", &self.topology)
            .field("cluster", &self.cluster)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

impl LocalExecutor {
    /// create a new LocalExecutor instance with one pool thread per rank
    pub fn load(config: RoundConfig) -> Result<Self, ExecutorError> {
        let ranks = config.executor.ranks;
        let topology = Topology::partition(ranks, config.files)?;

        // every rank blocks on messages, so each one needs its own thread
        let pool = ThreadPoolBuilder::new()
            .num_threads(ranks)
            .thread_name(|index| format!("rank-{index}"))
            .build()?;

        debug!("Started rank pool with {ranks} threads");

        Ok(Self {
            config,
            topology,
            cluster: LocalCluster::new(ranks),
            pool,
            sequence: 0,
        })
    }

    pub fn config(&self) -> &RoundConfig {
        &self.config
    }

    pub fn cluster(&self) -> &Arc<LocalCluster> {
        &self.cluster
    }

    /// execute one round on all ranks concurrently
    #[instrument(skip(self, payload), fields(round = self.sequence), level = "info")]
    pub fn execute<F>(&mut self, payload: F) -> Result<RoundSummary, ExecutorError>
    where
        F: Fn(Rank) -> Vec<u8> + Sync,
    {
        let sequence = self.sequence;
        self.sequence += 1;

        let ranks = self.topology.ranks();
        let monitor = RoundMonitor::new(self.topology.files());
        let transports = self.cluster.transports();
        let sent_before = self.cluster.messages_sent();
        let outcomes: Mutex<Vec<(Rank, Result<RankReport, RoundError>)>> =
            Mutex::new(Vec::with_capacity(ranks));

        let start = Instant::now();

        self.pool.scope(|scope| {
            for transport in transports.iter() {
                let config = &self.config;
                let monitor = &monitor;
                let payload = &payload;
                let outcomes = &outcomes;

                scope.spawn(move |_| {
                    let outcome = run_rank(transport, config, monitor, sequence, payload);
                    outcomes.lock().push((transport.rank(), outcome));
                });
            }
        });

        let elapsed = start.elapsed();

        if monitor.open() > 0 {
            warn!(open = monitor.open(), "Slot files still open after the round");
        }
        let outcomes = outcomes
            .into_inner()
            .into_iter()
            .sorted_by_key(|(rank, _)| *rank)
            .collect_vec();

        let mut reports = Vec::with_capacity(ranks);
        let mut failures = Vec::new();

        for (rank, outcome) in outcomes {
            match outcome {
                Ok(report) => reports.push(report),
                Err(error) => failures.push((rank, error)),
            }
        }

        if !failures.is_empty() {
            warn!(failed = failures.len(), "Round failed on some ranks");

            // the rank that aborted the round carries the actual cause
            let position = failures
                .iter()
                .position(|(_, error)| {
                    !matches!(error, RoundError::Transport(TransportError::Aborted { .. }))
                })
                .unwrap_or(0);
            let (rank, source) = failures.swap_remove(position);

            return Err(ExecutorError::Rank { rank, source });
        }

        let coordinator = reports
            .iter()
            .find(|report| report.role == Role::Coordinator)
            .map(|report| report.rank)
            .ok_or(ExecutorError::MissingCoordinator)?;

        let messages = self
            .cluster
            .messages_sent()
            .into_iter()
            .map(|(tag, sent)| (tag, sent - sent_before.get(&tag).copied().unwrap_or(0)))
            .collect();

        let summary = RoundSummary {
            round: sequence,
            ranks,
            files: self.topology.files(),
            sets: self.topology.sets(),
            policy: self.config.policy(),
            coordinator,
            peak_open_files: monitor.peak_open(),
            collisions: monitor.collisions(),
            bytes_written: monitor.bytes(),
            writes: monitor.writes(),
            elapsed_secs: elapsed.as_secs_f64(),
            messages,
            reports,
        };

        info!(
            coordinator,
            bytes = summary.bytes_written,
            peak_open_files = summary.peak_open_files,
            "Done with round {sequence}"
        );

        Ok(summary)
    }
}

fn run_rank<F>(
    transport: &LocalTransport,
    config: &RoundConfig,
    monitor: &RoundMonitor,
    sequence: u32,
    payload: &F,
) -> Result<RankReport, RoundError>
where
    F: Fn(Rank) -> Vec<u8> + Sync,
{
    let data = payload(transport.rank());

    Round::new(transport, config, monitor, sequence).run(&data)
}
