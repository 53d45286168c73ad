use crate::{
    config::{ConfigErrors, RoundConfig},
    message::{Message, Tag},
    session::{layout::SlotLayout, monitor::RoundMonitor, FileWriteSession, OpenMode, SessionError},
    sync::{Grant, GrantPolicy, Role, RoleResolver, TokenCoordinator},
    topology::{Rank, SlotId, Topology},
    transport::{Endpoint, Source, Transport, TransportError},
};
use serde::{Deserialize, Serialize};
use std::{io, time::Instant};
use thiserror::Error;
use tracing::{debug, error, info, instrument};

#[derive(Error, Debug)]
pub enum RoundError {
    #[error("Invalid round configuration: {0}")]
    Config(#[from] ConfigErrors),
    #[error("Failed to create the output directory: {0}")]
    Directory(#[source] io::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("Rank {rank} received {message:?} while waiting for a {expected} message")]
    Unexpected {
        rank: Rank,
        expected: Tag,
        message: Message,
    },
    #[error("Rank {rank} announced itself to the decider but is not a first writer")]
    UnexpectedJoin { rank: Rank },
    #[error("Rank {rank} tried to run the election but is not the decider")]
    NotDecider { rank: Rank },
    #[error("Rank {rank} released slot {slot} without holding it")]
    UnheldRelease { slot: SlotId, rank: Rank },
    #[error("Slot {slot} used by rank {rank} does not exist")]
    SlotOutOfRange { slot: SlotId, rank: Rank },
}

/// Steps a rank goes through, recorded in its report.
///
/// Writers go `Idle -> Writing | WaitingForGrant -> Writing -> Done`, the
/// coordinator ends in `Granting -> Finished` instead of `Done`.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum RankState {
    Idle,
    Writing,
    WaitingForGrant,
    Electing,
    Granting,
    Done,
    Finished,
}

/// What a single rank did during a round
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct RankReport {
    pub rank: Rank,
    pub role: Role,
    /// slot the rank actually wrote to
    pub slot: SlotId,
    /// slot the topology assigned to the rank
    pub topology_slot: SlotId,
    pub first_writer: bool,
    pub mode: OpenMode,
    pub coordinator: Rank,
    pub bytes: u64,
    /// grants issued by this rank, only non-empty on the coordinator
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub grants: Vec<Grant>,
    pub history: Vec<RankState>,
    /// wall time between the two round barriers as seen by this rank
    pub elapsed_secs: f64,
}

/// One execution of the protocol on one rank.
///
/// Every rank of the transport has to run the same round (same sequence
/// number and config) for it to terminate.
pub struct Round<'a, T: Transport + ?Sized> {
    transport: &'a T,
    config: &'a RoundConfig,
    monitor: &'a RoundMonitor,
    sequence: u32,
}

impl<'a, T: Transport + ?Sized> Round<'a, T> {
    pub fn new(
        transport: &'a T,
        config: &'a RoundConfig,
        monitor: &'a RoundMonitor,
        sequence: u32,
    ) -> Self {
        Self {
            transport,
            config,
            monitor,
            sequence,
        }
    }

    /// write `payload` into one of the slot files, fatal errors abort every rank
    #[instrument(skip_all, fields(rank = self.transport.rank(), round = self.sequence), level = "debug")]
    pub fn run(&self, payload: &[u8]) -> Result<RankReport, RoundError> {
        // checked before any message is sent, every rank reaches the same verdict
        let topology = Topology::partition(self.transport.size(), self.config.files)?;

        match self.delimited(&topology, payload) {
            Ok(report) => Ok(report),
            Err(error) => {
                error!(error = %error, "Round failed");
                self.transport.abort(&error.to_string());

                Err(error)
            }
        }
    }

    fn delimited(&self, topology: &Topology, payload: &[u8]) -> Result<RankReport, RoundError> {
        let layout = self.config.layout();

        if self.transport.rank() == 0 {
            layout.create_directory().map_err(RoundError::Directory)?;
        }

        self.transport.barrier()?;
        let start = Instant::now();
        let mut report = self.exchange(topology, &layout, payload)?;
        self.transport.barrier()?;
        report.elapsed_secs = start.elapsed().as_secs_f64();

        Ok(report)
    }

    fn exchange(
        &self,
        topology: &Topology,
        layout: &SlotLayout,
        payload: &[u8],
    ) -> Result<RankReport, RoundError> {
        let rank = self.transport.rank();
        let assignment = topology.assignment(rank);
        let endpoint = Endpoint::new(self.transport, self.sequence);
        let resolver = RoleResolver::new(&endpoint, topology);
        let mut history = vec![RankState::Idle];

        let mut report = RankReport {
            rank,
            role: Role::Writer,
            slot: assignment.slot,
            topology_slot: assignment.slot,
            first_writer: assignment.first_writer,
            mode: OpenMode::Truncate,
            coordinator: rank,
            bytes: 0,
            grants: Vec::new(),
            history: Vec::new(),
            elapsed_secs: 0.0,
        };

        if assignment.first_writer {
            history.push(RankState::Writing);
            report.bytes = self.write(layout, assignment.slot, OpenMode::Truncate, payload)?;

            history.push(RankState::Electing);
            resolver.announce()?;
        }

        // a decider without a first write of its own still waits for a grant below
        if resolver.is_decider() {
            if !assignment.first_writer {
                history.push(RankState::Electing);
            }

            resolver.decide()?;
        }

        if assignment.first_writer {
            let election = resolver.await_election()?;
            report.coordinator = election.coordinator;
            report.role = election.role_of(rank);

            if election.coordinator == rank {
                history.push(RankState::Granting);
                report.grants = TokenCoordinator::new(
                    &endpoint,
                    topology,
                    GrantPolicy::from_group_sets(self.config.group_sets),
                    assignment.slot,
                    self.config.backoff.clone(),
                )
                .run()?;
                history.push(RankState::Finished);
            } else {
                endpoint.send(
                    election.coordinator,
                    Message::WriteDone {
                        sender: rank,
                        slot: assignment.slot,
                    },
                )?;
                history.push(RankState::Done);
            }
        } else {
            history.push(RankState::WaitingForGrant);

            let (coordinator, slot) = match endpoint.recv(Tag::Grant, Source::Any)? {
                Message::WriteGrant { sender, slot } if slot < topology.files() => (sender, slot),
                Message::WriteGrant { slot, .. } => {
                    return Err(RoundError::SlotOutOfRange { slot, rank })
                }
                message => {
                    return Err(RoundError::Unexpected {
                        rank,
                        expected: Tag::Grant,
                        message,
                    })
                }
            };

            debug!(coordinator, slot, "Received grant");
            history.push(RankState::Writing);
            report.bytes = self.write(layout, slot, OpenMode::Append, payload)?;
            report.slot = slot;
            report.mode = OpenMode::Append;
            report.coordinator = coordinator;
            report.role = if resolver.is_decider() {
                Role::Decider
            } else {
                Role::Writer
            };

            endpoint.send(coordinator, Message::WriteDone { sender: rank, slot })?;
            history.push(RankState::Done);
        }

        if report.role == Role::Coordinator {
            info!(grants = report.grants.len(), "Coordinator finished");
        }

        report.history = history;

        Ok(report)
    }

    fn write(
        &self,
        layout: &SlotLayout,
        slot: SlotId,
        mode: OpenMode,
        payload: &[u8],
    ) -> Result<u64, RoundError> {
        let buffer = self.config.set_buf.then_some(self.config.buffer_size);
        let mut session = FileWriteSession::open(layout, slot, mode, buffer, self.monitor)?;
        session.write_payload(payload)?;

        Ok(session.finish()?)
    }
}
