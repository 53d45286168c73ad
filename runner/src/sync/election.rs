use crate::{
    message::{Message, Tag},
    round::RoundError,
    topology::{Rank, Topology},
    transport::{Endpoint, Source, Transport},
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, instrument};

/// Part a rank plays in a round, fixed once the election is resolved
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Decider,
    Coordinator,
    Writer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Outcome of the bootstrap phase
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Election {
    pub decider: Rank,
    pub coordinator: Rank,
}

impl Election {
    /// the coordinator role wins over the decider role when both land on one rank
    pub fn role_of(&self, rank: Rank) -> Role {
        if rank == self.coordinator {
            Role::Coordinator
        } else if rank == self.decider {
            Role::Decider
        } else {
            Role::Writer
        }
    }
}

/// Elects the coordinator through the decider.
///
/// Every first writer announces itself once its initial write is done, the
/// decider takes the first announcement it receives as the coordinator and
/// tells each of the `files` first writers who won. The decider waits for
/// exactly `files` announcements, so a missing first writer stalls it forever.
pub struct RoleResolver<'e, 't, T: Transport + ?Sized> {
    endpoint: &'e Endpoint<'t, T>,
    topology: &'e Topology,
}

impl<'e, 't, T: Transport + ?Sized> RoleResolver<'e, 't, T> {
    pub fn new(endpoint: &'e Endpoint<'t, T>, topology: &'e Topology) -> Self {
        Self { endpoint, topology }
    }

    pub fn is_decider(&self) -> bool {
        self.endpoint.rank() == self.topology.decider()
    }

    /// tell the decider this first writer is done with its initial write
    pub fn announce(&self) -> Result<(), RoundError> {
        let rank = self.endpoint.rank();
        debug!(rank, decider = self.topology.decider(), "Announcing to decider");

        self.endpoint.send(
            self.topology.decider(),
            Message::JoinNotify { sender: rank },
        )?;

        Ok(())
    }

    /// run the election, only valid on the decider rank
    #[instrument(skip(self), fields(rank = self.endpoint.rank()), level = "debug")]
    pub fn decide(&self) -> Result<Election, RoundError> {
        let rank = self.endpoint.rank();

        if !self.is_decider() {
            return Err(RoundError::NotDecider { rank });
        }

        let coordinator = self.next_announcement()?;
        let election = Election {
            decider: rank,
            coordinator,
        };

        info!(coordinator, "Elected coordinator");
        self.endpoint.send(
            coordinator,
            Message::CoordinatorAssign {
                sender: rank,
                coordinator,
            },
        )?;

        for _ in 1..self.topology.files() {
            let first_writer = self.next_announcement()?;

            self.endpoint.send(
                first_writer,
                Message::CoordinatorAssign {
                    sender: rank,
                    coordinator,
                },
            )?;
        }

        debug!("All first writers know the coordinator");

        Ok(election)
    }

    fn next_announcement(&self) -> Result<Rank, RoundError> {
        match self.endpoint.recv(Tag::Decider, Source::Any)? {
            Message::JoinNotify { sender } if self.topology.is_first_writer(sender) => Ok(sender),
            Message::JoinNotify { sender } => Err(RoundError::UnexpectedJoin { rank: sender }),
            message => Err(RoundError::Unexpected {
                rank: self.endpoint.rank(),
                expected: Tag::Decider,
                message,
            }),
        }
    }

    /// wait for the decider to name the coordinator
    pub fn await_election(&self) -> Result<Election, RoundError> {
        let decider = self.topology.decider();

        match self.endpoint.recv(Tag::Coordinator, Source::Rank(decider))? {
            Message::CoordinatorAssign { coordinator, .. } => {
                debug!(rank = self.endpoint.rank(), coordinator, "Learned coordinator");

                Ok(Election {
                    decider,
                    coordinator,
                })
            }
            message => Err(RoundError::Unexpected {
                rank: self.endpoint.rank(),
                expected: Tag::Coordinator,
                message,
            }),
        }
    }
}
