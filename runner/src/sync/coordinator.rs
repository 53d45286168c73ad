use super::backoff::{Backoff, BackoffConfig};
use crate::{
    message::{Message, Tag},
    round::RoundError,
    topology::{Rank, SlotId, Topology},
    transport::{Endpoint, Source, Transport},
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info, instrument, trace};

/// How freed slots are handed to queued ranks
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GrantPolicy {
    /// next queued rank gets whichever slot frees up first, as long as that
    /// file has not reached its share of writers yet
    Spread,
    /// a rank only ever gets the slot of its topology set
    Grouped,
}

impl GrantPolicy {
    pub fn from_group_sets(group_sets: bool) -> Self {
        if group_sets {
            Self::Grouped
        } else {
            Self::Spread
        }
    }
}

/// One issued grant, in the order the coordinator sent them
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Grant {
    pub rank: Rank,
    pub slot: SlotId,
}

#[derive(Debug)]
enum WaitQueue {
    /// `room` is how many more writers each slot takes, its topology share
    Spread {
        queue: VecDeque<Rank>,
        room: Vec<usize>,
    },
    Grouped(Vec<VecDeque<Rank>>),
}

impl WaitQueue {
    fn new(policy: GrantPolicy, topology: &Topology) -> Self {
        match policy {
            GrantPolicy::Spread => Self::Spread {
                queue: topology.queued().collect(),
                room: (0..topology.files())
                    .map(|slot| topology.members(slot).count() - 1)
                    .collect(),
            },
            GrantPolicy::Grouped => Self::Grouped(
                (0..topology.files())
                    // the first member already wrote without a grant
                    .map(|slot| topology.members(slot).skip(1).collect())
                    .collect(),
            ),
        }
    }

    fn next_for(&mut self, slot: SlotId) -> Option<Rank> {
        match self {
            Self::Spread { queue, room } => {
                let room = room.get_mut(slot).filter(|room| **room > 0)?;
                let rank = queue.pop_front()?;
                *room -= 1;

                Some(rank)
            }
            Self::Grouped(queues) => queues.get_mut(slot).and_then(VecDeque::pop_front),
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Spread { queue, .. } => queue.len(),
            Self::Grouped(queues) => queues.iter().map(VecDeque::len).sum(),
        }
    }
}

/// Owner of the slot tokens for one round, runs on the coordinator only.
///
/// Acts as a counting semaphore of size `files`: a slot is either free or
/// held by exactly one rank, and only this loop moves it between the two, so
/// no slot is ever granted twice before its holder reported back.
pub struct TokenCoordinator<'e, 't, T: Transport + ?Sized> {
    endpoint: &'e Endpoint<'t, T>,
    queue: WaitQueue,
    free: VecDeque<SlotId>,
    holders: Vec<Option<Rank>>,
    remaining: usize,
    backoff: Backoff,
    grants: Vec<Grant>,
}

impl<'e, 't, T: Transport + ?Sized> TokenCoordinator<'e, 't, T> {
    /// `own_slot` is the slot the coordinator itself just finished writing
    pub fn new(
        endpoint: &'e Endpoint<'t, T>,
        topology: &Topology,
        policy: GrantPolicy,
        own_slot: SlotId,
        backoff: BackoffConfig,
    ) -> Self {
        // the other first writers still hold their slots, rank == slot for them
        let holders = topology
            .first_writers()
            .map(|rank| (rank != own_slot).then_some(rank))
            .collect();

        Self {
            endpoint,
            queue: WaitQueue::new(policy, topology),
            free: VecDeque::from([own_slot]),
            holders,
            // the coordinator's own write is already done
            remaining: topology.ranks() - 1,
            backoff: Backoff::new(backoff),
            grants: Vec::new(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// grant slots until every writer reported back, returns the grants in issue order
    #[instrument(skip(self), fields(rank = self.endpoint.rank()), level = "info")]
    pub fn run(mut self) -> Result<Vec<Grant>, RoundError> {
        info!(
            remaining = self.remaining,
            queued = self.queue.len(),
            "Start granting slots"
        );

        loop {
            self.dispatch()?;

            if self.remaining == 0 {
                break;
            }

            match self.endpoint.iprobe(Tag::Done, Source::Any)? {
                Some(status) => {
                    let message = self.endpoint.recv(Tag::Done, Source::Rank(status.source))?;
                    self.release(message)?;
                    self.backoff.reset();
                }
                None => self.backoff.snooze(),
            }
        }

        info!(grants = self.grants.len(), "All writers done");

        Ok(self.grants)
    }

    /// hand every free slot to a queued rank, slots without a taker stay free
    fn dispatch(&mut self) -> Result<(), RoundError> {
        let mut idle = VecDeque::with_capacity(self.free.len());

        while let Some(slot) = self.free.pop_front() {
            match self.queue.next_for(slot) {
                Some(rank) => self.grant(slot, rank)?,
                None => idle.push_back(slot),
            }
        }

        self.free = idle;

        Ok(())
    }

    fn grant(&mut self, slot: SlotId, rank: Rank) -> Result<(), RoundError> {
        debug!(slot, rank, "Granting slot");

        self.holders[slot] = Some(rank);
        self.endpoint.send(
            rank,
            Message::WriteGrant {
                sender: self.endpoint.rank(),
                slot,
            },
        )?;
        self.grants.push(Grant { rank, slot });

        Ok(())
    }

    fn release(&mut self, message: Message) -> Result<(), RoundError> {
        let (rank, slot) = match message {
            Message::WriteDone { sender, slot } => (sender, slot),
            message => {
                return Err(RoundError::Unexpected {
                    rank: self.endpoint.rank(),
                    expected: Tag::Done,
                    message,
                })
            }
        };

        match self.holders.get_mut(slot) {
            Some(holder) if *holder == Some(rank) => *holder = None,
            Some(_) => return Err(RoundError::UnheldRelease { slot, rank }),
            None => return Err(RoundError::SlotOutOfRange { slot, rank }),
        }

        self.free.push_back(slot);
        self.remaining -= 1;
        trace!(slot, rank, remaining = self.remaining, "Slot released");

        Ok(())
    }
}
