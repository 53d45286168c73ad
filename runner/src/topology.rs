use crate::config::ConfigErrors;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// identity of a process taking part in a round, 0..ranks
pub type Rank = usize;
/// identity of an output file, 0..files
pub type SlotId = usize;

/// Where a rank starts out: the slot it belongs to and whether it may write right away
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Assignment {
    pub slot: SlotId,
    pub first_writer: bool,
}

/// Round-robin partition of `ranks` processes over `files` output slots.
///
/// Every rank computes the same value without talking to anyone, so all
/// agreement the protocol needs before the first message (slot membership,
/// first writers, the decider) comes from here.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Topology {
    ranks: usize,
    files: usize,
}

impl Topology {
    /// check `1 <= files <= ranks` and build the partition
    pub fn partition(ranks: usize, files: usize) -> Result<Self, ConfigErrors> {
        if files == 0 || files > ranks {
            return Err(ConfigErrors::InvalidFileCount { ranks, files });
        }

        Ok(Self { ranks, files })
    }

    pub fn ranks(&self) -> usize {
        self.ranks
    }

    pub fn files(&self) -> usize {
        self.files
    }

    /// number of ranks per slot, rounded up
    pub fn sets(&self) -> usize {
        (self.ranks + self.files - 1) / self.files
    }

    pub fn slot_of(&self, rank: Rank) -> SlotId {
        rank % self.files
    }

    /// the lowest member of every slot opens its file without a grant
    pub fn is_first_writer(&self, rank: Rank) -> bool {
        rank < self.files
    }

    pub fn assignment(&self, rank: Rank) -> Assignment {
        Assignment {
            slot: self.slot_of(rank),
            first_writer: self.is_first_writer(rank),
        }
    }

    /// fixed rank that resolves the coordinator election
    pub fn decider(&self) -> Rank {
        self.ranks - 1
    }

    pub fn first_writers(&self) -> Range<Rank> {
        0..self.files
    }

    /// ranks that have to wait for a grant, in ascending order
    pub fn queued(&self) -> Range<Rank> {
        self.files..self.ranks
    }

    /// initial membership of `slot`, first writer first
    pub fn members(&self, slot: SlotId) -> impl Iterator<Item = Rank> {
        (slot..self.ranks).step_by(self.files)
    }
}
