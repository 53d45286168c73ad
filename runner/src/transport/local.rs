use super::{Envelope, Filter, Status, Transport, TransportError};
use crate::{
    message::{Frame, Tag},
    topology::Rank,
};
use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex};
use std::{
    collections::{BTreeMap, VecDeque},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tracing::{debug, error};

/// In-process stand in for a message passing job: every rank is a thread and
/// owns a mailbox that the other ranks push frames into.
#[derive(Debug)]
pub struct LocalCluster {
    mailboxes: Vec<Mailbox>,
    barrier: Mutex<BarrierState>,
    released: Condvar,
    aborted: OnceCell<(Rank, String)>,
    sent: [AtomicU64; Tag::ALL.len()],
}

#[derive(Debug, Default)]
struct Mailbox {
    pending: Mutex<VecDeque<Envelope>>,
    arrived: Condvar,
}

#[derive(Debug, Default)]
struct BarrierState {
    entered: usize,
    generation: u64,
}

impl LocalCluster {
    pub fn new(size: usize) -> Arc<Self> {
        Arc::new(Self {
            mailboxes: (0..size).map(|_| Mailbox::default()).collect(),
            barrier: Mutex::new(BarrierState::default()),
            released: Condvar::new(),
            aborted: OnceCell::new(),
            sent: Default::default(),
        })
    }

    pub fn size(&self) -> usize {
        self.mailboxes.len()
    }

    /// handle for a single rank, to be moved onto that rank's thread
    pub fn transport(self: &Arc<Self>, rank: Rank) -> Result<LocalTransport, TransportError> {
        if rank >= self.size() {
            return Err(TransportError::InvalidRank(rank));
        }

        Ok(LocalTransport {
            rank,
            cluster: Arc::clone(self),
        })
    }

    pub fn transports(self: &Arc<Self>) -> Vec<LocalTransport> {
        (0..self.size())
            .flat_map(|rank| self.transport(rank))
            .collect()
    }

    /// total frames sent per tag since the cluster was created
    pub fn messages_sent(&self) -> BTreeMap<Tag, u64> {
        Tag::ALL
            .iter()
            .zip(self.sent.iter())
            .map(|(tag, counter)| (*tag, counter.load(Ordering::Relaxed)))
            .collect()
    }

    /// frames delivered but not yet received, over all mailboxes
    pub fn pending(&self) -> usize {
        self.mailboxes
            .iter()
            .map(|mailbox| mailbox.pending.lock().len())
            .sum()
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.get().is_some()
    }

    fn check_aborted(&self) -> Result<(), TransportError> {
        match self.aborted.get() {
            Some((rank, reason)) => Err(TransportError::Aborted {
                rank: *rank,
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    fn abort(&self, rank: Rank, reason: &str) {
        if self.aborted.set((rank, reason.to_owned())).is_err() {
            debug!(rank, "Cluster already aborted");
            return;
        }

        error!(rank, reason, "Aborting all ranks");

        // waiters re-check the abort flag under their own lock, so taking
        // each lock before notifying cannot lose a wakeup
        for mailbox in self.mailboxes.iter() {
            let _pending = mailbox.pending.lock();
            mailbox.arrived.notify_all();
        }

        let _state = self.barrier.lock();
        self.released.notify_all();
    }
}

/// One rank's view on a `LocalCluster`
#[derive(Debug, Clone)]
pub struct LocalTransport {
    rank: Rank,
    cluster: Arc<LocalCluster>,
}

impl LocalTransport {
    pub fn cluster(&self) -> &Arc<LocalCluster> {
        &self.cluster
    }

    fn mailbox(&self) -> &Mailbox {
        &self.cluster.mailboxes[self.rank]
    }
}

impl Transport for LocalTransport {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.cluster.size()
    }

    fn barrier(&self) -> Result<(), TransportError> {
        let mut state = self.cluster.barrier.lock();
        self.cluster.check_aborted()?;

        let generation = state.generation;
        state.entered += 1;

        if state.entered == self.size() {
            state.entered = 0;
            state.generation += 1;
            self.cluster.released.notify_all();

            return Ok(());
        }

        while state.generation == generation {
            self.cluster.check_aborted()?;
            self.cluster.released.wait(&mut state);
        }

        Ok(())
    }

    fn send(&self, dest: Rank, frame: Frame) -> Result<(), TransportError> {
        self.cluster.check_aborted()?;

        let mailbox = self
            .cluster
            .mailboxes
            .get(dest)
            .ok_or(TransportError::InvalidRank(dest))?;

        if let Some(counter) = (frame.tag_byte() as usize)
            .checked_sub(1)
            .and_then(|index| self.cluster.sent.get(index))
        {
            counter.fetch_add(1, Ordering::Relaxed);
        }

        mailbox.pending.lock().push_back(Envelope {
            source: self.rank,
            frame,
        });
        mailbox.arrived.notify_all();

        Ok(())
    }

    fn recv(&self, filter: Filter) -> Result<Envelope, TransportError> {
        let mailbox = self.mailbox();
        let mut pending = mailbox.pending.lock();

        loop {
            self.cluster.check_aborted()?;

            // first match in arrival order keeps the per sender order intact
            if let Some(envelope) = pending
                .iter()
                .position(|envelope| filter.matches(envelope))
                .and_then(|position| pending.remove(position))
            {
                return Ok(envelope);
            }

            mailbox.arrived.wait(&mut pending);
        }
    }

    fn iprobe(&self, filter: Filter) -> Result<Option<Status>, TransportError> {
        self.cluster.check_aborted()?;

        Ok(self
            .mailbox()
            .pending
            .lock()
            .iter()
            .find(|envelope| filter.matches(envelope))
            .map(|envelope| Status {
                source: envelope.source,
            }))
    }

    fn abort(&self, reason: &str) {
        self.cluster.abort(self.rank, reason)
    }
}
