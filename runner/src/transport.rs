pub mod local;


use crate::{
    message::{Frame, FrameError, Message, Tag},
    topology::Rank,
};
use thiserror::Error;
use tracing::trace;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Rank {0} is not part of the communicator")]
    InvalidRank(Rank),
    #[error("Round aborted by rank {rank}: {reason}")]
    Aborted { rank: Rank, reason: String },
    #[error("Invalid frame: {0}")]
    Frame(#[from] FrameError),
}

/// Which senders a receive or probe accepts
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Source {
    Any,
    Rank(Rank),
}

impl Source {
    pub fn matches(&self, rank: Rank) -> bool {
        match self {
            Self::Any => true,
            Self::Rank(expected) => *expected == rank,
        }
    }
}

/// Matching criteria for pending frames
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Filter {
    pub round: u32,
    pub tag: Tag,
    pub source: Source,
}

impl Filter {
    pub fn matches(&self, envelope: &Envelope) -> bool {
        envelope.frame.tag_byte() == self.tag as u8
            && envelope.frame.round() == self.round
            && self.source.matches(envelope.source)
    }
}

/// A frame together with the rank the substrate saw it come from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub source: Rank,
    pub frame: Frame,
}

/// Metadata of a pending message, returned by a probe without consuming it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Status {
    pub source: Rank,
}

/// Point to point messaging between the ranks of one job.
///
/// Implementations must deliver every frame exactly once and keep the send
/// order between each ordered pair of ranks. Nothing in the protocol times
/// out, a lost frame stalls the round.
pub trait Transport: Send + Sync {
    fn rank(&self) -> Rank;

    fn size(&self) -> usize;

    /// block until every rank entered the barrier
    fn barrier(&self) -> Result<(), TransportError>;

    /// asynchronous send, never waits for the receiver
    fn send(&self, dest: Rank, frame: Frame) -> Result<(), TransportError>;

    /// block until a frame matching `filter` arrives and consume it
    fn recv(&self, filter: Filter) -> Result<Envelope, TransportError>;

    /// non blocking check for a frame matching `filter`
    fn iprobe(&self, filter: Filter) -> Result<Option<Status>, TransportError>;

    /// tear the job down, every blocked rank returns `TransportError::Aborted`
    fn abort(&self, reason: &str);
}

/// Typed view on a transport for a single round.
///
/// Frames are only decoded here, the protocol code never sees raw bytes.
#[derive(Debug)]
pub struct Endpoint<'t, T: Transport + ?Sized> {
    transport: &'t T,
    round: u32,
}

impl<'t, T: Transport + ?Sized> Endpoint<'t, T> {
    pub fn new(transport: &'t T, round: u32) -> Self {
        Self { transport, round }
    }

    pub fn rank(&self) -> Rank {
        self.transport.rank()
    }

    pub fn size(&self) -> usize {
        self.transport.size()
    }

    fn filter(&self, tag: Tag, source: Source) -> Filter {
        Filter {
            round: self.round,
            tag,
            source,
        }
    }

    pub fn send(&self, dest: Rank, message: Message) -> Result<(), TransportError> {
        trace!(rank = self.rank(), dest, ?message, "send");

        self.transport.send(dest, message.encode(self.round)?)
    }

    pub fn recv(&self, tag: Tag, source: Source) -> Result<Message, TransportError> {
        let envelope = self.transport.recv(self.filter(tag, source))?;
        let message = Message::decode(&envelope.frame)?;

        if message.sender() >= self.size() {
            return Err(TransportError::InvalidRank(message.sender()));
        }

        trace!(rank = self.rank(), source = envelope.source, ?message, "recv");

        Ok(message)
    }

    pub fn iprobe(&self, tag: Tag, source: Source) -> Result<Option<Status>, TransportError> {
        self.transport.iprobe(self.filter(tag, source))
    }
}
