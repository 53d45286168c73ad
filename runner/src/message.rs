use crate::topology::{Rank, SlotId};
use serde_repr::{Deserialize_repr, Serialize_repr};
use std::fmt;
use thiserror::Error;

/// size of an encoded frame: tag, round, sender, payload
pub const FRAME_LEN: usize = 17;

const TAG_OFFSET: usize = 0;
const ROUND_OFFSET: usize = 1;
const SENDER_OFFSET: usize = 5;
const PAYLOAD_OFFSET: usize = 9;

/// Message kinds on the wire
#[derive(Serialize_repr, Deserialize_repr, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Tag {
    /// first writer -> decider, payload: own rank
    Decider = 1,
    /// decider -> first writer, payload: coordinator rank
    Coordinator = 2,
    /// writer -> coordinator, payload: vacated slot
    Done = 3,
    /// coordinator -> queued writer, payload: granted slot
    Grant = 4,
}

impl Tag {
    pub const ALL: [Tag; 4] = [Tag::Decider, Tag::Coordinator, Tag::Done, Tag::Grant];
}

impl TryFrom<u8> for Tag {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Decider),
            2 => Ok(Self::Coordinator),
            3 => Ok(Self::Done),
            4 => Ok(Self::Grant),
            other => Err(FrameError::UnknownTag(other)),
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Decider => "DECIDER",
            Self::Coordinator => "COORDINATOR",
            Self::Done => "DONE",
            Self::Grant => "GRANT",
        };

        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Unknown message tag {0}")]
    UnknownTag(u8),
    #[error("Payload {payload} of a {tag} message does not fit a rank or slot")]
    PayloadOverflow { tag: Tag, payload: u64 },
    #[error("Sender rank {0} does not fit the 32 bit sender field")]
    SenderOverflow(Rank),
}

/// Raw fixed size frame as it travels through a transport
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Frame([u8; FRAME_LEN]);

impl Frame {
    pub fn from_bytes(bytes: [u8; FRAME_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.0
    }

    /// undecoded tag byte, used for matching without a full decode
    pub fn tag_byte(&self) -> u8 {
        self.0[TAG_OFFSET]
    }

    pub fn round(&self) -> u32 {
        u32::from_le_bytes(self.word::<4>(ROUND_OFFSET))
    }

    pub fn sender(&self) -> u32 {
        u32::from_le_bytes(self.word::<4>(SENDER_OFFSET))
    }

    pub fn payload(&self) -> u64 {
        u64::from_le_bytes(self.word::<8>(PAYLOAD_OFFSET))
    }

    fn word<const N: usize>(&self, offset: usize) -> [u8; N] {
        let mut word = [0; N];
        word.copy_from_slice(&self.0[offset..offset + N]);
        word
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("tag", &self.tag_byte())
            .field("round", &self.round())
            .field("sender", &self.sender())
            .field("payload", &self.payload())
            .finish()
    }
}

/// Protocol messages, decoded once when they are received
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Message {
    /// a first writer finished its initial write
    JoinNotify { sender: Rank },
    /// the decider names the coordinator; naming the receiver itself is the start signal
    CoordinatorAssign { sender: Rank, coordinator: Rank },
    /// exclusive right to append to `slot`
    WriteGrant { sender: Rank, slot: SlotId },
    /// `slot` is free again
    WriteDone { sender: Rank, slot: SlotId },
}

impl Message {
    pub fn tag(&self) -> Tag {
        match self {
            Self::JoinNotify { .. } => Tag::Decider,
            Self::CoordinatorAssign { .. } => Tag::Coordinator,
            Self::WriteGrant { .. } => Tag::Grant,
            Self::WriteDone { .. } => Tag::Done,
        }
    }

    pub fn sender(&self) -> Rank {
        match *self {
            Self::JoinNotify { sender }
            | Self::CoordinatorAssign { sender, .. }
            | Self::WriteGrant { sender, .. }
            | Self::WriteDone { sender, .. } => sender,
        }
    }

    fn payload(&self) -> usize {
        match *self {
            Self::JoinNotify { sender } => sender,
            Self::CoordinatorAssign { coordinator, .. } => coordinator,
            Self::WriteGrant { slot, .. } | Self::WriteDone { slot, .. } => slot,
        }
    }

    /// encode for the given round, senders above `u32::MAX` are rejected
    pub fn encode(&self, round: u32) -> Result<Frame, FrameError> {
        let sender = u32::try_from(self.sender())
            .map_err(|_| FrameError::SenderOverflow(self.sender()))?;
        let mut bytes = [0; FRAME_LEN];

        bytes[TAG_OFFSET] = self.tag() as u8;
        bytes[ROUND_OFFSET..SENDER_OFFSET].copy_from_slice(&round.to_le_bytes());
        bytes[SENDER_OFFSET..PAYLOAD_OFFSET].copy_from_slice(&sender.to_le_bytes());
        bytes[PAYLOAD_OFFSET..].copy_from_slice(&(self.payload() as u64).to_le_bytes());

        Ok(Frame(bytes))
    }

    pub fn decode(frame: &Frame) -> Result<Self, FrameError> {
        let tag = Tag::try_from(frame.tag_byte())?;
        let sender = frame.sender() as Rank;
        let payload = usize::try_from(frame.payload()).map_err(|_| FrameError::PayloadOverflow {
            tag,
            payload: frame.payload(),
        })?;

        Ok(match tag {
            Tag::Decider => Self::JoinNotify { sender },
            Tag::Coordinator => Self::CoordinatorAssign {
                sender,
                coordinator: payload,
            },
            Tag::Grant => Self::WriteGrant {
                sender,
                slot: payload,
            },
            Tag::Done => Self::WriteDone {
                sender,
                slot: payload,
            },
        })
    }
}
