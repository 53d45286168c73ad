//! Bounded fan-out parallel output.
//!
//! `P` ranks write their payloads into exactly `N` files. The first member of
//! every slot writes straight away, a decider elects one of them as the
//! coordinator, and the coordinator hands freed slots to the remaining ranks
//! one grant at a time, so at most `N` files are ever open and no two ranks
//! append to the same file at once.

pub mod config;
pub mod executors;
pub mod message;
pub mod round;
pub mod session;
pub mod sync;
pub mod topology;
pub mod transport;

#[cfg(test)]
mod message_test;
#[cfg(test)]
mod session_test;
#[cfg(test)]
mod topology_test;

pub use config::{ConfigErrors, RoundConfig};
pub use executors::{rank_payload, ExecutorError, Executors, RoundSummary};
pub use round::{RankReport, Round, RoundError};
pub use topology::{Rank, SlotId, Topology};
