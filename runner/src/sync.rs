pub mod backoff;
pub mod coordinator;
pub mod election;

#[cfg(test)]
mod coordinator_test;

pub use backoff::{Backoff, BackoffConfig};
pub use coordinator::{Grant, GrantPolicy, TokenCoordinator};
pub use election::{Election, Role, RoleResolver};
