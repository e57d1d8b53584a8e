//! Eligibility snapshots and exactly-once vote relay for anonymous,
//! quadratically weighted voting.

pub mod address;
pub mod commitment;
pub mod error;
pub mod field;
pub mod keys;
pub mod ledger;
pub mod lifecycle;
pub mod proof;
pub mod readiness;
pub mod relay;
pub mod retry;
pub mod secret;
pub mod snapshot;
pub mod source;
pub mod store;
pub mod tally;
pub mod tree;
mod voting;

pub use error::{Error, Result};
pub use field::Field;
pub use voting::{Collaborators, CoreConfig, Eligibility, ProposalSummary, VotingCore};
