//! HTTP relayer for anonymous snapshot voting.
//!
//! The binary wires [`ballot_core::VotingCore`] to network collaborators:
//! an EVM ledger, a holder indexer, a proving sidecar and the MPC key service.

pub mod config;
pub mod evm;
pub mod holders;
pub mod http;
pub mod mpc;
pub mod prover;
