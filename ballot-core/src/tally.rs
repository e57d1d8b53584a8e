//! Tally attestation.
//!
//! The attestor proves a threshold condition over totals it is handed. It does
//! not check those totals against the encrypted ballots on the ledger; binding
//! them to the decrypted aggregate belongs to the MPC decryption service.

use std::{sync::Arc, time::Duration};

use futures_util::future::BoxFuture;
use serde::Serialize;

use crate::{
    address::AddressDeriver,
    error::Error,
    ledger::{Ledger, LedgerError, Settlement, TxHandle},
    lifecycle::{Attestation, Lifecycle, Phase},
    retry::bounded,
    store::SnapshotRepository,
};

/// Inputs of the external tally circuit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TallyWitness {
    pub yes_votes: u64,
    pub no_votes: u64,
    pub majority_threshold_percent: u8,
    pub quorum_requirement: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ProverError {
    #[error("witness does not satisfy the circuit: {0}")]
    Unsatisfied(String),
    #[error("prover unreachable: {0}")]
    Unavailable(String),
}

pub trait TallyProver: Send + Sync {
    /// Proves the tally circuit and returns the proof bytes as produced.
    fn prove_tally(
        &self,
        proposal_id: u64,
        witness: TallyWitness,
    ) -> BoxFuture<'_, Result<Vec<u8>, ProverError>>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TallyRequest {
    pub proposal_id: u64,
    pub yes_votes: u64,
    pub no_votes: u64,
    pub threshold_percent: u8,
    pub quorum: u64,
}

pub struct TallyAttestor {
    prover: Arc<dyn TallyProver>,
    ledger: Arc<dyn Ledger>,
    store: Arc<dyn SnapshotRepository>,
    lifecycle: Arc<Lifecycle>,
    address: AddressDeriver,
    upstream_timeout: Duration,
}

impl TallyAttestor {
    pub fn new(
        prover: Arc<dyn TallyProver>,
        ledger: Arc<dyn Ledger>,
        store: Arc<dyn SnapshotRepository>,
        lifecycle: Arc<Lifecycle>,
        address: AddressDeriver,
        upstream_timeout: Duration,
    ) -> Self {
        Self {
            prover,
            ledger,
            store,
            lifecycle,
            address,
            upstream_timeout,
        }
    }

    /// Closes voting and proves the threshold condition over the supplied
    /// totals. A failed proof leaves the proposal awaiting tally, so the
    /// request may be repeated.
    pub async fn attest(&self, request: TallyRequest) -> Result<Attestation, Error> {
        let proposal_id = request.proposal_id;
        if request.threshold_percent > 100 {
            return Err(Error::Validation(format!(
                "threshold must be a percentage, got {}",
                request.threshold_percent
            )));
        }
        request
            .yes_votes
            .checked_add(request.no_votes)
            .ok_or_else(|| Error::Validation("vote totals overflow".into()))?;
        if self.store.get(proposal_id).is_none() {
            return Err(Error::NotFound(format!("snapshot for proposal {proposal_id}")));
        }
        self.lifecycle.advance(
            proposal_id,
            &[Phase::OpenForVoting, Phase::TallyRequested],
            Phase::TallyRequested,
            "request a tally",
        )?;

        let witness = TallyWitness {
            yes_votes: request.yes_votes,
            no_votes: request.no_votes,
            majority_threshold_percent: request.threshold_percent,
            quorum_requirement: request.quorum,
        };
        tracing::info!(proposal_id, ?witness, "proving tally");
        let proof = bounded(self.upstream_timeout, "tally proof", async {
            self.prover
                .prove_tally(proposal_id, witness)
                .await
                .map_err(|err| match err {
                    ProverError::Unsatisfied(reason) => Error::Validation(reason),
                    ProverError::Unavailable(reason) => Error::UpstreamUnavailable(reason),
                })
        })
        .await
        .inspect_err(|err| tracing::warn!(proposal_id, %err, "tally not attested"))?;

        let attestation = Attestation {
            yes_votes: request.yes_votes,
            no_votes: request.no_votes,
            threshold_percent: request.threshold_percent,
            quorum: request.quorum,
            proof,
        };
        self.lifecycle
            .record_attestation(proposal_id, attestation.clone())?;
        tracing::info!(proposal_id, proof_len = attestation.proof.len(), "tally attested");
        Ok(attestation)
    }

    /// Submits the recorded attestation for execution on the ledger.
    pub async fn finalize(&self, proposal_id: u64) -> Result<TxHandle, Error> {
        let status = self
            .lifecycle
            .status(proposal_id)
            .ok_or_else(|| Error::NotFound(format!("proposal {proposal_id}")))?;
        let attestation = match (status.phase, status.attestation) {
            (Phase::Attested, Some(attestation)) => attestation,
            (phase, _) => {
                return Err(Error::InvalidState {
                    proposal_id,
                    phase,
                    action: "finalize",
                })
            }
        };

        let settlement = Settlement {
            proposal_id,
            proposal_key: self.address.proposal_key(proposal_id),
            proof: attestation.proof,
            yes_votes: attestation.yes_votes,
            no_votes: attestation.no_votes,
            threshold_percent: attestation.threshold_percent,
            quorum: attestation.quorum,
        };
        let tx = bounded(self.upstream_timeout, "settlement transaction", async {
            self.ledger.finalize(settlement).await.map_err(|err| match err {
                LedgerError::Unavailable(reason) => Error::UpstreamUnavailable(reason),
                other => Error::Validation(format!("ledger rejected settlement: {other}")),
            })
        })
        .await?;

        self.lifecycle.record_settlement(proposal_id, tx.0.clone())?;
        tracing::info!(proposal_id, %tx, "proposal finalized");
        Ok(tx)
    }
}
