#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use alloy_primitives::{Address, B256};
use ballot_core::{
    commitment::CommitmentBackend,
    ledger::{Ledger, LedgerError, MemoryLedger, ProposalAccount, Settlement, TxHandle, VoteSubmission},
    readiness::Readiness,
    relay::RelayRequest,
    snapshot::SnapshotRequest,
    source::{Holder, MemoryBalanceSource},
    tally::{ProverError, TallyProver, TallyWitness},
    Collaborators, CoreConfig, Field, VotingCore,
};
use futures_util::future::{self, BoxFuture};

pub const MINT: &str = "VoteMint1111111111111111111111111111111111";

pub fn scenario_holders() -> Vec<Holder> {
    vec![
        Holder::new("A", 100),
        Holder::new("B", 1000),
        Holder::new("C", 75),
        Holder::new("D", 10),
    ]
}

/// Accepts a tally when quorum and the majority threshold hold.
pub struct ThresholdProver;

impl TallyProver for ThresholdProver {
    fn prove_tally(
        &self,
        proposal_id: u64,
        witness: TallyWitness,
    ) -> BoxFuture<'_, Result<Vec<u8>, ProverError>> {
        let total = witness.yes_votes + witness.no_votes;
        let passes = total >= witness.quorum_requirement
            && witness.yes_votes * 100 >= total * u64::from(witness.majority_threshold_percent);
        let result = if passes {
            Ok(format!("tally:{proposal_id}:{}:{}", witness.yes_votes, witness.no_votes).into_bytes())
        } else {
            Err(ProverError::Unsatisfied("majority not met".into()))
        };
        Box::pin(future::ready(result))
    }
}

/// Delays vote submission, for timeout tests.
pub struct SlowLedger {
    pub inner: Arc<MemoryLedger>,
    pub delay: Duration,
}

impl Ledger for SlowLedger {
    fn publish_root(&self, account: ProposalAccount) -> BoxFuture<'_, Result<TxHandle, LedgerError>> {
        self.inner.publish_root(account)
    }

    fn submit_vote(&self, vote: VoteSubmission) -> BoxFuture<'_, Result<TxHandle, LedgerError>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            self.inner.submit_vote(vote).await
        })
    }

    fn vote_count(&self, proposal_key: B256) -> BoxFuture<'_, Result<u64, LedgerError>> {
        self.inner.vote_count(proposal_key)
    }

    fn finalize(&self, settlement: Settlement) -> BoxFuture<'_, Result<TxHandle, LedgerError>> {
        self.inner.finalize(settlement)
    }

    fn proposal_root(&self, proposal_key: B256) -> BoxFuture<'_, Result<Option<Field>, LedgerError>> {
        self.inner.proposal_root(proposal_key)
    }

    fn highest_proposal_id(&self) -> BoxFuture<'_, Result<Option<u64>, LedgerError>> {
        self.inner.highest_proposal_id()
    }
}

/// Lands every new proposal record, then stalls before confirming it.
pub struct UnconfirmedLedger {
    pub inner: Arc<MemoryLedger>,
    pub delay: Duration,
}

impl Ledger for UnconfirmedLedger {
    fn publish_root(&self, account: ProposalAccount) -> BoxFuture<'_, Result<TxHandle, LedgerError>> {
        Box::pin(async move {
            let tx = self.inner.publish_root(account).await?;
            tokio::time::sleep(self.delay).await;
            Ok(tx)
        })
    }

    fn submit_vote(&self, vote: VoteSubmission) -> BoxFuture<'_, Result<TxHandle, LedgerError>> {
        self.inner.submit_vote(vote)
    }

    fn vote_count(&self, proposal_key: B256) -> BoxFuture<'_, Result<u64, LedgerError>> {
        self.inner.vote_count(proposal_key)
    }

    fn finalize(&self, settlement: Settlement) -> BoxFuture<'_, Result<TxHandle, LedgerError>> {
        self.inner.finalize(settlement)
    }

    fn proposal_root(&self, proposal_key: B256) -> BoxFuture<'_, Result<Option<Field>, LedgerError>> {
        self.inner.proposal_root(proposal_key)
    }

    fn highest_proposal_id(&self) -> BoxFuture<'_, Result<Option<u64>, LedgerError>> {
        self.inner.highest_proposal_id()
    }
}

pub struct Harness {
    pub core: Arc<VotingCore>,
    pub ledger: Arc<MemoryLedger>,
}

pub fn config() -> CoreConfig {
    CoreConfig {
        domain: Address::repeat_byte(0x42),
        upstream_timeout: Duration::from_secs(5),
        ..CoreConfig::default()
    }
}

pub fn harness(holders: Vec<Holder>) -> Harness {
    harness_with(MemoryBalanceSource::new().with_asset(MINT, holders), config())
}

pub fn harness_with(source: MemoryBalanceSource, config: CoreConfig) -> Harness {
    let ledger = Arc::new(MemoryLedger::new());
    let core = core_over(source, ledger.clone(), config);
    Harness {
        core: Arc::new(core),
        ledger,
    }
}

/// A core over `source` that talks to `ledger`.
pub fn core_over(source: MemoryBalanceSource, ledger: Arc<dyn Ledger>, config: CoreConfig) -> VotingCore {
    VotingCore::new(
        &config,
        Arc::new(Readiness::ready("commitment", CommitmentBackend::default())),
        Collaborators {
            source: Arc::new(source),
            ledger,
            prover: Arc::new(ThresholdProver),
        },
    )
}

pub fn request(proposal_id: u64) -> SnapshotRequest {
    SnapshotRequest {
        proposal_id,
        asset_id: MINT.to_string(),
        ..SnapshotRequest::default()
    }
}

pub fn vote(proposal_id: u64, nullifier: u8) -> RelayRequest {
    RelayRequest {
        proposal_id,
        nullifier: vec![nullifier; 32],
        ciphertext: vec![0xc1; 64],
        ephemeral_public_key: vec![0xe1; 32],
        nonce: vec![0x01; 16],
    }
}
