use std::{sync::Arc, time::Duration};

use alloy_primitives::Address;
use serde::Serialize;

use crate::{
    address::AddressDeriver,
    commitment::CommitmentBackend,
    error::Error,
    field::Field,
    ledger::Ledger,
    lifecycle::{Lifecycle, Phase},
    proof::ProofService,
    readiness::Readiness,
    relay::VoteRelay,
    retry::bounded,
    snapshot::{ProposalMetadata, SnapshotBuilder},
    source::BalanceSource,
    store::{self, MemorySnapshots, SnapshotRepository},
    tally::{TallyAttestor, TallyProver},
};

#[derive(Clone, Debug)]
pub struct CoreConfig {
    pub tree_depth: u32,
    pub upstream_timeout: Duration,
    pub first_proposal_id: u64,
    /// Address of the voting contract; scopes every derived record key.
    pub domain: Address,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            tree_depth: 3,
            upstream_timeout: Duration::from_secs(60),
            first_proposal_id: 1,
            domain: Address::ZERO,
        }
    }
}

pub struct Collaborators {
    pub source: Arc<dyn BalanceSource>,
    pub ledger: Arc<dyn Ledger>,
    pub prover: Arc<dyn TallyProver>,
}

/// Public view of a stored proposal. Never includes voter secrets.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalSummary {
    pub proposal_id: u64,
    pub asset_id: String,
    pub root: Field,
    pub count: usize,
    pub phase: Option<Phase>,
    pub metadata: Option<ProposalMetadata>,
    pub created_at: u64,
}

/// One proposal an owner may vote on, with their weight in it.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Eligibility {
    pub proposal_id: u64,
    pub root: Field,
    pub weight: u64,
    pub balance: u64,
    pub metadata: Option<ProposalMetadata>,
    pub created_at: u64,
}

/// All components wired over one snapshot store and lifecycle.
pub struct VotingCore {
    pub snapshots: SnapshotBuilder,
    pub proofs: ProofService,
    pub relay: VoteRelay,
    pub tally: TallyAttestor,
    pub store: Arc<dyn SnapshotRepository>,
    pub lifecycle: Arc<Lifecycle>,
    pub backend: Arc<Readiness<CommitmentBackend>>,
    pub address: AddressDeriver,
    ledger: Arc<dyn Ledger>,
    first_proposal_id: u64,
    upstream_timeout: Duration,
}

impl VotingCore {
    pub fn new(
        config: &CoreConfig,
        backend: Arc<Readiness<CommitmentBackend>>,
        collaborators: Collaborators,
    ) -> Self {
        let store: Arc<dyn SnapshotRepository> = Arc::new(MemorySnapshots::new());
        let lifecycle = Arc::new(Lifecycle::new());
        let address = AddressDeriver::new(config.domain);
        let Collaborators {
            source,
            ledger,
            prover,
        } = collaborators;

        Self {
            snapshots: SnapshotBuilder::new(
                Arc::clone(&backend),
                source,
                Arc::clone(&store),
                Arc::clone(&lifecycle),
                Arc::clone(&ledger),
                address,
                config.tree_depth,
                config.upstream_timeout,
            ),
            proofs: ProofService::new(Arc::clone(&store), Arc::clone(&lifecycle)),
            relay: VoteRelay::new(
                Arc::clone(&ledger),
                Arc::clone(&store),
                Arc::clone(&lifecycle),
                address,
                config.upstream_timeout,
            ),
            tally: TallyAttestor::new(
                prover,
                Arc::clone(&ledger),
                Arc::clone(&store),
                Arc::clone(&lifecycle),
                address,
                config.upstream_timeout,
            ),
            store,
            lifecycle,
            backend,
            address,
            ledger,
            first_proposal_id: config.first_proposal_id,
            upstream_timeout: config.upstream_timeout,
        }
    }

    /// One past the highest id known locally or on the ledger. Falls back to
    /// local snapshots when the ledger cannot be read.
    pub async fn next_proposal_id(&self) -> u64 {
        let local = store::next_proposal_id(self.store.as_ref(), self.first_proposal_id);
        let on_ledger = bounded(self.upstream_timeout, "highest proposal id", async {
            self.ledger
                .highest_proposal_id()
                .await
                .map_err(|err| Error::UpstreamUnavailable(err.to_string()))
        })
        .await;
        match on_ledger {
            Ok(Some(highest)) => local.max(highest.saturating_add(1)),
            Ok(None) => local,
            Err(err) => {
                tracing::warn!(%err, "using local proposal ids only");
                local
            }
        }
    }

    /// Every stored proposal, newest first.
    pub fn proposals(&self) -> Vec<ProposalSummary> {
        let mut ids = self.store.proposal_ids();
        ids.reverse();
        ids.into_iter().filter_map(|id| self.proposal(id)).collect()
    }

    /// Published proposals whose snapshot includes `owner_id`, newest first.
    pub fn eligibility(&self, owner_id: &str) -> Vec<Eligibility> {
        let mut ids = self.store.proposal_ids();
        ids.reverse();
        ids.into_iter()
            .filter(|&id| !matches!(self.lifecycle.phase(id), None | Some(Phase::Created)))
            .filter_map(|id| {
                let snapshot = self.store.get(id)?;
                let voter = snapshot.voter(owner_id)?;
                Some(Eligibility {
                    proposal_id: id,
                    root: snapshot.root,
                    weight: voter.weight,
                    balance: voter.balance,
                    metadata: snapshot.metadata.clone(),
                    created_at: snapshot.created_at,
                })
            })
            .collect()
    }

    pub fn proposal(&self, proposal_id: u64) -> Option<ProposalSummary> {
        let snapshot = self.store.get(proposal_id)?;
        Some(ProposalSummary {
            proposal_id,
            asset_id: snapshot.asset_id.clone(),
            root: snapshot.root,
            count: snapshot.voter_count(),
            phase: self.lifecycle.phase(proposal_id),
            metadata: snapshot.metadata.clone(),
            created_at: snapshot.created_at,
        })
    }
}
