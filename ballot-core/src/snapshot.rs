//! Voter snapshots: quadratic weights committed into a fixed-depth tree.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use alloy_primitives::B256;
use serde::{Deserialize, Serialize};

use crate::{
    address::AddressDeriver,
    commitment::CommitmentBackend,
    error::Error,
    field::Field,
    ledger::{Ledger, LedgerError, ProposalAccount, TxHandle},
    lifecycle::{Lifecycle, Phase},
    readiness::Readiness,
    retry::{bounded, RetryPolicy},
    secret::{derive_secret, quadratic_weight},
    source::{BalanceSource, Holder, SourceError},
    store::SnapshotRepository,
    tree::{self, CommitmentTree},
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoterRecord {
    pub owner_id: String,
    pub balance: u64,
    pub weight: u64,
    pub secret: Field,
    pub leaf: Field,
    pub index: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalMetadata {
    #[serde(default)]
    pub title: String,
    #[serde(default, alias = "desc")]
    pub description: String,
    /// Voting window in hours.
    #[serde(default, alias = "duration", alias = "duration_hours")]
    pub duration_hours: u64,
}

#[derive(Clone, Debug)]
pub struct Snapshot {
    pub proposal_id: u64,
    pub asset_id: String,
    pub root: Field,
    pub tree: CommitmentTree,
    pub voters: HashMap<String, VoterRecord>,
    pub metadata: Option<ProposalMetadata>,
    pub created_at: u64,
}

impl Snapshot {
    pub fn voter(&self, owner_id: &str) -> Option<&VoterRecord> {
        self.voters.get(owner_id)
    }

    pub fn voter_count(&self) -> usize {
        self.voters.len()
    }

    pub fn levels(&self) -> &[Vec<Field>] {
        self.tree.levels()
    }
}

/// Input to [`SnapshotBuilder::initialize`].
#[derive(Clone, Debug, Default)]
pub struct SnapshotRequest {
    pub proposal_id: u64,
    pub asset_id: String,
    pub metadata: Option<ProposalMetadata>,
    /// Added ahead of the other holders when missing from the holder list.
    pub creator: Option<String>,
}

/// Orders, filters and truncates `holders` into the voter list for a tree of
/// `capacity` slots.
///
/// Repeated owners are merged into their first position with summed balances.
/// Holders with a zero balance are dropped before truncation, and truncation
/// keeps the supplied order.
pub fn eligible_voters(holders: Vec<Holder>, capacity: usize) -> Vec<Holder> {
    let mut positions: HashMap<String, usize> = HashMap::with_capacity(holders.len());
    let mut merged: Vec<Holder> = Vec::with_capacity(holders.len());
    for holder in holders {
        match positions.get(&holder.owner) {
            Some(&at) => merged[at].balance = merged[at].balance.saturating_add(holder.balance),
            None => {
                positions.insert(holder.owner.clone(), merged.len());
                merged.push(holder);
            }
        }
    }
    merged.retain(|holder| holder.balance > 0);
    if merged.len() > capacity {
        tracing::warn!(
            dropped = merged.len() - capacity,
            capacity,
            "voter set exceeds tree capacity, keeping the first holders"
        );
        merged.truncate(capacity);
    }
    merged
}

/// Commits `voters` into a padded tree of the given depth.
pub fn assemble(
    backend: &CommitmentBackend,
    depth: u32,
    proposal_id: u64,
    asset_id: &str,
    holders: Vec<Holder>,
) -> Result<Snapshot, Error> {
    let capacity = tree::capacity(depth)?;
    let voters = eligible_voters(holders, capacity);
    if voters.is_empty() {
        return Err(Error::EmptyVoterSet {
            asset_id: asset_id.to_string(),
        });
    }

    let mut leaves = Vec::with_capacity(capacity);
    let mut records = HashMap::with_capacity(voters.len());
    for (index, holder) in voters.into_iter().enumerate() {
        let weight = quadratic_weight(holder.balance);
        let secret = derive_secret(&holder.owner);
        let leaf = backend.commit(&secret, &Field::from(weight));
        tracing::debug!(proposal_id, index, balance = holder.balance, weight, "voter leaf");
        leaves.push(leaf);
        records.insert(
            holder.owner.clone(),
            VoterRecord {
                owner_id: holder.owner,
                balance: holder.balance,
                weight,
                secret,
                leaf,
                index,
            },
        );
    }
    leaves.resize(capacity, backend.padding_leaf());

    let tree = CommitmentTree::build(backend, leaves, depth)?;
    Ok(Snapshot {
        proposal_id,
        asset_id: asset_id.to_string(),
        root: tree.root(),
        tree,
        voters: records,
        metadata: None,
        created_at: unix_now(),
    })
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs())
}

/// Builds, stores and publishes one snapshot per proposal.
///
/// A snapshot is reserved (stored, phase `Created`) before its root is
/// published. A failed or timed-out publication leaves the reservation in
/// place, and the next `initialize` for that proposal publishes the stored
/// root again instead of rebuilding it.
pub struct SnapshotBuilder {
    backend: Arc<Readiness<CommitmentBackend>>,
    source: Arc<dyn BalanceSource>,
    store: Arc<dyn SnapshotRepository>,
    lifecycle: Arc<Lifecycle>,
    ledger: Arc<dyn Ledger>,
    address: AddressDeriver,
    depth: u32,
    read_retry: RetryPolicy,
    upstream_timeout: Duration,
    in_flight: Mutex<HashSet<u64>>,
}

/// Marks a proposal as being initialized until dropped.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<u64>>,
    proposal_id: u64,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.proposal_id);
    }
}

impl SnapshotBuilder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        backend: Arc<Readiness<CommitmentBackend>>,
        source: Arc<dyn BalanceSource>,
        store: Arc<dyn SnapshotRepository>,
        lifecycle: Arc<Lifecycle>,
        ledger: Arc<dyn Ledger>,
        address: AddressDeriver,
        depth: u32,
        upstream_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            source,
            store,
            lifecycle,
            ledger,
            address,
            depth,
            read_retry: RetryPolicy::UPSTREAM_READ,
            upstream_timeout,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Snapshots the holders of `request.asset_id`, publishes the root and
    /// opens the proposal for voting.
    pub async fn initialize(&self, request: SnapshotRequest) -> Result<Arc<Snapshot>, Error> {
        let proposal_id = request.proposal_id;
        if request.asset_id.trim().is_empty() {
            return Err(Error::Validation("voting asset is required".into()));
        }
        let _in_flight = self.claim(proposal_id)?;

        let snapshot = match (self.store.get(proposal_id), self.lifecycle.phase(proposal_id)) {
            (Some(snapshot), Some(Phase::Created)) => {
                tracing::info!(proposal_id, root = %snapshot.root, "resuming root publication");
                snapshot
            }
            (Some(_), _) => return Err(Error::SnapshotExists { proposal_id }),
            (None, _) => self.reserve(request).await?,
        };

        let tx = self.publish(&snapshot).await?;
        self.lifecycle
            .advance(proposal_id, &[Phase::Created], Phase::OpenForVoting, "open voting")?;
        tracing::info!(
            proposal_id,
            root = %snapshot.root,
            voters = snapshot.voter_count(),
            tx = tx.as_ref().map_or("already published", |tx| tx.0.as_str()),
            "snapshot open for voting"
        );
        Ok(snapshot)
    }

    fn claim(&self, proposal_id: u64) -> Result<InFlight<'_>, Error> {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !in_flight.insert(proposal_id) {
            return Err(Error::SnapshotExists { proposal_id });
        }
        Ok(InFlight {
            set: &self.in_flight,
            proposal_id,
        })
    }

    /// Builds the snapshot and stores it in phase `Created`.
    async fn reserve(&self, request: SnapshotRequest) -> Result<Arc<Snapshot>, Error> {
        let proposal_id = request.proposal_id;
        let backend = bounded(self.upstream_timeout, "commitment backend", self.backend.wait()).await?;
        let holders = self.fetch_holders(&request).await?;
        let mut snapshot = assemble(&backend, self.depth, proposal_id, &request.asset_id, holders)?;
        snapshot.metadata = request.metadata;

        if !self.store.create_if_absent(snapshot) {
            return Err(Error::SnapshotExists { proposal_id });
        }
        self.lifecycle.create(proposal_id)?;
        self.store
            .get(proposal_id)
            .ok_or_else(|| Error::NotFound(format!("snapshot for proposal {proposal_id}")))
    }

    /// Publishes the snapshot root. Returns `None` when the ledger already
    /// holds this exact root from an earlier attempt.
    async fn publish(&self, snapshot: &Snapshot) -> Result<Option<TxHandle>, Error> {
        let proposal_id = snapshot.proposal_id;
        let proposal_key = self.address.proposal_key(proposal_id);
        let account = ProposalAccount {
            proposal_id,
            proposal_key,
            merkle_root: snapshot.root,
            voter_count: snapshot.voter_count() as u32,
        };
        bounded(self.upstream_timeout, "root publication", async {
            match self.ledger.publish_root(account).await {
                Ok(tx) => Ok(Some(tx)),
                Err(LedgerError::AccountInUse(_)) => {
                    self.confirm_published(proposal_id, proposal_key, snapshot.root)
                        .await
                        .map(|()| None)
                }
                Err(LedgerError::Unavailable(reason)) => Err(Error::UpstreamUnavailable(reason)),
                Err(LedgerError::Rejected(reason)) => {
                    Err(Error::Validation(format!("ledger rejected proposal: {reason}")))
                }
            }
        })
        .await
    }

    async fn confirm_published(
        &self,
        proposal_id: u64,
        proposal_key: B256,
        root: Field,
    ) -> Result<(), Error> {
        match self.ledger.proposal_root(proposal_key).await {
            Ok(Some(published)) if published == root => {
                tracing::debug!(proposal_id, %root, "root already on the ledger");
                Ok(())
            }
            Ok(published) => {
                tracing::warn!(
                    proposal_id,
                    %root,
                    published = ?published,
                    "ledger holds a different proposal record"
                );
                Err(Error::SnapshotExists { proposal_id })
            }
            Err(err) => Err(Error::UpstreamUnavailable(err.to_string())),
        }
    }

    async fn fetch_holders(&self, request: &SnapshotRequest) -> Result<Vec<Holder>, Error> {
        let asset = request.asset_id.as_str();
        let mut holders = self
            .read_source("holder list", || self.source.list_holders(asset))
            .await?;

        if let Some(creator) = request.creator.as_deref() {
            if !holders.iter().any(|h| h.owner == creator) {
                let balance = self
                    .read_source("creator balance", || self.source.balance_of(asset, creator))
                    .await?;
                if balance > 0 {
                    tracing::debug!(proposal_id = request.proposal_id, balance, "adding creator");
                    holders.insert(0, Holder::new(creator, balance));
                }
            }
        }
        Ok(holders)
    }

    async fn read_source<'a, T, F>(&self, what: &'static str, op: F) -> Result<T, Error>
    where
        F: FnMut() -> futures_util::future::BoxFuture<'a, Result<T, SourceError>>,
    {
        let read = async {
            self.read_retry
                .run(what, op, SourceError::is_transient)
                .await
                .map_err(|(err, attempts)| match err {
                    SourceError::UnknownAsset(asset) => Error::NotFound(format!("asset {asset}")),
                    other => Error::UpstreamUnavailable(format!("{what} after {attempts} attempts: {other}")),
                })
        };
        bounded(self.upstream_timeout, what, read).await
    }
}
