use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Mutex,
    },
};

use alloy_primitives::{keccak256, B256};
use futures_util::future::{self, BoxFuture};
use serde::Serialize;

use crate::{field::Field, relay::EncryptedBallot};

/// Identifier of a landed ledger transaction.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TxHandle(pub String);

impl fmt::Display for TxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProposalAccount {
    pub proposal_id: u64,
    pub proposal_key: B256,
    pub merkle_root: Field,
    pub voter_count: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoteSubmission {
    pub proposal_id: u64,
    pub proposal_key: B256,
    pub nullifier_key: B256,
    pub nullifier: [u8; 32],
    pub ballot: EncryptedBallot,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settlement {
    pub proposal_id: u64,
    pub proposal_key: B256,
    pub proof: Vec<u8>,
    pub yes_votes: u64,
    pub no_votes: u64,
    pub threshold_percent: u8,
    pub quorum: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The account at this derived key was already allocated.
    #[error("account {0} already in use")]
    AccountInUse(B256),
    #[error("ledger unreachable: {0}")]
    Unavailable(String),
    #[error("transaction rejected: {0}")]
    Rejected(String),
}

/// The ledger's account-creation semantics are the only dedup mechanism:
/// `publish_root` and `submit_vote` fail with [`LedgerError::AccountInUse`]
/// when their target account already exists.
pub trait Ledger: Send + Sync {
    fn publish_root(&self, account: ProposalAccount) -> BoxFuture<'_, Result<TxHandle, LedgerError>>;

    fn submit_vote(&self, vote: VoteSubmission) -> BoxFuture<'_, Result<TxHandle, LedgerError>>;

    fn vote_count(&self, proposal_key: B256) -> BoxFuture<'_, Result<u64, LedgerError>>;

    fn finalize(&self, settlement: Settlement) -> BoxFuture<'_, Result<TxHandle, LedgerError>>;

    /// Root held by the proposal record, `None` when no record exists.
    fn proposal_root(&self, proposal_key: B256) -> BoxFuture<'_, Result<Option<Field>, LedgerError>>;

    /// Highest proposal id with a record on the ledger.
    fn highest_proposal_id(&self) -> BoxFuture<'_, Result<Option<u64>, LedgerError>>;
}

#[derive(Clone, Debug)]
enum Account {
    Proposal {
        proposal_id: u64,
        merkle_root: Field,
        votes: u64,
        finalized: bool,
    },
    Nullifier {
        proposal_key: B256,
        ballot: EncryptedBallot,
    },
}

/// An in-process ledger with single-writer account creation.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    accounts: Mutex<HashMap<B256, Account>>,
    tx_counter: AtomicU64,
    offline: AtomicBool,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn merkle_root(&self, proposal_key: B256) -> Option<Field> {
        match self.lock().get(&proposal_key) {
            Some(Account::Proposal { merkle_root, .. }) => Some(*merkle_root),
            _ => None,
        }
    }

    /// Ballot stored under a nullifier record, as `(proposal_key, ballot)`.
    pub fn ballot(&self, nullifier_key: B256) -> Option<(B256, EncryptedBallot)> {
        match self.lock().get(&nullifier_key) {
            Some(Account::Nullifier {
                proposal_key,
                ballot,
            }) => Some((*proposal_key, ballot.clone())),
            _ => None,
        }
    }

    pub fn is_finalized(&self, proposal_key: B256) -> bool {
        matches!(
            self.lock().get(&proposal_key),
            Some(Account::Proposal { finalized: true, .. })
        )
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<B256, Account>> {
        self.accounts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read<T>(&self, view: impl FnOnce(&HashMap<B256, Account>) -> T) -> Result<T, LedgerError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("memory ledger offline".into()));
        }
        Ok(view(&self.lock()))
    }

    fn transact<T>(
        &self,
        apply: impl FnOnce(&mut HashMap<B256, Account>) -> Result<T, LedgerError>,
    ) -> Result<(T, TxHandle), LedgerError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("memory ledger offline".into()));
        }
        let value = apply(&mut self.lock())?;
        let n = self.tx_counter.fetch_add(1, Ordering::SeqCst);
        let tx = TxHandle(keccak256(n.to_be_bytes()).to_string());
        Ok((value, tx))
    }

    fn apply_vote(accounts: &mut HashMap<B256, Account>, vote: VoteSubmission) -> Result<(), LedgerError> {
        if accounts.contains_key(&vote.nullifier_key) {
            return Err(LedgerError::AccountInUse(vote.nullifier_key));
        }
        match accounts.get_mut(&vote.proposal_key) {
            Some(Account::Proposal {
                votes,
                finalized: false,
                ..
            }) => *votes += 1,
            Some(_) => return Err(LedgerError::Rejected("proposal is closed".into())),
            None => return Err(LedgerError::Rejected("unknown proposal".into())),
        }
        accounts.insert(
            vote.nullifier_key,
            Account::Nullifier {
                proposal_key: vote.proposal_key,
                ballot: vote.ballot,
            },
        );
        Ok(())
    }
}

impl Ledger for MemoryLedger {
    fn publish_root(&self, account: ProposalAccount) -> BoxFuture<'_, Result<TxHandle, LedgerError>> {
        let result = self.transact(|accounts| {
            if accounts.contains_key(&account.proposal_key) {
                return Err(LedgerError::AccountInUse(account.proposal_key));
            }
            accounts.insert(
                account.proposal_key,
                Account::Proposal {
                    proposal_id: account.proposal_id,
                    merkle_root: account.merkle_root,
                    votes: 0,
                    finalized: false,
                },
            );
            Ok(())
        });
        Box::pin(future::ready(result.map(|(_, tx)| tx)))
    }

    fn submit_vote(&self, vote: VoteSubmission) -> BoxFuture<'_, Result<TxHandle, LedgerError>> {
        let result = self.transact(|accounts| Self::apply_vote(accounts, vote));
        Box::pin(future::ready(result.map(|(_, tx)| tx)))
    }

    fn vote_count(&self, proposal_key: B256) -> BoxFuture<'_, Result<u64, LedgerError>> {
        let result = self
            .read(|accounts| match accounts.get(&proposal_key) {
                Some(Account::Proposal { votes, .. }) => Ok(*votes),
                _ => Err(LedgerError::Rejected("unknown proposal".into())),
            })
            .and_then(|count| count);
        Box::pin(future::ready(result))
    }

    fn finalize(&self, settlement: Settlement) -> BoxFuture<'_, Result<TxHandle, LedgerError>> {
        let result = self.transact(|accounts| match accounts.get_mut(&settlement.proposal_key) {
            Some(Account::Proposal { finalized, .. }) if !*finalized => {
                if settlement.proof.is_empty() {
                    return Err(LedgerError::Rejected("empty proof".into()));
                }
                *finalized = true;
                Ok(())
            }
            Some(_) => Err(LedgerError::Rejected("proposal already executed".into())),
            None => Err(LedgerError::Rejected("unknown proposal".into())),
        });
        Box::pin(future::ready(result.map(|(_, tx)| tx)))
    }

    fn proposal_root(&self, proposal_key: B256) -> BoxFuture<'_, Result<Option<Field>, LedgerError>> {
        let result = self.read(|accounts| match accounts.get(&proposal_key) {
            Some(Account::Proposal { merkle_root, .. }) => Some(*merkle_root),
            _ => None,
        });
        Box::pin(future::ready(result))
    }

    fn highest_proposal_id(&self) -> BoxFuture<'_, Result<Option<u64>, LedgerError>> {
        let result = self.read(|accounts| {
            accounts
                .values()
                .filter_map(|account| match account {
                    Account::Proposal { proposal_id, .. } => Some(*proposal_id),
                    Account::Nullifier { .. } => None,
                })
                .max()
        });
        Box::pin(future::ready(result))
    }
}
