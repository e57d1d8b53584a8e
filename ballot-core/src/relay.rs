//! Exactly-once vote relay.
//!
//! The relay never inspects ballots and keeps no record of its own. Dedup is
//! delegated to the ledger: each vote creates the nullifier record account at
//! a key derived from `(proposal, nullifier)`, and that creation fails if the
//! account already exists. Two concurrent relays of one nullifier therefore
//! race safely at the ledger; one lands, the other sees `DuplicateVote`.

use std::{sync::Arc, time::Duration};

use alloy_primitives::B256;

use crate::{
    address::AddressDeriver,
    error::Error,
    ledger::{Ledger, LedgerError, TxHandle, VoteSubmission},
    lifecycle::{Lifecycle, Phase},
    retry::bounded,
    store::SnapshotRepository,
};

pub const NULLIFIER_LEN: usize = 32;
pub const EPHEMERAL_KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 16;
pub const MAX_CIPHERTEXT_LEN: usize = 200;

/// A ballot encrypted under the threshold key, carried opaquely.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptedBallot {
    pub ciphertext: Vec<u8>,
    pub ephemeral_public_key: [u8; EPHEMERAL_KEY_LEN],
    pub nonce: [u8; NONCE_LEN],
}

impl std::fmt::Debug for EncryptedBallot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedBallot")
            .field("ciphertext_len", &self.ciphertext.len())
            .finish_non_exhaustive()
    }
}

/// Raw relay input as it arrives from a client.
#[derive(Clone, Debug, Default)]
pub struct RelayRequest {
    pub proposal_id: u64,
    pub nullifier: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub ephemeral_public_key: Vec<u8>,
    pub nonce: Vec<u8>,
}

impl RelayRequest {
    pub fn validate(self) -> Result<([u8; NULLIFIER_LEN], EncryptedBallot), Error> {
        let nullifier = fixed::<NULLIFIER_LEN>("nullifier", &self.nullifier)?;
        let ephemeral_public_key = fixed::<EPHEMERAL_KEY_LEN>("pubkey", &self.ephemeral_public_key)?;
        let nonce = fixed::<NONCE_LEN>("nonce", &self.nonce)?;
        if self.ciphertext.is_empty() || self.ciphertext.len() > MAX_CIPHERTEXT_LEN {
            return Err(Error::Validation(format!(
                "ciphertext must be 1..={MAX_CIPHERTEXT_LEN} bytes, got {}",
                self.ciphertext.len()
            )));
        }
        Ok((
            nullifier,
            EncryptedBallot {
                ciphertext: self.ciphertext,
                ephemeral_public_key,
                nonce,
            },
        ))
    }
}

fn fixed<const N: usize>(name: &str, bytes: &[u8]) -> Result<[u8; N], Error> {
    bytes
        .try_into()
        .map_err(|_| Error::Validation(format!("{name} must be {N} bytes, got {}", bytes.len())))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayReceipt {
    pub tx: TxHandle,
    pub nullifier_key: B256,
}

pub struct VoteRelay {
    ledger: Arc<dyn Ledger>,
    store: Arc<dyn SnapshotRepository>,
    lifecycle: Arc<Lifecycle>,
    address: AddressDeriver,
    upstream_timeout: Duration,
}

impl VoteRelay {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        store: Arc<dyn SnapshotRepository>,
        lifecycle: Arc<Lifecycle>,
        address: AddressDeriver,
        upstream_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            store,
            lifecycle,
            address,
            upstream_timeout,
        }
    }

    /// Submits one vote. Never retried here: a caller retry of a vote that
    /// already landed resolves to `DuplicateVote`.
    pub async fn relay_vote(&self, request: RelayRequest) -> Result<RelayReceipt, Error> {
        let proposal_id = request.proposal_id;
        let (nullifier, ballot) = request.validate()?;
        if self.store.get(proposal_id).is_none() {
            return Err(Error::NotFound(format!("snapshot for proposal {proposal_id}")));
        }
        self.lifecycle
            .require(proposal_id, &[Phase::OpenForVoting], "accept votes")?;

        let short = short_hex(&nullifier);
        let submission = VoteSubmission {
            proposal_id,
            proposal_key: self.address.proposal_key(proposal_id),
            nullifier_key: self.address.nullifier_key(proposal_id, &nullifier),
            nullifier,
            ballot,
        };
        let nullifier_key = submission.nullifier_key;
        tracing::debug!(
            proposal_id,
            nullifier = %short,
            ciphertext_len = submission.ballot.ciphertext.len(),
            "relaying vote"
        );

        let tx = bounded(self.upstream_timeout, "vote transaction", async {
            self.ledger
                .submit_vote(submission)
                .await
                .map_err(|err| match err {
                    LedgerError::AccountInUse(_) => Error::DuplicateVote {
                        proposal_id,
                        nullifier: short.clone(),
                    },
                    LedgerError::Unavailable(reason) => Error::UpstreamUnavailable(reason),
                    LedgerError::Rejected(reason) => {
                        Error::Validation(format!("ledger rejected vote: {reason}"))
                    }
                })
        })
        .await
        .inspect_err(|err| tracing::warn!(proposal_id, nullifier = %short, %err, "vote not relayed"))?;

        tracing::info!(proposal_id, nullifier = %short, %tx, "vote relayed");
        Ok(RelayReceipt { tx, nullifier_key })
    }

    /// Votes recorded on the ledger for `proposal_id`.
    pub async fn vote_count(&self, proposal_id: u64) -> Result<u64, Error> {
        if self.store.get(proposal_id).is_none() {
            return Err(Error::NotFound(format!("snapshot for proposal {proposal_id}")));
        }
        let key = self.address.proposal_key(proposal_id);
        bounded(self.upstream_timeout, "vote count", async {
            self.ledger.vote_count(key).await.map_err(|err| match err {
                LedgerError::Rejected(reason) => Error::NotFound(reason),
                other => Error::UpstreamUnavailable(other.to_string()),
            })
        })
        .await
    }
}

fn short_hex(bytes: &[u8]) -> String {
    hex::encode(&bytes[..bytes.len().min(5)])
}
