use std::time::Duration;

use alloy::{
    contract::{Error as ContractError, SolCallBuilder},
    network::ReceiptResponse,
    primitives::{Address, Bytes, B256},
    providers::{DynProvider, Provider, ProviderBuilder},
    signers::local::PrivateKeySigner,
    sol,
    sol_types::SolCall,
};
use ballot_core::{
    ledger::{Ledger, LedgerError, ProposalAccount, Settlement, TxHandle, VoteSubmission},
    Field,
};
use futures_util::future::BoxFuture;
use url::Url;

/// Timeout for transactions to be confirmed.
pub const TX_TIMEOUT: Duration = Duration::from_secs(45);

sol! {
    /// Voting contract holding one record per proposal key and per nullifier key.
    #[sol(rpc)]
    interface ISnapshotVoting {
        error AccountInUse(bytes32 key);

        function initializeProposal(uint64 proposalId, bytes32 proposalKey, bytes32 merkleRoot, uint32 voterCount) external;
        function submitVote(bytes32 proposalKey, bytes32 nullifierKey, bytes32 nullifier, bytes ciphertext, bytes32 ephemeralKey, uint128 nonce) external;
        function voteCount(bytes32 proposalKey) external view returns (uint64);
        function finalizeProposal(bytes32 proposalKey, bytes proof, uint64 yesVotes, uint64 noVotes, uint8 thresholdPercent, uint64 quorum) external;
        function isAllocated(bytes32 key) external view returns (bool);
        function proposalRoot(bytes32 proposalKey) external view returns (bytes32);
        function highestProposalId() external view returns (uint64);
    }
}

/// [`Ledger`] backed by the voting contract, signing with the operator key.
pub struct EvmLedger {
    contract: ISnapshotVoting::ISnapshotVotingInstance<DynProvider>,
}

impl EvmLedger {
    pub fn connect(rpc_url: Url, signer: PrivateKeySigner, contract: Address) -> Self {
        tracing::info!(operator = %signer.address(), %contract, "connecting EVM ledger");
        let provider = ProviderBuilder::new()
            .wallet(signer)
            .connect_http(rpc_url)
            .erased();
        Self::with_provider(provider, contract)
    }

    pub fn with_provider(provider: DynProvider, contract: Address) -> Self {
        Self {
            contract: ISnapshotVoting::new(contract, provider),
        }
    }

    /// Sends `call` and waits for its receipt. `creates` names the account the
    /// call allocates, so a revert caused by a racing writer is reported as
    /// [`LedgerError::AccountInUse`].
    async fn send<C: SolCall>(
        &self,
        what: &'static str,
        creates: Option<B256>,
        call: SolCallBuilder<&DynProvider, C>,
    ) -> Result<TxHandle, LedgerError> {
        let pending = call.send().await.map_err(classify)?;
        tracing::debug!(what, tx = %pending.tx_hash(), "broadcast transaction");
        let receipt = pending
            .with_timeout(Some(TX_TIMEOUT))
            .get_receipt()
            .await
            .map_err(|err| LedgerError::Unavailable(format!("{what}: {err}")))?;
        let tx = TxHandle(receipt.transaction_hash().to_string());
        if !receipt.status() {
            return Err(self.explain_revert(what, creates, tx).await);
        }
        tracing::info!(what, %tx, "transaction confirmed");
        Ok(tx)
    }

    /// A mined revert carries no reason. When the call allocates an account
    /// and that account now exists, another writer got there first.
    pub async fn explain_revert(
        &self,
        what: &'static str,
        creates: Option<B256>,
        tx: TxHandle,
    ) -> LedgerError {
        if let Some(key) = creates {
            match self.contract.isAllocated(key).call().await {
                Ok(true) => {
                    tracing::warn!(what, %tx, %key, "reverted on an allocated account");
                    return LedgerError::AccountInUse(key);
                }
                Ok(false) => {}
                Err(err) => tracing::warn!(what, %tx, %err, "could not inspect revert"),
            }
        }
        LedgerError::Rejected(format!("{what} reverted in {tx}"))
    }
}

fn classify(err: ContractError) -> LedgerError {
    if let Some(ISnapshotVoting::AccountInUse { key }) =
        err.as_decoded_error::<ISnapshotVoting::AccountInUse>()
    {
        return LedgerError::AccountInUse(key);
    }
    match &err {
        ContractError::TransportError(transport) if !transport.is_error_resp() => {
            LedgerError::Unavailable(err.to_string())
        }
        _ => LedgerError::Rejected(err.to_string()),
    }
}

impl Ledger for EvmLedger {
    fn publish_root(&self, account: ProposalAccount) -> BoxFuture<'_, Result<TxHandle, LedgerError>> {
        Box::pin(async move {
            let call = self.contract.initializeProposal(
                account.proposal_id,
                account.proposal_key,
                account.merkle_root.to_word(),
                account.voter_count,
            );
            self.send("initializeProposal", Some(account.proposal_key), call).await
        })
    }

    fn submit_vote(&self, vote: VoteSubmission) -> BoxFuture<'_, Result<TxHandle, LedgerError>> {
        Box::pin(async move {
            let call = self.contract.submitVote(
                vote.proposal_key,
                vote.nullifier_key,
                B256::from(vote.nullifier),
                Bytes::from(vote.ballot.ciphertext),
                B256::from(vote.ballot.ephemeral_public_key),
                u128::from_le_bytes(vote.ballot.nonce),
            );
            self.send("submitVote", Some(vote.nullifier_key), call).await
        })
    }

    fn vote_count(&self, proposal_key: B256) -> BoxFuture<'_, Result<u64, LedgerError>> {
        Box::pin(async move {
            self.contract
                .voteCount(proposal_key)
                .call()
                .await
                .map_err(classify)
        })
    }

    fn finalize(&self, settlement: Settlement) -> BoxFuture<'_, Result<TxHandle, LedgerError>> {
        Box::pin(async move {
            let call = self.contract.finalizeProposal(
                settlement.proposal_key,
                Bytes::from(settlement.proof),
                settlement.yes_votes,
                settlement.no_votes,
                settlement.threshold_percent,
                settlement.quorum,
            );
            self.send("finalizeProposal", None, call).await
        })
    }

    fn proposal_root(&self, proposal_key: B256) -> BoxFuture<'_, Result<Option<Field>, LedgerError>> {
        Box::pin(async move {
            let root = self
                .contract
                .proposalRoot(proposal_key)
                .call()
                .await
                .map_err(classify)?;
            Ok((root != B256::ZERO).then(|| Field::from_word(root)))
        })
    }

    fn highest_proposal_id(&self) -> BoxFuture<'_, Result<Option<u64>, LedgerError>> {
        Box::pin(async move {
            let highest = self
                .contract
                .highestProposalId()
                .call()
                .await
                .map_err(classify)?;
            Ok((highest != 0).then_some(highest))
        })
    }
}
