use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use alloy::{primitives::Address, signers::local::PrivateKeySigner};
use anyhow::{bail, Context, Result};
use ballot_core::{
    keys::KeyRetriever,
    ledger::{Ledger, MemoryLedger},
    retry::RetryPolicy,
    source::BalanceSource,
    tally::TallyProver,
    tree::MAX_DEPTH,
    Collaborators, CoreConfig,
};
use clap::{Parser, ValueEnum};
use url::Url;

use crate::{
    evm::EvmLedger,
    holders::{FileBalanceSource, IndexerBalanceSource},
    mpc::RpcKeyService,
    prover::{RpcTallyProver, UnconfiguredProver},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LedgerBackend {
    /// In-process ledger; state is lost on restart.
    Memory,
    /// The voting contract on an EVM chain.
    Evm,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum HolderBackend {
    File,
    Indexer,
}

/// Arguments of the relayer command.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// Address the HTTP API listens on.
    #[clap(long, env, default_value = "127.0.0.1:3000")]
    pub listen: SocketAddr,
    #[clap(long, env, value_enum, default_value_t = LedgerBackend::Memory)]
    pub ledger: LedgerBackend,
    /// URL of the Ethereum RPC endpoint.
    #[clap(short, long, env)]
    pub rpc_url: Option<Url>,
    /// Operator key paying for relayed transactions.
    #[clap(long, env)]
    pub private_key: Option<PrivateKeySigner>,
    /// Address of the voting contract. Also scopes every derived record key.
    #[clap(short, long, env)]
    pub voting_contract_address: Option<Address>,
    #[clap(long, env, value_enum, default_value_t = HolderBackend::File)]
    pub holders: HolderBackend,
    #[clap(long, env, default_value = "holders.json")]
    pub holders_file: PathBuf,
    /// JSON-RPC endpoint serving `getTokenAccounts`.
    #[clap(long, env)]
    pub indexer_url: Option<Url>,
    /// Pages of 1000 accounts read per snapshot before the list is cut off.
    #[clap(long, env, default_value_t = 10)]
    pub indexer_max_pages: u32,
    #[clap(long, env)]
    pub prover_url: Option<Url>,
    #[clap(long, env)]
    pub mpc_url: Option<Url>,
    #[clap(long, env, default_value = "default")]
    pub mpc_deployment: String,
    #[clap(long, env, default_value_t = 3)]
    pub tree_depth: u32,
    #[clap(long, env, default_value_t = 60)]
    pub upstream_timeout_secs: u64,
    /// Id handed out by `/next-proposal-id` while no snapshot exists.
    #[clap(long, env, default_value_t = 1)]
    pub first_proposal_id: u64,
    #[clap(long, env, default_value_t = 30)]
    pub keygen_attempts: u32,
    #[clap(long, env, default_value_t = 5)]
    pub keygen_backoff_secs: u64,
}

impl Args {
    pub fn core_config(&self) -> Result<CoreConfig> {
        if self.tree_depth == 0 || self.tree_depth > MAX_DEPTH {
            bail!("--tree-depth must be within 1..={MAX_DEPTH}");
        }
        if self.upstream_timeout_secs == 0 {
            bail!("--upstream-timeout-secs must be positive");
        }
        Ok(CoreConfig {
            tree_depth: self.tree_depth,
            upstream_timeout: Duration::from_secs(self.upstream_timeout_secs),
            first_proposal_id: self.first_proposal_id,
            domain: self.voting_contract_address.unwrap_or(Address::ZERO),
        })
    }

    pub fn collaborators(&self) -> Result<Collaborators> {
        Ok(Collaborators {
            source: self.balance_source()?,
            ledger: self.ledger()?,
            prover: self.prover(),
        })
    }

    fn ledger(&self) -> Result<Arc<dyn Ledger>> {
        Ok(match self.ledger {
            LedgerBackend::Memory => {
                tracing::warn!("using the in-memory ledger; votes do not survive a restart");
                Arc::new(MemoryLedger::new())
            }
            LedgerBackend::Evm => {
                let rpc_url = self
                    .rpc_url
                    .clone()
                    .context("--rpc-url is required for the evm ledger")?;
                let signer = self
                    .private_key
                    .clone()
                    .context("--private-key is required for the evm ledger")?;
                let contract = self
                    .voting_contract_address
                    .context("--voting-contract-address is required for the evm ledger")?;
                Arc::new(EvmLedger::connect(rpc_url, signer, contract))
            }
        })
    }

    fn balance_source(&self) -> Result<Arc<dyn BalanceSource>> {
        Ok(match self.holders {
            HolderBackend::File => Arc::new(FileBalanceSource::new(&self.holders_file)),
            HolderBackend::Indexer => {
                let url = self
                    .indexer_url
                    .clone()
                    .context("--indexer-url is required for the indexer holder source")?;
                Arc::new(IndexerBalanceSource::new(url).with_max_pages(self.indexer_max_pages))
            }
        })
    }

    fn prover(&self) -> Arc<dyn TallyProver> {
        match &self.prover_url {
            Some(url) => Arc::new(RpcTallyProver::new(url.clone())),
            None => {
                tracing::warn!("no --prover-url given; tally requests will fail");
                Arc::new(UnconfiguredProver)
            }
        }
    }

    /// `None` when no MPC endpoint is configured.
    pub fn key_retriever(&self) -> Option<KeyRetriever> {
        let url = self.mpc_url.clone()?;
        let policy = RetryPolicy::fixed(
            self.keygen_attempts.max(1),
            Duration::from_secs(self.keygen_backoff_secs),
        );
        Some(KeyRetriever::new(Arc::new(RpcKeyService::new(url)), policy))
    }
}
