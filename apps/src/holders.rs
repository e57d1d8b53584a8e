use std::{collections::HashMap, path::PathBuf};

use alloy::rpc::client::{ClientBuilder, RpcClient};
use ballot_core::source::{BalanceSource, Holder, SourceError};
use futures_util::future::BoxFuture;
use serde::Deserialize;
use serde_json::json;
use url::Url;

/// Holder lists read from a JSON file on every query.
///
/// The file is either `{"<asset>": [{"owner", "balance"}]}` or a plain list
/// that is served for every asset.
#[derive(Clone, Debug)]
pub struct FileBalanceSource {
    path: PathBuf,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HoldersFile {
    Shared(Vec<Holder>),
    PerAsset(HashMap<String, Vec<Holder>>),
}

impl FileBalanceSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn load(&self, asset_id: &str) -> Result<Vec<Holder>, SourceError> {
        let raw = tokio::fs::read(&self.path).await.map_err(|err| {
            SourceError::Unavailable(format!("{}: {err}", self.path.display()))
        })?;
        let parsed: HoldersFile = serde_json::from_slice(&raw)
            .map_err(|err| SourceError::Malformed(format!("{}: {err}", self.path.display())))?;
        match parsed {
            HoldersFile::Shared(holders) => Ok(holders),
            HoldersFile::PerAsset(mut assets) => assets
                .remove(asset_id)
                .ok_or_else(|| SourceError::UnknownAsset(asset_id.to_string())),
        }
    }
}

impl BalanceSource for FileBalanceSource {
    fn list_holders<'a>(
        &'a self,
        asset_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Holder>, SourceError>> {
        Box::pin(self.load(asset_id))
    }

    fn balance_of<'a>(
        &'a self,
        asset_id: &'a str,
        owner: &'a str,
    ) -> BoxFuture<'a, Result<u64, SourceError>> {
        Box::pin(async move {
            let holders = self.load(asset_id).await?;
            Ok(holders
                .iter()
                .filter(|holder| holder.owner == owner)
                .map(|holder| holder.balance)
                .fold(0u64, u64::saturating_add))
        })
    }
}

/// Token account indexer speaking the `getTokenAccounts` JSON-RPC method.
#[derive(Clone, Debug)]
pub struct IndexerBalanceSource {
    client: RpcClient,
    max_pages: u32,
}

#[derive(Debug, Deserialize)]
struct TokenAccounts {
    #[serde(default)]
    token_accounts: Vec<TokenAccount>,
}

#[derive(Debug, Deserialize)]
struct TokenAccount {
    owner: String,
    amount: u64,
}

impl IndexerBalanceSource {
    pub const PAGE_LIMIT: usize = 1000;

    pub fn new(url: Url) -> Self {
        Self {
            client: ClientBuilder::default().http(url),
            max_pages: 10,
        }
    }

    /// Caps how many pages one snapshot may read. Holders past the cap are
    /// dropped with a warning.
    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    async fn page(&self, params: serde_json::Value) -> Result<Vec<TokenAccount>, SourceError> {
        let response: TokenAccounts = self
            .client
            .request("getTokenAccounts", params)
            .await
            .map_err(|err| {
                if err.is_error_resp() || err.is_deser_error() {
                    SourceError::Malformed(err.to_string())
                } else {
                    SourceError::Unavailable(err.to_string())
                }
            })?;
        Ok(response.token_accounts)
    }
}

impl BalanceSource for IndexerBalanceSource {
    fn list_holders<'a>(
        &'a self,
        asset_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Holder>, SourceError>> {
        Box::pin(async move {
            let mut holders = Vec::new();
            for page in 1..=self.max_pages {
                let accounts = self
                    .page(json!({
                        "mint": asset_id,
                        "page": page,
                        "limit": Self::PAGE_LIMIT,
                        "options": { "showZeroBalance": false },
                    }))
                    .await?;
                let last = accounts.len() < Self::PAGE_LIMIT;
                holders.extend(
                    accounts
                        .into_iter()
                        .map(|account| Holder::new(account.owner, account.amount)),
                );
                if last {
                    break;
                }
                if page == self.max_pages {
                    tracing::warn!(
                        asset_id,
                        max_pages = self.max_pages,
                        "indexer page cap reached, remaining holders are not read"
                    );
                }
            }
            tracing::debug!(asset_id, holders = holders.len(), "indexer listed holders");
            Ok(holders)
        })
    }

    fn balance_of<'a>(
        &'a self,
        asset_id: &'a str,
        owner: &'a str,
    ) -> BoxFuture<'a, Result<u64, SourceError>> {
        Box::pin(async move {
            let accounts = self
                .page(json!({
                    "mint": asset_id,
                    "owner": owner,
                    "limit": Self::PAGE_LIMIT,
                    "options": { "showZeroBalance": false },
                }))
                .await?;
            Ok(accounts
                .iter()
                .filter(|account| account.owner == owner)
                .map(|account| account.amount)
                .fold(0u64, u64::saturating_add))
        })
    }
}
