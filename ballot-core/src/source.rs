use std::collections::HashMap;

use futures_util::future::{self, BoxFuture};
use serde::{Deserialize, Serialize};

/// One holder of the voting asset as reported by a balance source.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holder {
    pub owner: String,
    pub balance: u64,
}

impl Holder {
    pub fn new(owner: impl Into<String>, balance: u64) -> Self {
        Self {
            owner: owner.into(),
            balance,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("balance source unreachable: {0}")]
    Unavailable(String),
    #[error("unknown asset {0}")]
    UnknownAsset(String),
    #[error("malformed balance response: {0}")]
    Malformed(String),
}

impl SourceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Unavailable(_))
    }
}

/// Lists the holders of a fungible asset.
pub trait BalanceSource: Send + Sync {
    fn list_holders<'a>(&'a self, asset_id: &'a str)
        -> BoxFuture<'a, Result<Vec<Holder>, SourceError>>;

    fn balance_of<'a>(
        &'a self,
        asset_id: &'a str,
        owner: &'a str,
    ) -> BoxFuture<'a, Result<u64, SourceError>>;
}

/// Fixed holder lists, keyed by asset.
#[derive(Clone, Debug, Default)]
pub struct MemoryBalanceSource {
    assets: HashMap<String, Vec<Holder>>,
    unlisted: HashMap<(String, String), u64>,
    offline: bool,
}

impl MemoryBalanceSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_asset(mut self, asset_id: impl Into<String>, holders: Vec<Holder>) -> Self {
        self.assets.insert(asset_id.into(), holders);
        self
    }

    /// A balance visible to `balance_of` but missing from `list_holders`, as
    /// with holders beyond an indexer's page limit.
    pub fn with_unlisted(mut self, asset_id: impl Into<String>, owner: impl Into<String>, balance: u64) -> Self {
        self.unlisted.insert((asset_id.into(), owner.into()), balance);
        self
    }

    /// A source whose every query fails as unreachable.
    pub fn offline() -> Self {
        Self {
            offline: true,
            ..Self::default()
        }
    }

    fn holders(&self, asset_id: &str) -> Result<&[Holder], SourceError> {
        if self.offline {
            return Err(SourceError::Unavailable("offline".into()));
        }
        self.assets
            .get(asset_id)
            .map(Vec::as_slice)
            .ok_or_else(|| SourceError::UnknownAsset(asset_id.to_string()))
    }
}

impl BalanceSource for MemoryBalanceSource {
    fn list_holders<'a>(
        &'a self,
        asset_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Holder>, SourceError>> {
        Box::pin(future::ready(self.holders(asset_id).map(<[Holder]>::to_vec)))
    }

    fn balance_of<'a>(
        &'a self,
        asset_id: &'a str,
        owner: &'a str,
    ) -> BoxFuture<'a, Result<u64, SourceError>> {
        let balance = self.holders(asset_id).map(|holders| {
            let listed = holders
                .iter()
                .filter(|h| h.owner == owner)
                .map(|h| h.balance)
                .fold(0u64, u64::saturating_add);
            let unlisted = self
                .unlisted
                .get(&(asset_id.to_string(), owner.to_string()))
                .copied()
                .unwrap_or(0);
            listed.saturating_add(unlisted)
        });
        Box::pin(future::ready(balance))
    }
}
