use alloy::rpc::client::{ClientBuilder, RpcClient};
use ballot_core::keys::{KeyError, KeyService, PublicKey};
use futures_util::future::BoxFuture;
use url::Url;

/// MPC cluster key endpoint (`mxe_getPublicKey`). A `null` result means key
/// generation for the deployment has not finished.
#[derive(Clone, Debug)]
pub struct RpcKeyService {
    client: RpcClient,
}

impl RpcKeyService {
    pub fn new(url: Url) -> Self {
        Self {
            client: ClientBuilder::default().http(url),
        }
    }
}

impl KeyService for RpcKeyService {
    fn public_key<'a>(
        &'a self,
        deployment_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<PublicKey>, KeyError>> {
        Box::pin(async move {
            let key: Option<String> = self
                .client
                .request("mxe_getPublicKey", [deployment_id.to_string()])
                .await
                .map_err(|err| KeyError::Unavailable(err.to_string()))?;
            let Some(key) = key else {
                return Ok(None);
            };
            let bytes = hex::decode(key.trim_start_matches("0x"))
                .map_err(|err| KeyError::Unavailable(format!("bad key encoding: {err}")))?;
            let key: PublicKey = bytes.try_into().map_err(|bytes: Vec<u8>| {
                KeyError::Unavailable(format!("key must be 32 bytes, got {}", bytes.len()))
            })?;
            // An all-zero key is what the cluster reports before keygen settles.
            Ok((key != [0u8; 32]).then_some(key))
        })
    }
}
