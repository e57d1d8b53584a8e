use alloy::rpc::client::{ClientBuilder, RpcClient};
use ballot_core::tally::{ProverError, TallyProver, TallyWitness};
use futures_util::future::BoxFuture;
use serde::Deserialize;
use serde_json::json;
use url::Url;

/// Proving sidecar reached over JSON-RPC (`prove_tally`).
///
/// The sidecar answers with a JSON-RPC error when the witness does not
/// satisfy the circuit; that is reported as [`ProverError::Unsatisfied`].
#[derive(Clone, Debug)]
pub struct RpcTallyProver {
    client: RpcClient,
}

#[derive(Debug, Deserialize)]
struct ProveResponse {
    proof: String,
}

impl RpcTallyProver {
    pub fn new(url: Url) -> Self {
        Self {
            client: ClientBuilder::default().http(url),
        }
    }
}

impl TallyProver for RpcTallyProver {
    fn prove_tally(
        &self,
        proposal_id: u64,
        witness: TallyWitness,
    ) -> BoxFuture<'_, Result<Vec<u8>, ProverError>> {
        Box::pin(async move {
            let response: ProveResponse = self
                .client
                .request(
                    "prove_tally",
                    json!({ "proposalId": proposal_id, "witness": witness }),
                )
                .await
                .map_err(|err| {
                    if err.is_error_resp() {
                        ProverError::Unsatisfied(err.to_string())
                    } else {
                        ProverError::Unavailable(err.to_string())
                    }
                })?;
            hex::decode(response.proof.trim_start_matches("0x"))
                .map_err(|err| ProverError::Unavailable(format!("prover returned bad hex: {err}")))
        })
    }
}

/// Stand-in used when no proving sidecar is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnconfiguredProver;

impl TallyProver for UnconfiguredProver {
    fn prove_tally(
        &self,
        _proposal_id: u64,
        _witness: TallyWitness,
    ) -> BoxFuture<'_, Result<Vec<u8>, ProverError>> {
        Box::pin(async { Err(ProverError::Unavailable("no prover configured".into())) })
    }
}
