use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ballot_core::{
    keys::KeyRetriever,
    lifecycle::Phase,
    readiness::ReadyState,
    relay::RelayRequest,
    snapshot::{ProposalMetadata, SnapshotRequest},
    tally::TallyRequest,
    Error, ProposalSummary, VotingCore,
};
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};

#[derive(Clone)]
pub struct AppState {
    pub core: Arc<VotingCore>,
    pub keys: Option<KeyRetriever>,
    pub mpc_deployment: Arc<str>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/proposals", get(proposals))
        .route("/proposals/active", get(active_proposals))
        .route("/proposals/by-mint/{mint}", get(proposals_by_mint))
        .route("/proposals/eligible/{wallet}", get(eligible_proposals))
        .route("/initialize-snapshot", post(initialize_snapshot))
        .route("/get-proof", post(get_proof))
        .route("/relay-vote", post(relay_vote))
        .route("/prove-tally", post(prove_tally))
        .route("/finalize", post(finalize))
        .route("/next-proposal-id", get(next_proposal_id))
        .route("/proposal/{id}", get(proposal))
        .route("/vote-counts/{id}", get(vote_counts))
        .route("/encryption-key", get(encryption_key))
        .with_state(state)
}

/// Error envelope: `{"success": false, "error": .., "kind": ..}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
}

pub fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Ineligible { .. } => StatusCode::FORBIDDEN,
        Error::DuplicateVote { .. } | Error::InvalidState { .. } | Error::SnapshotExists { .. } => {
            StatusCode::CONFLICT
        }
        Error::EmptyVoterSet { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        Error::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
        Error::Timeout(_) | Error::KeygenNotReady { .. } => StatusCode::GATEWAY_TIMEOUT,
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = status_for(&err);
        if status.is_server_error() {
            tracing::error!(kind = err.kind(), %err, "request failed");
        } else {
            tracing::warn!(kind = err.kind(), %err, "request rejected");
        }
        Self {
            status,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::warn!(%rejection, "malformed request body");
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "ValidationError",
            message: rejection.body_text(),
        }
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        tracing::warn!(%rejection, "malformed request path");
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "ValidationError",
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "success": false, "error": self.message, "kind": self.kind });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

/// Clients send proposal ids both as numbers and as decimal strings.
fn proposal_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Number(u64),
        Text(String),
    }
    match Id::deserialize(deserializer)? {
        Id::Number(id) => Ok(id),
        Id::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeSnapshotBody {
    #[serde(deserialize_with = "proposal_id")]
    pub proposal_id: u64,
    pub voting_mint: String,
    #[serde(default)]
    pub metadata: Option<ProposalMetadata>,
    #[serde(default)]
    pub creator: Option<String>,
}

pub async fn initialize_snapshot(
    State(state): State<AppState>,
    body: Result<Json<InitializeSnapshotBody>, JsonRejection>,
) -> ApiResult {
    let Json(body) = body?;
    let snapshot = state
        .core
        .snapshots
        .initialize(SnapshotRequest {
            proposal_id: body.proposal_id,
            asset_id: body.voting_mint,
            metadata: body.metadata,
            creator: body.creator,
        })
        .await?;
    Ok(Json(json!({
        "success": true,
        "proposalId": snapshot.proposal_id,
        "root": snapshot.root,
        "count": snapshot.voter_count(),
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetProofBody {
    #[serde(deserialize_with = "proposal_id")]
    pub proposal_id: u64,
    pub user_pubkey: String,
}

pub async fn get_proof(
    State(state): State<AppState>,
    body: Result<Json<GetProofBody>, JsonRejection>,
) -> ApiResult {
    let Json(body) = body?;
    let proof = state
        .core
        .proofs
        .get_proof(body.proposal_id, &body.user_pubkey)?;
    let witness = proof.witness(body.proposal_id);
    Ok(Json(json!({ "success": true, "proof": proof, "witness": witness })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayVoteBody {
    #[serde(deserialize_with = "proposal_id")]
    pub proposal_id: u64,
    pub nullifier: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub pubkey: Vec<u8>,
    pub nonce: Vec<u8>,
}

pub async fn relay_vote(
    State(state): State<AppState>,
    body: Result<Json<RelayVoteBody>, JsonRejection>,
) -> ApiResult {
    let Json(body) = body?;
    let receipt = state
        .core
        .relay
        .relay_vote(RelayRequest {
            proposal_id: body.proposal_id,
            nullifier: body.nullifier,
            ciphertext: body.ciphertext,
            ephemeral_public_key: body.pubkey,
            nonce: body.nonce,
        })
        .await?;
    Ok(Json(json!({
        "success": true,
        "tx": receipt.tx,
        "nullifierKey": receipt.nullifier_key,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProveTallyBody {
    #[serde(deserialize_with = "proposal_id")]
    pub proposal_id: u64,
    pub yes_votes: u64,
    pub no_votes: u64,
    pub threshold: u8,
    #[serde(default)]
    pub quorum: u64,
}

pub async fn prove_tally(
    State(state): State<AppState>,
    body: Result<Json<ProveTallyBody>, JsonRejection>,
) -> ApiResult {
    let Json(body) = body?;
    let attestation = state
        .core
        .tally
        .attest(TallyRequest {
            proposal_id: body.proposal_id,
            yes_votes: body.yes_votes,
            no_votes: body.no_votes,
            threshold_percent: body.threshold,
            quorum: body.quorum,
        })
        .await?;
    Ok(Json(json!({
        "success": true,
        "proof": format!("0x{}", hex::encode(&attestation.proof)),
        "msg": "tally attested",
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeBody {
    #[serde(deserialize_with = "proposal_id")]
    pub proposal_id: u64,
}

pub async fn finalize(
    State(state): State<AppState>,
    body: Result<Json<FinalizeBody>, JsonRejection>,
) -> ApiResult {
    let Json(body) = body?;
    let tx = state.core.tally.finalize(body.proposal_id).await?;
    Ok(Json(json!({ "success": true, "tx": tx })))
}

pub async fn next_proposal_id(State(state): State<AppState>) -> ApiResult {
    let next = state.core.next_proposal_id().await;
    Ok(Json(json!({ "success": true, "nextId": next })))
}

pub async fn proposal(
    State(state): State<AppState>,
    id: Result<Path<u64>, PathRejection>,
) -> ApiResult {
    let Path(id) = id?;
    let summary = state
        .core
        .proposal(id)
        .ok_or_else(|| Error::NotFound(format!("proposal {id}")))?;
    let mut body = json!(summary);
    body["success"] = json!(true);
    Ok(Json(body))
}

pub async fn vote_counts(
    State(state): State<AppState>,
    id: Result<Path<u64>, PathRejection>,
) -> ApiResult {
    let Path(id) = id?;
    let count = state.core.relay.vote_count(id).await?;
    Ok(Json(json!({ "success": true, "proposalId": id, "count": count })))
}

pub async fn health(State(state): State<AppState>) -> ApiResult {
    let backend = match state.core.backend.state() {
        ReadyState::Uninitialized => "uninitialized",
        ReadyState::Initializing => "initializing",
        ReadyState::Ready(_) => "ready",
        ReadyState::Failed(_) => "failed",
    };
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs());
    Ok(Json(json!({
        "success": true,
        "status": "ok",
        "commitmentBackend": backend,
        "timestamp": timestamp,
    })))
}

fn listing(summaries: impl Iterator<Item = ProposalSummary>) -> Json<Value> {
    let proposals: Vec<_> = summaries.collect();
    Json(json!({ "success": true, "count": proposals.len(), "proposals": proposals }))
}

pub async fn proposals(State(state): State<AppState>) -> ApiResult {
    Ok(listing(state.core.proposals().into_iter()))
}

/// Proposals that are published and not yet finalized.
pub async fn active_proposals(State(state): State<AppState>) -> ApiResult {
    Ok(listing(state.core.proposals().into_iter().filter(|summary| {
        matches!(
            summary.phase,
            Some(Phase::OpenForVoting | Phase::TallyRequested | Phase::Attested)
        )
    })))
}

pub async fn proposals_by_mint(
    State(state): State<AppState>,
    mint: Result<Path<String>, PathRejection>,
) -> ApiResult {
    let Path(mint) = mint?;
    Ok(listing(
        state
            .core
            .proposals()
            .into_iter()
            .filter(|summary| summary.asset_id == mint),
    ))
}

pub async fn eligible_proposals(
    State(state): State<AppState>,
    wallet: Result<Path<String>, PathRejection>,
) -> ApiResult {
    let Path(wallet) = wallet?;
    let eligible = state.core.eligibility(&wallet);
    Ok(Json(json!({
        "success": true,
        "count": eligible.len(),
        "proposals": eligible,
    })))
}

pub async fn encryption_key(State(state): State<AppState>) -> ApiResult {
    let keys = state
        .keys
        .as_ref()
        .ok_or_else(|| Error::UpstreamUnavailable("no MPC endpoint configured".into()))?;
    let key = keys.public_key(&state.mpc_deployment).await?;
    Ok(Json(json!({
        "success": true,
        "publicKey": format!("0x{}", hex::encode(key)),
    })))
}
