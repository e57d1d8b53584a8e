use crate::lifecycle::Phase;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Every failure a caller of the core can observe.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("{owner} is not eligible to vote on proposal {proposal_id}")]
    Ineligible { proposal_id: u64, owner: String },
    #[error("nullifier {nullifier} already voted on proposal {proposal_id}")]
    DuplicateVote { proposal_id: u64, nullifier: String },
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("timed out waiting for {0}")]
    Timeout(String),
    #[error("threshold key generation not ready after {attempts} attempts")]
    KeygenNotReady { attempts: u32 },
    #[error("no holder of {asset_id} has a positive balance")]
    EmptyVoterSet { asset_id: String },
    #[error("snapshot for proposal {proposal_id} already exists")]
    SnapshotExists { proposal_id: u64 },
    #[error("proposal {proposal_id} is {phase}, cannot {action}")]
    InvalidState {
        proposal_id: u64,
        phase: Phase,
        action: &'static str,
    },
}

impl Error {
    /// Stable name of the failure class, used in response envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "ValidationError",
            Error::NotFound(_) => "NotFoundError",
            Error::Ineligible { .. } => "IneligibleError",
            Error::DuplicateVote { .. } => "DuplicateVote",
            Error::UpstreamUnavailable(_) => "UpstreamUnavailable",
            Error::Timeout(_) => "Timeout",
            Error::KeygenNotReady { .. } => "KeygenNotReady",
            Error::EmptyVoterSet { .. } => "EmptyVoterSet",
            Error::SnapshotExists { .. } => "SnapshotExists",
            Error::InvalidState { .. } => "InvalidState",
        }
    }
}
