//! Per-proposal phase tracking. Phases only move forward.

use std::{collections::HashMap, fmt, sync::Mutex};

use serde::Serialize;

use crate::error::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Phase {
    Created,
    OpenForVoting,
    TallyRequested,
    Attested,
    Finalized,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Created => "created",
            Phase::OpenForVoting => "open for voting",
            Phase::TallyRequested => "awaiting tally",
            Phase::Attested => "attested",
            Phase::Finalized => "finalized",
        };
        f.write_str(name)
    }
}

/// Totals and proof recorded when a proposal is attested.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attestation {
    pub yes_votes: u64,
    pub no_votes: u64,
    pub threshold_percent: u8,
    pub quorum: u64,
    pub proof: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct ProposalStatus {
    pub phase: Phase,
    pub attestation: Option<Attestation>,
    pub settlement_tx: Option<String>,
}

#[derive(Debug, Default)]
pub struct Lifecycle {
    proposals: Mutex<HashMap<u64, ProposalStatus>>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self, proposal_id: u64) -> Option<Phase> {
        self.lock().get(&proposal_id).map(|status| status.phase)
    }

    pub fn status(&self, proposal_id: u64) -> Option<ProposalStatus> {
        self.lock().get(&proposal_id).cloned()
    }

    /// Registers a freshly created proposal. Fails if it is already tracked.
    pub fn create(&self, proposal_id: u64) -> Result<(), Error> {
        let mut proposals = self.lock();
        if let Some(status) = proposals.get(&proposal_id) {
            return Err(Error::InvalidState {
                proposal_id,
                phase: status.phase,
                action: "create",
            });
        }
        proposals.insert(
            proposal_id,
            ProposalStatus {
                phase: Phase::Created,
                attestation: None,
                settlement_tx: None,
            },
        );
        Ok(())
    }

    /// Moves `proposal_id` to `to` if its current phase is one of `from`.
    pub fn advance(
        &self,
        proposal_id: u64,
        from: &[Phase],
        to: Phase,
        action: &'static str,
    ) -> Result<Phase, Error> {
        self.update(proposal_id, from, action, |status| status.phase = to)
    }

    /// Requires the proposal to be in one of `allowed` without changing it.
    pub fn require(
        &self,
        proposal_id: u64,
        allowed: &[Phase],
        action: &'static str,
    ) -> Result<Phase, Error> {
        self.update(proposal_id, allowed, action, |_| {})
    }

    pub fn record_attestation(&self, proposal_id: u64, attestation: Attestation) -> Result<(), Error> {
        self.update(proposal_id, &[Phase::TallyRequested], "attest", |status| {
            status.phase = Phase::Attested;
            status.attestation = Some(attestation);
        })
        .map(|_| ())
    }

    pub fn record_settlement(&self, proposal_id: u64, tx: String) -> Result<(), Error> {
        self.update(proposal_id, &[Phase::Attested], "finalize", |status| {
            status.phase = Phase::Finalized;
            status.settlement_tx = Some(tx);
        })
        .map(|_| ())
    }

    fn update(
        &self,
        proposal_id: u64,
        allowed: &[Phase],
        action: &'static str,
        apply: impl FnOnce(&mut ProposalStatus),
    ) -> Result<Phase, Error> {
        let mut proposals = self.lock();
        let status = proposals
            .get_mut(&proposal_id)
            .ok_or_else(|| Error::NotFound(format!("proposal {proposal_id}")))?;
        let current = status.phase;
        if !allowed.contains(&current) {
            return Err(Error::InvalidState {
                proposal_id,
                phase: current,
                action,
            });
        }
        apply(status);
        Ok(current)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, ProposalStatus>> {
        // The map is never left half-updated, so a poisoned lock is still usable.
        self.proposals.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
