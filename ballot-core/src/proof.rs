use std::sync::Arc;

use serde::Serialize;

use crate::{
    error::Error,
    field::Field,
    lifecycle::{Lifecycle, Phase},
    store::SnapshotRepository,
};

/// Everything a voter needs to build the eligibility witness.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofBundle {
    pub secret: Field,
    pub balance: u64,
    pub weight: u64,
    pub leaf: Field,
    pub path: Vec<Field>,
    pub index: usize,
    pub root: Field,
}

impl ProofBundle {
    pub fn witness(&self, proposal_id: u64) -> EligibilityWitness {
        EligibilityWitness {
            secret: self.secret,
            balance: Field::from(self.balance),
            weight: Field::from(self.weight),
            merkle_path: self.path.clone(),
            merkle_index: self.index,
            merkle_root: self.root,
            proposal_id: Field::from(proposal_id),
        }
    }
}

/// Private inputs of the external eligibility circuit, which proves
/// membership and emits the public nullifier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EligibilityWitness {
    pub secret: Field,
    pub balance: Field,
    pub weight: Field,
    pub merkle_path: Vec<Field>,
    pub merkle_index: usize,
    pub merkle_root: Field,
    pub proposal_id: Field,
}

pub struct ProofService {
    store: Arc<dyn SnapshotRepository>,
    lifecycle: Arc<Lifecycle>,
}

impl ProofService {
    pub fn new(store: Arc<dyn SnapshotRepository>, lifecycle: Arc<Lifecycle>) -> Self {
        Self { store, lifecycle }
    }

    /// Returns only `owner_id`'s own record and path. Owners outside the
    /// snapshot get `Ineligible`; no path is ever synthesized for them.
    pub fn get_proof(&self, proposal_id: u64, owner_id: &str) -> Result<ProofBundle, Error> {
        let snapshot = self
            .store
            .get(proposal_id)
            .ok_or_else(|| Error::NotFound(format!("snapshot for proposal {proposal_id}")))?;
        // A reserved snapshot whose root never reached the ledger has no usable paths.
        if matches!(self.lifecycle.phase(proposal_id), None | Some(Phase::Created)) {
            return Err(Error::NotFound(format!(
                "snapshot for proposal {proposal_id} is not published"
            )));
        }
        let Some(record) = snapshot.voter(owner_id) else {
            tracing::warn!(proposal_id, "proof requested by ineligible owner");
            return Err(Error::Ineligible {
                proposal_id,
                owner: owner_id.to_string(),
            });
        };
        let path = snapshot.tree.prove_inclusion(record.index)?;
        tracing::debug!(proposal_id, index = record.index, "proof served");
        Ok(ProofBundle {
            secret: record.secret,
            balance: record.balance,
            weight: record.weight,
            leaf: record.leaf,
            path,
            index: record.index,
            root: snapshot.root,
        })
    }
}
