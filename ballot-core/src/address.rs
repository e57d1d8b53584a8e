//! The single home of ledger address derivation seeds.

use alloy_primitives::{keccak256, Address, B256};

/// A named, versioned derivation seed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Seed {
    pub name: &'static str,
    pub version: u16,
    pub bytes: &'static [u8],
}

pub const PROPOSAL_SEED_V5: Seed = Seed {
    name: "proposal",
    version: 5,
    bytes: b"svrn_v5",
};

pub const NULLIFIER_SEED_V1: Seed = Seed {
    name: "nullifier",
    version: 1,
    bytes: b"nullifier",
};

/// Derives record keys for one deployment of the voting contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AddressDeriver {
    domain: Address,
    proposal_seed: Seed,
    nullifier_seed: Seed,
}

impl AddressDeriver {
    pub fn new(domain: Address) -> Self {
        Self {
            domain,
            proposal_seed: PROPOSAL_SEED_V5,
            nullifier_seed: NULLIFIER_SEED_V1,
        }
    }

    pub fn with_seeds(domain: Address, proposal_seed: Seed, nullifier_seed: Seed) -> Self {
        Self {
            domain,
            proposal_seed,
            nullifier_seed,
        }
    }

    /// `keccak256(seed || domain || proposal_id as u64 LE)`
    pub fn proposal_key(&self, proposal_id: u64) -> B256 {
        let mut preimage = Vec::with_capacity(self.proposal_seed.bytes.len() + 20 + 8);
        preimage.extend_from_slice(self.proposal_seed.bytes);
        preimage.extend_from_slice(self.domain.as_slice());
        preimage.extend_from_slice(&proposal_id.to_le_bytes());
        keccak256(preimage)
    }

    /// `keccak256(seed || proposal_key || nullifier)`
    pub fn nullifier_key(&self, proposal_id: u64, nullifier: &[u8; 32]) -> B256 {
        let proposal_key = self.proposal_key(proposal_id);
        let mut preimage = Vec::with_capacity(self.nullifier_seed.bytes.len() + 64);
        preimage.extend_from_slice(self.nullifier_seed.bytes);
        preimage.extend_from_slice(proposal_key.as_slice());
        preimage.extend_from_slice(nullifier);
        keccak256(preimage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_deterministic_and_separated() {
        let deriver = AddressDeriver::new(Address::repeat_byte(0x11));
        assert_eq!(deriver.proposal_key(4), deriver.proposal_key(4));
        assert_ne!(deriver.proposal_key(4), deriver.proposal_key(5));

        let nullifier = [7u8; 32];
        assert_eq!(
            deriver.nullifier_key(4, &nullifier),
            deriver.nullifier_key(4, &nullifier)
        );
        assert_ne!(
            deriver.nullifier_key(4, &nullifier),
            deriver.nullifier_key(5, &nullifier)
        );
    }

    #[test]
    fn deployments_do_not_share_keys() {
        let a = AddressDeriver::new(Address::repeat_byte(0x11));
        let b = AddressDeriver::new(Address::repeat_byte(0x22));
        assert_ne!(a.proposal_key(1), b.proposal_key(1));
    }

    #[test]
    fn seed_version_changes_keys() {
        let domain = Address::repeat_byte(0x11);
        let legacy = Seed {
            name: "proposal",
            version: 4,
            bytes: b"proposal",
        };
        let current = AddressDeriver::new(domain);
        let old = AddressDeriver::with_seeds(domain, legacy, NULLIFIER_SEED_V1);
        assert_ne!(current.proposal_key(9), old.proposal_key(9));
    }
}
