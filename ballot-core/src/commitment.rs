use std::sync::Arc;

use alloy_primitives::keccak256;
use alloy_sol_types::SolValue;

use crate::field::Field;

/// Two-to-one compression used for both leaves and interior nodes.
pub trait CommitmentScheme: Send + Sync {
    fn commit(&self, left: &Field, right: &Field) -> Field;
}

/// keccak256 over the ABI encoding of both words, reduced into the field.
#[derive(Clone, Copy, Debug, Default)]
pub struct Keccak256Commitment;

impl CommitmentScheme for Keccak256Commitment {
    fn commit(&self, left: &Field, right: &Field) -> Field {
        let digest = keccak256((left.to_word(), right.to_word()).abi_encode());
        Field::from_word(digest)
    }
}

impl<F> CommitmentScheme for F
where
    F: Fn(&Field, &Field) -> Field + Send + Sync,
{
    fn commit(&self, left: &Field, right: &Field) -> Field {
        self(left, right)
    }
}

/// An initialized commitment backend, shared by every snapshot build.
#[derive(Clone)]
pub struct CommitmentBackend {
    scheme: Arc<dyn CommitmentScheme>,
    padding_leaf: Field,
}

impl CommitmentBackend {
    pub fn new(scheme: Arc<dyn CommitmentScheme>) -> Self {
        let padding_leaf = scheme.commit(&Field::ZERO, &Field::ZERO);
        Self {
            scheme,
            padding_leaf,
        }
    }

    pub fn commit(&self, left: &Field, right: &Field) -> Field {
        self.scheme.commit(left, right)
    }

    /// `commit(0, 0)`, used for every unfilled slot.
    pub fn padding_leaf(&self) -> Field {
        self.padding_leaf
    }
}

impl std::fmt::Debug for CommitmentBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitmentBackend")
            .field("padding_leaf", &self.padding_leaf)
            .finish_non_exhaustive()
    }
}

impl Default for CommitmentBackend {
    fn default() -> Self {
        Self::new(Arc::new(Keccak256Commitment))
    }
}
