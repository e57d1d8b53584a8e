//! Fixed-capacity binary commitment tree.

use crate::{commitment::CommitmentBackend, error::Error, field::Field};

/// Every level of a built tree; `levels[0]` are the leaves and the last level
/// holds only the root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitmentTree {
    levels: Vec<Vec<Field>>,
}

impl CommitmentTree {
    /// Builds the tree over exactly `2^depth` leaves. Callers pad first.
    pub fn build(
        backend: &CommitmentBackend,
        leaves: Vec<Field>,
        depth: u32,
    ) -> Result<Self, Error> {
        let capacity = capacity(depth)?;
        if leaves.len() != capacity {
            return Err(Error::Validation(format!(
                "tree of depth {depth} needs {capacity} leaves, got {}",
                leaves.len()
            )));
        }

        let mut levels = Vec::with_capacity(depth as usize + 1);
        levels.push(leaves);
        while let Some(current) = levels.last().filter(|level| level.len() > 1) {
            let next = current
                .chunks_exact(2)
                .map(|pair| backend.commit(&pair[0], &pair[1]))
                .collect();
            levels.push(next);
        }
        Ok(Self { levels })
    }

    pub fn root(&self) -> Field {
        // build() always ends with a single-element level.
        self.levels[self.levels.len() - 1][0]
    }

    pub fn depth(&self) -> u32 {
        (self.levels.len() - 1) as u32
    }

    pub fn leaves(&self) -> &[Field] {
        &self.levels[0]
    }

    pub fn levels(&self) -> &[Vec<Field>] {
        &self.levels
    }

    /// Sibling path from leaf `index` up to, but excluding, the root.
    pub fn prove_inclusion(&self, index: usize) -> Result<Vec<Field>, Error> {
        if index >= self.leaves().len() {
            return Err(Error::Validation(format!(
                "leaf index {index} outside tree of {} leaves",
                self.leaves().len()
            )));
        }
        let mut idx = index;
        let path = self.levels[..self.levels.len() - 1]
            .iter()
            .map(|level| {
                let sibling = level[idx ^ 1];
                idx >>= 1;
                sibling
            })
            .collect();
        Ok(path)
    }
}

/// Recomputes the root from `leaf` and its sibling `path`.
/// Bit `r` of `index` selects whether the running node is the right operand at
/// round `r`.
pub fn verify_inclusion(
    backend: &CommitmentBackend,
    leaf: Field,
    index: usize,
    path: &[Field],
    root: Field,
) -> bool {
    if path.len() < usize::BITS as usize && index >> path.len() != 0 {
        return false;
    }
    let computed = path.iter().enumerate().fold(leaf, |node, (round, sibling)| {
        if (index >> round) & 1 == 0 {
            backend.commit(&node, sibling)
        } else {
            backend.commit(sibling, &node)
        }
    });
    computed == root
}

pub fn capacity(depth: u32) -> Result<usize, Error> {
    if depth == 0 || depth > MAX_DEPTH {
        return Err(Error::Validation(format!(
            "tree depth must be within 1..={MAX_DEPTH}, got {depth}"
        )));
    }
    Ok(1usize << depth)
}

pub const MAX_DEPTH: u32 = 20;

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(n: u64) -> Vec<Field> {
        (1..=n).map(Field::from).collect()
    }

    #[test]
    fn build_produces_halving_levels() {
        let backend = CommitmentBackend::default();
        let tree = CommitmentTree::build(&backend, leaves(8), 3).unwrap();
        let widths: Vec<_> = tree.levels().iter().map(Vec::len).collect();
        assert_eq!(widths, vec![8, 4, 2, 1]);
        assert_eq!(
            tree.levels()[1][0],
            backend.commit(&Field::from(1), &Field::from(2))
        );
    }

    #[test]
    fn build_rejects_unpadded_leaves() {
        let backend = CommitmentBackend::default();
        let err = CommitmentTree::build(&backend, leaves(5), 3).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn every_leaf_verifies_against_root() {
        let backend = CommitmentBackend::default();
        let tree = CommitmentTree::build(&backend, leaves(8), 3).unwrap();
        for (index, leaf) in tree.leaves().iter().enumerate() {
            let path = tree.prove_inclusion(index).unwrap();
            assert_eq!(path.len(), 3);
            assert!(verify_inclusion(&backend, *leaf, index, &path, tree.root()));
        }
    }

    #[test]
    fn tampered_sibling_fails_verification() {
        let backend = CommitmentBackend::default();
        let tree = CommitmentTree::build(&backend, leaves(8), 3).unwrap();
        let leaf = tree.leaves()[5];
        let path = tree.prove_inclusion(5).unwrap();
        for round in 0..path.len() {
            let mut tampered = path.clone();
            tampered[round] = Field::from(999);
            assert!(!verify_inclusion(&backend, leaf, 5, &tampered, tree.root()));
        }
        assert!(!verify_inclusion(&backend, leaf, 4, &path, tree.root()));
        assert!(!verify_inclusion(&backend, leaf, 13, &path, tree.root()));
    }
}
