//! Merkle commitment over per-ballot leaf hashes. The root is recorded in
//! the poll snapshot; a voter can later obtain an inclusion proof for their
//! own ballot without seeing anyone else's.
//!
//! Pairing rule: nodes are hashed in pairs of hex strings; an odd node is
//! promoted unchanged to the next level.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone)]
pub struct MerkleTree {
    /// levels[0] is the leaf level; the last level holds the root.
    levels: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofNode {
    pub hash: String,
    /// Whether the sibling sits to the left of the running hash.
    pub is_left: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub leaf: String,
    pub index: usize,
    pub path: Vec<ProofNode>,
    pub root: String,
    pub leaf_count: usize,
}

impl MerkleTree {
    pub fn from_leaves(leaves: Vec<String>) -> Self {
        let mut levels = vec![leaves];
        while levels.last().map(|l| l.len()).unwrap_or(0) > 1 {
            let current = levels.last().expect("levels is non-empty");
            let mut next = Vec::with_capacity(current.len() / 2 + 1);
            for pair in current.chunks(2) {
                match pair {
                    [left, right] => next.push(hash_pair(left, right)),
                    [odd] => next.push(odd.clone()),
                    _ => unreachable!("chunks(2) yields one or two nodes"),
                }
            }
            levels.push(next);
        }
        Self { levels }
    }

    pub fn root(&self) -> Option<&str> {
        self.levels.last().and_then(|l| l.first()).map(String::as_str)
    }

    pub fn leaf_count(&self) -> usize {
        self.levels.first().map(|l| l.len()).unwrap_or(0)
    }

    /// Inclusion proof for the leaf at `index`: the sibling at every level
    /// on the way to the root. Promoted odd nodes contribute no sibling.
    pub fn proof(&self, index: usize) -> Option<MerkleProof> {
        let leaves = self.levels.first()?;
        let leaf = leaves.get(index)?.clone();
        let root = self.root()?.to_string();

        let mut path = Vec::new();
        let mut idx = index;
        for level in &self.levels[..self.levels.len() - 1] {
            if idx % 2 == 0 {
                if let Some(sibling) = level.get(idx + 1) {
                    path.push(ProofNode { hash: sibling.clone(), is_left: false });
                }
            } else {
                path.push(ProofNode {
                    hash: level[idx - 1].clone(),
                    is_left: true,
                });
            }
            idx /= 2;
        }

        Some(MerkleProof {
            leaf,
            index,
            path,
            root,
            leaf_count: leaves.len(),
        })
    }
}

/// Stateless proof check: walk the path from the leaf and compare the
/// reconstructed root. Usable by a verifier holding only the proof.
pub fn verify_proof(proof: &MerkleProof) -> bool {
    if proof.leaf.is_empty() {
        return false;
    }
    let mut hash = proof.leaf.clone();
    for node in &proof.path {
        hash = if node.is_left {
            hash_pair(&node.hash, &hash)
        } else {
            hash_pair(&hash, &node.hash)
        };
    }
    hash == proof.root
}

fn hash_pair(left: &str, right: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    hex::encode(hasher.finalize())
}
