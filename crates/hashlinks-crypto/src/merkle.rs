use serde::{Deserialize, Serialize};

use hashlinks_types::ContentHash;

use crate::hasher::ContentHasher;

/// Side of a sibling in a Merkle proof path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

/// One proof element: the sibling hash at a level and where it sits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    pub sibling: ContentHash,
    pub side: Side,
}

/// Binary Merkle tree over a list of resources.
///
/// Built bottom-up by pairwise hashing; an odd node at any level is paired
/// with itself. Immutable once built. Proofs for every leaf are computed at
/// construction time.
#[derive(Clone, Debug)]
pub struct MerkleTree {
    root: ContentHash,
    leaf_hashes: Vec<ContentHash>,
    proofs: Vec<Vec<ProofStep>>,
}

impl MerkleTree {
    /// Build a tree from raw leaf data. Each leaf is hashed with the
    /// Merkle leaf domain first.
    pub fn from_data<T: AsRef<[u8]>>(leaves: &[T]) -> Self {
        let hashes = leaves
            .iter()
            .map(|leaf| ContentHasher::MERKLE_LEAF.hash(leaf.as_ref()))
            .collect();
        Self::from_leaves(hashes)
    }

    /// Build a tree from pre-computed leaf hashes.
    ///
    /// An empty list produces a null root. A single leaf is its own root.
    pub fn from_leaves(leaves: Vec<ContentHash>) -> Self {
        if leaves.is_empty() {
            return Self {
                root: ContentHash::null(),
                leaf_hashes: Vec::new(),
                proofs: Vec::new(),
            };
        }

        let mut levels: Vec<Vec<ContentHash>> = vec![leaves.clone()];
        let mut current = leaves.clone();
        while current.len() > 1 {
            let next: Vec<ContentHash> = current
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => hash_pair(left, right),
                    [single] => hash_pair(single, single),
                    _ => unreachable!("chunks(2) yields one or two nodes"),
                })
                .collect();
            levels.push(next.clone());
            current = next;
        }

        let proofs = (0..leaves.len())
            .map(|index| proof_path(&levels, index))
            .collect();

        Self {
            root: current[0],
            leaf_hashes: leaves,
            proofs,
        }
    }

    pub fn root(&self) -> ContentHash {
        self.root
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_hashes.len()
    }

    pub fn leaf_hashes(&self) -> &[ContentHash] {
        &self.leaf_hashes
    }

    /// Inclusion proof for the leaf at `index`.
    pub fn proof(&self, index: usize) -> Option<MerkleProof> {
        let path = self.proofs.get(index)?.clone();
        Some(MerkleProof {
            leaf: self.leaf_hashes[index],
            path,
            root: self.root,
        })
    }
}

fn proof_path(levels: &[Vec<ContentHash>], index: usize) -> Vec<ProofStep> {
    let mut path = Vec::new();
    let mut idx = index;
    for level in &levels[..levels.len() - 1] {
        let (sibling_idx, side) = if idx % 2 == 0 {
            (idx + 1, Side::Right)
        } else {
            (idx - 1, Side::Left)
        };
        // Odd level: the last node is paired with itself.
        let sibling = level.get(sibling_idx).copied().unwrap_or(level[idx]);
        path.push(ProofStep { sibling, side });
        idx /= 2;
    }
    path
}

/// Merkle inclusion proof.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub leaf: ContentHash,
    /// Sibling hashes from leaf to root.
    pub path: Vec<ProofStep>,
    /// Root the proof claims to reach.
    pub root: ContentHash,
}

impl MerkleProof {
    /// Recompute the root from the leaf and path and compare it with the
    /// claimed root.
    pub fn verify(&self) -> bool {
        self.verify_against(&self.root)
    }

    /// Verify against an independently known root.
    pub fn verify_against(&self, root: &ContentHash) -> bool {
        verify_merkle_proof(&self.leaf, &self.path, root)
    }
}

/// Fold `path` over `leaf` and compare the result with `root`.
pub fn verify_merkle_proof(leaf: &ContentHash, path: &[ProofStep], root: &ContentHash) -> bool {
    if root.is_null() {
        return false;
    }
    let computed = path.iter().fold(*leaf, |current, step| match step.side {
        Side::Left => hash_pair(&step.sibling, &current),
        Side::Right => hash_pair(&current, &step.sibling),
    });
    computed == *root
}

fn hash_pair(left: &ContentHash, right: &ContentHash) -> ContentHash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"hashlinks-merkle-v1:");
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    ContentHash::from_hash(*hasher.finalize().as_bytes())
}
