//! Merkle tree commitments over 320-bit digests
//!
//! Nodes combine as `Hash(left || right)` over the 80-byte concatenation.
//! An odd node at any level is paired with itself. That convention makes
//! `[a, b, c]` and `[a, b, c, c]` commit to the same root, so the
//! computation reports a `mutated` flag whenever two equal siblings are
//! combined. Callers reject such blocks instead of normalising them.

use crate::hash::hash_pair;
use crate::types::{Block, Hash320};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Leaf counts are bounded by 2^32.
const MAX_LEVELS: usize = 32;

fn combine(left: &Hash320, right: &Hash320) -> Hash320 {
    hash_pair(&left.0, &right.0)
}

/// Constant-space root computation with optional branch capture.
///
/// Returns `(root, mutated)`. When `branch_pos` is set, the siblings on the
/// path of that leaf are pushed to `branch`.
fn merkle_computation(
    leaves: &[Hash320],
    branch_pos: Option<u32>,
    mut branch: Option<&mut Vec<Hash320>>,
) -> (Hash320, bool) {
    if leaves.is_empty() {
        return (Hash320::ZERO, false);
    }

    let mut mutated = false;
    // inner[i] holds the pending subtree of 2^i leaves, if any
    let mut inner = [Hash320::ZERO; MAX_LEVELS];
    // Highest level whose subtree contains the branch leaf
    let mut match_level: Option<usize> = None;
    let mut count: u32 = 0;

    for leaf in leaves {
        let mut h = *leaf;
        let mut matches = branch_pos == Some(count);
        count += 1;
        let mut level = 0;
        while count & (1u32 << level) == 0 {
            if let Some(ref mut branch) = branch {
                if matches {
                    branch.push(inner[level]);
                } else if match_level == Some(level) {
                    branch.push(h);
                    matches = true;
                }
            }
            mutated |= inner[level] == h;
            h = combine(&inner[level], &h);
            level += 1;
        }
        if matches {
            match_level = Some(level);
        }
        inner[level] = h;
    }

    // Fold the remaining partial subtrees from the lowest set bit up
    let mut level = 0;
    while count & (1u32 << level) == 0 {
        level += 1;
    }
    let mut h = inner[level];
    let mut matches = match_level == Some(level);
    while count != (1u32 << level) {
        // Odd node at this level: pair it with itself
        if matches {
            if let Some(ref mut branch) = branch {
                branch.push(h);
            }
        }
        h = combine(&h, &h);
        count += 1u32 << level;
        level += 1;
        while count & (1u32 << level) == 0 {
            if let Some(ref mut branch) = branch {
                if matches {
                    branch.push(inner[level]);
                } else if match_level == Some(level) {
                    branch.push(h);
                    matches = true;
                }
            }
            h = combine(&inner[level], &h);
            level += 1;
        }
    }
    (h, mutated)
}

/// ComputeMerkleRoot: ℍ* → ℍ × 𝔹
pub fn compute_merkle_root(leaves: &[Hash320]) -> (Hash320, bool) {
    merkle_computation(leaves, None, None)
}

/// ComputeMerkleBranch: ℍ* × ℕ → ℍ*
///
/// Sibling path for the leaf at `position`, lowest level first.
pub fn compute_merkle_branch(leaves: &[Hash320], position: u32) -> Vec<Hash320> {
    let mut branch = Vec::new();
    merkle_computation(leaves, Some(position), Some(&mut branch));
    branch
}

/// ComputeMerkleRootFromBranch: ℍ × ℍ* × ℕ → ℍ
pub fn compute_merkle_root_from_branch(leaf: &Hash320, branch: &[Hash320], mut position: u32) -> Hash320 {
    let mut hash = *leaf;
    for sibling in branch {
        hash = if position & 1 == 1 {
            combine(sibling, &hash)
        } else {
            combine(&hash, sibling)
        };
        position >>= 1;
    }
    hash
}

/// Leaves of a block: the single-stage hash of every transaction.
pub fn block_leaves(block: &Block) -> Vec<Hash320> {
    block.transactions.iter().map(|tx| tx.hash()).collect()
}

pub fn block_merkle_root(block: &Block) -> (Hash320, bool) {
    compute_merkle_root(&block_leaves(block))
}

pub fn block_merkle_branch(block: &Block, position: u32) -> Vec<Hash320> {
    compute_merkle_branch(&block_leaves(block), position)
}

/// Every level of a Merkle tree, leaves first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    nodes: Vec<Hash320>,
    leaf_count: usize,
}

impl MerkleTree {
    pub fn build(leaves: &[Hash320]) -> Self {
        let mut nodes = leaves.to_vec();
        let mut offset = 0;
        let mut size = leaves.len();
        while size > 1 {
            for i in (0..size).step_by(2) {
                let right = (i + 1).min(size - 1);
                let parent = combine(&nodes[offset + i], &nodes[offset + right]);
                nodes.push(parent);
            }
            offset += size;
            size = (size + 1) / 2;
        }
        MerkleTree { nodes, leaf_count: leaves.len() }
    }

    pub fn from_block(block: &Block) -> Self {
        Self::build(&block_leaves(block))
    }

    pub fn root(&self) -> Hash320 {
        self.nodes.last().copied().unwrap_or(Hash320::ZERO)
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    pub fn tx_hash(&self, index: usize) -> Option<&Hash320> {
        if index < self.leaf_count {
            self.nodes.get(index)
        } else {
            None
        }
    }

    /// Sibling path for `index`, or `None` when the index is out of range.
    pub fn branch(&self, mut index: usize) -> Option<Vec<Hash320>> {
        if index >= self.leaf_count {
            return None;
        }
        let mut branch = Vec::new();
        let mut offset = 0;
        let mut size = self.leaf_count;
        while size > 1 {
            let sibling = (index ^ 1).min(size - 1);
            branch.push(self.nodes[offset + sibling]);
            index >>= 1;
            offset += size;
            size = (size + 1) / 2;
        }
        Some(branch)
    }
}

/// Side table of built trees keyed by block hash.
///
/// Blocks stay plain values; trees are built on demand and dropped with
/// [`MerkleCache::invalidate`].
#[derive(Debug, Default)]
pub struct MerkleCache {
    trees: RwLock<HashMap<Hash320, Arc<MerkleTree>>>,
}

impl MerkleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_build(&self, block_hash: Hash320, block: &Block) -> Arc<MerkleTree> {
        if let Some(tree) = self.trees.read().get(&block_hash) {
            return Arc::clone(tree);
        }
        let tree = Arc::new(MerkleTree::from_block(block));
        self.trees.write().entry(block_hash).or_insert(tree).clone()
    }

    pub fn get(&self, block_hash: &Hash320) -> Option<Arc<MerkleTree>> {
        self.trees.read().get(block_hash).cloned()
    }

    pub fn invalidate(&self, block_hash: &Hash320) -> bool {
        self.trees.write().remove(block_hash).is_some()
    }

    pub fn len(&self) -> usize {
        self.trees.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.read().is_empty()
    }
}
