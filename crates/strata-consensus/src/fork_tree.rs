use std::collections::{BTreeMap, HashMap};

use strata_core::{BlockRecord, Hash};
use tracing::debug;

use crate::error::ConsensusError;

/// In-memory multi-branch index of every block that is not yet
/// irreversible.
///
/// The tree is an arena keyed by block hash; parent links are the
/// `parent_hash` fields of the blocks themselves, so traversal is always
/// by key lookup. The canonical head's lineage lives here too, serving as
/// the rollback anchor during a fork switch.
pub struct ForkTree {
    nodes: HashMap<Hash, BlockRecord>,
    children: HashMap<Hash, Vec<Hash>>,
    by_number: BTreeMap<u64, Vec<Hash>>,
    longest_tip: Hash,
    longest_number: u64,
}

impl ForkTree {
    /// Seed the tree with the current chain head
    pub fn start(head: BlockRecord) -> Result<Self, ConsensusError> {
        let hash = head.hash()?;
        let number = head.number();
        let mut nodes = HashMap::new();
        let mut by_number = BTreeMap::new();
        nodes.insert(hash, head);
        by_number.insert(number, vec![hash]);

        Ok(ForkTree {
            nodes,
            children: HashMap::new(),
            by_number,
            longest_tip: hash,
            longest_number: number,
        })
    }

    /// Insert a block under its parent. Returns `true` when the tracked
    /// longest tip advanced — only a strictly greater number moves it, so
    /// the first-seen branch wins ties.
    pub fn push(&mut self, block: BlockRecord) -> Result<bool, ConsensusError> {
        let hash = block.hash()?;
        if self.nodes.contains_key(&hash) {
            debug!(hash = %hash, "block already in fork tree");
            return Ok(false);
        }

        let parent = block.parent_hash();
        if !self.nodes.contains_key(&parent) {
            return Err(ConsensusError::UnLinkedBlock);
        }

        let number = block.number();
        self.children.entry(parent).or_default().push(hash);
        self.by_number.entry(number).or_default().push(hash);
        self.nodes.insert(hash, block);

        if number > self.longest_number {
            self.longest_tip = hash;
            self.longest_number = number;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn get(&self, hash: &Hash) -> Option<&BlockRecord> {
        self.nodes.get(hash)
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.nodes.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn longest_tip(&self) -> Hash {
        self.longest_tip
    }

    pub fn longest_number(&self) -> u64 {
        self.longest_number
    }

    /// Branch tips: nodes with no observed child
    pub fn tips(&self) -> Vec<Hash> {
        self.nodes
            .keys()
            .filter(|hash| {
                self.children
                    .get(*hash)
                    .map(|c| c.is_empty())
                    .unwrap_or(true)
            })
            .copied()
            .collect()
    }

    /// Remove a single block (administrative; breaks its subtree's linkage)
    pub fn remove(&mut self, hash: &Hash) -> Option<BlockRecord> {
        let block = self.nodes.remove(hash)?;
        self.unlink(hash, &block);
        Some(block)
    }

    /// Remove a block and every descendant
    pub fn remove_subtree(&mut self, hash: &Hash) {
        let mut stack = vec![*hash];
        while let Some(current) = stack.pop() {
            if let Some(kids) = self.children.remove(&current) {
                stack.extend(kids);
            }
            if let Some(block) = self.nodes.remove(&current) {
                self.unlink(&current, &block);
            }
        }
    }

    fn unlink(&mut self, hash: &Hash, block: &BlockRecord) {
        if let Some(siblings) = self.children.get_mut(&block.parent_hash()) {
            siblings.retain(|h| h != hash);
        }
        if let Some(peers) = self.by_number.get_mut(&block.number()) {
            peers.retain(|h| h != hash);
            if peers.is_empty() {
                self.by_number.remove(&block.number());
            }
        }
    }

    /// Point the tracked longest tip at an existing node (used after a
    /// rejected block or a failed switch restored the old head)
    pub fn reset_longest(&mut self, hash: &Hash) -> Result<(), ConsensusError> {
        let block = self
            .nodes
            .get(hash)
            .ok_or_else(|| ConsensusError::ItemNotFound(format!("fork tree node {}", hash)))?;
        self.longest_number = block.number();
        self.longest_tip = *hash;
        Ok(())
    }

    /// Walk two branches back to their lowest common ancestor.
    ///
    /// Returns the path from each tip down to (excluding) the ancestor,
    /// tip-first. Walking past `max_depth` blocks or off the edge of the
    /// tree means the branches do not meet within bounded history.
    pub fn branch_paths(
        &self,
        new_tip: &Hash,
        old_tip: &Hash,
        max_depth: usize,
    ) -> Result<(Vec<BlockRecord>, Vec<BlockRecord>), ConsensusError> {
        let mut a = self.node_or_unlinked(new_tip)?;
        let mut b = self.node_or_unlinked(old_tip)?;
        let mut path_a = Vec::new();
        let mut path_b = Vec::new();

        while a.number() > b.number() {
            path_a.push(a.clone());
            a = self.parent_of(a, max_depth, path_a.len())?;
        }
        while b.number() > a.number() {
            path_b.push(b.clone());
            b = self.parent_of(b, max_depth, path_b.len())?;
        }
        while a.hash()? != b.hash()? {
            path_a.push(a.clone());
            path_b.push(b.clone());
            a = self.parent_of(a, max_depth, path_a.len())?;
            b = self.parent_of(b, max_depth, path_b.len())?;
        }

        Ok((path_a, path_b))
    }

    fn node_or_unlinked(&self, hash: &Hash) -> Result<&BlockRecord, ConsensusError> {
        self.nodes.get(hash).ok_or(ConsensusError::UnLinkedBlock)
    }

    fn parent_of(
        &self,
        block: &BlockRecord,
        max_depth: usize,
        walked: usize,
    ) -> Result<&BlockRecord, ConsensusError> {
        if walked > max_depth {
            return Err(ConsensusError::NonCommonBlock);
        }
        self.nodes
            .get(&block.parent_hash())
            .ok_or(ConsensusError::NonCommonBlock)
    }

    /// Drop every node strictly below the irreversible point. Reorgs below
    /// it are impossible, so nothing down there can anchor a rollback.
    pub fn prune_below(&mut self, number: u64) {
        let stale: Vec<Hash> = self
            .by_number
            .range(..number)
            .flat_map(|(_, hashes)| hashes.iter().copied())
            .collect();
        for hash in &stale {
            if let Some(block) = self.nodes.remove(hash) {
                self.children.remove(hash);
                self.unlink(hash, &block);
            }
        }
        if !stale.is_empty() {
            debug!(pruned = stale.len(), below = number, "pruned fork tree");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::{BlockHeader, PublicKey};

    fn block(number: u64, parent: Hash, salt: u8) -> BlockRecord {
        let header = BlockHeader {
            number,
            parent_hash: parent,
            timestamp: number as i64 * 3_000 + salt as i64,
            witness: PublicKey([salt; 32]),
            version: 1,
            tx_root: Hash::ZERO,
        };
        BlockRecord::new(header, Vec::new())
    }

    fn genesis() -> BlockRecord {
        block(0, Hash::ZERO, 0)
    }

    #[test]
    fn test_push_advances_longest_tip() {
        let g = genesis();
        let mut tree = ForkTree::start(g.clone()).unwrap();
        let b1 = block(1, g.hash().unwrap(), 1);

        assert!(tree.push(b1.clone()).unwrap());
        assert_eq!(tree.longest_tip(), b1.hash().unwrap());
        assert_eq!(tree.longest_number(), 1);
    }

    #[test]
    fn test_equal_length_does_not_move_tip() {
        let g = genesis();
        let mut tree = ForkTree::start(g.clone()).unwrap();
        let first = block(1, g.hash().unwrap(), 1);
        let second = block(1, g.hash().unwrap(), 2);

        assert!(tree.push(first.clone()).unwrap());
        // Same number, later arrival: first seen keeps the tip
        assert!(!tree.push(second).unwrap());
        assert_eq!(tree.longest_tip(), first.hash().unwrap());
    }

    #[test]
    fn test_unknown_parent_rejected() {
        let mut tree = ForkTree::start(genesis()).unwrap();
        let orphan = block(5, Hash::new([9u8; 32]), 1);
        assert!(matches!(
            tree.push(orphan),
            Err(ConsensusError::UnLinkedBlock)
        ));
    }

    #[test]
    fn test_tips_enumeration() {
        let g = genesis();
        let mut tree = ForkTree::start(g.clone()).unwrap();
        let a1 = block(1, g.hash().unwrap(), 1);
        let b1 = block(1, g.hash().unwrap(), 2);
        let a2 = block(2, a1.hash().unwrap(), 1);

        tree.push(a1.clone()).unwrap();
        tree.push(b1.clone()).unwrap();
        tree.push(a2.clone()).unwrap();

        let mut tips = tree.tips();
        tips.sort();
        let mut expected = vec![a2.hash().unwrap(), b1.hash().unwrap()];
        expected.sort();
        assert_eq!(tips, expected);
    }

    #[test]
    fn test_branch_paths_to_common_ancestor() {
        let g = genesis();
        let mut tree = ForkTree::start(g.clone()).unwrap();
        // Branch A: g -> a1 -> a2; branch B: g -> b1 -> b2 -> b3
        let a1 = block(1, g.hash().unwrap(), 1);
        let a2 = block(2, a1.hash().unwrap(), 1);
        let b1 = block(1, g.hash().unwrap(), 2);
        let b2 = block(2, b1.hash().unwrap(), 2);
        let b3 = block(3, b2.hash().unwrap(), 2);
        for blk in [&a1, &a2, &b1, &b2, &b3] {
            tree.push(blk.clone()).unwrap();
        }

        let (new_path, old_path) = tree
            .branch_paths(&b3.hash().unwrap(), &a2.hash().unwrap(), 16)
            .unwrap();

        let new_numbers: Vec<u64> = new_path.iter().map(|b| b.number()).collect();
        let old_numbers: Vec<u64> = old_path.iter().map(|b| b.number()).collect();
        assert_eq!(new_numbers, vec![3, 2, 1]);
        assert_eq!(old_numbers, vec![2, 1]);
    }

    #[test]
    fn test_branch_paths_depth_bound() {
        let g = genesis();
        let mut tree = ForkTree::start(g.clone()).unwrap();
        let mut a_parent = g.hash().unwrap();
        let mut b_parent = g.hash().unwrap();
        let mut a_tip = a_parent;
        let mut b_tip = b_parent;
        for n in 1..=6 {
            let a = block(n, a_parent, 1);
            let b = block(n, b_parent, 2);
            a_parent = a.hash().unwrap();
            b_parent = b.hash().unwrap();
            a_tip = a_parent;
            b_tip = b_parent;
            tree.push(a).unwrap();
            tree.push(b).unwrap();
        }

        assert!(tree.branch_paths(&a_tip, &b_tip, 16).is_ok());
        assert!(matches!(
            tree.branch_paths(&a_tip, &b_tip, 3),
            Err(ConsensusError::NonCommonBlock)
        ));
    }

    #[test]
    fn test_branch_paths_no_intersection() {
        let g = genesis();
        let mut tree = ForkTree::start(g.clone()).unwrap();
        let a1 = block(1, g.hash().unwrap(), 1);
        let a2 = block(2, a1.hash().unwrap(), 1);
        let b1 = block(1, g.hash().unwrap(), 2);
        let b2 = block(2, b1.hash().unwrap(), 2);
        for blk in [&a1, &a2, &b1, &b2] {
            tree.push(blk.clone()).unwrap();
        }
        // Sever the link below the old branch
        tree.remove(&a1.hash().unwrap());

        assert!(matches!(
            tree.branch_paths(&b2.hash().unwrap(), &a2.hash().unwrap(), 16),
            Err(ConsensusError::NonCommonBlock)
        ));
    }

    #[test]
    fn test_remove_subtree() {
        let g = genesis();
        let mut tree = ForkTree::start(g.clone()).unwrap();
        let b1 = block(1, g.hash().unwrap(), 1);
        let b2 = block(2, b1.hash().unwrap(), 1);
        let b3 = block(3, b2.hash().unwrap(), 1);
        for blk in [&b1, &b2, &b3] {
            tree.push(blk.clone()).unwrap();
        }

        tree.remove_subtree(&b2.hash().unwrap());
        assert!(tree.contains(&b1.hash().unwrap()));
        assert!(!tree.contains(&b2.hash().unwrap()));
        assert!(!tree.contains(&b3.hash().unwrap()));
    }

    #[test]
    fn test_prune_below() {
        let g = genesis();
        let mut tree = ForkTree::start(g.clone()).unwrap();
        let mut parent = g.hash().unwrap();
        let mut blocks = Vec::new();
        for n in 1..=5 {
            let b = block(n, parent, 1);
            parent = b.hash().unwrap();
            tree.push(b.clone()).unwrap();
            blocks.push(b);
        }

        tree.prune_below(3);
        assert!(!tree.contains(&g.hash().unwrap()));
        assert!(!tree.contains(&blocks[1].hash().unwrap())); // number 2
        assert!(tree.contains(&blocks[2].hash().unwrap())); // number 3
        assert!(tree.contains(&blocks[4].hash().unwrap())); // number 5
    }

    #[test]
    fn test_reset_longest() {
        let g = genesis();
        let mut tree = ForkTree::start(g.clone()).unwrap();
        let b1 = block(1, g.hash().unwrap(), 1);
        tree.push(b1.clone()).unwrap();

        tree.reset_longest(&g.hash().unwrap()).unwrap();
        assert_eq!(tree.longest_number(), 0);
        assert!(tree.reset_longest(&Hash::new([7u8; 32])).is_err());
    }
}
