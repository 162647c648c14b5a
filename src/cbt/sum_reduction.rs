use crate::cbt::{self, bitfield::count_bits_in};

/// The hierarchical leaf counts of the tree, derived from the
/// [`BitfieldStore`](super::bitfield::BitfieldStore).
///
/// The entry of each node is the number of leaves in its subtree, so that the entry of the
/// root is the total leaf count and `entry(i) = entry(2i) + entry(2i + 1)` holds for every
/// internal node.
///
/// Only the levels down to the word depth (`max_depth - 5`) are stored. The counts of the
/// five lowest levels are population counts of masked bitfield words. These words are a
/// snapshot taken by the rebuild prepass, which keeps every read consistent with the last
/// rebuild even while a pass mutates the live bitfield.
pub struct SumReductionTree {
    max_depth: u32,
    /// One array per depth in `0..=word_depth`.
    pub(crate) levels: Vec<Vec<u32>>,
    /// The bitfield words as of the last rebuild.
    pub(crate) words: Vec<u32>,
}

impl SumReductionTree {
    pub fn new(max_depth: u32) -> Self {
        let levels = (0..=cbt::word_depth(max_depth))
            .map(|depth| vec![0; cbt::node_count_at(depth) as usize])
            .collect();

        Self {
            max_depth,
            levels,
            words: vec![0; cbt::word_count(max_depth)],
        }
    }

    #[inline]
    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    /// The depth of the lowest stored level.
    #[inline]
    pub fn word_depth(&self) -> u32 {
        cbt::word_depth(self.max_depth)
    }

    /// The number of leaves of the whole tree.
    #[inline]
    pub fn leaf_count(&self) -> u32 {
        self.levels[0][0]
    }

    /// The number of leaves in the subtree of the node.
    pub fn node_count(&self, node: u32) -> u32 {
        let depth = cbt::depth(node);

        if depth <= self.word_depth() {
            self.levels[depth as usize][(node - cbt::first_node(depth)) as usize]
        } else {
            let (first, count) = cbt::bit_range(node, self.max_depth);
            count_bits_in(|index| self.words[index], first, count)
        }
    }

    /// Whether the node was a leaf at the time of the last rebuild.
    pub fn is_leaf(&self, node: u32) -> bool {
        node > cbt::ROOT
            && cbt::depth(node) <= self.max_depth
            && self.node_count(node) == 1
            && self.node_count(cbt::parent(node)) > 1
    }

    /// Maps the leaf ordinal `index` in `[0, leaf_count)` to the heap index of that leaf.
    ///
    /// Descends from the root, choosing the left child when the ordinal falls inside the
    /// leaf range of the left subtree, until a subtree with a single leaf is reached.
    pub fn leaf_index_to_heap_index(&self, index: u32) -> u32 {
        debug_assert!(index < self.leaf_count());

        let mut node = cbt::ROOT;
        let mut index = index;

        while self.node_count(node) > 1 {
            let left = cbt::left_child(node);
            let left_count = self.node_count(left);

            if index < left_count {
                node = left;
            } else {
                index -= left_count;
                node = cbt::right_child(node);
            }
        }

        node
    }

    /// Iterates over the heap indices of all leaves in ordinal order.
    pub fn iter_leaves(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.leaf_count()).map(|index| self.leaf_index_to_heap_index(index))
    }
}
