//! The two data structures of the concurrent binary tree:
//! the [`BitfieldStore`](bitfield::BitfieldStore) and the
//! [`SumReductionTree`](sum_reduction::SumReductionTree).
//!
//! # Explanation
//! The tree is never materialized. A node is an integer heap index `i >= 1` of an implicit
//! perfect binary tree, where index `1` is the square terrain patch and the indices `2` and `3`
//! are the two base triangles covering it.
//!
//! The bitfield stores which nodes are currently leaves, using one bit per node of the
//! maximum depth. Each node owns the bit of its leftmost descendant at the maximum depth, so
//! that the leaves partition the bitfield into runs that start at a set bit.
//! Splitting and merging a node are thereby reduced to setting and clearing a single bit.
//!
//! The sum reduction tree caches the number of leaves below each node. It is rebuilt after
//! every mutation and used to count and enumerate the leaves in O(depth).

pub mod bitfield;
pub mod sum_reduction;

/// The heap index of the square root node, which is never a leaf.
pub const ROOT: u32 = 1;

/// The number of bits per bitfield word.
pub(crate) const WORD_BITS: u32 = 32;

/// The number of tree levels resolved inside a single bitfield word (`2^5 = 32` bits).
pub(crate) const WORD_LEVELS: u32 = 5;

/// The smallest supported maximum depth.
pub const MIN_MAX_DEPTH: u32 = 6;

/// The largest supported maximum depth.
pub const MAX_MAX_DEPTH: u32 = 26;

/// Returns the depth of the node, with the root at depth zero.
#[inline]
pub fn depth(node: u32) -> u32 {
    debug_assert!(node != 0);
    31 - node.leading_zeros()
}

#[inline]
pub fn parent(node: u32) -> u32 {
    node >> 1
}

#[inline]
pub fn left_child(node: u32) -> u32 {
    node << 1
}

#[inline]
pub fn right_child(node: u32) -> u32 {
    node << 1 | 1
}

#[inline]
pub fn sibling(node: u32) -> u32 {
    node ^ 1
}

/// Returns the first heap index of the given depth.
#[inline]
pub fn first_node(depth: u32) -> u32 {
    1 << depth
}

/// Returns the number of nodes at the given depth.
#[inline]
pub fn node_count_at(depth: u32) -> u32 {
    1 << depth
}

/// Returns the number of bitfield words required for the maximum depth.
#[inline]
pub(crate) fn word_count(max_depth: u32) -> usize {
    ((1u64 << max_depth) / WORD_BITS as u64).max(1) as usize
}

/// Returns the depth whose nodes cover exactly one bitfield word each.
#[inline]
pub(crate) fn word_depth(max_depth: u32) -> u32 {
    max_depth - WORD_LEVELS
}

/// Returns the range of bits `(first_bit, bit_count)` covered by the subtree of the node.
#[inline]
pub(crate) fn bit_range(node: u32, max_depth: u32) -> (u32, u32) {
    let node_depth = depth(node);
    debug_assert!(node_depth <= max_depth);

    let shift = max_depth - node_depth;
    let first = (node - first_node(node_depth)) << shift;

    (first, 1 << shift)
}

/// Returns the index of the leaf bit owned by the node.
#[inline]
pub(crate) fn leaf_bit(node: u32, max_depth: u32) -> u32 {
    bit_range(node, max_depth).0
}
