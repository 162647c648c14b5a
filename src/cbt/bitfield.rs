use crate::cbt::{self, WORD_BITS};
use std::sync::atomic::{AtomicU32, Ordering};

/// The flat bit array encoding which nodes of the tree are currently leaves.
///
/// There is one bit per node of the maximum depth. A node owns the bit of its leftmost
/// descendant at the maximum depth, which it shares with its left child. A node is a leaf
/// iff its leaf bit is set and no other bit inside its subtree is set.
///
/// All mutations are single atomic bit operations, which are idempotent. Any number of
/// invocations may therefore write to the same word concurrently without synchronization.
pub struct BitfieldStore {
    max_depth: u32,
    words: Vec<AtomicU32>,
}

impl BitfieldStore {
    /// Creates an empty bitfield for a tree of the given maximum depth.
    pub fn new(max_depth: u32) -> Self {
        let words = (0..cbt::word_count(max_depth))
            .map(|_| AtomicU32::new(0))
            .collect();

        Self { max_depth, words }
    }

    #[inline]
    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    #[inline]
    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    #[inline]
    pub fn bit_count(&self) -> u32 {
        1 << self.max_depth
    }

    pub fn clear(&self) {
        for word in &self.words {
            word.store(0, Ordering::Relaxed);
        }
    }

    /// Resets the tree to a uniform subdivision, where every node of `depth` is a leaf.
    pub fn initialize_uniform(&self, depth: u32) {
        debug_assert!(depth >= 1 && depth <= self.max_depth);

        self.clear();

        for node in cbt::first_node(depth)..cbt::first_node(depth + 1) {
            self.set_leaf(node, true);
        }
    }

    /// Reads the current value of a bitfield word.
    #[inline]
    pub fn load_word(&self, index: usize) -> u32 {
        self.words[index].load(Ordering::Relaxed)
    }

    /// Copies the current words into the provided slice.
    pub fn load_words(&self, target: &mut [u32]) {
        for (target, word) in target.iter_mut().zip(&self.words) {
            *target = word.load(Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn bit(&self, bit: u32) -> bool {
        let mask = 1 << (bit % WORD_BITS);
        self.load_word((bit / WORD_BITS) as usize) & mask != 0
    }

    /// Atomically sets a bit and returns whether it was already set.
    #[inline]
    pub(crate) fn set_bit(&self, bit: u32) -> bool {
        let mask = 1 << (bit % WORD_BITS);
        let previous = self.words[(bit / WORD_BITS) as usize].fetch_or(mask, Ordering::Relaxed);
        previous & mask != 0
    }

    /// Atomically clears a bit and returns whether it was set before.
    #[inline]
    pub(crate) fn clear_bit(&self, bit: u32) -> bool {
        let mask = 1 << (bit % WORD_BITS);
        let previous = self.words[(bit / WORD_BITS) as usize].fetch_and(!mask, Ordering::Relaxed);
        previous & mask != 0
    }

    /// Counts the set bits in the range `[first, first + count)`.
    pub fn count_bits(&self, first: u32, count: u32) -> u32 {
        count_bits_in(|index| self.load_word(index), first, count)
    }

    /// Sets or clears the leaf bit of the node.
    ///
    /// Because a node shares its leaf bit with its left child, marking the right child of a
    /// leaf as a leaf splits the parent, while unmarking it merges the two children again.
    /// Returns whether the bit changed.
    #[inline]
    pub fn set_leaf(&self, node: u32, leaf: bool) -> bool {
        let bit = cbt::leaf_bit(node, self.max_depth);

        if leaf {
            !self.set_bit(bit)
        } else {
            self.clear_bit(bit)
        }
    }

    /// Reads the live bitfield to decide whether the node is currently a leaf.
    ///
    /// The cost grows with the size of the subtree. Invocations inside a pass should query
    /// the [`SumReductionTree`](super::sum_reduction::SumReductionTree) snapshot instead.
    pub fn is_leaf(&self, node: u32) -> bool {
        if node <= cbt::ROOT || cbt::depth(node) > self.max_depth {
            return false;
        }

        let (first, count) = cbt::bit_range(node, self.max_depth);
        let end = first + count;

        self.bit(first)
            && self.count_bits(first, count) == 1
            && (end == self.bit_count() || self.bit(end))
    }
}

/// Counts the set bits in `[first, first + count)` of a word array accessed through `word`.
pub(crate) fn count_bits_in(word: impl Fn(usize) -> u32, first: u32, count: u32) -> u32 {
    let mut total = 0;
    let mut bit = first;
    let end = first + count;

    while bit < end {
        let offset = bit % WORD_BITS;
        let span = (WORD_BITS - offset).min(end - bit);
        let mask = if span == WORD_BITS {
            u32::MAX
        } else {
            ((1 << span) - 1) << offset
        };

        total += (word((bit / WORD_BITS) as usize) & mask).count_ones();
        bit += span;
    }

    total
}
