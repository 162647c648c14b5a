use crate::{
    cbt::{bitfield::BitfieldStore, sum_reduction::SumReductionTree},
    compute::dispatch_over,
};

/// The multi-pass kernel sequence recomputing the [`SumReductionTree`] after the
/// [`BitfieldStore`] has been mutated.
///
/// The prepass snapshots every bitfield word and writes its population count into the word
/// level, which resolves the five lowest levels of the tree at once. Afterwards each level
/// up to the root is reduced from the level below it, with one dispatch per level, since
/// each level reads the freshly written values of the level beneath it.
pub struct SumReductionRebuildPipeline;

impl SumReductionRebuildPipeline {
    pub fn run(tree: &mut SumReductionTree, bitfield: &BitfieldStore) {
        debug_assert_eq!(tree.max_depth(), bitfield.max_depth());

        Self::prepass(tree, bitfield);

        for depth in (0..tree.word_depth() as usize).rev() {
            Self::reduce_level(tree, depth);
        }
    }

    /// One invocation per bitfield word.
    fn prepass(tree: &mut SumReductionTree, bitfield: &BitfieldStore) {
        let SumReductionTree { levels, words, .. } = tree;

        dispatch_over(words, |index, word| *word = bitfield.load_word(index));

        let Some(word_level) = levels.last_mut() else {
            return;
        };
        let words = &*words;

        dispatch_over(word_level, |index, count| *count = words[index].count_ones());
    }

    /// One invocation per node of `depth`, summing its two children.
    fn reduce_level(tree: &mut SumReductionTree, depth: usize) {
        let (upper, lower) = tree.levels.split_at_mut(depth + 1);
        let children = &lower[0];

        dispatch_over(&mut upper[depth], |index, count| {
            *count = children[2 * index] + children[2 * index + 1];
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cbt;

    fn rebuilt(bitfield: &BitfieldStore) -> SumReductionTree {
        let mut tree = SumReductionTree::new(bitfield.max_depth());
        SumReductionRebuildPipeline::run(&mut tree, bitfield);
        tree
    }

    fn assert_reduction_invariant(tree: &SumReductionTree) {
        for depth in 0..tree.max_depth() {
            for node in cbt::first_node(depth)..cbt::first_node(depth + 1) {
                let children = tree.node_count(cbt::left_child(node))
                    + tree.node_count(cbt::right_child(node));
                assert_eq!(tree.node_count(node), children, "node {node}");
            }
        }
    }

    #[test]
    fn uniform_depth_six_has_64_leaves() {
        let bitfield = BitfieldStore::new(10);
        bitfield.initialize_uniform(6);

        let tree = rebuilt(&bitfield);

        assert_eq!(tree.leaf_count(), 64);
        assert_eq!(tree.node_count(2), 32);
        assert_eq!(tree.node_count(3), 32);
        assert_reduction_invariant(&tree);
    }

    #[test]
    fn leaf_enumeration_is_a_bijection() {
        let bitfield = BitfieldStore::new(9);
        bitfield.initialize_uniform(2);
        bitfield.set_leaf(cbt::right_child(5), true);
        bitfield.set_leaf(cbt::right_child(11), true);
        bitfield.set_leaf(cbt::right_child(6), true);

        let tree = rebuilt(&bitfield);
        let leaves: Vec<u32> = tree.iter_leaves().collect();

        assert_eq!(leaves, vec![4, 10, 22, 23, 12, 13, 7]);
        assert_reduction_invariant(&tree);

        for &leaf in &leaves {
            assert!(tree.is_leaf(leaf));
            assert!(bitfield.is_leaf(leaf));
        }

        assert!(!tree.is_leaf(5));
        assert!(!tree.is_leaf(11));
        assert!(!tree.is_leaf(8));
    }

    #[test]
    fn snapshot_ignores_later_mutations() {
        let bitfield = BitfieldStore::new(8);
        bitfield.initialize_uniform(3);

        let tree = rebuilt(&bitfield);
        bitfield.set_leaf(cbt::right_child(8), true);

        assert_eq!(tree.leaf_count(), 8);
        assert!(tree.is_leaf(8));
        assert!(!bitfield.is_leaf(8));
        assert_eq!(rebuilt(&bitfield).leaf_count(), 9);
    }
}
