use crate::{
    cbt::{self, bitfield::BitfieldStore, sum_reduction::SumReductionTree},
    leb,
};

/// Which kind of mutation a subdivision pass performs.
///
/// Splits only ever set bits and merges only ever clear them. Running them in separate,
/// alternating passes keeps the writes of a single pass monotone.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum UpdatePhase {
    #[default]
    Split,
    Merge,
}

impl UpdatePhase {
    /// The phase of the given subdivision frame, alternating every frame.
    pub fn of_frame(frame: u32) -> Self {
        if frame % 2 == 0 {
            Self::Split
        } else {
            Self::Merge
        }
    }
}

/// The split and merge operations that keep the leaves free of T-junctions.
///
/// Any number of invocations may call these operations concurrently during one pass. Every
/// write is a single idempotent bit operation on the live bitfield, while all decisions are
/// made against the tree snapshot of the last rebuild.
#[derive(Clone, Copy)]
pub struct ConformingSubdivision<'a> {
    bitfield: &'a BitfieldStore,
    tree: &'a SumReductionTree,
    min_depth: u32,
}

impl<'a> ConformingSubdivision<'a> {
    pub fn new(bitfield: &'a BitfieldStore, tree: &'a SumReductionTree, min_depth: u32) -> Self {
        debug_assert_eq!(bitfield.max_depth(), tree.max_depth());

        Self {
            bitfield,
            tree,
            min_depth,
        }
    }

    /// Marks the children of the node as leaves and returns whether it was newly split.
    #[inline]
    fn split_node(&self, node: u32) -> bool {
        self.bitfield.set_leaf(cbt::right_child(node), true)
    }

    /// Splits the leaf and every triangle along its longest edge chain that would otherwise
    /// form a T-junction with its children.
    ///
    /// Splitting a node of the maximum depth does nothing. Once a split finds its bit
    /// already set, the invocation that set it is responsible for the rest of the chain.
    pub fn split(&self, node: u32) {
        if node <= cbt::ROOT || cbt::depth(node) >= self.bitfield.max_depth() {
            return;
        }

        if !self.split_node(node) {
            return;
        }

        let mut neighbor = leb::edge_neighbor(node);

        while neighbor > cbt::ROOT {
            if !self.split_node(neighbor) {
                break;
            }

            // realizes the neighbor in case it was part of a coarser leaf
            let parent = cbt::parent(neighbor);
            if parent <= cbt::ROOT || !self.split_node(parent) {
                break;
            }

            neighbor = leb::edge_neighbor(parent);
        }
    }

    /// Merges the diamond of the leaf back into its two parents.
    ///
    /// The merge is refused unless the leaf is deeper than the minimum depth and all members
    /// of the diamond are leaves. Returns whether the diamond was merged.
    pub fn merge(&self, node: u32) -> bool {
        let depth = cbt::depth(node);

        if depth <= self.min_depth.max(1) || !self.tree.is_leaf(node) {
            return false;
        }

        let diamond = leb::diamond_parent(node);

        if self.tree.node_count(diamond.base) != 2 || self.tree.node_count(diamond.top) != 2 {
            return false;
        }

        self.bitfield.set_leaf(cbt::right_child(diamond.base), false);
        self.bitfield.set_leaf(cbt::right_child(diamond.top), false);

        true
    }
}

#[cfg(test)]
pub(crate) mod checks {
    use crate::leb::{self, Triangle};
    use bevy::math::Vec2;
    use std::collections::HashSet;

    fn quantize(v: Vec2) -> (u32, u32) {
        let scale = (1u32 << 20) as f32;
        ((v.x * scale) as u32, (v.y * scale) as u32)
    }

    /// Asserts that the leaves cover the unit square exactly once.
    pub(crate) fn assert_tiles_square(leaves: &[u32]) {
        let triangles: Vec<Triangle> = leaves.iter().map(|&leaf| leb::decode(leaf)).collect();

        let measure: f32 = triangles
            .iter()
            .map(|triangle| leb::signed_double_area(triangle).abs())
            .sum();
        let area: f32 = triangles
            .iter()
            .map(|triangle| 0.5 * leb::signed_double_area(triangle))
            .sum();

        assert!((measure - 2.0).abs() < 1e-5, "measure {measure}");
        assert!((area - 1.0).abs() < 1e-5, "area {area}");
    }

    /// Asserts that no vertex of any leaf lies at the midpoint of an edge of another leaf.
    pub(crate) fn assert_conforming(leaves: &[u32]) {
        let triangles: Vec<Triangle> = leaves.iter().map(|&leaf| leb::decode(leaf)).collect();
        let vertices: HashSet<(u32, u32)> =
            triangles.iter().flatten().copied().map(quantize).collect();

        for (leaf, [v0, v1, v2]) in leaves.iter().zip(&triangles) {
            for (a, b) in [(v0, v1), (v1, v2), (v2, v0)] {
                let midpoint = (*a + *b) * 0.5;
                assert!(
                    !vertices.contains(&quantize(midpoint)),
                    "T-junction on leaf {leaf} at {midpoint}"
                );
            }
        }
    }
}
