//! Decoding of longest edge bisection triangles from their heap index.
//!
//! A triangle is never stored. Its vertices in the unit square, as well as its neighbors of
//! the same depth, follow from the bits of its heap index alone.
//! The bit below the leading one selects one of the two base triangles, every following bit
//! bisects the longest edge `v0 - v2` of the current triangle at its midpoint `m` and keeps
//! the child `(v0, m, v1)` for a zero bit or `(v1, m, v2)` for a one bit.

use crate::cbt;
use bevy::math::Vec2;

/// The three vertices of a triangle, with the longest edge between the first and last one.
pub type Triangle = [Vec2; 3];

/// The base triangles of the heap indices `2` and `3`, sharing the diagonal of the unit
/// square as their longest edge.
const BASE_TRIANGLES: [Triangle; 2] = [
    [Vec2::new(0.0, 1.0), Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0)],
    [Vec2::new(1.0, 0.0), Vec2::new(1.0, 1.0), Vec2::new(0.0, 1.0)],
];

#[inline]
fn bit(node: u32, index: u32) -> u32 {
    (node >> index) & 1
}

/// Decodes the vertices without normalizing the winding.
///
/// Each bisection flips the orientation, the base triangles being counter-clockwise.
fn decode_raw(node: u32) -> Triangle {
    let depth = cbt::depth(node);
    debug_assert!(depth >= 1, "the root is not a triangle");

    let mut triangle = BASE_TRIANGLES[bit(node, depth - 1) as usize];

    for index in (0..depth - 1).rev() {
        let [v0, v1, v2] = triangle;
        let m = (v0 + v2) * 0.5;

        triangle = if bit(node, index) == 0 {
            [v0, m, v1]
        } else {
            [v1, m, v2]
        };
    }

    triangle
}

/// Returns the vertices of the triangle of the node in the unit square.
///
/// The winding is counter-clockwise for every node. The longest edge always connects the
/// first and the last vertex.
pub fn decode(node: u32) -> Triangle {
    let mut triangle = decode_raw(node);

    if cbt::depth(node) % 2 == 0 {
        triangle.swap(0, 2);
    }

    triangle
}

/// The neighbors of a node at the same depth, with `0` marking the patch boundary.
///
/// `left` lies across the edge `v1 - v2`, `right` across `v0 - v1` and `edge` across the
/// longest edge `v0 - v2` of the unnormalized triangle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SameDepthNeighbors {
    pub left: u32,
    pub right: u32,
    pub edge: u32,
}

/// Computes the same depth neighbors of the node from its bit pattern.
pub fn same_depth_neighbors(node: u32) -> SameDepthNeighbors {
    let depth = cbt::depth(node);
    debug_assert!(depth >= 1, "the root has no neighbors");

    let base = bit(node, depth - 1);
    let mut neighbors = SameDepthNeighbors {
        left: 0,
        right: 0,
        edge: 3 - base,
    };
    let mut current = 2 + base;

    for index in (0..depth - 1).rev() {
        let SameDepthNeighbors { left, right, edge } = neighbors;
        let right_bit = (right != 0) as u32;
        let edge_bit = (edge != 0) as u32;

        if bit(node, index) == 0 {
            neighbors = SameDepthNeighbors {
                left: current << 1 | 1,
                right: edge << 1 | edge_bit,
                edge: right << 1 | right_bit,
            };
            current <<= 1;
        } else {
            neighbors = SameDepthNeighbors {
                left: edge << 1,
                right: current << 1,
                edge: left << 1,
            };
            current = current << 1 | 1;
        }
    }

    neighbors
}

/// The neighbor across the longest edge, or `0` on the patch boundary.
#[inline]
pub fn edge_neighbor(node: u32) -> u32 {
    same_depth_neighbors(node).edge
}

/// The two nodes whose children form the diamond the node belongs to.
///
/// Without an edge neighbor the diamond is cut by the boundary and `top == base`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DiamondParent {
    pub base: u32,
    pub top: u32,
}

impl DiamondParent {
    /// The children of both parents, without duplicates on the boundary.
    pub fn members(&self) -> impl Iterator<Item = u32> {
        let top = (self.top != self.base).then_some(self.top);

        [self.base]
            .into_iter()
            .chain(top)
            .flat_map(|parent| [cbt::left_child(parent), cbt::right_child(parent)])
    }
}

pub fn diamond_parent(node: u32) -> DiamondParent {
    let base = cbt::parent(node);
    let top = if base > cbt::ROOT {
        edge_neighbor(base)
    } else {
        0
    };

    DiamondParent {
        base,
        top: if top == 0 { base } else { top },
    }
}

/// Twice the signed area of the triangle.
#[inline]
pub fn signed_double_area(triangle: &Triangle) -> f32 {
    let [v0, v1, v2] = *triangle;
    (v1 - v0).perp_dot(v2 - v0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use itertools::Itertools;

    fn assert_vec_eq(a: Vec2, b: Vec2) {
        assert!(a.abs_diff_eq(b, 1e-6), "{a} != {b}");
    }

    #[test]
    fn decode_first_levels() {
        let [v0, v1, v2] = decode(2);
        assert_vec_eq(v0, Vec2::new(0.0, 1.0));
        assert_vec_eq(v1, Vec2::new(0.0, 0.0));
        assert_vec_eq(v2, Vec2::new(1.0, 0.0));

        let [v0, v1, v2] = decode_raw(5);
        assert_vec_eq(v0, Vec2::new(0.0, 0.0));
        assert_vec_eq(v1, Vec2::new(0.5, 0.5));
        assert_vec_eq(v2, Vec2::new(1.0, 0.0));
    }

    #[test]
    fn every_triangle_is_counter_clockwise() {
        for node in 2..cbt::first_node(12) {
            assert!(signed_double_area(&decode(node)) > 0.0, "node {node}");
        }
    }

    #[test]
    fn children_tile_their_parent() {
        for node in 2..cbt::first_node(10) {
            let parent = signed_double_area(&decode(node));
            let left = signed_double_area(&decode(cbt::left_child(node)));
            let right = signed_double_area(&decode(cbt::right_child(node)));

            assert!((parent - left - right).abs() < 1e-6);
            assert!((left - right).abs() < 1e-6);
        }
    }

    #[test]
    fn neighbors_of_the_second_level() {
        assert_eq!(
            same_depth_neighbors(4),
            SameDepthNeighbors {
                left: 5,
                right: 7,
                edge: 0
            }
        );
        assert_eq!(
            same_depth_neighbors(5),
            SameDepthNeighbors {
                left: 6,
                right: 4,
                edge: 0
            }
        );
        assert_eq!(edge_neighbor(2), 3);
        assert_eq!(edge_neighbor(8), 15);
        assert_eq!(edge_neighbor(9), 10);
    }

    #[test]
    fn neighbors_are_symmetric_and_share_edges() {
        let edges = |triangle: Triangle| {
            let [v0, v1, v2] = triangle;
            [(v1, v2), (v0, v1), (v0, v2)]
        };
        let same_edge = |(a, b): (Vec2, Vec2), (c, d): (Vec2, Vec2)| {
            (a.abs_diff_eq(c, 1e-6) && b.abs_diff_eq(d, 1e-6))
                || (a.abs_diff_eq(d, 1e-6) && b.abs_diff_eq(c, 1e-6))
        };

        for node in 2..cbt::first_node(9) {
            let neighbors = same_depth_neighbors(node);
            let own = edges(decode_raw(node));

            for (index, neighbor) in [neighbors.left, neighbors.right, neighbors.edge]
                .into_iter()
                .enumerate()
            {
                if neighbor == 0 {
                    continue;
                }

                assert_eq!(cbt::depth(neighbor), cbt::depth(node));

                let back = same_depth_neighbors(neighbor);
                assert!(
                    [back.left, back.right, back.edge].contains(&node),
                    "{neighbor} does not see {node}"
                );
                assert!(
                    edges(decode_raw(neighbor))
                        .into_iter()
                        .any(|edge| same_edge(edge, own[index])),
                    "{node} and {neighbor} share no edge"
                );
            }

            if neighbors.edge != 0 {
                assert_eq!(edge_neighbor(neighbors.edge), node);
            }
        }
    }

    #[test]
    fn boundary_edges_lie_on_the_square() {
        let on_boundary = |v: Vec2| v.x == 0.0 || v.y == 0.0 || v.x == 1.0 || v.y == 1.0;

        for node in 2..cbt::first_node(8) {
            let [v0, v1, v2] = decode_raw(node);
            let neighbors = same_depth_neighbors(node);

            for (neighbor, a, b) in [
                (neighbors.left, v1, v2),
                (neighbors.right, v0, v1),
                (neighbors.edge, v0, v2),
            ] {
                let along_boundary = on_boundary(a)
                    && on_boundary(b)
                    && (a.x == b.x && (a.x == 0.0 || a.x == 1.0)
                        || a.y == b.y && (a.y == 0.0 || a.y == 1.0));

                assert_eq!(neighbor == 0, along_boundary, "node {node}");
            }
        }
    }

    #[test]
    fn diamonds() {
        assert_eq!(diamond_parent(8), DiamondParent { base: 4, top: 4 });
        assert_eq!(diamond_parent(10), DiamondParent { base: 5, top: 5 });
        assert_eq!(diamond_parent(4), DiamondParent { base: 2, top: 3 });
        assert_eq!(diamond_parent(30), DiamondParent { base: 15, top: 8 });

        let members = diamond_parent(16).members().collect_vec();
        assert_eq!(members, vec![16, 17, 30, 31]);

        let members = diamond_parent(8).members().collect_vec();
        assert_eq!(members, vec![8, 9]);
    }
}
