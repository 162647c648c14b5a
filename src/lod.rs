//! The per leaf level of detail decision.
//!
//! A leaf is split when its longest edge covers more pixels on screen than the split
//! threshold and merged once every triangle of its diamond covers fewer pixels than the
//! merge threshold. Keeping the split threshold at least `√2` times above the merge
//! threshold guarantees that the children of a split never qualify for a merge right away,
//! because bisecting a triangle shortens its longest edge by exactly that factor.

use crate::{
    cbt,
    height::TerrainSurface,
    leb::{self, Triangle},
    subdivision::UpdatePhase,
};
use anyhow::{ensure, Result};
use bevy::math::{Mat4, Vec2, Vec3, Vec4, Vec4Swizzles};
use serde::{Deserialize, Serialize};
use std::f32::consts::SQRT_2;

/// The parameters of the level of detail decision.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LodConfig {
    /// The desired length of a triangle edge on screen, in pixels.
    pub target_edge_pixels: f32,
    /// Leaves with a longer projected edge are split.
    pub split_threshold: f32,
    /// Diamonds whose members all have a shorter projected edge are merged.
    pub merge_threshold: f32,
    /// Leaves at this depth are never merged.
    pub min_depth: u32,
    /// Leaves at this depth are never split.
    pub max_depth: u32,
    /// Derates both thresholds on steep terrain, zero disables it.
    pub slope_weight: f32,
    /// Grows the bounding box of a leaf beyond the height range of the sampler before
    /// culling it, in world units.
    pub vertical_margin: f32,
    /// Every leaf is only evaluated on every `spread_factor`-th pair of split and merge
    /// passes, one is every pair.
    pub spread_factor: u32,
}

impl Default for LodConfig {
    fn default() -> Self {
        Self {
            target_edge_pixels: 16.0,
            split_threshold: 24.0,
            merge_threshold: 8.0,
            min_depth: 6,
            max_depth: 20,
            slope_weight: 0.0,
            vertical_margin: 0.0,
            spread_factor: 2,
        }
    }
}

impl LodConfig {
    pub const SPLIT_FACTOR: f32 = 1.5;
    pub const MERGE_FACTOR: f32 = 0.5;

    /// Derives the thresholds from the target edge length.
    pub fn with_target_edge_pixels(mut self, target_edge_pixels: f32) -> Self {
        self.set_target_edge_pixels(target_edge_pixels);
        self
    }

    pub fn set_target_edge_pixels(&mut self, target_edge_pixels: f32) {
        self.target_edge_pixels = target_edge_pixels;
        self.split_threshold = Self::SPLIT_FACTOR * target_edge_pixels;
        self.merge_threshold = Self::MERGE_FACTOR * target_edge_pixels;
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.target_edge_pixels > 0.0,
            "The target edge length has to be positive, got {}.",
            self.target_edge_pixels
        );
        ensure!(
            self.merge_threshold >= 0.0 && self.split_threshold >= SQRT_2 * self.merge_threshold,
            "The split threshold {} has to be at least √2 times the merge threshold {}.",
            self.split_threshold,
            self.merge_threshold
        );
        ensure!(
            self.min_depth <= self.max_depth,
            "The minimum depth {} exceeds the maximum depth {}.",
            self.min_depth,
            self.max_depth
        );
        ensure!(self.spread_factor > 0, "The spread factor has to be at least one.");
        ensure!(
            self.slope_weight >= 0.0 && self.vertical_margin >= 0.0,
            "The slope weight and the vertical margin must not be negative."
        );

        Ok(())
    }
}

/// The six clip planes of a view, as `(normal, distance)` pointing inwards.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Frustum {
    pub planes: [Vec4; 6],
}

impl Frustum {
    /// Extracts the planes from the rows of the clip from local matrix.
    ///
    /// Assumes a depth range of `[0, w]`. For an infinite reversed projection the far plane
    /// degenerates into one that contains everything.
    pub fn from_clip_from_local(clip_from_local: &Mat4) -> Self {
        let [r0, r1, r2, r3] = [0, 1, 2, 3].map(|index| clip_from_local.row(index));

        let planes = [r3 + r0, r3 - r0, r3 + r1, r3 - r1, r2, r3 - r2].map(|plane| {
            let length = plane.xyz().length();

            if length > 0.0 {
                plane / length
            } else {
                plane
            }
        });

        Self { planes }
    }

    /// Whether the axis aligned box lies at least partially inside every plane.
    pub fn intersects_aabb(&self, min: Vec3, max: Vec3) -> bool {
        self.planes.iter().all(|plane| {
            let normal = plane.xyz();
            let corner = Vec3::select(normal.cmpge(Vec3::ZERO), max, min);

            normal.dot(corner) + plane.w >= 0.0
        })
    }
}

/// The viewer the level of detail is computed for, in the local space of the terrain.
#[derive(Clone, Copy, Debug)]
pub struct LodView {
    pub position: Vec3,
    /// The number of pixels covered by one world unit at a distance of one.
    pub projection_scale: f32,
    pub frustum: Frustum,
}

impl LodView {
    /// `clip_from_view` is the projection matrix, `clip_from_local` additionally contains
    /// the view and the terrain transform.
    pub fn new(
        position: Vec3,
        clip_from_local: &Mat4,
        clip_from_view: &Mat4,
        viewport_height: f32,
    ) -> Self {
        Self {
            position,
            projection_scale: 0.5 * viewport_height * clip_from_view.y_axis.y,
            frustum: Frustum::from_clip_from_local(clip_from_local),
        }
    }

    /// Whether the view moved or turned noticeably since `other`.
    pub(crate) fn moved_since(
        &self,
        other: &LodView,
        position_threshold: f32,
        rotation_threshold: f32,
    ) -> bool {
        self.position.distance(other.position) > position_threshold
            || self.projection_scale != other.projection_scale
            || self
                .frustum
                .planes
                .iter()
                .zip(&other.frustum.planes)
                .any(|(a, b)| !a.xyz().abs_diff_eq(b.xyz(), rotation_threshold))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LodDecision {
    Split,
    Merge,
    Keep,
}

/// Evaluates the level of detail of leaves against a view and the terrain surface.
pub struct LodEvaluator<'a> {
    config: &'a LodConfig,
    view: &'a LodView,
    surface: TerrainSurface<'a>,
    max_depth: u32,
}

impl<'a> LodEvaluator<'a> {
    pub fn new(
        config: &'a LodConfig,
        view: &'a LodView,
        surface: TerrainSurface<'a>,
        tree_depth: u32,
    ) -> Self {
        Self {
            config,
            view,
            surface,
            max_depth: config.max_depth.min(tree_depth),
        }
    }

    fn lift(&self, triangle: &Triangle) -> [Vec3; 3] {
        triangle.map(|uv| self.surface.position(uv))
    }

    /// The projected length of the longest world space edge of the node, in pixels.
    pub fn edge_pixels(&self, node: u32) -> f32 {
        let [a, b, c] = self.lift(&leb::decode(node));

        let (start, end) = [(a, c), (a, b), (b, c)]
            .into_iter()
            .max_by(|(a0, a1), (b0, b1)| {
                a0.distance_squared(*a1)
                    .total_cmp(&b0.distance_squared(*b1))
            })
            .unwrap_or((a, c));

        let distance = self.view.position.distance((start + end) * 0.5);

        start.distance(end) * self.view.projection_scale / distance.max(f32::EPSILON)
    }

    /// Whether the bounding box of the node intersects the view frustum.
    ///
    /// The corners of a triangle say nothing about the heights inside it, so the box spans
    /// the whole height range of the sampler, grown by the vertical margin.
    pub fn is_visible(&self, node: u32) -> bool {
        let [a, b, c] = self.lift(&leb::decode(node));
        let (lowest, highest) = self.surface.sampler.height_range();

        let mut min = a.min(b).min(c);
        let mut max = a.max(b).max(c);
        min.y = min.y.min(lowest) - self.config.vertical_margin;
        max.y = max.y.max(highest) + self.config.vertical_margin;

        self.view.frustum.intersects_aabb(min, max)
    }

    /// The factor dividing both thresholds of the node.
    fn derating(&self, node: u32) -> f32 {
        if self.config.slope_weight == 0.0 {
            return 1.0;
        }

        let [v0, v1, v2] = leb::decode(node);
        let centroid: Vec2 = (v0 + v1 + v2) / 3.0;

        1.0 + self.config.slope_weight * self.surface.slope(centroid)
    }

    pub fn wants_split(&self, node: u32) -> bool {
        cbt::depth(node) < self.max_depth
            && self.edge_pixels(node) > self.config.split_threshold / self.derating(node)
            && self.is_visible(node)
    }

    pub fn wants_merge(&self, node: u32) -> bool {
        cbt::depth(node) > self.config.min_depth
            && self.edge_pixels(node) < self.config.merge_threshold / self.derating(node)
    }

    /// Decides what happens to the leaf in a pass of the given phase.
    ///
    /// A merge is only requested when every member of the diamond of the leaf agrees, so
    /// that all of them reach the same decision.
    pub fn decide(&self, leaf: u32, phase: UpdatePhase) -> LodDecision {
        match phase {
            UpdatePhase::Split if self.wants_split(leaf) => LodDecision::Split,
            UpdatePhase::Merge
                if leb::diamond_parent(leaf)
                    .members()
                    .all(|member| self.wants_merge(member)) =>
            {
                LodDecision::Merge
            }
            _ => LodDecision::Keep,
        }
    }
}
