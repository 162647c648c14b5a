use crate::{
    cbt::{bitfield::BitfieldStore, sum_reduction::SumReductionTree},
    compute::{dispatch_indirect, Dispatcher, IndirectBuffer, SumReductionRebuildPipeline},
    height::TerrainSurface,
    lod::{LodConfig, LodDecision, LodEvaluator, LodView},
    subdivision::{ConformingSubdivision, UpdatePhase},
    terrain::TerrainConfig,
    vertex::{TerrainVertex, VertexGenerationPipeline},
};
use anyhow::Result;
use bevy::log::{debug, info};
use std::sync::atomic::{AtomicU32, Ordering};

/// The distance the view has to move to count as moving.
const POSITION_THRESHOLD: f32 = 0.1;
/// The change of the clip plane normals that counts as turning.
const ROTATION_THRESHOLD: f32 = 0.001;
/// The number of unchanged passes with a static view after which the tree is converged.
const CONVERGENCE_FRAMES: u32 = 4;
/// The maximum number of consecutive frames skipped while converged.
const MAX_SKIP_FRAMES: u32 = 30;

/// What a subdivision pass did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SubdivisionStats {
    pub phase: UpdatePhase,
    /// The number of leaves that requested a split.
    pub splits: u32,
    /// The number of diamonds merged, counted once per member that merged it.
    pub merges: u32,
    /// The leaf count after the rebuild.
    pub leaf_count: u32,
}

impl SubdivisionStats {
    pub fn changed(&self) -> bool {
        self.splits > 0 || self.merges > 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Updated(SubdivisionStats),
    /// The view was static and the tree converged, so the passes were skipped.
    Skipped,
}

/// Tracks whether the view is static to skip the passes of converged frames.
#[derive(Default)]
struct ViewMotion {
    previous: Option<LodView>,
    static_frames: u32,
    skipped_frames: u32,
}

impl ViewMotion {
    fn observe(&mut self, view: &LodView) {
        let moved = self.previous.map_or(true, |previous| {
            view.moved_since(&previous, POSITION_THRESHOLD, ROTATION_THRESHOLD)
        });

        if moved {
            self.previous = Some(*view);
            self.static_frames = 0;
        } else {
            self.static_frames += 1;
        }
    }
}

/// Owns the tree of one terrain patch and runs the per frame kernel sequence on it.
///
/// Every frame the dispatcher sizes the level of detail pass, which mutates the bitfield
/// through the conforming subdivision. Then the sum reduction is rebuilt and the dispatcher
/// sizes the vertex generation from the new leaf count.
pub struct CbtTessellator {
    bitfield: BitfieldStore,
    tree: SumReductionTree,
    indirect: IndirectBuffer,
    dispatcher: Dispatcher,
    vertices: Vec<TerrainVertex>,
    init_depth: u32,
    frame: u32,
    motion: ViewMotion,
    skip_static_frames: bool,
    force_update: bool,
}

impl CbtTessellator {
    pub fn new(config: &TerrainConfig) -> Result<Self> {
        config.validate()?;

        let mut tessellator = Self {
            bitfield: BitfieldStore::new(config.max_depth),
            tree: SumReductionTree::new(config.max_depth),
            indirect: IndirectBuffer::new(),
            dispatcher: Dispatcher::new(config.workgroup_size),
            vertices: Vec::new(),
            init_depth: config.init_depth,
            frame: 0,
            motion: ViewMotion::default(),
            skip_static_frames: config.skip_static_frames,
            force_update: true,
        };
        tessellator.reset();

        info!(
            "Created a terrain tessellation with a maximum depth of {} \
             ({} bitfield words, {} leaves).",
            config.max_depth,
            tessellator.bitfield.word_count(),
            tessellator.leaf_count()
        );

        Ok(tessellator)
    }

    /// Restores the uniform subdivision of the initial depth.
    pub fn reset(&mut self) {
        self.bitfield.initialize_uniform(self.init_depth);
        self.rebuild();
        self.frame = 0;
        self.force_update = true;
    }

    fn rebuild(&mut self) {
        SumReductionRebuildPipeline::run(&mut self.tree, &self.bitfield);
        self.dispatcher.run(&self.tree, &self.indirect);
    }

    #[inline]
    pub fn leaf_count(&self) -> u32 {
        self.tree.leaf_count()
    }

    pub fn max_depth(&self) -> u32 {
        self.bitfield.max_depth()
    }

    pub fn bitfield(&self) -> &BitfieldStore {
        &self.bitfield
    }

    pub fn tree(&self) -> &SumReductionTree {
        &self.tree
    }

    pub fn indirect_buffer(&self) -> &IndirectBuffer {
        &self.indirect
    }

    /// The vertex stream of the last call to [`Self::generate_vertices`].
    pub fn vertices(&self) -> &[TerrainVertex] {
        &self.vertices
    }

    /// The number of subdivision passes run since the last reset.
    pub fn frame(&self) -> u32 {
        self.frame
    }

    /// The phase of the next subdivision pass.
    pub fn phase(&self) -> UpdatePhase {
        UpdatePhase::of_frame(self.frame)
    }

    pub fn set_skip_static_frames(&mut self, enabled: bool) {
        self.skip_static_frames = enabled;
    }

    /// Forces the next update to run even if the view is static.
    pub fn request_update(&mut self) {
        self.force_update = true;
    }

    /// Runs a single subdivision pass over the current leaves, followed by the rebuild.
    ///
    /// Only the decisions matching `phase` are applied. With a `spread_factor` above one
    /// each leaf is only evaluated on every `spread_factor`-th pair of split and merge
    /// passes.
    pub fn subdivide<F>(
        &mut self,
        phase: UpdatePhase,
        min_depth: u32,
        spread_factor: u32,
        decide: F,
    ) -> SubdivisionStats
    where
        F: Fn(u32) -> LodDecision + Sync,
    {
        let splits = AtomicU32::new(0);
        let merges = AtomicU32::new(0);
        let spread_factor = spread_factor.max(1);
        // both phases of a frame pair evaluate the same subset of leaves
        let spread_slot = (self.frame / 2) % spread_factor;

        {
            let tree = &self.tree;
            let subdivision = ConformingSubdivision::new(&self.bitfield, tree, min_depth);

            dispatch_indirect(&self.indirect, self.dispatcher.workgroup_size, |invocation| {
                if invocation >= tree.leaf_count() || invocation % spread_factor != spread_slot {
                    return;
                }

                let leaf = tree.leaf_index_to_heap_index(invocation);

                match (phase, decide(leaf)) {
                    (UpdatePhase::Split, LodDecision::Split) => {
                        subdivision.split(leaf);
                        splits.fetch_add(1, Ordering::Relaxed);
                    }
                    (UpdatePhase::Merge, LodDecision::Merge) => {
                        if subdivision.merge(leaf) {
                            merges.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    _ => {}
                }
            });
        }

        self.rebuild();
        self.frame = self.frame.wrapping_add(1);

        SubdivisionStats {
            phase,
            splits: splits.into_inner(),
            merges: merges.into_inner(),
            leaf_count: self.leaf_count(),
        }
    }

    /// Decides whether the passes of this frame can be skipped.
    fn should_skip(&mut self, view: &LodView, spread_factor: u32) -> bool {
        self.motion.observe(view);

        let converged = self.motion.static_frames > CONVERGENCE_FRAMES * spread_factor.max(1);
        let skip = self.skip_static_frames
            && !self.force_update
            && converged
            && self.motion.skipped_frames < MAX_SKIP_FRAMES;

        if skip {
            self.motion.skipped_frames += 1;
        } else {
            self.motion.skipped_frames = 0;
            self.force_update = false;
        }

        skip
    }

    /// Adapts the tree to the view with one level of detail pass.
    pub fn update(
        &mut self,
        config: &LodConfig,
        view: &LodView,
        surface: &TerrainSurface,
    ) -> FrameOutcome {
        if self.should_skip(view, config.spread_factor) {
            return FrameOutcome::Skipped;
        }

        let phase = self.phase();
        let evaluator = LodEvaluator::new(config, view, *surface, self.max_depth());

        let stats = self.subdivide(phase, config.min_depth, config.spread_factor, |leaf| {
            evaluator.decide(leaf, phase)
        });

        // a pass that changed the tree restarts the convergence
        if stats.changed() {
            self.motion.static_frames = 0;
        }

        debug!(
            "Terrain {:?} pass: {} splits, {} merges, {} leaves.",
            stats.phase, stats.splits, stats.merges, stats.leaf_count
        );

        FrameOutcome::Updated(stats)
    }

    /// Decodes the current leaves into the vertex stream.
    pub fn generate_vertices(&mut self, surface: &TerrainSurface) -> &[TerrainVertex] {
        VertexGenerationPipeline::run(&mut self.vertices, &self.tree, &self.indirect, surface);
        &self.vertices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cbt,
        height::{FlatHeight, HeightMap},
        leb,
        subdivision::checks::{assert_conforming, assert_tiles_square},
    };
    use bevy::math::{Mat4, Vec2, Vec3};
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn config(max_depth: u32, init_depth: u32) -> TerrainConfig {
        TerrainConfig {
            size: 1000.0,
            max_depth,
            init_depth,
            lod: LodConfig {
                min_depth: init_depth,
                max_depth,
                spread_factor: 1,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn view(position: Vec3, target: Vec3) -> LodView {
        let clip_from_view = Mat4::perspective_infinite_reverse_rh(1.0, 16.0 / 9.0, 0.1);
        let clip_from_local = clip_from_view * Mat4::look_at_rh(position, target, Vec3::Y);

        LodView::new(position, &clip_from_local, &clip_from_view, 720.0)
    }

    fn leaves(tessellator: &CbtTessellator) -> Vec<u32> {
        tessellator.tree().iter_leaves().collect()
    }

    #[test]
    fn initial_state() {
        let tessellator = CbtTessellator::new(&config(12, 6)).unwrap();

        assert_eq!(tessellator.leaf_count(), 64);
        assert_eq!(tessellator.indirect_buffer().dispatch_args().x, 1);
        assert_eq!(tessellator.indirect_buffer().draw_args().vertex_count, 192);
        assert_eq!(leaves(&tessellator), (64..128).collect::<Vec<_>>());
    }

    #[test]
    fn invalid_configurations_are_rejected() {
        assert!(CbtTessellator::new(&config(5, 3)).is_err());
        assert!(CbtTessellator::new(&config(27, 6)).is_err());
        assert!(CbtTessellator::new(&config(10, 11)).is_err());
    }

    #[test]
    fn splitting_every_leaf() {
        let mut tessellator = CbtTessellator::new(&config(12, 6)).unwrap();

        let stats = tessellator.subdivide(UpdatePhase::Split, 6, 1, |_| LodDecision::Split);

        assert_eq!(stats.splits, 64);
        assert_eq!(stats.leaf_count, 128);
        assert_eq!(tessellator.tree().node_count(cbt::ROOT), 128);
        assert_eq!(tessellator.indirect_buffer().dispatch_args().x, 2);
        assert_eq!(tessellator.indirect_buffer().draw_args().vertex_count, 384);
        assert_tiles_square(&leaves(&tessellator));
        assert_conforming(&leaves(&tessellator));
    }

    #[test]
    fn decisions_of_the_other_phase_are_ignored() {
        let mut tessellator = CbtTessellator::new(&config(12, 6)).unwrap();

        let stats = tessellator.subdivide(UpdatePhase::Merge, 6, 1, |_| LodDecision::Split);

        assert!(!stats.changed());
        assert_eq!(stats.leaf_count, 64);
    }

    #[test]
    fn spread_factor_evaluates_a_subset() {
        let mut tessellator = CbtTessellator::new(&config(12, 6)).unwrap();

        let stats = tessellator.subdivide(UpdatePhase::Split, 6, 4, |_| LodDecision::Split);

        assert_eq!(stats.splits, 16);
        assert_conforming(&leaves(&tessellator));
    }

    #[test]
    fn random_split_and_merge_sequences_keep_the_invariants() {
        let mut rng = StdRng::seed_from_u64(1234);
        let mut tessellator = CbtTessellator::new(&config(14, 4)).unwrap();

        for _ in 0..30 {
            let phase = tessellator.phase();
            let seed: u64 = rng.random();
            let probability = rng.random_range(0.05..0.6);

            tessellator.subdivide(phase, 4, 1, |leaf| {
                let mut rng = StdRng::seed_from_u64(seed ^ leaf as u64);

                match (phase, rng.random_bool(probability)) {
                    (UpdatePhase::Split, true) => LodDecision::Split,
                    (UpdatePhase::Merge, true) => LodDecision::Merge,
                    _ => LodDecision::Keep,
                }
            });

            let leaves = leaves(&tessellator);
            assert_eq!(leaves.len() as u32, tessellator.leaf_count());
            assert!(leaves.iter().all(|&leaf| tessellator.bitfield().is_leaf(leaf)));
            assert_tiles_square(&leaves);
            assert_conforming(&leaves);
        }
    }

    #[test]
    fn refines_towards_the_viewer_and_stays_stable() {
        let config = config(16, 4);
        let sampler = FlatHeight(0.0);
        let surface = TerrainSurface::new(config.size, &sampler);
        let view = view(Vec3::new(0.0, 20.0, 0.0), Vec3::new(0.0, 0.0, -100.0));

        let mut tessellator = CbtTessellator::new(&config).unwrap();
        tessellator.set_skip_static_frames(false);

        for _ in 0..80 {
            tessellator.update(&config.lod, &view, &surface);
        }

        let converged = leaves(&tessellator);
        assert!(converged.len() > 16);
        assert_conforming(&converged);

        // leaves in view close to the viewer are finer than those behind it
        let depth_at = |uv: Vec2| {
            let area = |a: Vec2, b: Vec2, c: Vec2| (b - a).perp_dot(c - a);

            converged
                .iter()
                .copied()
                .find(|&leaf| {
                    let [v0, v1, v2] = leb::decode(leaf);
                    area(v0, v1, uv) >= 0.0 && area(v1, v2, uv) >= 0.0 && area(v2, v0, uv) >= 0.0
                })
                .map(cbt::depth)
                .unwrap()
        };
        assert!(depth_at(Vec2::new(0.5, 0.44)) > depth_at(Vec2::new(0.99, 0.99)));

        // hysteresis keeps the converged tree unchanged over the following frames
        for _ in 0..10 {
            match tessellator.update(&config.lod, &view, &surface) {
                FrameOutcome::Updated(stats) => assert!(!stats.changed(), "{stats:?}"),
                FrameOutcome::Skipped => {}
            }
            assert_eq!(leaves(&tessellator), converged);
        }
    }

    #[test]
    fn holding_the_view_at_the_target_edge_length_is_stable() {
        let mut config = config(16, 6);
        config.lod.min_depth = 2;
        let sampler = FlatHeight(0.0);
        let surface = TerrainSurface::new(config.size, &sampler);

        // high above the center, all leaves of the initial depth look about the same size
        let position = Vec3::new(0.0, config.size, 0.0);
        let clip_from_view = Mat4::perspective_infinite_reverse_rh(1.0, 1.0, 0.1);
        let view_from_local = Mat4::look_at_rh(position, Vec3::ZERO, Vec3::NEG_Z);
        let view = LodView::new(
            position,
            &(clip_from_view * view_from_local),
            &clip_from_view,
            720.0,
        );

        let probe_config = config.lod.clone();
        let target = LodEvaluator::new(&probe_config, &view, surface, 16).edge_pixels(64);
        config.lod.set_target_edge_pixels(target);

        let mut tessellator = CbtTessellator::new(&config).unwrap();
        tessellator.set_skip_static_frames(false);
        let initial = leaves(&tessellator);

        for frame in 0..10 {
            match tessellator.update(&config.lod, &view, &surface) {
                FrameOutcome::Updated(stats) => {
                    assert!(!stats.changed(), "frame {frame}: {stats:?}")
                }
                FrameOutcome::Skipped => panic!("frame {frame} was skipped"),
            }
            assert_eq!(leaves(&tessellator), initial);
        }
    }

    #[test]
    fn static_views_skip_frames_once_converged() {
        let config = config(12, 6);
        let sampler = HeightMap::procedural(17, 3, 0.0, 50.0).unwrap();
        let surface = TerrainSurface::new(config.size, &sampler);
        let view = view(Vec3::new(100.0, 300.0, 100.0), Vec3::ZERO);

        let mut tessellator = CbtTessellator::new(&config).unwrap();

        let outcomes: Vec<FrameOutcome> = (0..120)
            .map(|_| tessellator.update(&config.lod, &view, &surface))
            .collect();
        assert!(outcomes.contains(&FrameOutcome::Skipped));
        assert!(matches!(outcomes[0], FrameOutcome::Updated(_)));

        // moving the view resumes the passes
        let moved = self::view(Vec3::new(-200.0, 300.0, 100.0), Vec3::ZERO);
        assert!(matches!(
            tessellator.update(&config.lod, &moved, &surface),
            FrameOutcome::Updated(_)
        ));

        // and so does an explicit request
        for _ in 0..20 {
            tessellator.update(&config.lod, &moved, &surface);
        }
        tessellator.request_update();
        assert!(matches!(
            tessellator.update(&config.lod, &moved, &surface),
            FrameOutcome::Updated(_)
        ));
    }

    #[test]
    fn vertex_stream_matches_the_leaves() {
        let config = config(12, 6);
        let sampler = FlatHeight(0.0);
        let surface = TerrainSurface::new(config.size, &sampler);

        let mut tessellator = CbtTessellator::new(&config).unwrap();
        tessellator.subdivide(UpdatePhase::Split, 6, 1, |leaf| {
            if leaf % 3 == 0 {
                LodDecision::Split
            } else {
                LodDecision::Keep
            }
        });

        let leaf_count = tessellator.leaf_count() as usize;
        assert_eq!(tessellator.generate_vertices(&surface).len(), 3 * leaf_count);
        assert_eq!(tessellator.vertices().len(), 3 * leaf_count);
    }
}
