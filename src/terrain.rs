//! Types for configuring terrains.

use crate::{
    cbt,
    compute::DEFAULT_WORKGROUP_SIZE,
    height::{HeightMap, HeightSampler, TerrainSurface},
    lod::{LodConfig, LodView},
    tessellation::{CbtTessellator, FrameOutcome},
    vertex::TerrainVertex,
};
use anyhow::{ensure, Context, Result};
use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// The configuration of a terrain, loadable from RON.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainConfig {
    /// The side length of the square terrain patch in world units.
    pub size: f32,
    /// The altitude range of generated height maps.
    pub height_scale: f32,
    /// The deepest level of the tree, which determines the size of the bitfield.
    pub max_depth: u32,
    /// The depth of the uniform subdivision the tree starts with.
    pub init_depth: u32,
    /// The number of invocations per workgroup of the per leaf passes.
    pub workgroup_size: u32,
    /// Skips the passes of frames in which neither the view nor the tree changed.
    pub skip_static_frames: bool,
    pub lod: LodConfig,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            size: 16384.0,
            height_scale: 1024.0,
            max_depth: 20,
            init_depth: 6,
            workgroup_size: DEFAULT_WORKGROUP_SIZE,
            skip_static_frames: true,
            lod: LodConfig::default(),
        }
    }
}

impl TerrainConfig {
    pub fn from_ron(source: &str) -> Result<Self> {
        let config: Self = ron::from_str(source).context("Failed to parse the terrain config.")?;
        config.validate()?;

        Ok(config)
    }

    pub fn load_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let source = fs::read_to_string(path)
            .with_context(|| format!("Failed to read the terrain config {}.", path.display()))?;

        Self::from_ron(&source)
            .with_context(|| format!("Invalid terrain config {}.", path.display()))
    }

    pub fn to_ron(&self) -> Result<String> {
        Ok(ron::ser::to_string_pretty(
            self,
            ron::ser::PrettyConfig::default(),
        )?)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            (cbt::MIN_MAX_DEPTH..=cbt::MAX_MAX_DEPTH).contains(&self.max_depth),
            "The maximum depth has to lie in {}..={}, got {}.",
            cbt::MIN_MAX_DEPTH,
            cbt::MAX_MAX_DEPTH,
            self.max_depth
        );
        ensure!(
            (1..=self.max_depth).contains(&self.init_depth),
            "The initial depth has to lie in 1..={}, got {}.",
            self.max_depth,
            self.init_depth
        );
        ensure!(
            self.lod.min_depth <= self.max_depth,
            "The minimum lod depth {} exceeds the maximum depth {}.",
            self.lod.min_depth,
            self.max_depth
        );
        ensure!(self.workgroup_size > 0, "The workgroup size has to be positive.");
        ensure!(
            self.size > 0.0,
            "The terrain size has to be positive, got {}.",
            self.size
        );

        self.lod.validate()
    }
}

/// A terrain patch whose mesh is tessellated every frame for the
/// [`TerrainView`](crate::terrain_view::TerrainView).
///
/// The patch lies centered at the origin of its transform in the local xz plane.
#[derive(Component)]
#[require(Transform, Visibility)]
pub struct Terrain {
    config: TerrainConfig,
    sampler: Box<dyn HeightSampler>,
    tessellator: CbtTessellator,
}

impl Terrain {
    pub fn new(config: TerrainConfig, sampler: impl HeightSampler + 'static) -> Result<Self> {
        let tessellator = CbtTessellator::new(&config)?;

        Ok(Self {
            config,
            sampler: Box::new(sampler),
            tessellator,
        })
    }

    /// Creates a terrain over a procedural height map spanning the height scale.
    pub fn procedural(config: TerrainConfig, resolution: usize, seed: u32) -> Result<Self> {
        let height_map = HeightMap::procedural(resolution, seed, 0.0, config.height_scale)?;
        Self::new(config, height_map)
    }

    pub fn config(&self) -> &TerrainConfig {
        &self.config
    }

    pub fn tessellator(&self) -> &CbtTessellator {
        &self.tessellator
    }

    pub fn tessellator_mut(&mut self) -> &mut CbtTessellator {
        &mut self.tessellator
    }

    pub fn surface(&self) -> TerrainSurface {
        TerrainSurface::new(self.config.size, self.sampler.as_ref())
    }

    /// The height of the terrain below the position in the local space of the terrain.
    pub fn height_at(&self, position: Vec3) -> Option<f32> {
        self.surface().height_at(position)
    }

    /// Replaces the level of detail parameters and forces the next update.
    pub fn set_lod(&mut self, lod: LodConfig) -> Result<()> {
        lod.validate()?;

        self.config.lod = lod;
        self.tessellator.request_update();

        Ok(())
    }

    pub fn set_sampler(&mut self, sampler: impl HeightSampler + 'static) {
        self.sampler = Box::new(sampler);
        self.tessellator.request_update();
    }

    /// Runs the level of detail pass of this frame.
    pub fn update(&mut self, view: &LodView) -> FrameOutcome {
        let surface = TerrainSurface::new(self.config.size, self.sampler.as_ref());
        self.tessellator.update(&self.config.lod, view, &surface)
    }

    pub fn generate_vertices(&mut self) -> &[TerrainVertex] {
        let surface = TerrainSurface::new(self.config.size, self.sampler.as_ref());
        self.tessellator.generate_vertices(&surface)
    }
}
