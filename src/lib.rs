//! This crate provides the ability to render adaptive height-field terrains, whose triangles
//! are refined and coarsened every frame depending on the position of the camera.
//!
//! # Background
//! There are two critical questions that each adaptive terrain renderer has to solve:
//!
//! ## How to represent the subdivision of the terrain?
//! The square terrain patch is split into two right isosceles triangles, which are recursively
//! bisected along their longest edge (longest edge bisection). Every triangle is a node of a
//! binary tree, and the set of leaves of this tree covers the patch exactly once.
//! The tree is stored as a concurrent binary tree: a flat bitfield marking the leaves plus a
//! sum reduction tree over it, which counts the leaves below every node.
//! Both of these are updated by data parallel passes over all leaves, without any locks,
//! so that thousands of leaves may be split or merged at once.
//! See the [`cbt`] and [`subdivision`] modules for more information.
//!
//! ## How to decide where to refine the terrain?
//! Each leaf is projected onto the screen and split when its edges grow longer than the
//! target length in pixels, or merged with its neighbours when they shrink below it.
//! Leaves outside the view frustum are never refined.
//! Splits are propagated to the neighbours, so that the mesh stays free of cracks.
//! See the [`lod`] and [`tessellation`] modules for more information.
//!
//! The passes are written as compute kernels, which are dispatched over a thread pool
//! (see [`compute`]), and the resulting triangle list is written into the mesh of the
//! terrain entity by the [`CbtTerrainPlugin`](plugin::CbtTerrainPlugin).

pub mod cbt;
pub mod compute;
pub mod debug;
pub mod height;
pub mod leb;
pub mod lod;
pub mod plugin;
pub mod subdivision;
pub mod terrain;
pub mod terrain_view;
pub mod tessellation;
pub mod vertex;

#[allow(missing_docs)]
pub mod prelude {
    #[doc(hidden)]
    pub use crate::{
        debug::{DebugTerrain, TerrainDebugPlugin},
        height::{FlatHeight, HeightMap, HeightSampler},
        lod::LodConfig,
        plugin::{CbtTerrainPlugin, TerrainTessellationSet},
        terrain::{Terrain, TerrainConfig},
        terrain_view::TerrainView,
        tessellation::{CbtTessellator, FrameOutcome},
    };
}
