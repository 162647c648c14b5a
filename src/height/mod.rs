//! Height sources lifting the unit square of the tree onto the terrain surface.

use bevy::math::{Vec2, Vec3};

pub mod height_map;
pub mod noise;

pub use height_map::HeightMap;

/// The step of the central differences approximating the gradient, in uv units.
pub const GRADIENT_STEP: f32 = 1.0 / 1024.0;

/// Provides the terrain height over the unit square.
///
/// Samplers are queried concurrently from every invocation of a pass.
pub trait HeightSampler: Send + Sync {
    /// The height at `uv` in world units.
    fn height(&self, uv: Vec2) -> f32;

    /// The derivative of the height with respect to `uv`.
    fn gradient(&self, uv: Vec2) -> Vec2 {
        let dx = Vec2::new(GRADIENT_STEP, 0.0);
        let dy = Vec2::new(0.0, GRADIENT_STEP);

        Vec2::new(
            self.height(uv + dx) - self.height(uv - dx),
            self.height(uv + dy) - self.height(uv - dy),
        ) / (2.0 * GRADIENT_STEP)
    }

    /// The lowest and the highest height the sampler may return.
    fn height_range(&self) -> (f32, f32);
}

/// A plane of constant height.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FlatHeight(pub f32);

impl HeightSampler for FlatHeight {
    fn height(&self, _uv: Vec2) -> f32 {
        self.0
    }

    fn gradient(&self, _uv: Vec2) -> Vec2 {
        Vec2::ZERO
    }

    fn height_range(&self) -> (f32, f32) {
        (self.0, self.0)
    }
}

/// The terrain surface in its local space.
///
/// The unit square is centered at the origin and spans `size` world units along the x and z
/// axes, with `u` increasing along x and `v` along z. The height is along y.
#[derive(Clone, Copy)]
pub struct TerrainSurface<'a> {
    pub size: f32,
    pub sampler: &'a dyn HeightSampler,
}

impl<'a> TerrainSurface<'a> {
    pub fn new(size: f32, sampler: &'a dyn HeightSampler) -> Self {
        Self { size, sampler }
    }

    #[inline]
    pub fn position(&self, uv: Vec2) -> Vec3 {
        let xz = (uv - 0.5) * self.size;
        Vec3::new(xz.x, self.sampler.height(uv), xz.y)
    }

    pub fn normal(&self, uv: Vec2) -> Vec3 {
        let slope = self.sampler.gradient(uv) / self.size;
        Vec3::new(-slope.x, 1.0, -slope.y).normalize()
    }

    /// The magnitude of the world space height gradient.
    pub fn slope(&self, uv: Vec2) -> f32 {
        (self.sampler.gradient(uv) / self.size).length()
    }

    /// The uv coordinate below the local position, if it lies on the patch.
    pub fn uv_at(&self, position: Vec3) -> Option<Vec2> {
        let uv = Vec2::new(position.x, position.z) / self.size + 0.5;
        (uv.cmpge(Vec2::ZERO).all() && uv.cmple(Vec2::ONE).all()).then_some(uv)
    }

    /// The height of the terrain below the local position.
    pub fn height_at(&self, position: Vec3) -> Option<f32> {
        self.uv_at(position).map(|uv| self.sampler.height(uv))
    }
}
