use bevy::math::Vec2;
use noise::{Fbm, MultiFractal, NoiseFn, Perlin, RidgedMulti};

/// Rolling hills blended with sharp ridges, both built from seeded Perlin octaves.
#[derive(Clone, Debug)]
pub struct TerrainNoise {
    hills: Fbm<Perlin>,
    ridges: RidgedMulti<Perlin>,
}

impl TerrainNoise {
    const HILL_WEIGHT: f64 = 0.7;
    const RIDGE_WEIGHT: f64 = 0.3;

    pub fn new(seed: u32) -> Self {
        let hills = Fbm::<Perlin>::new(seed)
            .set_octaves(6)
            .set_frequency(1.0)
            .set_persistence(0.5)
            .set_lacunarity(2.0);
        let ridges = RidgedMulti::<Perlin>::new(seed.wrapping_add(1))
            .set_octaves(4)
            .set_frequency(2.0);

        Self { hills, ridges }
    }

    /// The height at `point`, in `[0, 1]`.
    pub fn sample(&self, point: Vec2) -> f32 {
        let point = [point.x as f64, point.y as f64];

        let hills = 0.5 * (self.hills.get(point) + 1.0);
        let ridges = (0.5 * (self.ridges.get(point) + 1.0)).clamp(0.0, 1.0);

        let value = Self::HILL_WEIGHT * hills + Self::RIDGE_WEIGHT * ridges * ridges;

        value.clamp(0.0, 1.0) as f32
    }
}
