use crate::height::{noise::TerrainNoise, HeightSampler};
use anyhow::{ensure, Context, Result};
use bevy::{log::info, math::Vec2};
use image::DynamicImage;
use ndarray::Array2;
use std::path::Path;

/// A square grid of normalized heights, sampled bilinearly.
///
/// The samples cover the unit square including its border, so that the sample `(0, 0)` lies
/// at `uv = (0, 0)` and the sample `(n - 1, n - 1)` at `uv = (1, 1)`. A normalized value of
/// zero maps to `min_altitude` and a value of one to `max_altitude`.
#[derive(Clone, Debug)]
pub struct HeightMap {
    /// Indexed as `[[y, x]]`.
    data: Array2<f32>,
    pub min_altitude: f32,
    pub max_altitude: f32,
}

impl HeightMap {
    /// Creates a height map from normalized samples in `[0, 1]`.
    pub fn new(data: Array2<f32>, min_altitude: f32, max_altitude: f32) -> Result<Self> {
        ensure!(
            data.nrows() >= 2 && data.nrows() == data.ncols(),
            "A height map has to be square with at least two samples per side, got {}x{}.",
            data.ncols(),
            data.nrows()
        );
        ensure!(
            min_altitude <= max_altitude,
            "The minimum altitude {min_altitude} exceeds the maximum altitude {max_altitude}."
        );

        Ok(Self {
            data,
            min_altitude,
            max_altitude,
        })
    }

    /// Converts a grayscale image into a height map.
    /// Images with more than 8 bits per channel keep their full precision.
    pub fn from_image(image: &DynamicImage, min_altitude: f32, max_altitude: f32) -> Result<Self> {
        let image = image.to_luma16();
        let (width, height) = image.dimensions();

        let data = Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
            image.get_pixel(x as u32, y as u32).0[0] as f32 / u16::MAX as f32
        });

        Self::new(data, min_altitude, max_altitude)
    }

    /// Loads a height map from an 8 or 16 bit grayscale image file.
    pub fn load(path: impl AsRef<Path>, min_altitude: f32, max_altitude: f32) -> Result<Self> {
        let path = path.as_ref();

        let image = image::open(path)
            .with_context(|| format!("Failed to load the height map {}.", path.display()))?;
        let height_map = Self::from_image(&image, min_altitude, max_altitude)
            .with_context(|| format!("Invalid height map {}.", path.display()))?;

        info!(
            "Loaded height map: {} ({}x{})",
            path.display(),
            height_map.resolution(),
            height_map.resolution()
        );

        Ok(height_map)
    }

    /// Generates a height map from fractal Perlin noise with a ridge layer, varied by `seed`.
    pub fn procedural(
        resolution: usize,
        seed: u32,
        min_altitude: f32,
        max_altitude: f32,
    ) -> Result<Self> {
        const BASE_SCALE: f32 = 4.0;

        let noise = TerrainNoise::new(seed);
        let data = Array2::from_shape_fn((resolution, resolution), |(y, x)| {
            noise.sample(Vec2::new(x as f32, y as f32) / resolution as f32 * BASE_SCALE)
        });

        info!("Generated procedural height map ({resolution}x{resolution}, seed={seed})");

        Self::new(data, min_altitude, max_altitude)
    }

    /// The number of samples per side.
    #[inline]
    pub fn resolution(&self) -> usize {
        self.data.nrows()
    }

    /// The normalized samples, indexed as `[[y, x]]`.
    pub fn data(&self) -> &Array2<f32> {
        &self.data
    }

    /// Samples the normalized height bilinearly, clamping `uv` to the unit square.
    pub fn sample_normalized(&self, uv: Vec2) -> f32 {
        let last = (self.resolution() - 1) as f32;
        let texel = uv.clamp(Vec2::ZERO, Vec2::ONE) * last;

        let base = texel.floor().min(Vec2::splat(last - 1.0));
        let fraction = texel - base;
        let (x, y) = (base.x as usize, base.y as usize);

        let top = self.data[[y, x]] * (1.0 - fraction.x) + self.data[[y, x + 1]] * fraction.x;
        let bottom =
            self.data[[y + 1, x]] * (1.0 - fraction.x) + self.data[[y + 1, x + 1]] * fraction.x;

        top * (1.0 - fraction.y) + bottom * fraction.y
    }

    #[inline]
    fn altitude(&self, normalized: f32) -> f32 {
        self.min_altitude + normalized * (self.max_altitude - self.min_altitude)
    }
}

impl HeightSampler for HeightMap {
    fn height(&self, uv: Vec2) -> f32 {
        self.altitude(self.sample_normalized(uv))
    }

    /// Central differences over one texel, one-sided on the border.
    fn gradient(&self, uv: Vec2) -> Vec2 {
        let step = 1.0 / (self.resolution() - 1) as f32;

        let difference = |axis: Vec2| {
            let lower = (uv - axis * step).clamp(Vec2::ZERO, Vec2::ONE);
            let upper = (uv + axis * step).clamp(Vec2::ZERO, Vec2::ONE);
            let distance = (upper - lower).dot(axis);

            if distance > 0.0 {
                (self.height(upper) - self.height(lower)) / distance
            } else {
                0.0
            }
        };

        Vec2::new(difference(Vec2::X), difference(Vec2::Y))
    }

    fn height_range(&self) -> (f32, f32) {
        (self.min_altitude, self.max_altitude)
    }
}
