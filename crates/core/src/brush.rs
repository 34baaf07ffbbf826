//! Sample generation from a source image
//!
//! A [`SampleBrush`] scatters points around a centre with a Gaussian
//! distribution and reads each point's value from an [`ImageSource`].

use crate::constraints::Sample;
use crate::error::SolverError;
use crate::field::Channels;
use nalgebra::Vector2;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::f32::consts::TAU;

/// Anything that can be looked up by normalized position
pub trait ImageSource {
    /// Value at normalized `position`, or `None` outside the image
    fn sample(&self, position: &Vector2<f32>) -> Option<Channels>;
}

/// 8-bit RGBA image in row-major order
#[derive(Debug, Clone)]
pub struct RgbaImage {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
}

impl RgbaImage {
    /// Wrap raw RGBA bytes
    ///
    /// # Errors
    ///
    /// Returns [`SolverError::SizeMismatch`] if `pixels` does not hold
    /// exactly `width·height·4` bytes.
    pub fn new(width: usize, height: usize, pixels: Vec<u8>) -> Result<Self, SolverError> {
        let expected = width * height * 4;
        if pixels.len() != expected {
            return Err(SolverError::SizeMismatch {
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Build an image by evaluating `pixel(x, y)` for every pixel
    pub fn from_fn(
        width: usize,
        height: usize,
        mut pixel: impl FnMut(usize, usize) -> [u8; 4],
    ) -> Self {
        let mut pixels = Vec::with_capacity(width * height * 4);
        for y in 0..height {
            for x in 0..width {
                pixels.extend_from_slice(&pixel(x, y));
            }
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Image width in pixels
    pub fn width(&self) -> usize {
        self.width
    }

    /// Image height in pixels
    pub fn height(&self) -> usize {
        self.height
    }
}

impl ImageSource for RgbaImage {
    fn sample(&self, position: &Vector2<f32>) -> Option<Channels> {
        let px = (position.x * self.width as f32).floor();
        let py = (position.y * self.height as f32).floor();
        if !(px >= 0.0 && py >= 0.0 && px < self.width as f32 && py < self.height as f32) {
            return None;
        }
        let offset = ((py as usize) * self.width + px as usize) * 4;
        let rgba = &self.pixels[offset..offset + 4];
        Some(Channels::new(
            f32::from(rgba[0]) / 255.0,
            f32::from(rgba[1]) / 255.0,
            f32::from(rgba[2]) / 255.0,
            f32::from(rgba[3]) / 255.0,
        ))
    }
}

/// Gaussian spray of samples around a point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleBrush {
    /// Points generated per stroke
    pub count: usize,
    /// Standard deviation in normalized units
    pub sigma: f32,
}

impl Default for SampleBrush {
    fn default() -> Self {
        Self {
            count: 10,
            sigma: 0.1,
        }
    }
}

impl SampleBrush {
    /// Scatter `count` points around `center` and sample `image` at each
    ///
    /// Points that fall outside the image are dropped, so fewer than
    /// `count` samples may come back.
    pub fn scatter<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        center: Vector2<f32>,
        image: &dyn ImageSource,
    ) -> Vec<Sample> {
        (0..self.count)
            .filter_map(|_| {
                let position = center + gaussian_offset(rng) * self.sigma;
                image.sample(&position).map(|value| Sample { position, value })
            })
            .collect()
    }
}

/// Two independent standard normal deviates via Box-Muller
fn gaussian_offset<R: Rng + ?Sized>(rng: &mut R) -> Vector2<f32> {
    // 1 - u keeps the logarithm finite
    let u1 = 1.0 - rng.random::<f32>();
    let u2 = rng.random::<f32>();
    let radius = (-2.0 * u1.ln()).sqrt();
    let angle = TAU * u2;
    Vector2::new(radius * angle.cos(), radius * angle.sin())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn gradient(size: usize) -> RgbaImage {
        RgbaImage::from_fn(size, size, |x, y| {
            let scale = |v: usize| (v * 255 / (size - 1)) as u8;
            [scale(x), scale(y), 0, 255]
        })
    }

    #[test]
    fn test_image_lookup_normalizes_bytes() {
        let image = RgbaImage::new(2, 1, vec![255, 0, 51, 255, 0, 102, 0, 0]).unwrap();
        let left = image.sample(&Vector2::new(0.1, 0.5)).unwrap();
        assert_relative_eq!(left.x, 1.0);
        assert_relative_eq!(left.z, 0.2);
        let right = image.sample(&Vector2::new(0.9, 0.0)).unwrap();
        assert_relative_eq!(right.y, 0.4);
        assert_eq!(right.w, 0.0);
        assert!(image.sample(&Vector2::new(1.0, 0.5)).is_none());
        assert!(image.sample(&Vector2::new(0.5, -0.1)).is_none());
    }

    #[test]
    fn test_rejects_wrong_length() {
        assert!(RgbaImage::new(2, 2, vec![0; 15]).is_err());
    }

    #[test]
    fn test_scatter_stays_on_image() {
        let image = gradient(32);
        let brush = SampleBrush::default();
        let mut rng = StdRng::seed_from_u64(7);
        let samples = brush.scatter(&mut rng, Vector2::new(0.5, 0.5), &image);
        assert!(samples.len() <= brush.count);
        for sample in &samples {
            assert!((0.0..1.0).contains(&sample.position.x));
            assert!((0.0..1.0).contains(&sample.position.y));
            assert_eq!(image.sample(&sample.position), Some(sample.value));
        }
    }

    #[test]
    fn test_scatter_spread_matches_sigma() {
        let image = gradient(64);
        let brush = SampleBrush {
            count: 4000,
            sigma: 0.05,
        };
        let mut rng = StdRng::seed_from_u64(42);
        let samples = brush.scatter(&mut rng, Vector2::new(0.5, 0.5), &image);
        // Box-Muller offsets stay within 6 sigma, well inside the image
        assert_eq!(samples.len(), brush.count);

        let n = samples.len() as f32;
        let mean = samples.iter().map(|s| s.position.x).sum::<f32>() / n;
        let var = samples
            .iter()
            .map(|s| (s.position.x - mean).powi(2))
            .sum::<f32>()
            / n;
        assert_relative_eq!(mean, 0.5, epsilon = 0.005);
        assert_relative_eq!(var.sqrt(), 0.05, epsilon = 0.005);
    }
}
