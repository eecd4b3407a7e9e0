//! Feature sampling: masked image in, HSV samples out.

use clap::ValueEnum;
use image::RgbaImage;
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};

use crate::color_ops;

/// Default edge length of the square the image is resized to before sampling
pub const SAMPLE_DIM: u32 = 100;

/// Default step between sampled rows and columns
pub const SAMPLE_STRIDE: u32 = 1;

/// One foreground pixel in 8-bit HSV (h in 0..180)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PixelSample {
    h: u8,
    s: u8,
    v: u8,
}

impl PixelSample {
    /// Sample from an 8-bit HSV triple, `None` when `h` is 180 or more
    ///
    /// Hue is in half degrees. Hues on a 0..=255 scale have to be rescaled
    /// first; they are rejected rather than wrapped onto another color.
    pub fn new(h: u8, s: u8, v: u8) -> Option<Self> {
        (f64::from(h) < color_ops::HUE_RANGE).then_some(Self { h, s, v })
    }

    pub fn h(&self) -> u8 {
        self.h
    }

    pub fn s(&self) -> u8 {
        self.s
    }

    pub fn v(&self) -> u8 {
        self.v
    }

    /// The triple used to mark masked-out background
    pub fn is_zero(&self) -> bool {
        self.h == 0 && self.s == 0 && self.v == 0
    }
}

/// How background pixels are recognized after resizing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum BackgroundRule {
    /// Drop pixels whose HSV triple is exactly (0, 0, 0)
    ///
    /// A genuinely black garment pixel is dropped too.
    #[default]
    ZeroTriple,
    /// Drop pixels whose resized alpha is below half, keep everything else
    Alpha,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerParams {
    pub sample_dim: u32,
    pub sample_stride: u32,
    pub background_rule: BackgroundRule,
}

impl Default for SamplerParams {
    fn default() -> Self {
        Self {
            sample_dim: SAMPLE_DIM,
            sample_stride: SAMPLE_STRIDE,
            background_rule: BackgroundRule::default(),
        }
    }
}

/// Resize a masked image and collect its foreground pixels as HSV samples
///
/// Samples come out in raster order. An image without foreground yields an
/// empty vector.
pub fn sample(image: &RgbaImage, params: &SamplerParams) -> Vec<PixelSample> {
    if image.width() == 0 || image.height() == 0 || params.sample_dim == 0 {
        return Vec::new();
    }
    let resized = image::imageops::resize(
        image,
        params.sample_dim,
        params.sample_dim,
        FilterType::Triangle,
    );
    let stride = params.sample_stride.max(1) as usize;
    let mut samples = Vec::new();
    for y in (0..resized.height()).step_by(stride) {
        for x in (0..resized.width()).step_by(stride) {
            let pixel = resized.get_pixel(x, y);
            let (h, s, v) = color_ops::rgb_to_hsv8(pixel[0], pixel[1], pixel[2]);
            let Some(sample) = PixelSample::new(h, s, v) else {
                continue;
            };
            let is_background = match params.background_rule {
                BackgroundRule::ZeroTriple => sample.is_zero(),
                BackgroundRule::Alpha => pixel[3] < 128,
            };
            if !is_background {
                samples.push(sample);
            }
        }
    }
    samples
}

#[cfg(test)]
mod tests {
    use image::Rgba;

    use super::*;

    fn half_red_half_background() -> RgbaImage {
        let mut image = RgbaImage::new(40, 40);
        for y in 0..40 {
            for x in 0..20 {
                image.put_pixel(x, y, Rgba([255, 0, 0, 255]));
            }
        }
        image
    }

    #[test]
    fn drops_zeroed_background() {
        let params = SamplerParams {
            sample_dim: 10,
            ..Default::default()
        };
        let samples = sample(&half_red_half_background(), &params);
        assert!(!samples.is_empty());
        assert!(samples.len() < 100);
        assert!(samples.iter().all(|s| !s.is_zero()));
        // Most of the left half is pure red
        let pure_red = samples.iter().filter(|s| Some(**s) == PixelSample::new(0, 255, 255)).count();
        assert!(pure_red >= 40);
    }

    #[test]
    fn hue_outside_half_degree_range_is_rejected() {
        assert_eq!(PixelSample::new(179, 10, 20).map(|s| s.h()), Some(179));
        assert_eq!(PixelSample::new(180, 10, 20), None);
        assert_eq!(PixelSample::new(200, 100, 100), None);
    }

    #[test]
    fn all_background_yields_nothing() {
        let image = RgbaImage::new(30, 30);
        assert!(sample(&image, &SamplerParams::default()).is_empty());
        let alpha = SamplerParams {
            background_rule: BackgroundRule::Alpha,
            ..Default::default()
        };
        assert!(sample(&image, &alpha).is_empty());
    }

    #[test]
    fn stride_bounds_sample_count() {
        let image = RgbaImage::from_pixel(8, 8, Rgba([0, 0, 255, 255]));
        let dense = SamplerParams {
            sample_dim: 8,
            sample_stride: 1,
            ..Default::default()
        };
        let sparse = SamplerParams {
            sample_stride: 2,
            ..dense.clone()
        };
        assert_eq!(sample(&image, &dense).len(), 64);
        assert_eq!(sample(&image, &sparse).len(), 16);
        assert!(sample(&image, &sparse).iter().all(|s| s.h() == 120));
    }

    #[test]
    fn alpha_rule_keeps_black_garments() {
        let image = RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 255]));
        let zero_triple = SamplerParams {
            sample_dim: 4,
            ..Default::default()
        };
        let alpha = SamplerParams {
            background_rule: BackgroundRule::Alpha,
            ..zero_triple.clone()
        };
        assert!(sample(&image, &zero_triple).is_empty());
        assert_eq!(sample(&image, &alpha).len(), 16);
    }
}
