use std::collections::HashMap;

use clap::ValueEnum;
use color::{AlphaColor, ParseError};
use image::{Rgba, RgbaImage};
use itertools::Itertools; // for sorted_by() and join() iterator functions
use palette::{FromColor, Hsv, Lab};
use serde::{Deserialize, Serialize};

/// Number of hue steps in the 8-bit HSV convention (two degrees per step)
pub const HUE_RANGE: f64 = 180.0;

/// How the difference between two hues is measured
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum HueMetric {
    /// Plain absolute difference, hue treated as a line
    #[default]
    Linear,
    /// Shortest arc around the hue circle
    Circular,
}

impl HueMetric {
    /// Signed difference `a - b` under this metric
    pub fn delta(self, a: f64, b: f64) -> f64 {
        let d = a - b;
        match self {
            HueMetric::Linear => d,
            HueMetric::Circular => {
                let d = d.rem_euclid(HUE_RANGE);
                if d > HUE_RANGE / 2.0 { d - HUE_RANGE } else { d }
            }
        }
    }

    /// Absolute difference between two hues under this metric
    pub fn distance(self, a: f64, b: f64) -> f64 {
        self.delta(a, b).abs()
    }
}

/// Parse a string into a color, with format like this #RRGGBB
pub(crate) fn parse_color(color: &str) -> Result<Rgba<u8>, ParseError> {
    let color = color::parse_color(color)?;
    let color: AlphaColor<color::Srgb> = color.to_alpha_color();
    let color = color.to_rgba8();
    let color = Rgba(color.to_u8_array());
    Ok(color)
}

/// Figure out how similar two colors are based on euclidean distance in Lab colorspace
pub(crate) fn color_similarity(a: &palette::Srgb<f32>, b: &palette::Srgb<f32>) -> f32 {
    let lab_a = Lab::from_color(*a);
    let lab_b = Lab::from_color(*b);
    let delta_e =
        (lab_a.l - lab_b.l).powi(2) + (lab_a.a - lab_b.a).powi(2) + (lab_a.b - lab_b.b).powi(2);
    delta_e.sqrt()
}

/// Convert from image::Rgba color to palette::Srgb color
pub(crate) fn image_rgba_to_palette_srgb(color: &Rgba<u8>) -> palette::Srgb<f32> {
    palette::Srgb::new(
        color[0] as f32 / 255.0,
        color[1] as f32 / 255.0,
        color[2] as f32 / 255.0,
    )
}

/// Convert an 8-bit RGB triple to 8-bit HSV (h in 0..180, s and v in 0..=255)
///
/// Black maps to exactly (0, 0, 0), which the sampler relies on.
pub(crate) fn rgb_to_hsv8(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let srgb = palette::Srgb::new(r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0);
    let hsv = Hsv::from_color(srgb);
    let hue = (hsv.hue.into_positive_degrees() / 2.0).round() as u32 % HUE_RANGE as u32;
    let saturation = (hsv.saturation * 255.0).round().clamp(0.0, 255.0);
    let value = (hsv.value * 255.0).round().clamp(0.0, 255.0);
    (hue as u8, saturation as u8, value as u8)
}

/// Find the opaque color that occurs the most in the specified image
pub(crate) fn find_dominant_color(image: &RgbaImage) -> Option<Rgba<u8>> {
    let mut color_map: HashMap<Rgba<u8>, u32> = HashMap::new();
    for pixel in image.pixels().filter(|pixel| pixel[3] > 0) {
        *color_map.entry(*pixel).or_insert(0) += 1;
    }
    // Most frequent first, ties resolved by channel values so the answer is stable
    color_map
        .into_iter()
        .sorted_by(|a, b| a.1.cmp(&b.1).reverse().then_with(|| a.0.0.cmp(&b.0.0)))
        .map(|(color, _)| color)
        .next()
}

/// Return the dominant color in the image as hex #RRGGBB, or "none" without opaque pixels
pub(crate) fn find_dominant_color_hex(image: &RgbaImage) -> String {
    match find_dominant_color(image) {
        Some(color) => format!("#{}", color.0[..3].iter().map(|c| format!("{c:02X}")).join("")),
        None => "none".to_string(),
    }
}
