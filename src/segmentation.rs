//! Foreground segmentation.
//!
//! A [`Segmenter`] turns an image into a binary foreground mask (255 for the
//! garment, 0 for background). The pipeline never talks to a segmenter
//! directly; it goes through a [`SegmentationHandle`], which owns the loaded
//! segmenter, pads the input to the segmenter's alignment, enforces a deadline
//! and crops the mask back to the input size.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;

use clap::ValueEnum;
use image::{GrayImage, Luma, Rgba, RgbaImage};
use imageproc::distance_transform::Norm;
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result, alpha_channel, color_ops};

/// Alpha values at or above this count as foreground for pre-masked images
const ALPHA_FOREGROUND_THRESHOLD: u8 = 128;

/// Foreground segmentation capability
pub trait Segmenter: Send + Sync {
    /// Short name used in log messages
    fn name(&self) -> &str;

    /// Input width and height must be a multiple of this value
    fn alignment(&self) -> u32 {
        1
    }

    /// Compute a binary foreground mask with the same dimensions as the input
    fn segment(&self, image: &RgbaImage) -> Result<GrayImage>;
}

/// Which built-in segmenter to load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SegmenterKind {
    /// Use the alpha channel when the image has one, chroma key otherwise
    #[default]
    Auto,
    /// Flood fill the background from the image border
    ChromaKey,
    /// Trust the alpha channel of pre-masked images
    Alpha,
}

/// Tunables for segmentation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationParams {
    pub kind: SegmenterKind,
    /// Background color as #RRGGBB
    pub chroma_key_color: String,
    /// Floodfill fuzz (euclidean distance in Lab)
    pub floodfill_fuzz: f32,
    /// Pixels eroded from the mask edges
    pub trim_edges: u8,
    /// Pixels dilated back onto the mask edges
    pub grow_edges: u8,
    /// Deadline for a single segmentation call, none when zero
    pub timeout_ms: u64,
}

impl Default for SegmentationParams {
    fn default() -> Self {
        Self {
            kind: SegmenterKind::Auto,
            chroma_key_color: "#FFFFFF".to_string(),
            floodfill_fuzz: 17.0,
            trim_edges: 2,
            grow_edges: 2,
            timeout_ms: 10_000,
        }
    }
}

impl SegmentationParams {
    /// Build the segmenter described by these parameters
    pub fn build(&self) -> Result<Arc<dyn Segmenter>> {
        let segmenter: Arc<dyn Segmenter> = match self.kind {
            SegmenterKind::Auto => Arc::new(AutoSegmenter {
                chroma_key: ChromaKeySegmenter::from_params(self)?,
            }),
            SegmenterKind::ChromaKey => Arc::new(ChromaKeySegmenter::from_params(self)?),
            SegmenterKind::Alpha => Arc::new(AlphaSegmenter),
        };
        Ok(segmenter)
    }

    fn timeout(&self) -> Option<Duration> {
        match self.timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

/// Removes a uniform background by flood filling from the image border
#[derive(Debug, Clone)]
pub struct ChromaKeySegmenter {
    chroma_key_color: Rgba<u8>,
    floodfill_fuzz: f32,
    trim_edges: u8,
    grow_edges: u8,
}

impl ChromaKeySegmenter {
    pub fn new(chroma_key_color: Rgba<u8>, floodfill_fuzz: f32, trim_edges: u8, grow_edges: u8) -> Self {
        Self {
            chroma_key_color,
            floodfill_fuzz,
            trim_edges,
            grow_edges,
        }
    }

    fn from_params(params: &SegmentationParams) -> Result<Self> {
        let color = color_ops::parse_color(&params.chroma_key_color).map_err(|e| {
            Error::Config(format!("chroma key color {}: {e}", params.chroma_key_color))
        })?;
        Ok(Self::new(
            color,
            params.floodfill_fuzz,
            params.trim_edges,
            params.grow_edges,
        ))
    }
}

impl Segmenter for ChromaKeySegmenter {
    fn name(&self) -> &str {
        "chroma-key"
    }

    fn segment(&self, image: &RgbaImage) -> Result<GrayImage> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Ok(GrayImage::new(width, height));
        }
        // Paint the outer ring in the key color so the fill reaches every side
        let mut image = image.clone();
        let border = Rect::at(0, 0).of_size(width, height);
        imageproc::drawing::draw_hollow_rect_mut(&mut image, border, self.chroma_key_color);
        let mut mask = flood_fill_background(&image, self.chroma_key_color, self.floodfill_fuzz);
        imageproc::morphology::erode_mut(&mut mask, Norm::L1, self.trim_edges);
        imageproc::morphology::dilate_mut(&mut mask, Norm::L1, self.grow_edges);
        Ok(mask)
    }
}

/// Flood fill from the top left corner, marking every pixel within fuzz of the
/// target color as background; returns the foreground mask
fn flood_fill_background(image: &RgbaImage, target_color: Rgba<u8>, fuzz: f32) -> GrayImage {
    let (width, height) = image.dimensions();
    let mut mask = GrayImage::from_pixel(width, height, Luma([u8::MAX]));
    let target_color = color_ops::image_rgba_to_palette_srgb(&target_color);
    let mut visited = vec![false; width as usize * height as usize];
    let mut stack = vec![(0i64, 0i64)];
    while let Some((cx, cy)) = stack.pop() {
        if cx < 0 || cx >= width as i64 || cy < 0 || cy >= height as i64 {
            continue;
        }
        let index = cy as usize * width as usize + cx as usize;
        if visited[index] {
            continue;
        }
        visited[index] = true;

        let pixel = image.get_pixel(cx as u32, cy as u32);
        let current_color = color_ops::image_rgba_to_palette_srgb(pixel);
        if color_ops::color_similarity(&current_color, &target_color) > fuzz {
            continue;
        }
        mask.put_pixel(cx as u32, cy as u32, Luma([0]));

        for (dx, dy) in [(0, 1), (1, 0), (0, -1), (-1, 0)] {
            stack.push((cx + dx, cy + dy));
        }
    }
    mask
}

/// Uses the alpha channel of an image that was masked beforehand
#[derive(Debug, Clone, Copy, Default)]
pub struct AlphaSegmenter;

impl Segmenter for AlphaSegmenter {
    fn name(&self) -> &str {
        "alpha"
    }

    fn segment(&self, image: &RgbaImage) -> Result<GrayImage> {
        let mut mask = alpha_channel::extract(image);
        for pixel in mask.pixels_mut() {
            pixel[0] = if pixel[0] >= ALPHA_FOREGROUND_THRESHOLD { u8::MAX } else { 0 };
        }
        Ok(mask)
    }
}

/// Alpha channel for images with transparency, chroma key for the rest
#[derive(Debug, Clone)]
struct AutoSegmenter {
    chroma_key: ChromaKeySegmenter,
}

impl Segmenter for AutoSegmenter {
    fn name(&self) -> &str {
        "auto"
    }

    fn segment(&self, image: &RgbaImage) -> Result<GrayImage> {
        if alpha_channel::has_transparency(image) {
            AlphaSegmenter.segment(image)
        } else {
            self.chroma_key.segment(image)
        }
    }
}

type SegmenterFactory = dyn Fn() -> Result<Arc<dyn Segmenter>> + Send + Sync;

/// Owned, lazily loaded segmenter
///
/// The segmenter is created on first use and reused afterwards. Call
/// [`SegmentationHandle::teardown`] to release it; the next call loads it again.
///
/// With a deadline, every [`SegmentationHandle::segment`] call runs on a
/// freshly spawned thread. A call that misses the deadline returns
/// [`Error::SegmentationTimeout`] at once, but its thread is detached and keeps
/// running until the segmenter returns; its result is then discarded. A
/// segmenter that never returns therefore leaks one thread per timed out call.
pub struct SegmentationHandle {
    factory: Arc<SegmenterFactory>,
    segmenter: OnceLock<Arc<dyn Segmenter>>,
    timeout: Option<Duration>,
}

impl SegmentationHandle {
    /// Handle for one of the built-in segmenters
    pub fn new(params: &SegmentationParams) -> Self {
        let timeout = params.timeout();
        let params = params.clone();
        Self {
            factory: Arc::new(move || params.build()),
            segmenter: OnceLock::new(),
            timeout,
        }
    }

    /// Handle for a caller-supplied segmenter
    pub fn with_segmenter(segmenter: Arc<dyn Segmenter>, timeout: Option<Duration>) -> Self {
        Self {
            factory: Arc::new(move || Ok(Arc::clone(&segmenter))),
            segmenter: OnceLock::new(),
            timeout,
        }
    }

    /// Whether the segmenter has been loaded
    pub fn is_loaded(&self) -> bool {
        self.segmenter.get().is_some()
    }

    /// Release the loaded segmenter
    pub fn teardown(&mut self) {
        if let Some(segmenter) = self.segmenter.take() {
            debug!("releasing {} segmenter", segmenter.name());
        }
    }

    fn segmenter(&self) -> Result<Arc<dyn Segmenter>> {
        if let Some(segmenter) = self.segmenter.get() {
            return Ok(Arc::clone(segmenter));
        }
        let loaded = (self.factory)()?;
        debug!("loaded {} segmenter", loaded.name());
        // Another worker may have won the race; use whichever got stored
        Ok(Arc::clone(self.segmenter.get_or_init(|| loaded)))
    }

    /// Compute the foreground mask for an image, same dimensions as the input
    pub fn segment(&self, image: &RgbaImage) -> Result<GrayImage> {
        let segmenter = self.segmenter()?;
        let (width, height) = image.dimensions();
        let (padded, left, top) = pad_to_multiple(image, segmenter.alignment());
        let (padded_width, padded_height) = padded.dimensions();
        let mask = match self.timeout {
            None => segmenter.segment(&padded)?,
            Some(timeout) => segment_with_deadline(segmenter, padded, timeout)?,
        };
        if mask.dimensions() != (padded_width, padded_height) {
            return Err(Error::Segmentation(format!(
                "mask is {}x{}, expected {padded_width}x{padded_height}",
                mask.width(),
                mask.height()
            )));
        }
        Ok(unpad(&mask, left, top, width, height))
    }

    /// Segment an image and return the mask together with the alpha-masked image
    pub fn extract(&self, image: &RgbaImage) -> Result<(GrayImage, RgbaImage)> {
        let mask = self.segment(image)?;
        let rgb = image::DynamicImage::ImageRgba8(image.clone()).to_rgb8();
        let masked = alpha_channel::apply_mask(&rgb, &mask);
        Ok((mask, masked))
    }
}

/// Run the segmenter on a new thread and give up once the deadline passes
///
/// The thread is not joined; on timeout it finishes in the background.
fn segment_with_deadline(
    segmenter: Arc<dyn Segmenter>,
    image: RgbaImage,
    timeout: Duration,
) -> Result<GrayImage> {
    let (sender, receiver) = mpsc::channel();
    thread::Builder::new()
        .name("segmentation".to_string())
        .spawn(move || {
            // The receiver is gone when the deadline already passed
            let _ = sender.send(segmenter.segment(&image));
        })?;
    match receiver.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(Error::SegmentationTimeout(timeout.as_millis() as u64)),
        Err(RecvTimeoutError::Disconnected) => {
            Err(Error::Segmentation("segmentation worker stopped without a result".to_string()))
        }
    }
}

/// Pad an image with transparent black so both sides are a multiple of `factor`
///
/// Padding is split evenly between opposite sides; returns the padded image and
/// the left and top offsets of the original.
fn pad_to_multiple(image: &RgbaImage, factor: u32) -> (RgbaImage, u32, u32) {
    let factor = factor.max(1);
    let (width, height) = image.dimensions();
    let padded_width = width.div_ceil(factor) * factor;
    let padded_height = height.div_ceil(factor) * factor;
    if (padded_width, padded_height) == (width, height) {
        return (image.clone(), 0, 0);
    }
    let left = (padded_width - width) / 2;
    let top = (padded_height - height) / 2;
    let mut padded = RgbaImage::new(padded_width, padded_height);
    image::imageops::replace(&mut padded, image, left as i64, top as i64);
    (padded, left, top)
}

/// Undo [`pad_to_multiple`] on a mask
fn unpad(mask: &GrayImage, left: u32, top: u32, width: u32, height: u32) -> GrayImage {
    if mask.dimensions() == (width, height) {
        return mask.clone();
    }
    image::imageops::crop_imm(mask, left, top, width, height).to_image()
}
