use std::fs::File;
use std::io::BufWriter;
use std::io::Cursor;
use std::path::Path;
use std::path::PathBuf;

use image::DynamicImage;
use image::GrayImage;
use image::RgbaImage;
use serde::Serialize;
use tracing::debug;

use crate::Result;

/// Decode an encoded image, guessing the format from its contents
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage> {
    let image_reader = image::ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    Ok(image_reader.decode()?)
}

/// Writes intermediate artifacts of a request into one directory
#[derive(Debug, Clone)]
pub struct ImageSaver {
    directory: PathBuf,
}

impl ImageSaver {
    /// Construct a saver for the specified directory, creating it if needed
    pub fn new(directory: &Path) -> Result<Self> {
        std::fs::create_dir_all(directory)?;
        Ok(Self {
            directory: directory.to_owned(),
        })
    }

    /// Save RGBA image to PNG file named after identifier and suffix
    pub fn save_rgba_image_as(&self, img: &RgbaImage, identifier: &str, suffix: &str) -> Result<PathBuf> {
        let filename = self.compute_path(identifier, suffix, "png");
        let file = File::create(&filename)?;
        let mut encoder = png::Encoder::new(BufWriter::new(file), img.width(), img.height());
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        encoder.write_header()?.write_image_data(img.as_raw())?;
        debug!("{}: saved", filename.display());
        Ok(filename)
    }

    /// Save grayscale image to PNG file named after identifier and suffix
    pub fn save_luma_image_as(&self, img: &GrayImage, identifier: &str, suffix: &str) -> Result<PathBuf> {
        let filename = self.compute_path(identifier, suffix, "png");
        img.save(&filename)?;
        debug!("{}: saved", filename.display());
        Ok(filename)
    }

    /// Save a value as pretty-printed JSON
    pub fn save_json_as<T: Serialize>(&self, value: &T, name: &str) -> Result<PathBuf> {
        let filename = self.directory.join(format!("{name}.json"));
        let file = File::create(&filename)?;
        serde_json::to_writer_pretty(BufWriter::new(file), value)?;
        debug!("{}: saved", filename.display());
        Ok(filename)
    }

    /// Compute full file path from identifier, suffix and extension
    pub fn compute_path(&self, identifier: &str, suffix: &str, extension: &str) -> PathBuf {
        self.directory.join(format!("{identifier}-{suffix}.{extension}"))
    }
}

#[cfg(test)]
mod tests {
    use image::{ImageFormat, Luma, Rgba};

    use super::*;

    #[test]
    fn decodes_png_bytes() {
        let image = RgbaImage::from_pixel(3, 2, Rgba([1, 2, 3, 4]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(image.clone())
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        let decoded = decode_image(&bytes).unwrap();
        assert_eq!(decoded.to_rgba8(), image);
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(decode_image(b"definitely not an image").is_err());
    }

    #[test]
    fn saves_artifacts() {
        let directory = std::env::temp_dir().join(format!("garment-match-io-{}", std::process::id()));
        let saver = ImageSaver::new(&directory).unwrap();
        let rgba = saver
            .save_rgba_image_as(&RgbaImage::from_pixel(2, 2, Rgba([9, 8, 7, 255])), "coat", "masked")
            .unwrap();
        let luma = saver
            .save_luma_image_as(&GrayImage::from_pixel(2, 2, Luma([255])), "coat", "mask")
            .unwrap();
        let json = saver.save_json_as(&vec![1, 2, 3], "combined_coat").unwrap();
        assert_eq!(rgba, directory.join("coat-masked.png"));
        assert_eq!(image::open(&rgba).unwrap().to_rgba8().get_pixel(1, 1), &Rgba([9, 8, 7, 255]));
        assert!(luma.is_file());
        assert_eq!(std::fs::read_to_string(&json).unwrap().split_whitespace().collect::<String>(), "[1,2,3]");
        std::fs::remove_dir_all(&directory).unwrap();
    }
}
