use image::GrayImage;
use image::Luma;
use image::RgbImage;
use image::Rgba;
use image::RgbaImage;

/// Extract the alpha channel of a color image into a grayscale image
pub(crate) fn extract(image: &RgbaImage) -> GrayImage {
    let mut gray_image = GrayImage::new(image.width(), image.height());
    for (x, y, pixel) in image.enumerate_pixels() {
        *gray_image.get_pixel_mut(x, y) = Luma([pixel[3]]);
    }
    gray_image
}

/// Whether any pixel in the image is not fully opaque
pub(crate) fn has_transparency(image: &RgbaImage) -> bool {
    image.pixels().any(|pixel| pixel[3] < u8::MAX)
}

/// Combine a color image with a foreground mask into an alpha-masked image
///
/// Background pixels (mask value 0) get all four channels zeroed, so they
/// convert to the HSV triple (0, 0, 0) further down the line. Foreground
/// pixels keep their color and become fully opaque.
pub(crate) fn apply_mask(image: &RgbImage, mask: &GrayImage) -> RgbaImage {
    let mut masked = RgbaImage::new(image.width(), image.height());
    for (x, y, pixel) in masked.enumerate_pixels_mut() {
        let source = image.get_pixel(x, y);
        *pixel = if mask.get_pixel(x, y)[0] == 0 {
            Rgba([0, 0, 0, 0])
        } else {
            Rgba([source[0], source[1], source[2], u8::MAX])
        };
    }
    masked
}

#[cfg(test)]
mod tests {
    use image::Rgb;

    use super::*;

    #[test]
    fn extract_alpha() {
        let mut image = RgbaImage::from_pixel(2, 1, Rgba([10, 20, 30, 255]));
        assert!(!has_transparency(&image));
        image.put_pixel(1, 0, Rgba([10, 20, 30, 0]));
        let alpha = extract(&image);
        assert_eq!(alpha.get_pixel(0, 0)[0], 255);
        assert_eq!(alpha.get_pixel(1, 0)[0], 0);
        assert!(has_transparency(&image));
    }

    #[test]
    fn masked_background_is_zeroed() {
        let image = RgbImage::from_pixel(2, 2, Rgb([200, 40, 40]));
        let mut mask = GrayImage::new(2, 2);
        mask.put_pixel(0, 0, Luma([255]));
        let masked = apply_mask(&image, &mask);
        assert_eq!(*masked.get_pixel(0, 0), Rgba([200, 40, 40, 255]));
        assert_eq!(*masked.get_pixel(1, 1), Rgba([0, 0, 0, 0]));
    }
}
