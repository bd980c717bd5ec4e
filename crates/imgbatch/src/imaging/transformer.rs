//! JPEG recompression

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, Rgb, RgbImage};
use thiserror::Error;

/// File extension of every published artifact
pub const OUTPUT_EXTENSION: &str = "jpg";

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("Failed to encode JPEG: {0}")]
    Encode(#[from] image::ImageError),

    #[error("Image has no pixels ({width}x{height})")]
    Empty { width: u32, height: u32 },
}

/// A recompressed image ready to publish
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl EncodedImage {
    pub fn extension(&self) -> &'static str {
        OUTPUT_EXTENSION
    }
}

/// Re-encodes images as JPEG at a fixed quality
#[derive(Debug, Clone, Copy)]
pub struct ImageTransformer {
    quality: u8,
}

impl Default for ImageTransformer {
    fn default() -> Self {
        Self::new(50)
    }
}

impl ImageTransformer {
    /// Quality is clamped to 1-100
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Recompress an image. Pure and deterministic for a given input and quality.
    pub fn transform(&self, image: &DynamicImage) -> Result<EncodedImage, TransformError> {
        let (width, height) = (image.width(), image.height());
        if width == 0 || height == 0 {
            return Err(TransformError::Empty { width, height });
        }

        let rgb = to_opaque_rgb(image);

        let mut bytes = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut bytes, self.quality);
        encoder.encode_image(&rgb)?;

        Ok(EncodedImage {
            bytes,
            width,
            height,
        })
    }
}

/// JPEG has no alpha channel: composite translucent pixels over white.
/// Palette, grayscale and 16-bit inputs end up as 8-bit RGB as well.
fn to_opaque_rgb(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }

    let rgba = image.to_rgba8();
    let mut out = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = a as u16;
        let blend = |c: u8| ((c as u16 * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        out.put_pixel(x, y, Rgb([blend(r), blend(g), blend(b)]));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ColorType, GenericImageView, ImageFormat, Rgba, RgbaImage};

    fn noisy_rgb(size: u32) -> DynamicImage {
        let img = RgbImage::from_fn(size, size, |x, y| {
            let v = (x * 31 + y * 17 + (x * y) % 7) as u8;
            Rgb([v, v.wrapping_mul(3), v.wrapping_add(90)])
        });
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn test_output_is_jpeg_rgb() {
        let encoded = ImageTransformer::default().transform(&noisy_rgb(32)).unwrap();
        assert_eq!(
            image::guess_format(&encoded.bytes).unwrap(),
            ImageFormat::Jpeg
        );

        let decoded = image::load_from_memory(&encoded.bytes).unwrap();
        assert_eq!(decoded.color(), ColorType::Rgb8);
        assert_eq!(decoded.dimensions(), (32, 32));
    }

    #[test]
    fn test_transparent_pixels_become_white() {
        let img = RgbaImage::from_pixel(16, 16, Rgba([0, 0, 0, 0]));
        let encoded = ImageTransformer::new(95)
            .transform(&DynamicImage::ImageRgba8(img))
            .unwrap();

        let decoded = image::load_from_memory(&encoded.bytes).unwrap().to_rgb8();
        let Rgb([r, g, b]) = *decoded.get_pixel(8, 8);
        assert!(r > 240 && g > 240 && b > 240, "got {:?}", (r, g, b));
    }

    #[test]
    fn test_opaque_alpha_keeps_color() {
        let rgb = to_opaque_rgb(&DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            1,
            1,
            Rgba([10, 20, 30, 255]),
        )));
        assert_eq!(rgb.get_pixel(0, 0), &Rgb([10, 20, 30]));
    }

    #[test]
    fn test_grayscale_and_16bit_inputs() {
        let transformer = ImageTransformer::default();
        assert!(transformer.transform(&DynamicImage::new_luma8(8, 8)).is_ok());
        assert!(transformer.transform(&DynamicImage::new_luma_a8(8, 8)).is_ok());
        assert!(transformer.transform(&DynamicImage::new_rgba16(8, 8)).is_ok());
    }

    #[test]
    fn test_deterministic() {
        let transformer = ImageTransformer::new(50);
        let input = noisy_rgb(24);
        let a = transformer.transform(&input).unwrap();
        let b = transformer.transform(&input).unwrap();
        assert_eq!(a.bytes, b.bytes);
    }

    #[test]
    fn test_lower_quality_is_smaller() {
        let input = noisy_rgb(64);
        let low = ImageTransformer::new(10).transform(&input).unwrap();
        let high = ImageTransformer::new(95).transform(&input).unwrap();
        assert!(low.bytes.len() < high.bytes.len());
    }

    #[test]
    fn test_quality_is_clamped() {
        assert_eq!(ImageTransformer::new(0).quality(), 1);
        assert_eq!(ImageTransformer::new(200).quality(), 100);
    }

    #[test]
    fn test_empty_image_rejected() {
        let err = ImageTransformer::default()
            .transform(&DynamicImage::new_rgb8(0, 0))
            .unwrap_err();
        assert!(matches!(err, TransformError::Empty { .. }));
    }
}
