use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, RgbaImage};
use inkmark_contracts::session::CompositeImage;
use tracing::debug;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};

pub const MAX_SURFACE_EDGE: u32 = 8192;

/// Flattens a drawing overlay onto its source image.
pub trait OverlayCompositor: Send + Sync {
    fn composite(
        &self,
        overlay: &[u8],
        source: &[u8],
        source_media_type: &str,
    ) -> EngineResult<CompositeImage>;
}

/// CPU compositor working at the canonical square resolution, so overlay
/// pixel coordinates line up exactly with source pixel coordinates.
#[derive(Debug, Clone)]
pub struct RasterCompositor {
    resolution: u32,
    jpeg_quality: u8,
}

impl RasterCompositor {
    pub fn new(resolution: u32, jpeg_quality: u8) -> Self {
        Self {
            resolution,
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.canvas_resolution, config.jpeg_quality)
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    fn surface(&self) -> EngineResult<RgbaImage> {
        acquire_surface(self.resolution)
    }
}

impl OverlayCompositor for RasterCompositor {
    fn composite(
        &self,
        overlay: &[u8],
        source: &[u8],
        source_media_type: &str,
    ) -> EngineResult<CompositeImage> {
        let edge = self.resolution;
        let mut surface = self.surface()?;
        let source = decode_image(source, Some(source_media_type), "source image")?;
        let overlay = decode_image(overlay, None, "overlay")?;

        imageops::replace(&mut surface, &fit_square(source, edge, FilterType::Triangle), 0, 0);
        // nearest keeps marker pixels on the palette
        imageops::overlay(&mut surface, &fit_square(overlay, edge, FilterType::Nearest), 0, 0);

        let mut bytes = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut bytes, self.jpeg_quality);
        encoder
            .encode_image(&DynamicImage::ImageRgba8(surface).to_rgb8())
            .map_err(|err| EngineError::NoRenderContext(format!("composite encode failed: {err}")))?;
        debug!(edge, bytes = bytes.len(), "overlay composited");
        Ok(CompositeImage::new(bytes, "image/jpeg"))
    }
}

pub(crate) fn acquire_surface(edge: u32) -> EngineResult<RgbaImage> {
    if edge == 0 || edge > MAX_SURFACE_EDGE {
        return Err(EngineError::NoRenderContext(format!(
            "cannot allocate a {edge}x{edge} drawing surface"
        )));
    }
    Ok(RgbaImage::new(edge, edge))
}

pub(crate) fn decode_image(
    bytes: &[u8],
    media_type: Option<&str>,
    what: &str,
) -> EngineResult<DynamicImage> {
    if bytes.is_empty() {
        return Err(EngineError::decode(format!("{what} is empty")));
    }
    let declared = media_type.and_then(ImageFormat::from_mime_type);
    let decoded = match declared {
        Some(format) => image::load_from_memory_with_format(bytes, format)
            .or_else(|_| image::load_from_memory(bytes)),
        None => image::load_from_memory(bytes),
    };
    decoded.map_err(|err| EngineError::decode(format!("{what}: {err}")))
}

pub(crate) fn fit_square(image: DynamicImage, edge: u32, filter: FilterType) -> RgbaImage {
    if image.width() == edge && image.height() == edge {
        return image.into_rgba8();
    }
    image.resize_exact(edge, edge, filter).into_rgba8()
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{Rgb, Rgba};

    use super::*;

    pub(crate) fn png_bytes(image: RgbaImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(image)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn solid(edge: u32, color: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(edge, edge, Rgba(color))
    }

    fn close(a: &Rgb<u8>, b: [u8; 3]) -> bool {
        a.0.iter()
            .zip(b)
            .all(|(left, right)| (i16::from(*left) - i16::from(right)).abs() <= 12)
    }

    #[test]
    fn overlay_replaces_drawn_pixels_and_keeps_the_rest() {
        let source = png_bytes(solid(64, [20, 40, 200, 255]));
        let mut overlay = RgbaImage::new(64, 64);
        for y in 0..32 {
            for x in 0..32 {
                overlay.put_pixel(x, y, Rgba([0, 255, 255, 255]));
            }
        }
        let composite = RasterCompositor::new(64, 95)
            .composite(&png_bytes(overlay), &source, "image/png")
            .unwrap();
        assert_eq!(composite.media_type(), "image/jpeg");

        let decoded = image::load_from_memory(composite.payload()).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (64, 64));
        assert!(close(decoded.get_pixel(8, 8), [0, 255, 255]));
        assert!(close(decoded.get_pixel(56, 56), [20, 40, 200]));
    }

    #[test]
    fn inputs_are_scaled_to_canonical_resolution() {
        let source = png_bytes(solid(100, [200, 10, 10, 255]));
        let overlay = png_bytes(RgbaImage::new(16, 16));
        let composite = RasterCompositor::new(32, 90)
            .composite(&overlay, &source, "image/png")
            .unwrap();
        let decoded = image::load_from_memory(composite.payload()).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 32));
    }

    #[test]
    fn mislabelled_source_is_sniffed() {
        let source = png_bytes(solid(8, [1, 2, 3, 255]));
        let overlay = png_bytes(RgbaImage::new(8, 8));
        assert!(RasterCompositor::new(8, 90)
            .composite(&overlay, &source, "image/jpeg")
            .is_ok());
    }

    #[test]
    fn undecodable_inputs_fail_with_decode_error() {
        let good = png_bytes(solid(8, [0, 0, 0, 255]));
        let compositor = RasterCompositor::new(8, 90);
        assert!(matches!(
            compositor.composite(b"not an image", &good, "image/png"),
            Err(EngineError::Decode(_))
        ));
        assert!(matches!(
            compositor.composite(&good, b"garbage", "image/png"),
            Err(EngineError::Decode(_))
        ));
        assert!(matches!(
            compositor.composite(&good, &[], "image/png"),
            Err(EngineError::Decode(_))
        ));
    }

    #[test]
    fn zero_resolution_has_no_render_context() {
        let good = png_bytes(solid(8, [0, 0, 0, 255]));
        assert!(matches!(
            RasterCompositor::new(0, 90).composite(&good, &good, "image/png"),
            Err(EngineError::NoRenderContext(_))
        ));
    }
}
