use std::fs;
use std::io::Cursor;
use std::path::Path;

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use inkmark_contracts::session::MarkerColor;

use crate::compositor::{acquire_surface, decode_image, fit_square};
use crate::error::{EngineError, EngineResult};

/// The drawing surface a session's overlay lives on.
///
/// `capture_overlay` and `restore_overlay` must round-trip: restoring a
/// captured payload and capturing again yields an overlay that composites
/// identically.
pub trait OverlayCanvas {
    /// PNG bytes of the current strokes, or `None` when nothing is drawn.
    fn capture_overlay(&self) -> EngineResult<Option<Vec<u8>>>;
    fn clear_overlay(&mut self);
    fn restore_overlay(&mut self, payload: &[u8]) -> EngineResult<()>;
}

#[derive(Debug, Clone)]
pub struct RasterCanvas {
    surface: RgbaImage,
}

impl RasterCanvas {
    pub fn new(resolution: u32) -> EngineResult<Self> {
        Ok(Self {
            surface: acquire_surface(resolution)?,
        })
    }

    pub fn resolution(&self) -> u32 {
        self.surface.width()
    }

    pub fn is_blank(&self) -> bool {
        self.surface.pixels().all(|pixel| pixel.0[3] == 0)
    }

    /// Stamps round brush dabs of `radius` pixels along the polyline through
    /// `points`. Points are in surface pixel coordinates.
    pub fn paint_stroke(&mut self, color: MarkerColor, points: &[(f32, f32)], radius: f32) {
        let [r, g, b] = color.rgb();
        let ink = Rgba([r, g, b, 255]);
        let radius = radius.max(0.5);
        match points {
            [] => {}
            [only] => self.dab(*only, radius, ink),
            _ => {
                for pair in points.windows(2) {
                    let (from, to) = (pair[0], pair[1]);
                    let length = ((to.0 - from.0).powi(2) + (to.1 - from.1).powi(2)).sqrt();
                    let steps = length.ceil().max(1.0) as u32;
                    for step in 0..=steps {
                        let t = step as f32 / steps as f32;
                        let at = (from.0 + (to.0 - from.0) * t, from.1 + (to.1 - from.1) * t);
                        self.dab(at, radius, ink);
                    }
                }
            }
        }
    }

    fn dab(&mut self, (cx, cy): (f32, f32), radius: f32, ink: Rgba<u8>) {
        let edge = self.surface.width() as f32;
        let min_x = (cx - radius).floor().max(0.0) as u32;
        let min_y = (cy - radius).floor().max(0.0) as u32;
        let max_x = (cx + radius).ceil().min(edge - 1.0);
        let max_y = (cy + radius).ceil().min(edge - 1.0);
        if max_x < 0.0 || max_y < 0.0 {
            return;
        }
        for y in min_y..=max_y as u32 {
            for x in min_x..=max_x as u32 {
                let dx = x as f32 + 0.5 - cx;
                let dy = y as f32 + 0.5 - cy;
                if dx * dx + dy * dy <= radius * radius {
                    self.surface.put_pixel(x, y, ink);
                }
            }
        }
    }

    pub fn load_overlay_file(&mut self, path: &Path) -> EngineResult<()> {
        let bytes = fs::read(path)
            .map_err(|err| EngineError::decode(format!("{}: {err}", path.display())))?;
        self.restore_overlay(&bytes)
    }
}

impl OverlayCanvas for RasterCanvas {
    fn capture_overlay(&self) -> EngineResult<Option<Vec<u8>>> {
        if self.is_blank() {
            return Ok(None);
        }
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(self.surface.clone())
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|err| EngineError::NoRenderContext(format!("overlay encode failed: {err}")))?;
        Ok(Some(bytes))
    }

    fn clear_overlay(&mut self) {
        self.surface.pixels_mut().for_each(|pixel| *pixel = Rgba([0, 0, 0, 0]));
    }

    fn restore_overlay(&mut self, payload: &[u8]) -> EngineResult<()> {
        let edge = self.resolution();
        let decoded = decode_image(payload, Some("image/png"), "overlay")?;
        self.surface = fit_square(decoded, edge, FilterType::Nearest);
        Ok(())
    }
}
