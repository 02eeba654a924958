//! Screen capture of the game client area

use image::{DynamicImage, RgbImage, RgbaImage};
use tracing::debug;

use crate::error::{CoreError, Result};
use crate::perception::FrameSource;
use crate::types::BBox;

/// Capture a screen region and return raw RGBA bytes
pub fn capture_region(region: BBox) -> Result<Vec<u8>> {
    if region.is_empty() {
        return Err(CoreError::PerceptionMiss(format!("empty capture region {region:?}")));
    }

    #[cfg(target_os = "windows")]
    {
        use screenshots::Screen;

        let screens = Screen::all().map_err(|e| CoreError::PerceptionMiss(e.to_string()))?;
        let screen = screens
            .first()
            .ok_or_else(|| CoreError::PerceptionMiss("no screens found".into()))?;
        let image = screen
            .capture_area(region.x1, region.y1, region.width() as u32, region.height() as u32)
            .map_err(|e| CoreError::PerceptionMiss(e.to_string()))?;

        Ok(image.into_raw())
    }

    #[cfg(not(target_os = "windows"))]
    {
        Err(CoreError::PerceptionMiss(
            "screen capture only supported on Windows".into(),
        ))
    }
}

/// Converts packed RGBA bytes into an RGB frame.
pub fn rgba_to_frame(raw: Vec<u8>, width: u32, height: u32) -> Result<RgbImage> {
    let len = raw.len();
    let rgba = RgbaImage::from_raw(width, height, raw).ok_or_else(|| {
        CoreError::PerceptionMiss(format!("{len} bytes do not form a {width}x{height} RGBA image"))
    })?;
    Ok(DynamicImage::ImageRgba8(rgba).to_rgb8())
}

/// Production frame source: the primary screen, cropped to the client area.
pub struct ScreenCapture {
    region: BBox,
}

impl ScreenCapture {
    pub fn new(region: BBox) -> Self {
        Self { region }
    }

    pub fn region(&self) -> BBox {
        self.region
    }
}

impl FrameSource for ScreenCapture {
    fn capture_frame(&self) -> Result<RgbImage> {
        let raw = capture_region(self.region)?;
        debug!(bytes = raw.len(), "captured client area");
        rgba_to_frame(raw, self.region.width() as u32, self.region.height() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgba_to_frame() {
        let mut raw = vec![0u8; 4 * 3 * 2];
        raw[4..8].copy_from_slice(&[10, 20, 30, 255]);
        let frame = rgba_to_frame(raw, 3, 2).unwrap();
        assert_eq!(frame.dimensions(), (3, 2));
        assert_eq!(frame.get_pixel(1, 0).0, [10, 20, 30]);
    }

    #[test]
    fn test_short_buffer_is_a_miss() {
        let err = rgba_to_frame(vec![0u8; 10], 3, 2).unwrap_err();
        assert!(matches!(err, CoreError::PerceptionMiss(_)));
    }

    #[test]
    fn test_empty_region_is_a_miss() {
        let err = capture_region(BBox::new(10, 10, 10, 50)).unwrap_err();
        assert!(matches!(err, CoreError::PerceptionMiss(_)));
    }
}
