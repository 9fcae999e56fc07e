use anyhow::Result;
use tracing::debug;

use crate::config::BlurConfig;
use crate::frame::FrameBuffer;
use crate::pipeline::FrameFilter;

const CHROMA_CENTER: f32 = 128.0;

/// Brightness, contrast, gamma and saturation applied in-process through
/// per-plane lookup tables.
///
/// Brightness shifts luma by up to a full range, contrast scales around mid
/// grey by `1 + contrast`, gamma is applied last. Saturation scales chroma
/// around 128 by `1 + saturation`.
#[derive(Debug, Clone)]
pub struct ColorAdjust {
    luma: [u8; 256],
    chroma: [u8; 256],
}

impl ColorAdjust {
    pub fn new(brightness: f32, contrast: f32, saturation: f32, gamma: f32) -> Self {
        let gamma = if gamma > 0.0 { gamma } else { 1.0 };
        let mut luma = [0u8; 256];
        let mut chroma = [0u8; 256];

        for (value, (y, c)) in luma.iter_mut().zip(chroma.iter_mut()).enumerate() {
            let mut v = value as f32 / 255.0 + brightness;
            v = (v - 0.5) * (1.0 + contrast) + 0.5;
            v = v.clamp(0.0, 1.0).powf(1.0 / gamma);
            *y = (v * 255.0).round().clamp(0.0, 255.0) as u8;

            let s = (value as f32 - CHROMA_CENTER) * (1.0 + saturation) + CHROMA_CENTER;
            *c = s.round().clamp(0.0, 255.0) as u8;
        }

        Self { luma, chroma }
    }

    /// `None` when the config leaves colors untouched or hands filtering to
    /// a custom ffmpeg chain.
    pub fn from_config(config: &BlurConfig) -> Option<Self> {
        if !config.has_color_adjustment() {
            return None;
        }
        if !config.ffmpeg_filters.trim().is_empty() {
            debug!("Custom ffmpeg filters set; skipping built-in color adjustment");
            return None;
        }
        Some(Self::new(
            config.brightness,
            config.contrast,
            config.saturation,
            config.gamma,
        ))
    }
}

fn map_plane(frame: &mut FrameBuffer, index: usize, lut: &[u8; 256]) {
    let plane = frame.plane_mut(index);
    for y in 0..plane.height() {
        for px in plane.row_mut(y) {
            *px = lut[usize::from(*px)];
        }
    }
}

impl FrameFilter for ColorAdjust {
    fn name(&self) -> &str {
        "color_adjust"
    }

    fn apply(&mut self, frame: &mut FrameBuffer) -> Result<()> {
        map_plane(frame, 0, &self.luma);
        map_plane(frame, 1, &self.chroma);
        map_plane(frame, 2, &self.chroma);
        Ok(())
    }
}
