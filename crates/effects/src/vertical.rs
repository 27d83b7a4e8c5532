//! Vertical (9:16) output framing.
//!
//! Any source image is cover-scaled to fill the frame and centre-cropped,
//! so nothing is letterboxed and nothing is stretched.

use serde::{Deserialize, Serialize};

/// Target output frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerticalFrame {
    pub width: u32,
    pub height: u32,
}

impl VerticalFrame {
    /// 1080×1920 portrait.
    pub const PORTRAIT_1080: VerticalFrame = VerticalFrame {
        width: 1080,
        height: 1920,
    };

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Width divided by height.
    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height.max(1) as f64
    }

    /// Whether the frame is taller than wide.
    pub fn is_portrait(&self) -> bool {
        self.height > self.width
    }

    /// `WxH` size string used by filters.
    pub fn size_arg(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }

    /// Scale a `src_w × src_h` image so it covers the frame.
    ///
    /// Returns the scaled size before cropping.
    pub fn cover_size(&self, src_w: u32, src_h: u32) -> (u32, u32) {
        let src_w = src_w.max(1) as f64;
        let src_h = src_h.max(1) as f64;
        let scale = (self.width as f64 / src_w).max(self.height as f64 / src_h);
        (
            ((src_w * scale).round() as u32).max(self.width),
            ((src_h * scale).round() as u32).max(self.height),
        )
    }

    /// Filter fragment that cover-scales and centre-crops into the frame.
    pub fn cover_crop_filter(&self) -> String {
        format!(
            "scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h}",
            w = self.width,
            h = self.height
        )
    }
}

impl Default for VerticalFrame {
    fn default() -> Self {
        Self::PORTRAIT_1080
    }
}
