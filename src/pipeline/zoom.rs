//! Presentation zoom, applied uniformly to every rendered page.
//!
//! Held as integer percent so that N steps in followed by N steps out land
//! back exactly where they started.

use crate::config::ViewerConfig;

/// Zoom level at which pages are shown at their base raster size.
pub const DEFAULT_ZOOM_PERCENT: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Zoom {
    percent: u32,
    step: u32,
    min: u32,
    max: u32,
}

impl Default for Zoom {
    fn default() -> Self {
        Self::from_config(&ViewerConfig::default())
    }
}

impl Zoom {
    pub fn from_config(config: &ViewerConfig) -> Self {
        Self {
            percent: DEFAULT_ZOOM_PERCENT,
            step: config.zoom_step_percent,
            min: config.zoom_min_percent,
            max: config.zoom_max_percent,
        }
    }

    pub fn percent(&self) -> u32 {
        self.percent
    }

    /// Multiplier applied to the base raster.
    pub fn factor(&self) -> f32 {
        self.percent as f32 / 100.0
    }

    pub fn can_zoom_in(&self) -> bool {
        self.percent < self.max
    }

    pub fn can_zoom_out(&self) -> bool {
        self.percent > self.min
    }

    pub fn zoom_in(&mut self) -> u32 {
        self.percent = (self.percent + self.step).min(self.max);
        self.percent
    }

    pub fn zoom_out(&mut self) -> u32 {
        self.percent = self.percent.saturating_sub(self.step).max(self.min);
        self.percent
    }

    pub fn reset(&mut self) {
        self.percent = DEFAULT_ZOOM_PERCENT;
    }
}
