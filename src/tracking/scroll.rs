//! Scroll depth tracking
//!
//! One tracker per page. Raw scroll metrics become a depth percentage; the
//! deepest depth reached feeds a [`ThresholdGate`] and each newly crossed
//! milestone produces one `scroll_depth` record.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::emitter::Emitter;
use crate::tracking::gate::{progress_percent, ThresholdGate};

/// Raw measurements taken on a scroll event
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScrollMetrics {
    /// Vertical scroll offset in pixels
    pub scroll_top: f64,
    /// Visible viewport height in pixels
    pub viewport_height: f64,
    /// Full document height in pixels
    pub document_height: f64,
}

impl ScrollMetrics {
    /// Height that can actually be scrolled
    pub fn scrollable_height(&self) -> f64 {
        self.document_height - self.viewport_height
    }

    /// Current depth in percent, or `None` when the content fits the viewport
    pub fn depth_percent(&self) -> Option<f64> {
        progress_percent(self.scroll_top, self.scrollable_height())
    }
}

/// Scroll milestone tracker for one page
#[derive(Debug, Clone)]
pub struct ScrollTracker {
    page_path: String,
    gate: ThresholdGate,
    max_depth: u8,
}

impl ScrollTracker {
    pub fn new(page_path: impl Into<String>, milestones: impl IntoIterator<Item = u8>) -> Self {
        Self {
            page_path: page_path.into(),
            gate: ThresholdGate::new(milestones),
            max_depth: 0,
        }
    }

    pub fn page_path(&self) -> &str {
        &self.page_path
    }

    /// Deepest depth reached so far, in percent
    pub fn max_depth(&self) -> u8 {
        self.max_depth
    }

    pub fn gate(&self) -> &ThresholdGate {
        &self.gate
    }

    /// Handle one scroll event; returns the milestones fired by it
    pub fn observe(&mut self, metrics: ScrollMetrics, emitter: &Emitter) -> Vec<u8> {
        let Some(depth) = metrics.depth_percent() else {
            debug!(page = %self.page_path, "scrollable height unavailable, skipping");
            return Vec::new();
        };

        // depth is already clamped to [0, 100]
        self.max_depth = self.max_depth.max(depth as u8);

        let fired = self.gate.observe(f64::from(self.max_depth));
        for milestone in &fired {
            emitter.scroll_depth(*milestone, &self.page_path);
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::DataLayer;
    use crate::tracking::gate::DEFAULT_MILESTONES;
    use serde_json::json;
    use std::sync::Arc;

    fn metrics(scroll_top: f64) -> ScrollMetrics {
        ScrollMetrics {
            scroll_top,
            viewport_height: 800.0,
            document_height: 4800.0,
        }
    }

    #[test]
    fn test_milestones_fire_as_page_scrolls() {
        let layer = Arc::new(DataLayer::new());
        let emitter = Emitter::new(layer.clone());
        let mut tracker = ScrollTracker::new("/scroll-tracking", DEFAULT_MILESTONES);

        tracker.observe(metrics(0.0), &emitter);
        tracker.observe(metrics(1000.0), &emitter);
        tracker.observe(metrics(2100.0), &emitter);
        tracker.observe(metrics(900.0), &emitter);
        tracker.observe(metrics(4000.0), &emitter);

        let depths: Vec<_> = layer
            .filter("scroll_depth")
            .iter()
            .map(|r| r.get("scroll_depth").cloned().unwrap())
            .collect();
        assert_eq!(depths, vec![json!(25), json!(50), json!(75), json!(100)]);
        assert_eq!(tracker.max_depth(), 100);
    }

    #[test]
    fn test_scrolling_back_up_keeps_max_depth() {
        let layer = Arc::new(DataLayer::new());
        let emitter = Emitter::new(layer.clone());
        let mut tracker = ScrollTracker::new("/article", DEFAULT_MILESTONES);

        tracker.observe(metrics(2000.0), &emitter);
        tracker.observe(metrics(0.0), &emitter);
        tracker.observe(metrics(2000.0), &emitter);

        assert_eq!(tracker.max_depth(), 50);
        assert_eq!(layer.len(), 2);
    }

    #[test]
    fn test_content_fits_viewport_never_fires() {
        let layer = Arc::new(DataLayer::new());
        let emitter = Emitter::new(layer.clone());
        let mut tracker = ScrollTracker::new("/short", DEFAULT_MILESTONES);

        let fits = ScrollMetrics {
            scroll_top: 0.0,
            viewport_height: 900.0,
            document_height: 900.0,
        };
        for _ in 0..10 {
            assert!(tracker.observe(fits, &emitter).is_empty());
        }
        let shorter = ScrollMetrics {
            document_height: 600.0,
            ..fits
        };
        assert!(tracker.observe(shorter, &emitter).is_empty());

        assert!(layer.filter("scroll_depth").is_empty());
    }
}
