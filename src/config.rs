//! Engine configuration.
//!
//! Every field has a default, so an empty JSON object is a valid
//! configuration. Lengths are in layout units unless the name says
//! otherwise.

use serde::Deserialize;

use crate::error::Result;
use crate::geometry::{DpiScale, LayoutUnit, MAX_LAYOUT_SIZE};
use crate::text::{MetricsKind, MonospaceMetrics, ProportionalMetrics, TextMetrics};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LayoutConfig {
    /// Device pixels per device-independent pixel, for border snapping.
    pub pixels_per_dip: f64,
    /// Page sizes and margins are clamped to this.
    pub max_page_size: LayoutUnit,
    /// Subtracted from the column-count page margin adjustment so rounding
    /// never brings back a partial column.
    pub column_rounding_epsilon: LayoutUnit,
    /// Added to the measured width on the second auto-width pass of a
    /// figure or floater.
    pub auto_width_slack: LayoutUnit,
    /// Wall-clock budget of one background pagination slice.
    pub background_budget_ms: u64,
    /// Minimum time between two background slices.
    pub background_throttle_ms: u64,
    /// Probe limit for balancing the columns of a bottomless subpage.
    pub column_balance_iterations: u32,
    /// Finite pages kept in the pagination cache.
    pub page_cache_limit: usize,
    pub metrics: MetricsKind,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            pixels_per_dip: 1.0,
            max_page_size: MAX_LAYOUT_SIZE,
            column_rounding_epsilon: 3,
            auto_width_slack: 1,
            background_budget_ms: 50,
            background_throttle_ms: 200,
            column_balance_iterations: 12,
            page_cache_limit: 256,
            metrics: MetricsKind::Proportional,
        }
    }
}

impl LayoutConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn dpi(&self) -> DpiScale {
        DpiScale::new(self.pixels_per_dip)
    }

    /// The built-in metrics this configuration selects.
    pub fn text_metrics(&self) -> Box<dyn TextMetrics> {
        match self.metrics {
            MetricsKind::Proportional => Box::new(ProportionalMetrics),
            MetricsKind::Monospace => Box::new(MonospaceMetrics::default()),
        }
    }
}
