//! Margin, border and padding aggregation.

use serde::Serialize;

use super::{to_layout, FlowDirection, Thickness};
use crate::style::{Color, Edges, ResolvedStyle};

/// Device scale used to snap border widths to whole device pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DpiScale {
    pub pixels_per_dip: f64,
}

impl Default for DpiScale {
    fn default() -> Self {
        Self { pixels_per_dip: 1.0 }
    }
}

impl DpiScale {
    pub fn new(pixels_per_dip: f64) -> Self {
        if pixels_per_dip.is_finite() && pixels_per_dip > 0.0 {
            Self { pixels_per_dip }
        } else {
            Self::default()
        }
    }

    fn snap(&self, px: f64) -> f64 {
        (px * self.pixels_per_dip).round() / self.pixels_per_dip
    }
}

/// Margin, border and padding of one element, in layout units.
///
/// `bp` and `mbp` are kept in step with the three groups by every method
/// that changes them.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MbpInfo {
    pub margin: Thickness,
    pub border: Thickness,
    pub padding: Thickness,
    pub bp: Thickness,
    pub mbp: Thickness,
    pub background: Option<Color>,
    pub border_color: Option<Color>,
}

impl MbpInfo {
    /// Read margin, border, padding and background from a resolved style.
    ///
    /// Borders snap to whole device pixels. Negative borders and paddings
    /// clamp to zero; margins keep their sign so negative margins can
    /// collapse.
    pub fn compute(style: &ResolvedStyle, dpi: DpiScale) -> MbpInfo {
        let margin = thickness(&style.margin, |px| px);
        let border = thickness(&style.border_width, |px| dpi.snap(px.max(0.0)));
        let padding = thickness(&style.padding, |px| px.max(0.0));
        let mut info = MbpInfo {
            margin,
            border,
            padding,
            background: style.background_color,
            border_color: style.border_color,
            ..Default::default()
        };
        info.recompute_sums();
        info
    }

    /// Like [`MbpInfo::compute`], mirrored into a track running in
    /// `track_direction`.
    pub fn compute_for_track(
        style: &ResolvedStyle,
        dpi: DpiScale,
        track_direction: FlowDirection,
    ) -> MbpInfo {
        let mut info = Self::compute(style, dpi);
        if style.flow_direction != track_direction {
            info.mirror_margin();
            info.mirror_bp();
        }
        info
    }

    /// An all-zero MBP, used for body containers that do not draw their
    /// element's box.
    pub fn empty() -> MbpInfo {
        MbpInfo::default()
    }

    pub fn mirror_margin(&mut self) {
        self.margin.mirror();
        self.recompute_sums();
    }

    pub fn mirror_bp(&mut self) {
        self.border.mirror();
        self.padding.mirror();
        self.recompute_sums();
    }

    pub fn has_background_or_border(&self) -> bool {
        self.background.map(|c| c.a > 0.0).unwrap_or(false) || !self.border.is_zero()
    }

    fn recompute_sums(&mut self) {
        self.bp = self.border.sum(&self.padding);
        self.mbp = self.margin.sum(&self.bp);
    }
}

fn thickness(edges: &Edges, f: impl Fn(f64) -> f64) -> Thickness {
    Thickness::new(
        to_layout(f(edges.left)),
        to_layout(f(edges.top)),
        to_layout(f(edges.right)),
        to_layout(f(edges.bottom)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::style::Style;

    fn styled(margin: Edges, border: Edges, padding: Edges) -> ResolvedStyle {
        Style {
            margin: Some(margin),
            border_width: Some(border),
            padding: Some(padding),
            ..Default::default()
        }
        .resolve(None)
    }

    #[test]
    fn sums_follow_groups() {
        let s = styled(Edges::uniform(10.0), Edges::uniform(1.0), Edges::uniform(2.0));
        let mbp = MbpInfo::compute(&s, DpiScale::default());
        assert_eq!(mbp.margin.top, 3000);
        assert_eq!(mbp.bp.left, 900);
        assert_eq!(mbp.mbp.right, 3900);
    }

    #[test]
    fn negative_padding_and_border_clamp() {
        let s = styled(
            Edges::uniform(-5.0),
            Edges::uniform(-1.0),
            Edges::uniform(-2.0),
        );
        let mbp = MbpInfo::compute(&s, DpiScale::default());
        assert_eq!(mbp.margin.top, -1500);
        assert!(mbp.bp.is_zero());
    }

    #[test]
    fn border_snaps_to_device_pixels() {
        let s = styled(Edges::default(), Edges::uniform(0.4), Edges::default());
        let mbp = MbpInfo::compute(&s, DpiScale::new(2.0));
        // 0.4px at 2x is 0.8 device px, snapped to 1 device px = 0.5px.
        assert_eq!(mbp.border.left, 150);
    }

    #[test]
    fn mirror_swaps_left_and_right_and_is_self_inverse() {
        let s = styled(
            Edges { top: 0.0, right: 4.0, bottom: 0.0, left: 1.0 },
            Edges { top: 0.0, right: 0.0, bottom: 0.0, left: 2.0 },
            Edges::default(),
        );
        let original = MbpInfo::compute(&s, DpiScale::default());
        let mut m = original;
        m.mirror_margin();
        assert_eq!(m.margin.left, 1200);
        assert_eq!(m.margin.right, 300);
        m.mirror_bp();
        assert_eq!(m.bp.right, 600);
        m.mirror_margin();
        m.mirror_bp();
        assert_eq!(m, original);
    }

    #[test]
    fn rtl_element_in_ltr_track_is_mirrored() {
        let style = Style {
            margin: Some(Edges { top: 0.0, right: 0.0, bottom: 0.0, left: 5.0 }),
            flow_direction: Some(FlowDirection::RightToLeft),
            ..Default::default()
        }
        .resolve(None);
        let m = MbpInfo::compute_for_track(&style, DpiScale::default(), FlowDirection::LeftToRight);
        assert_eq!(m.margin.right, 1500);
        assert_eq!(m.margin.left, 0);
    }
}
