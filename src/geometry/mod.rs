//! # Layout Geometry
//!
//! Everything the engine measures is expressed in a fixed-point layout unit:
//! an `i32` count of subunits, with [`SUBUNITS_PER_PIXEL`] subunits to one
//! device-independent pixel. Integer arithmetic keeps repeated formatting of
//! the same content bit-identical, which the incremental reflow relies on.
//!
//! Rectangles use `u`/`v` (inline/block) naming rather than `x`/`y`: a
//! rectangle is always interpreted inside some track's logical frame, and
//! that frame may run right-to-left. [`FlowTransform`] converts a local
//! logical rectangle into its parent's frame, mirroring when the two flow
//! directions differ.

pub mod margin;
pub mod mbp;

use serde::{Deserialize, Serialize};

pub use margin::{collapse_bottom_margin, collapse_top_margin, MarginCollapsingState};
pub use mbp::{DpiScale, MbpInfo};

/// Fixed-point layout unit.
pub type LayoutUnit = i32;

/// Subunits per device-independent pixel.
pub const SUBUNITS_PER_PIXEL: f64 = 300.0;

/// Smallest extent a computed rectangle may have.
pub const MIN_WIDTH: LayoutUnit = 1;

/// Largest page extent the engine accepts, in subunits.
pub const MAX_LAYOUT_SIZE: LayoutUnit = 3_500_000;

/// Convert a pixel value to layout units, rounding to the nearest subunit.
///
/// Non-finite input maps to 0; out-of-range input saturates at the engine
/// limit.
pub fn to_layout(px: f64) -> LayoutUnit {
    if !px.is_finite() {
        return 0;
    }
    let lu = (px * SUBUNITS_PER_PIXEL).round();
    lu.clamp(-(MAX_LAYOUT_SIZE as f64), MAX_LAYOUT_SIZE as f64) as LayoutUnit
}

/// Convert layout units back to pixels.
pub fn from_layout(lu: LayoutUnit) -> f64 {
    lu as f64 / SUBUNITS_PER_PIXEL
}

/// A point in some track's logical frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LayoutPoint {
    pub u: LayoutUnit,
    pub v: LayoutUnit,
}

impl LayoutPoint {
    pub fn new(u: LayoutUnit, v: LayoutUnit) -> Self {
        Self { u, v }
    }
}

/// Axis-aligned rectangle: origin plus extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LayoutRect {
    pub u: LayoutUnit,
    pub v: LayoutUnit,
    pub du: LayoutUnit,
    pub dv: LayoutUnit,
}

impl LayoutRect {
    pub fn new(u: LayoutUnit, v: LayoutUnit, du: LayoutUnit, dv: LayoutUnit) -> Self {
        Self { u, v, du, dv }
    }

    pub fn u_end(&self) -> LayoutUnit {
        self.u + self.du
    }

    pub fn v_end(&self) -> LayoutUnit {
        self.v + self.dv
    }

    pub fn is_empty(&self) -> bool {
        self.du <= 0 || self.dv <= 0
    }

    /// Half-open containment test: the far edges are outside.
    pub fn contains(&self, point: LayoutPoint) -> bool {
        point.u >= self.u && point.u < self.u_end() && point.v >= self.v && point.v < self.v_end()
    }

    pub fn intersects(&self, other: &LayoutRect) -> bool {
        self.u < other.u_end()
            && other.u < self.u_end()
            && self.v < other.v_end()
            && other.v < self.v_end()
    }

    /// Whether the block ranges `[v, v_end)` overlap.
    pub fn overlaps_v(&self, v: LayoutUnit, v_end: LayoutUnit) -> bool {
        self.v < v_end && v < self.v_end()
    }

    pub fn union(&self, other: &LayoutRect) -> LayoutRect {
        let u = self.u.min(other.u);
        let v = self.v.min(other.v);
        let u_end = self.u_end().max(other.u_end());
        let v_end = self.v_end().max(other.v_end());
        LayoutRect::new(u, v, u_end - u, v_end - v)
    }

    pub fn offset(&self, du: LayoutUnit, dv: LayoutUnit) -> LayoutRect {
        LayoutRect::new(self.u + du, self.v + dv, self.du, self.dv)
    }

    /// Shrink by `t`. Extents never drop below [`MIN_WIDTH`], even when the
    /// thickness is larger than the rectangle.
    pub fn deflate(&self, t: &Thickness) -> LayoutRect {
        LayoutRect::new(
            self.u + t.left,
            self.v + t.top,
            (self.du - t.horizontal()).max(MIN_WIDTH),
            (self.dv - t.vertical()).max(MIN_WIDTH),
        )
    }

    pub fn inflate(&self, t: &Thickness) -> LayoutRect {
        LayoutRect::new(
            self.u - t.left,
            self.v - t.top,
            self.du + t.horizontal(),
            self.dv + t.vertical(),
        )
    }

    /// Clamp both extents to [`MIN_WIDTH`].
    pub fn clamped(&self) -> LayoutRect {
        LayoutRect::new(self.u, self.v, self.du.max(MIN_WIDTH), self.dv.max(MIN_WIDTH))
    }

    /// Reflect this rectangle horizontally inside `container`.
    pub fn mirror_within(&self, container: &LayoutRect) -> LayoutRect {
        LayoutRect::new(
            container.u + container.u_end() - self.u_end(),
            self.v,
            self.du,
            self.dv,
        )
    }
}

/// Four-sided thickness in layout units (margin, border or padding).
///
/// `left`/`right` are the inline start/end sides in the frame the thickness
/// is currently expressed in; [`Thickness::mirror`] moves it to the opposite
/// direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Thickness {
    pub left: LayoutUnit,
    pub top: LayoutUnit,
    pub right: LayoutUnit,
    pub bottom: LayoutUnit,
}

impl Thickness {
    pub fn new(left: LayoutUnit, top: LayoutUnit, right: LayoutUnit, bottom: LayoutUnit) -> Self {
        Self { left, top, right, bottom }
    }

    pub fn uniform(v: LayoutUnit) -> Self {
        Self::new(v, v, v, v)
    }

    pub fn horizontal(&self) -> LayoutUnit {
        self.left + self.right
    }

    pub fn vertical(&self) -> LayoutUnit {
        self.top + self.bottom
    }

    pub fn is_zero(&self) -> bool {
        *self == Thickness::default()
    }

    pub fn mirror(&mut self) {
        std::mem::swap(&mut self.left, &mut self.right);
    }

    pub fn sum(&self, other: &Thickness) -> Thickness {
        Thickness::new(
            self.left + other.left,
            self.top + other.top,
            self.right + other.right,
            self.bottom + other.bottom,
        )
    }
}

/// Inline flow direction of an element or track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub enum FlowDirection {
    #[default]
    LeftToRight,
    RightToLeft,
}

impl FlowDirection {
    pub fn is_rtl(self) -> bool {
        matches!(self, FlowDirection::RightToLeft)
    }
}

/// Maps rectangles from a nested track's logical frame into its parent's
/// frame.
///
/// `u0`/`v0`/`width` describe the nested track's box in the parent frame;
/// `mirrored` is set when the nested frame runs opposite to the parent's.
/// Transforms compose with [`FlowTransform::nested`], so a chain of them
/// always collapses back into a single transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowTransform {
    pub u0: LayoutUnit,
    pub v0: LayoutUnit,
    pub width: LayoutUnit,
    pub mirrored: bool,
}

impl FlowTransform {
    pub fn identity(width: LayoutUnit) -> Self {
        Self { u0: 0, v0: 0, width, mirrored: false }
    }

    /// A frame whose physical box is `rect`, mirrored when `direction` is RTL.
    pub fn for_box(rect: &LayoutRect, direction: FlowDirection) -> Self {
        Self {
            u0: rect.u,
            v0: rect.v,
            width: rect.du,
            mirrored: direction.is_rtl(),
        }
    }

    pub fn apply(&self, r: &LayoutRect) -> LayoutRect {
        let u = if self.mirrored {
            self.u0 + self.width - r.u - r.du
        } else {
            self.u0 + r.u
        };
        LayoutRect::new(u, self.v0 + r.v, r.du, r.dv)
    }

    pub fn apply_point(&self, p: LayoutPoint) -> LayoutPoint {
        let u = if self.mirrored { self.u0 + self.width - p.u } else { self.u0 + p.u };
        LayoutPoint::new(u, self.v0 + p.v)
    }

    /// Map a parent-frame point back into this frame.
    pub fn inverse_point(&self, p: LayoutPoint) -> LayoutPoint {
        let u = if self.mirrored { self.u0 + self.width - p.u } else { p.u - self.u0 };
        LayoutPoint::new(u, p.v - self.v0)
    }

    /// Frame of a nested track whose box is `local_box` in this frame.
    /// `direction_differs` flips the mirroring relative to this frame.
    pub fn nested(&self, local_box: &LayoutRect, direction_differs: bool) -> FlowTransform {
        let b = self.apply(local_box);
        FlowTransform {
            u0: b.u,
            v0: b.v,
            width: b.du,
            mirrored: self.mirrored ^ direction_differs,
        }
    }
}
