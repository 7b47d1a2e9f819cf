//! # Style System
//!
//! The resolved-value source the layout core reads from. A [`Style`] is the
//! sparse, deserializable set of properties attached to one element; every
//! field is optional. [`Style::resolve`] turns it into a [`ResolvedStyle`]
//! with every value present, inheriting the text properties from the parent
//! element's resolved style.
//!
//! Lengths are in device-independent pixels. The layout core converts them
//! to layout units with [`crate::geometry::to_layout`].

use serde::{Deserialize, Serialize};

use crate::geometry::FlowDirection;

/// The complete set of style properties for an element.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Style {
    // ── Box Model ──────────────────────────────────────────────
    /// Explicit width.
    pub width: Option<Dimension>,
    /// Explicit height.
    pub height: Option<Dimension>,
    /// Margin outside the border.
    #[serde(default)]
    pub margin: Option<Edges>,
    /// Padding inside the border.
    #[serde(default)]
    pub padding: Option<Edges>,
    /// Border width per side.
    pub border_width: Option<Edges>,
    pub border_color: Option<Color>,
    pub background_color: Option<Color>,

    // ── Text ───────────────────────────────────────────────────
    pub flow_direction: Option<FlowDirection>,
    /// Font size in pixels.
    pub font_size: Option<f64>,
    /// Line height as a multiplier of font size.
    pub line_height: Option<f64>,
    pub text_align: Option<TextAlign>,
    pub text_trimming: Option<TextTrimming>,
    pub text_wrapping: Option<TextWrapping>,

    // ── Columns ────────────────────────────────────────────────
    /// Number of columns. A block with more than one column is laid out
    /// as a nested page.
    pub column_count: Option<u32>,
    /// Desired column width. Columns widen to fill the page when
    /// `is_column_width_flexible` is set.
    pub column_width: Option<f64>,
    pub column_gap: Option<f64>,
    pub column_rule_width: Option<f64>,
    pub column_rule_color: Option<Color>,
    pub is_column_width_flexible: Option<bool>,

    // ── Figures & Floaters ─────────────────────────────────────
    pub horizontal_anchor: Option<HorizontalAnchor>,
    pub vertical_anchor: Option<VerticalAnchor>,
    pub horizontal_offset: Option<f64>,
    pub vertical_offset: Option<f64>,
    /// Whether a figure may move to a later column or page when it does
    /// not fit where it is anchored.
    pub can_delay_placement: Option<bool>,
    pub wrap_direction: Option<WrapDirection>,
    /// Floater alignment.
    pub horizontal_alignment: Option<HorizontalAlignment>,
    /// Move below preceding floats on the given side.
    pub clear: Option<Clear>,

    // ── Lists ──────────────────────────────────────────────────
    pub marker_style: Option<MarkerStyle>,
    /// Indent reserved for list markers.
    pub marker_offset: Option<f64>,
    /// First ordinal of a numbered list.
    pub start_index: Option<u32>,
}

/// A length that can be pixels, percentage, or auto.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Dimension {
    Px(f64),
    /// Percentage of the available extent.
    Percent(f64),
    Auto,
}

impl Dimension {
    /// Resolve against an available extent. `Auto` resolves to `None`.
    pub fn resolve(&self, available: f64) -> Option<f64> {
        match self {
            Dimension::Px(v) => Some(*v),
            Dimension::Percent(p) => Some(available * p / 100.0),
            Dimension::Auto => None,
        }
    }
}

/// Edge values (top, right, bottom, left) used for margin, border and
/// padding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Edges {
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
    pub left: f64,
}

impl Edges {
    pub fn uniform(v: f64) -> Self {
        Self { top: v, right: v, bottom: v, left: v }
    }

    pub fn symmetric(vertical: f64, horizontal: f64) -> Self {
        Self {
            top: vertical,
            right: horizontal,
            bottom: vertical,
            left: horizontal,
        }
    }

    pub fn horizontal(&self) -> f64 {
        self.left + self.right
    }

    pub fn vertical(&self) -> f64 {
        self.top + self.bottom
    }
}

/// RGBA color, components in 0.0 - 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    pub a: f64,
}

impl Default for Color {
    fn default() -> Self {
        Color::BLACK
    }
}

impl Color {
    pub const BLACK: Color = Color { r: 0.0, g: 0.0, b: 0.0, a: 1.0 };
    pub const WHITE: Color = Color { r: 1.0, g: 1.0, b: 1.0, a: 1.0 };
    pub const TRANSPARENT: Color = Color { r: 0.0, g: 0.0, b: 0.0, a: 0.0 };

    pub fn rgb(r: f64, g: f64, b: f64) -> Self {
        Self { r, g, b, a: 1.0 }
    }
}

/// Horizontal text alignment, relative to the paragraph's flow direction:
/// `Left` is the inline start edge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextAlign {
    #[default]
    Left,
    Right,
    Center,
    Justify,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextTrimming {
    #[default]
    None,
    CharacterEllipsis,
    WordEllipsis,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextWrapping {
    #[default]
    Wrap,
    NoWrap,
}

/// Figure horizontal anchor. The declaration order matters: the reference
/// frame is `ordinal / 3` and the alignment `ordinal % 3`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum HorizontalAnchor {
    PageLeft,
    PageCenter,
    PageRight,
    ContentLeft,
    ContentCenter,
    ContentRight,
    ColumnLeft,
    ColumnCenter,
    #[default]
    ColumnRight,
}

/// What a figure's horizontal position is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReferenceFrame {
    Page,
    Content,
    Column,
}

/// Alignment bucket within a reference frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AnchorAlignment {
    Min,
    Center,
    Max,
}

impl HorizontalAnchor {
    const ALL: [HorizontalAnchor; 9] = [
        HorizontalAnchor::PageLeft,
        HorizontalAnchor::PageCenter,
        HorizontalAnchor::PageRight,
        HorizontalAnchor::ContentLeft,
        HorizontalAnchor::ContentCenter,
        HorizontalAnchor::ContentRight,
        HorizontalAnchor::ColumnLeft,
        HorizontalAnchor::ColumnCenter,
        HorizontalAnchor::ColumnRight,
    ];

    pub fn ordinal(self) -> usize {
        self as usize
    }

    pub fn from_parts(frame: ReferenceFrame, alignment: AnchorAlignment) -> HorizontalAnchor {
        let f = match frame {
            ReferenceFrame::Page => 0,
            ReferenceFrame::Content => 1,
            ReferenceFrame::Column => 2,
        };
        let a = match alignment {
            AnchorAlignment::Min => 0,
            AnchorAlignment::Center => 1,
            AnchorAlignment::Max => 2,
        };
        Self::ALL[f * 3 + a]
    }

    pub fn reference_frame(self) -> ReferenceFrame {
        match self.ordinal() / 3 {
            0 => ReferenceFrame::Page,
            1 => ReferenceFrame::Content,
            _ => ReferenceFrame::Column,
        }
    }

    pub fn alignment(self) -> AnchorAlignment {
        match self.ordinal() % 3 {
            0 => AnchorAlignment::Min,
            1 => AnchorAlignment::Center,
            _ => AnchorAlignment::Max,
        }
    }
}

/// Figure vertical anchor. `ParagraphTop` positions the figure at its
/// anchor paragraph instead of against a page region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerticalAnchor {
    PageTop,
    PageCenter,
    PageBottom,
    ContentTop,
    ContentCenter,
    ContentBottom,
    #[default]
    ParagraphTop,
}

impl VerticalAnchor {
    /// Frame and alignment for the page/content anchors; `None` for
    /// `ParagraphTop`.
    pub fn parts(self) -> Option<(ReferenceFrame, AnchorAlignment)> {
        let ordinal = self as usize;
        if ordinal >= 6 {
            return None;
        }
        let frame = if ordinal / 3 == 0 { ReferenceFrame::Page } else { ReferenceFrame::Content };
        let alignment = match ordinal % 3 {
            0 => AnchorAlignment::Min,
            1 => AnchorAlignment::Center,
            _ => AnchorAlignment::Max,
        };
        Some((frame, alignment))
    }
}

/// Which sides of a float text may flow around.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WrapDirection {
    None,
    Left,
    Right,
    #[default]
    Both,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum HorizontalAlignment {
    Left,
    Center,
    #[default]
    Right,
    Stretch,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Clear {
    #[default]
    None,
    Left,
    Right,
    Both,
}

impl Clear {
    pub fn clears_left(self) -> bool {
        matches!(self, Clear::Left | Clear::Both)
    }

    pub fn clears_right(self) -> bool {
        matches!(self, Clear::Right | Clear::Both)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarkerStyle {
    None,
    #[default]
    Disc,
    Circle,
    Square,
    Decimal,
    LowerLatin,
    UpperLatin,
}

impl MarkerStyle {
    /// Marker text for the list item at `index` (1-based for ordinals).
    pub fn marker_text(self, index: u32) -> String {
        match self {
            MarkerStyle::None => String::new(),
            MarkerStyle::Disc => "\u{2022}".to_string(),
            MarkerStyle::Circle => "\u{25E6}".to_string(),
            MarkerStyle::Square => "\u{25AA}".to_string(),
            MarkerStyle::Decimal => format!("{index}."),
            MarkerStyle::LowerLatin => format!("{}.", latin(index).to_lowercase()),
            MarkerStyle::UpperLatin => format!("{}.", latin(index)),
        }
    }
}

fn latin(mut index: u32) -> String {
    let mut out = Vec::new();
    while index > 0 {
        let rem = ((index - 1) % 26) as u8;
        out.push((b'A' + rem) as char);
        index = (index - 1) / 26;
    }
    out.iter().rev().collect()
}

/// Fully resolved style: every property has a concrete value.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedStyle {
    /// Explicit width in pixels, `None` for auto.
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub margin: Edges,
    pub padding: Edges,
    pub border_width: Edges,
    pub border_color: Option<Color>,
    pub background_color: Option<Color>,

    pub flow_direction: FlowDirection,
    pub font_size: f64,
    pub line_height: f64,
    pub text_align: TextAlign,
    pub text_trimming: TextTrimming,
    pub text_wrapping: TextWrapping,

    pub column_count: u32,
    pub column_width: Option<f64>,
    pub column_gap: f64,
    pub column_rule_width: f64,
    pub column_rule_color: Color,
    pub is_column_width_flexible: bool,

    pub horizontal_anchor: HorizontalAnchor,
    pub vertical_anchor: VerticalAnchor,
    pub horizontal_offset: f64,
    pub vertical_offset: f64,
    pub can_delay_placement: bool,
    pub wrap_direction: WrapDirection,
    pub horizontal_alignment: HorizontalAlignment,
    pub clear: Clear,

    pub marker_style: MarkerStyle,
    pub marker_offset: f64,
    pub start_index: u32,
}

impl Default for ResolvedStyle {
    fn default() -> Self {
        Style::default().resolve(None)
    }
}

pub const DEFAULT_FONT_SIZE: f64 = 16.0;
pub const DEFAULT_LINE_HEIGHT: f64 = 1.25;

impl Style {
    /// Resolve against the parent's resolved style. Text properties
    /// inherit; box, column and float properties do not.
    pub fn resolve(&self, parent: Option<&ResolvedStyle>) -> ResolvedStyle {
        let font_size = self
            .font_size
            .filter(|s| s.is_finite() && *s > 0.0)
            .or(parent.map(|p| p.font_size))
            .unwrap_or(DEFAULT_FONT_SIZE);

        ResolvedStyle {
            width: self.width.and_then(|d| match d {
                Dimension::Px(v) => Some(v),
                _ => None,
            }),
            height: self.height.and_then(|d| match d {
                Dimension::Px(v) => Some(v),
                _ => None,
            }),
            margin: self.margin.unwrap_or_default(),
            padding: self.padding.unwrap_or_default(),
            border_width: self.border_width.unwrap_or_default(),
            border_color: self.border_color,
            background_color: self.background_color,

            flow_direction: self
                .flow_direction
                .or(parent.map(|p| p.flow_direction))
                .unwrap_or_default(),
            font_size,
            line_height: self
                .line_height
                .or(parent.map(|p| p.line_height))
                .unwrap_or(DEFAULT_LINE_HEIGHT),
            text_align: self.text_align.or(parent.map(|p| p.text_align)).unwrap_or_default(),
            text_trimming: self
                .text_trimming
                .or(parent.map(|p| p.text_trimming))
                .unwrap_or_default(),
            text_wrapping: self
                .text_wrapping
                .or(parent.map(|p| p.text_wrapping))
                .unwrap_or_default(),

            column_count: self.column_count.unwrap_or(1).max(1),
            column_width: self.column_width.filter(|w| *w > 0.0),
            column_gap: self.column_gap.unwrap_or(font_size).max(0.0),
            column_rule_width: self.column_rule_width.unwrap_or(0.0).max(0.0),
            column_rule_color: self.column_rule_color.unwrap_or(Color::BLACK),
            is_column_width_flexible: self.is_column_width_flexible.unwrap_or(true),

            horizontal_anchor: self.horizontal_anchor.unwrap_or_default(),
            vertical_anchor: self.vertical_anchor.unwrap_or_default(),
            horizontal_offset: self.horizontal_offset.unwrap_or(0.0),
            vertical_offset: self.vertical_offset.unwrap_or(0.0),
            can_delay_placement: self.can_delay_placement.unwrap_or(true),
            wrap_direction: self.wrap_direction.unwrap_or_default(),
            horizontal_alignment: self.horizontal_alignment.unwrap_or_default(),
            clear: self.clear.unwrap_or_default(),

            marker_style: self.marker_style.unwrap_or_default(),
            marker_offset: self.marker_offset.unwrap_or(font_size * 1.5).max(0.0),
            start_index: self.start_index.unwrap_or(1),
        }
    }
}

impl ResolvedStyle {
    /// Line advance in pixels.
    pub fn line_advance(&self) -> f64 {
        self.font_size * self.line_height
    }
}
