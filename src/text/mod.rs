//! # Line Composer
//!
//! Line breaking, measurement and in-line hit testing for one paragraph.
//!
//! A [`LineComposer`] is built once per paragraph format by walking the
//! paragraph's positions and turning each into a [`TextItem`]: a character,
//! an embedded object, the anchor of a figure or floater, a zero-width inline
//! edge marker, a line break, or the paragraph break. Break opportunities
//! (UAX#14) and embedding levels (UAX#9) are resolved over the whole
//! paragraph at that point; after that every line is pure arithmetic over
//! the items, which is what makes [`LineComposer::recreate_line`] reproduce
//! [`LineComposer::format_line`] exactly.
//!
//! Item positions inside a [`Line`] are in the paragraph's logical frame: `u`
//! grows from the inline start edge, which is the right edge for RTL
//! paragraphs. The frame is mirrored back when the client arranges.

pub mod bidi;
pub mod metrics;

use std::collections::HashMap;

use serde::Serialize;
use unicode_linebreak::{linebreaks, BreakOpportunity};

use crate::content::{ElementId, ElementKind, LogicalDirection, PointerContext, TextContainer};
use crate::error::{LayoutError, Result};
use crate::geometry::{to_layout, FlowDirection, LayoutRect, LayoutUnit};
use crate::style::{ResolvedStyle, TextAlign, TextTrimming, TextWrapping};

pub use metrics::{MetricsKind, MonospaceMetrics, ProportionalMetrics, TextMetrics};

/// Measured sizes of embedded objects, in layout units.
pub type ObjectSizeCache = HashMap<ElementId, (LayoutUnit, LayoutUnit)>;

/// Whether embedded objects are measured or their cached size reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeMode {
    Measure,
    Render,
}

/// Break opportunity before an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BreakKind {
    Allowed,
    Mandatory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ItemKind {
    Char { ch: char },
    /// An embedded inline object.
    Object { element: ElementId },
    /// The inline anchor of a figure or floater. Covers the floating
    /// element's whole span and has no width.
    Anchor { element: ElementId },
    /// Start or end edge of an inline span.
    Marker,
    LineBreak,
    ParagraphBreak,
}

/// One measured unit of paragraph content.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextItem {
    pub cp: usize,
    pub len: usize,
    pub kind: ItemKind,
    pub width: LayoutUnit,
    pub ascent: LayoutUnit,
    pub descent: LayoutUnit,
    pub font_size: f64,
    pub level: u8,
    pub break_before: Option<BreakKind>,
    pub whitespace: bool,
}

/// Paragraph-level text properties.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextProperties {
    pub direction: FlowDirection,
    pub align: TextAlign,
    pub trimming: TextTrimming,
    pub wrapping: TextWrapping,
    pub font_size: f64,
    pub line_height: f64,
}

impl TextProperties {
    pub fn from_style(style: &ResolvedStyle) -> Self {
        Self {
            direction: style.flow_direction,
            align: style.text_align,
            trimming: style.text_trimming,
            wrapping: style.text_wrapping,
            font_size: style.font_size,
            line_height: style.line_height,
        }
    }
}

/// Where a text paragraph's content comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextSource {
    /// A `Paragraph` element; its end edge is the paragraph break.
    Element(ElementId),
    /// Loose inline content directly inside a block container, running
    /// from `start` to the next block boundary.
    Implicit { start: usize },
}

/// Continuation state handed from one line to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LineBreakRecord {
    pub cp: usize,
}

impl LineBreakRecord {
    pub fn duplicate(&self) -> LineBreakRecord {
        *self
    }
}

/// The part of a trimmed line hidden behind an ellipsis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollapsedRange {
    /// Content length still shown.
    pub visible_length: usize,
    /// Content length hidden.
    pub collapsed_length: usize,
    pub ellipsis_u: LayoutUnit,
    pub ellipsis_width: LayoutUnit,
}

/// An item placed on a line, in visual order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacedItem {
    /// Offset from the line's first position.
    pub offset: usize,
    pub len: usize,
    pub kind: ItemKind,
    pub u: LayoutUnit,
    pub width: LayoutUnit,
    pub level: u8,
    pub font_size: f64,
    pub hidden: bool,
}

impl PlacedItem {
    fn is_visible_glyph(&self) -> bool {
        !self.hidden && matches!(self.kind, ItemKind::Char { .. })
    }
}

/// A contiguous run of glyphs ready for a renderer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlyphRun {
    pub u: LayoutUnit,
    pub width: LayoutUnit,
    /// Display characters in visual order, mirrored where needed.
    pub text: String,
    pub font_size: f64,
    pub level: u8,
}

/// One formatted line.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Line {
    pub cp_start: usize,
    /// Content positions consumed.
    pub length: usize,
    /// Length including the synthetic paragraph terminator; never zero.
    pub safe_length: usize,
    /// Advance width without trailing whitespace.
    pub width: LayoutUnit,
    pub width_with_trailing: LayoutUnit,
    pub wrapping_width: LayoutUnit,
    pub height: LayoutUnit,
    pub baseline: LayoutUnit,
    pub is_truncated: bool,
    pub is_forced_broken: bool,
    pub ends_paragraph: bool,
    pub align: TextAlign,
    pub rtl: bool,
    pub collapsed: Option<CollapsedRange>,
    pub items: Vec<PlacedItem>,
    pub break_record: Option<LineBreakRecord>,
}

impl Line {
    pub fn cp_end(&self) -> usize {
        self.cp_start + self.length
    }

    /// Whether an ellipsis replaces part of this line.
    pub fn shows_ellipsis(&self) -> bool {
        self.collapsed.is_some()
    }

    /// Horizontal correction applied on top of the alignment offset so that
    /// trailing whitespace of right- and center-aligned lines hangs past
    /// the wrap edge. Zero while an ellipsis is shown.
    pub fn u_offset_shift(&self) -> LayoutUnit {
        calculate_u_offset_shift(
            self.align,
            self.width,
            self.width_with_trailing,
            self.wrapping_width,
            self.shows_ellipsis(),
        )
    }

    /// Offset of the line's first item from the track's start edge.
    pub fn start(&self) -> LayoutUnit {
        let slack = self.wrapping_width - self.width_with_trailing;
        let align_offset = match self.align {
            TextAlign::Left | TextAlign::Justify => 0,
            TextAlign::Right => slack.max(0),
            TextAlign::Center => (slack / 2).max(0),
        };
        align_offset + self.u_offset_shift()
    }

    /// Distance from the track start edge to the leading edge of `cp`.
    pub fn distance_from_cp(&self, cp: usize) -> LayoutUnit {
        let offset = cp.saturating_sub(self.cp_start);
        if let Some(c) = &self.collapsed {
            if offset >= c.visible_length {
                return self.start() + c.ellipsis_u;
            }
        }
        for item in &self.items {
            if item.hidden || item.len == 0 {
                continue;
            }
            if offset >= item.offset && offset < item.offset + item.len {
                let lead = if self.runs_backward(item.level) { item.width } else { 0 };
                return self.start() + item.u + lead;
            }
        }
        // Past the last item: trailing edge of the logically last item.
        match self.items.iter().filter(|i| !i.hidden).max_by_key(|i| i.offset) {
            Some(last) => {
                let trail = if self.runs_backward(last.level) { 0 } else { last.width };
                self.start() + last.u + trail
            }
            None => self.start(),
        }
    }

    /// Position closest to the distance `u` from the track start edge.
    pub fn cp_from_distance(&self, u: LayoutUnit) -> usize {
        let local = u - self.start();
        let last_cp = self.cp_start + self.hit_test_length();
        if local < 0 {
            return self.cp_start;
        }
        if let Some(c) = &self.collapsed {
            if local >= c.ellipsis_u {
                return self.cp_start + c.visible_length;
            }
        }
        for item in &self.items {
            if item.hidden || item.len == 0 || item.width == 0 {
                continue;
            }
            if local >= item.u && local < item.u + item.width {
                let in_first_half = local < item.u + item.width / 2;
                let leading = in_first_half != self.runs_backward(item.level);
                let cp = self.cp_start + item.offset + if leading { 0 } else { item.len };
                return cp.min(last_cp);
            }
        }
        last_cp
    }

    /// Rectangles (line-relative, `v` = 0) covering `[cp, cp + len)`.
    pub fn bounds_from_cp(&self, cp: usize, len: usize) -> Vec<LayoutRect> {
        let from = cp.saturating_sub(self.cp_start);
        let to = from + len.max(1);
        let start = self.start();
        let mut rects: Vec<LayoutRect> = Vec::new();
        for item in &self.items {
            if item.hidden || item.len == 0 {
                continue;
            }
            if item.offset < to && from < item.offset + item.len {
                let r = LayoutRect::new(start + item.u, 0, item.width, self.height);
                match rects.last_mut() {
                    Some(prev) if prev.u_end() == r.u => *prev = prev.union(&r),
                    _ => rects.push(r),
                }
            }
        }
        if let Some(c) = &self.collapsed {
            if to > c.visible_length {
                rects.push(LayoutRect::new(start + c.ellipsis_u, 0, c.ellipsis_width, self.height));
            }
        }
        if rects.is_empty() {
            rects.push(LayoutRect::new(self.distance_from_cp(cp), 0, 0, self.height));
        }
        rects
    }

    /// Glyph runs in visual order, offset by [`Line::start`].
    pub fn glyph_runs(&self) -> Vec<GlyphRun> {
        let start = self.start();
        let mut runs: Vec<GlyphRun> = Vec::new();
        let mut visual: Vec<&PlacedItem> = self.items.iter().filter(|i| i.is_visible_glyph()).collect();
        visual.sort_by_key(|i| i.u);
        for item in visual {
            let ItemKind::Char { ch } = item.kind else { continue };
            let display = if item.level % 2 == 1 { bidi::mirror_char(ch) } else { ch };
            let u = start + item.u;
            match runs.last_mut() {
                Some(run)
                    if run.u + run.width == u
                        && run.font_size == item.font_size
                        && run.level == item.level =>
                {
                    run.width += item.width;
                    if self.rtl {
                        run.text.insert(0, display);
                    } else {
                        run.text.push(display);
                    }
                }
                _ => runs.push(GlyphRun {
                    u,
                    width: item.width,
                    text: display.to_string(),
                    font_size: item.font_size,
                    level: item.level,
                }),
            }
        }
        if let Some(c) = &self.collapsed {
            runs.push(GlyphRun {
                u: start + c.ellipsis_u,
                width: c.ellipsis_width,
                text: ELLIPSIS.to_string(),
                font_size: self.items.first().map(|i| i.font_size).unwrap_or(0.0),
                level: if self.rtl { 1 } else { 0 },
            });
        }
        runs
    }

    /// Embedded objects on the line, with line-relative rectangles.
    pub fn inline_objects(&self) -> Vec<(ElementId, LayoutRect)> {
        let start = self.start();
        self.items
            .iter()
            .filter(|i| !i.hidden)
            .filter_map(|i| match i.kind {
                ItemKind::Object { element } => Some((
                    element,
                    LayoutRect::new(start + i.u, 0, i.width, self.height),
                )),
                _ => None,
            })
            .collect()
    }

    /// Floating elements anchored on this line.
    pub fn anchors(&self) -> Vec<(ElementId, usize)> {
        self.items
            .iter()
            .filter_map(|i| match i.kind {
                ItemKind::Anchor { element } => Some((element, self.cp_start + i.offset)),
                _ => None,
            })
            .collect()
    }

    fn runs_backward(&self, level: u8) -> bool {
        (level % 2 == 1) != self.rtl
    }

    /// Content length a caret can reach: the line minus trailing breaks.
    fn hit_test_length(&self) -> usize {
        let mut len = self.length;
        let mut logical: Vec<&PlacedItem> = self.items.iter().collect();
        logical.sort_by_key(|i| i.offset);
        for item in logical.iter().rev() {
            match item.kind {
                ItemKind::ParagraphBreak | ItemKind::LineBreak => len -= item.len,
                ItemKind::Char { ch: '\n' } => len -= item.len,
                _ => break,
            }
        }
        len
    }
}

const ELLIPSIS: char = '\u{2026}';

/// The alignment correction of [`Line::u_offset_shift`], as a free function
/// of the line's widths.
pub fn calculate_u_offset_shift(
    align: TextAlign,
    width: LayoutUnit,
    width_with_trailing: LayoutUnit,
    wrapping_width: LayoutUnit,
    shows_ellipsis: bool,
) -> LayoutUnit {
    if shows_ellipsis {
        return 0;
    }
    let trailing_delta = width - width_with_trailing;
    let excess = (width_with_trailing - wrapping_width).max(0);
    match align {
        TextAlign::Right => -(excess + trailing_delta),
        TextAlign::Center => -(excess + trailing_delta) / 2,
        TextAlign::Left | TextAlign::Justify => 0,
    }
}

/// Analysed content of one paragraph plus the line-breaking operations
/// over it.
#[derive(Debug, Clone)]
pub struct LineComposer {
    /// First position of the paragraph (its start edge for element-backed
    /// paragraphs).
    pub cp_start: usize,
    /// One past the last position the paragraph covers.
    pub cp_end: usize,
    pub props: TextProperties,
    items: Vec<TextItem>,
    default_ascent: LayoutUnit,
    default_descent: LayoutUnit,
    ellipsis_width: LayoutUnit,
}

impl LineComposer {
    /// Walk the paragraph's content and measure it.
    ///
    /// In [`ComposeMode::Measure`] embedded objects are measured and their
    /// sizes stored in `objects`; in [`ComposeMode::Render`] stored sizes
    /// are reused.
    pub fn analyze(
        content: &dyn TextContainer,
        metrics: &dyn TextMetrics,
        objects: &mut ObjectSizeCache,
        mode: ComposeMode,
        source: TextSource,
        props: TextProperties,
    ) -> Result<LineComposer> {
        let (cp_start, mut pos, owner) = match source {
            TextSource::Element(id) => {
                let (start, _) = content
                    .element_span(id)
                    .ok_or(LayoutError::StaleHandle { kind: "element" })?;
                (start, start + 1, Some(id))
            }
            TextSource::Implicit { start } => (start, start, None),
        };

        let mut items = Vec::new();
        let mut font_stack: Vec<f64> = vec![props.font_size];
        let limit = content.symbol_count();
        let mut finished = false;

        while pos < limit && !finished {
            let font_size = font_stack.last().copied().unwrap_or(props.font_size);
            match content.pointer_context(pos, LogicalDirection::Forward) {
                PointerContext::Text => {
                    let run = content.text_run(pos);
                    if run.is_empty() {
                        return Err(LayoutError::invariant(format!(
                            "zero-length text run at position {pos}"
                        )));
                    }
                    let (ascent, descent) = text_extent(metrics, font_size, props.line_height);
                    for ch in run.chars() {
                        items.push(TextItem {
                            cp: pos,
                            len: 1,
                            kind: ItemKind::Char { ch },
                            width: to_layout(metrics.advance(ch, font_size)),
                            ascent,
                            descent,
                            font_size,
                            level: 0,
                            break_before: None,
                            whitespace: ch.is_whitespace(),
                        });
                        pos += 1;
                    }
                }
                PointerContext::ElementStart => {
                    let Some(id) = content.adjacent_element(pos, LogicalDirection::Forward) else {
                        break;
                    };
                    let kind = content.element_kind(id);
                    match kind {
                        Some(ElementKind::Span) => {
                            items.push(zero_item(pos, 1, ItemKind::Marker, font_size));
                            font_stack.push(content.resolved_style(id).font_size);
                            pos += 1;
                        }
                        Some(ElementKind::LineBreak) => {
                            let len = span_len(content, id)?;
                            items.push(zero_item(pos, len, ItemKind::LineBreak, font_size));
                            pos += len;
                        }
                        Some(k) if k.is_floating() => {
                            let len = span_len(content, id)?;
                            items.push(zero_item(pos, len, ItemKind::Anchor { element: id }, font_size));
                            pos += len;
                        }
                        _ => break,
                    }
                }
                PointerContext::ElementEnd => {
                    let id = content.adjacent_element(pos, LogicalDirection::Forward);
                    if id.is_some() && id == owner {
                        items.push(zero_item(pos, 1, ItemKind::ParagraphBreak, font_size));
                        pos += 1;
                        finished = true;
                    } else if id.and_then(|e| content.element_kind(e)) == Some(ElementKind::Span) {
                        items.push(zero_item(pos, 1, ItemKind::Marker, font_size));
                        if font_stack.len() > 1 {
                            font_stack.pop();
                        }
                        pos += 1;
                    } else {
                        break;
                    }
                }
                PointerContext::EmbeddedElement => {
                    let Some(id) = content.adjacent_element(pos, LogicalDirection::Forward) else {
                        break;
                    };
                    let (w, h) = object_size(content, objects, mode, id);
                    items.push(TextItem {
                        cp: pos,
                        len: 1,
                        kind: ItemKind::Object { element: id },
                        width: w,
                        ascent: h,
                        descent: 0,
                        font_size,
                        level: 0,
                        break_before: None,
                        whitespace: false,
                    });
                    pos += 1;
                }
                PointerContext::None => break,
            }
        }

        if !finished {
            // Loose content: the terminator is synthetic and occupies no
            // position.
            items.push(zero_item(pos, 0, ItemKind::ParagraphBreak, props.font_size));
        }
        let cp_end = pos;

        resolve_breaks_and_levels(&mut items, props.direction);

        let (default_ascent, default_descent) = text_extent(metrics, props.font_size, props.line_height);
        Ok(LineComposer {
            cp_start,
            cp_end,
            props,
            items,
            default_ascent,
            default_descent,
            ellipsis_width: to_layout(metrics.advance(ELLIPSIS, props.font_size)),
        })
    }

    /// Number of positions the paragraph covers.
    pub fn cch(&self) -> usize {
        self.cp_end - self.cp_start
    }

    /// Position of the first line.
    pub fn first_cp(&self) -> usize {
        self.items.first().map(|i| i.cp).unwrap_or(self.cp_end)
    }

    pub fn items(&self) -> &[TextItem] {
        &self.items
    }

    /// Floating elements anchored anywhere in the paragraph.
    pub fn has_anchors(&self) -> bool {
        self.items.iter().any(|i| matches!(i.kind, ItemKind::Anchor { .. }))
    }

    /// Widest unbreakable item sequence, for auto-width measurement.
    pub fn min_content_width(&self) -> LayoutUnit {
        let mut widest = 0;
        let mut current = 0;
        for item in &self.items {
            if item.break_before.is_some() {
                current = 0;
            }
            if !item.whitespace {
                current += item.width;
                widest = widest.max(current);
            }
        }
        widest
    }

    /// Produce the line starting at `cursor` for a wrapping width.
    pub fn format_line(
        &self,
        cursor: usize,
        wrapping_width: LayoutUnit,
        incoming: Option<&LineBreakRecord>,
    ) -> Result<Line> {
        if let Some(record) = incoming {
            if record.cp != cursor {
                return Err(LayoutError::invariant(format!(
                    "line break record at {} does not match cursor {cursor}",
                    record.cp
                )));
            }
        }
        let start = self.item_index(cursor)?;
        let end = self.break_end(start, wrapping_width, false);
        Ok(self.finish_line(start, end, wrapping_width))
    }

    /// Like [`LineComposer::format_line`], but always makes progress: a line
    /// that cannot break is broken at the wrap edge even when trimming would
    /// otherwise keep the word whole.
    pub fn format_line_forced(&self, cursor: usize, wrapping_width: LayoutUnit) -> Result<Line> {
        let start = self.item_index(cursor)?;
        let end = self.break_end(start, wrapping_width, true);
        Ok(self.finish_line(start, end, wrapping_width))
    }

    /// Rebuild a line known to cover `target_length` positions from `cursor`.
    pub fn recreate_line(
        &self,
        cursor: usize,
        target_length: usize,
        wrapping_width: LayoutUnit,
    ) -> Result<Line> {
        let start = self.item_index(cursor)?;
        let mut consumed = 0;
        let mut end = start;
        while end < self.items.len() && consumed < target_length {
            consumed += self.items[end].len;
            end += 1;
        }
        // A trailing synthetic terminator belongs to the line that reaches it.
        if end < self.items.len()
            && self.items[end].len == 0
            && matches!(self.items[end].kind, ItemKind::ParagraphBreak)
        {
            end += 1;
        }
        if consumed != target_length || end == start {
            return Err(LayoutError::invariant(format!(
                "line of length {target_length} at {cursor} does not end on an item boundary"
            )));
        }
        Ok(self.finish_line(start, end, wrapping_width))
    }

    fn item_index(&self, cursor: usize) -> Result<usize> {
        let idx = self.items.partition_point(|i| i.cp < cursor);
        match self.items.get(idx) {
            Some(item) if item.cp == cursor => Ok(idx),
            _ => Err(LayoutError::invariant(format!(
                "position {cursor} is not a line start in paragraph at {}",
                self.cp_start
            ))),
        }
    }

    fn break_end(&self, start: usize, wrap: LayoutUnit, forced: bool) -> usize {
        let nowrap = self.props.wrapping == TextWrapping::NoWrap;
        let keep_words = self.props.trimming != TextTrimming::None && !forced;
        let mut total = 0;
        let mut content = 0;
        let mut last_opportunity = None;

        for i in start..self.items.len() {
            let item = &self.items[i];
            if i > start {
                match item.break_before {
                    Some(BreakKind::Mandatory) => return i,
                    Some(BreakKind::Allowed) => last_opportunity = Some(i),
                    None => {}
                }
            }
            total += item.width;
            if !item.whitespace {
                content = total;
            }
            if matches!(item.kind, ItemKind::ParagraphBreak) {
                return i + 1;
            }
            if !nowrap && content > wrap {
                if let Some(b) = last_opportunity {
                    return b;
                }
                if !keep_words {
                    return if i > start { i } else { i + 1 };
                }
            }
        }
        self.items.len()
    }

    fn finish_line(&self, start: usize, end: usize, wrap: LayoutUnit) -> Line {
        let items = &self.items[start..end];
        let cp_start = items.first().map(|i| i.cp).unwrap_or(self.cp_end);
        let length: usize = items.iter().map(|i| i.len).sum();
        let last = items.last();
        let ends_paragraph = matches!(last.map(|i| i.kind), Some(ItemKind::ParagraphBreak));
        let synthetic = ends_paragraph && last.map(|i| i.len == 0).unwrap_or(false);
        let safe_length = (length + usize::from(synthetic)).max(1);

        let mut widths: Vec<LayoutUnit> = items.iter().map(|i| i.width).collect();
        let width_with_trailing: LayoutUnit = widths.iter().sum();
        let last_visible = items.iter().rposition(|i| !i.whitespace && i.width > 0);
        let mut width: LayoutUnit = match last_visible {
            Some(k) => widths[..=k].iter().sum(),
            None => 0,
        };

        let is_truncated = self.props.trimming != TextTrimming::None && width > wrap;
        let is_forced_broken = !ends_paragraph
            && self.items.get(end).map(|i| i.break_before.is_none()).unwrap_or(false);
        let mandatory_end = self
            .items
            .get(end)
            .map(|i| i.break_before == Some(BreakKind::Mandatory))
            .unwrap_or(false);

        // Justification: spread the slack over interior spaces.
        let mut width_with_trailing = width_with_trailing;
        if self.props.align == TextAlign::Justify
            && !ends_paragraph
            && !mandatory_end
            && !is_truncated
            && width < wrap
        {
            if let Some(k) = last_visible {
                let spaces: Vec<usize> = (0..k)
                    .filter(|&j| matches!(items[j].kind, ItemKind::Char { ch: ' ' }))
                    .collect();
                if !spaces.is_empty() {
                    let slack = wrap - width;
                    let n = spaces.len() as LayoutUnit;
                    for (idx, &j) in spaces.iter().enumerate() {
                        widths[j] += slack / n + if (idx as LayoutUnit) < slack % n { 1 } else { 0 };
                    }
                    width += slack;
                    width_with_trailing += slack;
                }
            }
        }

        let collapsed = is_truncated.then(|| self.collapse(items, wrap, length));

        let (mut ascent, mut descent) = (0, 0);
        for item in items {
            if matches!(item.kind, ItemKind::Char { .. } | ItemKind::Object { .. }) {
                ascent = ascent.max(item.ascent);
                descent = descent.max(item.descent);
            }
        }
        if ascent == 0 && descent == 0 {
            ascent = self.default_ascent;
            descent = self.default_descent;
        }

        let rtl = self.props.direction.is_rtl();
        let levels: Vec<u8> = items.iter().map(|i| i.level).collect();
        let mut order = bidi::visual_order(&levels);
        if rtl {
            order.reverse();
        }
        let visible_limit = collapsed.map(|c| c.visible_length);
        let mut placed = Vec::with_capacity(items.len());
        let mut u = 0;
        let mut offsets = Vec::with_capacity(items.len());
        let mut acc = 0;
        for item in items {
            offsets.push(acc);
            acc += item.len;
        }
        for &idx in &order {
            let item = &items[idx];
            let offset = offsets[idx];
            let hidden = visible_limit.map(|v| offset >= v && item.len > 0).unwrap_or(false);
            let w = if hidden { 0 } else { widths[idx] };
            placed.push(PlacedItem {
                offset,
                len: item.len,
                kind: item.kind,
                u,
                width: w,
                level: item.level,
                font_size: item.font_size,
                hidden,
            });
            u += w;
        }

        Line {
            cp_start,
            length,
            safe_length,
            width,
            width_with_trailing,
            wrapping_width: wrap,
            height: ascent + descent,
            baseline: ascent,
            is_truncated,
            is_forced_broken,
            ends_paragraph,
            align: self.props.align,
            rtl,
            collapsed,
            items: placed,
            break_record: (!ends_paragraph).then_some(LineBreakRecord { cp: cp_start + length }),
        }
    }

    fn collapse(&self, items: &[TextItem], wrap: LayoutUnit, length: usize) -> CollapsedRange {
        let available = wrap - self.ellipsis_width;
        let mut used = 0;
        let mut visible = 0;
        let mut visible_items = 0;
        for item in items {
            if used + item.width > available {
                break;
            }
            used += item.width;
            visible += item.len;
            visible_items += 1;
        }
        if self.props.trimming == TextTrimming::WordEllipsis {
            if let Some(k) = (1..=visible_items.min(items.len().saturating_sub(1)))
                .rev()
                .find(|&k| items[k].break_before.is_some())
            {
                visible = items[..k].iter().map(|i| i.len).sum();
                used = items[..k].iter().map(|i| i.width).sum();
            }
        }
        CollapsedRange {
            visible_length: visible,
            collapsed_length: length - visible,
            ellipsis_u: used,
            ellipsis_width: self.ellipsis_width,
        }
    }
}

fn zero_item(cp: usize, len: usize, kind: ItemKind, font_size: f64) -> TextItem {
    TextItem {
        cp,
        len,
        kind,
        width: 0,
        ascent: 0,
        descent: 0,
        font_size,
        level: 0,
        break_before: None,
        whitespace: false,
    }
}

fn span_len(content: &dyn TextContainer, id: ElementId) -> Result<usize> {
    content
        .element_span(id)
        .map(|(s, e)| e - s)
        .ok_or(LayoutError::StaleHandle { kind: "element" })
}

fn text_extent(metrics: &dyn TextMetrics, font_size: f64, line_height: f64) -> (LayoutUnit, LayoutUnit) {
    let ascent = metrics.ascent(font_size);
    let descent = metrics.descent(font_size);
    let half_leading = ((font_size * line_height) - (ascent + descent)) / 2.0;
    (to_layout(ascent + half_leading), to_layout(descent + half_leading))
}

fn object_size(
    content: &dyn TextContainer,
    objects: &mut ObjectSizeCache,
    mode: ComposeMode,
    id: ElementId,
) -> (LayoutUnit, LayoutUnit) {
    if mode == ComposeMode::Render {
        if let Some(size) = objects.get(&id) {
            return *size;
        }
    }
    let (w, h) = content.object_size(id).unwrap_or(crate::content::DEFAULT_OBJECT_SIZE);
    let size = (to_layout(w), to_layout(h));
    objects.insert(id, size);
    size
}

/// Fill in `break_before` and `level` for every item.
///
/// Only characters, objects and line breaks take part in UAX#14/UAX#9;
/// markers, anchors and the paragraph break stick to the item before them.
fn resolve_breaks_and_levels(items: &mut [TextItem], direction: FlowDirection) {
    let mut text = String::new();
    let mut owners = Vec::new();
    for (idx, item) in items.iter().enumerate() {
        let ch = match item.kind {
            ItemKind::Char { ch } => ch,
            ItemKind::Object { .. } => '\u{FFFC}',
            ItemKind::LineBreak => '\u{2028}',
            _ => continue,
        };
        text.push(ch);
        owners.push(idx);
    }

    for (char_idx, opp) in compute_break_opportunities(&text).into_iter().enumerate() {
        if let Some(opp) = opp {
            items[owners[char_idx]].break_before = Some(match opp {
                BreakOpportunity::Mandatory => BreakKind::Mandatory,
                BreakOpportunity::Allowed => BreakKind::Allowed,
            });
        }
    }
    // Anything after a hard line break starts a new line, including a
    // paragraph break that directly follows it.
    for i in 1..items.len() {
        let after_break = matches!(items[i - 1].kind, ItemKind::LineBreak | ItemKind::Char { ch: '\n' });
        if after_break {
            items[i].break_before = Some(BreakKind::Mandatory);
        }
    }

    let levels = bidi::resolve_levels(&text, direction);
    let base = if direction.is_rtl() { 1 } else { 0 };
    let mut current = base;
    let mut next_owner = 0;
    for (idx, item) in items.iter_mut().enumerate() {
        if next_owner < owners.len() && owners[next_owner] == idx {
            current = levels.get(next_owner).copied().unwrap_or(base);
            next_owner += 1;
        }
        item.level = current;
    }
}

/// Compute UAX#14 break opportunities indexed by char position.
///
/// Returns a vec of length `text.chars().count()`. Each entry is the break
/// opportunity *before* that character position. Index 0 is always `None`.
fn compute_break_opportunities(text: &str) -> Vec<Option<BreakOpportunity>> {
    let char_count = text.chars().count();
    let mut result = vec![None; char_count];

    // linebreaks() yields the byte offset AFTER each break; map it to the
    // index of the char that starts the next segment.
    let mut byte_to_char = vec![0usize; text.len() + 1];
    for (char_idx, (byte_idx, _)) in text.char_indices().enumerate() {
        byte_to_char[byte_idx] = char_idx;
    }
    byte_to_char[text.len()] = char_count;

    for (byte_offset, opp) in linebreaks(text) {
        let char_idx = byte_to_char[byte_offset];
        if char_idx > 0 && char_idx < char_count {
            result[char_idx] = Some(opp);
        }
    }
    result
}
