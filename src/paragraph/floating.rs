//! # Figures and Floaters
//!
//! Figures and floaters are anchored inside a text paragraph and placed by
//! it as soon as the line holding the anchor is placed. Their content is
//! formatted as a nested page at a local origin, then the resulting box is
//! positioned in the enclosing page context, registered as floating and
//! turned into an exclusion that later lines flow around.
//!
//! Figures position against the page, the content area or the column;
//! floaters align to the sides of the track they are anchored in. When a
//! float does not fit and may delay its placement, it is deferred to the
//! top of the next track instead.

use serde::Serialize;

use super::block::{format_nested, release_nested, NestedRequest};
use super::container::Segment;
use super::{current_cch, ParaId, ParagraphKind, ParagraphKindTag, ParagraphNode, TrackScope};
use crate::client::{ClientBody, ClientId, ParagraphClient, SubpageLayout};
use crate::content::{ElementId, ElementKind};
use crate::engine::{EngineContext, FormatMode, FormatStatus, LayoutHost};
use crate::error::{LayoutError, Result};
use crate::geometry::{to_layout, FlowDirection, LayoutRect, LayoutUnit, MbpInfo, MAX_LAYOUT_SIZE, MIN_WIDTH};
use crate::page::context::{ColumnMetrics, Exclusion};
use crate::style::{
    AnchorAlignment, Clear, HorizontalAlignment, HorizontalAnchor, ReferenceFrame, ResolvedStyle, VerticalAnchor,
    WrapDirection,
};

/// Bound on how often a colliding float is moved down before giving up.
const MAX_COLLISION_MOVES: usize = 32;

#[derive(Debug, Default)]
pub struct FloatingParagraph {
    pub segment: Segment,
}

// ── Properties ─────────────────────────────────────────────────────

/// Placement flags of a figure or floater.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FloaterProperties {
    pub is_float: bool,
    pub clear: Clear,
    pub alignment: AnchorAlignment,
    /// A stretch floater takes the whole track width.
    pub stretch: bool,
    pub wrap: WrapDirection,
    pub delay_if_no_progress: bool,
}

/// Flags for a float with `style`, anchored in a track running in
/// `track_direction`. Left and right are physical, so they swap in a
/// right-to-left track.
pub fn floater_properties(style: &ResolvedStyle, is_figure: bool, track_direction: FlowDirection) -> FloaterProperties {
    let (alignment, stretch) = if is_figure {
        (style.horizontal_anchor.alignment(), false)
    } else {
        match style.horizontal_alignment {
            HorizontalAlignment::Left => (AnchorAlignment::Min, false),
            HorizontalAlignment::Center => (AnchorAlignment::Center, false),
            HorizontalAlignment::Right => (AnchorAlignment::Max, false),
            HorizontalAlignment::Stretch => (AnchorAlignment::Min, true),
        }
    };
    let mut props = FloaterProperties {
        is_float: true,
        clear: style.clear,
        alignment,
        stretch,
        wrap: style.wrap_direction,
        delay_if_no_progress: !is_figure || style.can_delay_placement,
    };
    if track_direction.is_rtl() {
        props.alignment = match props.alignment {
            AnchorAlignment::Min => AnchorAlignment::Max,
            AnchorAlignment::Max => AnchorAlignment::Min,
            center => center,
        };
        props.wrap = match props.wrap {
            WrapDirection::Left => WrapDirection::Right,
            WrapDirection::Right => WrapDirection::Left,
            other => other,
        };
    }
    props
}

// ── Position calculation ───────────────────────────────────────────

/// Everything position calculation needs to know about the surroundings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionRequest {
    /// The float's margin box at its anchor: inline start of the track,
    /// block position of the anchor line.
    pub preliminary: LayoutRect,
    pub page: LayoutRect,
    /// The page's content area.
    pub margin: LayoutRect,
    pub track: LayoutRect,
    pub columns: ColumnMetrics,
    pub must_position: bool,
    pub at_track_top: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FigurePosition {
    /// The float does not fit below its anchor and should move to the next
    /// track.
    pub push_to_next_track: bool,
    /// Rectangle text flows around.
    pub flow_around: LayoutRect,
    /// Rectangle tested against other floats.
    pub overlap: LayoutRect,
    /// The float's margin box.
    pub bbox: LayoutRect,
    /// Region a colliding float may be moved within.
    pub search: LayoutRect,
}

/// Offset that aligns `preliminary` to the column edges it spans.
///
/// The float covers `n = ceil((du + gap) / (width + gap))` columns,
/// counted from the column containing its inline start.
pub fn calculate_column_offset(
    preliminary: &LayoutRect,
    area: &LayoutRect,
    columns: &ColumnMetrics,
    alignment: AnchorAlignment,
) -> LayoutUnit {
    let pitch = columns.width + columns.gap;
    if pitch <= 0 {
        return 0;
    }
    let first = (preliminary.u - area.u).max(0) / pitch;
    let left = area.u + first * pitch;
    let spanned = ((preliminary.du + columns.gap + pitch - 1) / pitch).max(1);
    let right = left + spanned * pitch - columns.gap;
    match alignment {
        AnchorAlignment::Min => left - preliminary.u,
        AnchorAlignment::Max => right - preliminary.u_end(),
        AnchorAlignment::Center => (left + right) / 2 - (preliminary.u + preliminary.du / 2),
    }
}

/// Widen `rect` to a whole number of columns plus gaps, keeping the side it
/// is aligned to.
fn round_to_columns(rect: &LayoutRect, columns: &ColumnMetrics, alignment: AnchorAlignment) -> LayoutRect {
    let pitch = columns.width + columns.gap;
    if pitch <= 0 {
        return *rect;
    }
    let n = ((rect.du + columns.gap + pitch - 1) / pitch).max(1);
    let du = n * pitch - columns.gap;
    let u = match alignment {
        AnchorAlignment::Max => rect.u_end() - du,
        _ => rect.u,
    };
    LayoutRect::new(u, rect.v, du, rect.dv)
}

fn aligned(area: &LayoutRect, size: LayoutUnit, alignment: AnchorAlignment, offset: LayoutUnit) -> LayoutUnit {
    match alignment {
        AnchorAlignment::Min => area.u + offset,
        AnchorAlignment::Center => area.u + (area.du - size) / 2 + offset,
        AnchorAlignment::Max => area.u_end() - size - offset,
    }
}

/// Position of a figure.
///
/// Paragraph-anchored figures start at their anchor line and search down
/// to the end of the track; page and content anchors fix the block
/// position. Column-anchored figures snap to the column edges. Unless a
/// figure is centered or page-anchored, its overlap rectangle is rounded
/// to whole columns so two figures never meet inside a gap.
pub fn calculate_figure_position(
    anchor: HorizontalAnchor,
    alignment: AnchorAlignment,
    vertical: VerticalAnchor,
    offset: (LayoutUnit, LayoutUnit),
    req: &PositionRequest,
) -> FigurePosition {
    let frame = anchor.reference_frame();
    let (h_offset, v_offset) = offset;
    let prelim = req.preliminary;
    let h_area = match frame {
        ReferenceFrame::Page => req.page,
        ReferenceFrame::Content => req.margin,
        ReferenceFrame::Column => req.track,
    };

    let (v, search_v, search_dv) = match vertical.parts() {
        Some((v_frame, v_align)) => {
            let area = if v_frame == ReferenceFrame::Page { req.page } else { req.margin };
            let v = match v_align {
                AnchorAlignment::Min => area.v + v_offset,
                AnchorAlignment::Center => area.v + (area.dv - prelim.dv) / 2 + v_offset,
                AnchorAlignment::Max => area.v_end() - prelim.dv - v_offset,
            };
            (v, area.v, area.dv)
        }
        None => (prelim.v + v_offset, prelim.v, (req.track.v_end() - prelim.v).max(0)),
    };
    let paragraph_anchored = vertical.parts().is_none();

    let u = if paragraph_anchored && frame == ReferenceFrame::Column {
        let shift = match alignment {
            AnchorAlignment::Max => -h_offset,
            _ => h_offset,
        };
        prelim.u + calculate_column_offset(&prelim, &req.track, &req.columns, alignment) + shift
    } else {
        aligned(&h_area, prelim.du, alignment, h_offset)
    };

    let bbox = LayoutRect::new(u, v, prelim.du, prelim.dv);
    let mut search = LayoutRect::new(h_area.u, search_v, h_area.du, search_dv);
    let overlap = if frame != ReferenceFrame::Page && alignment != AnchorAlignment::Center {
        let rounded = round_to_columns(&bbox, &req.columns, alignment);
        search.u = rounded.u;
        search.du = rounded.du;
        rounded
    } else {
        bbox
    };
    let push_to_next_track = paragraph_anchored
        && !req.at_track_top
        && !req.must_position
        && bbox.v_end() > req.track.v_end();

    FigurePosition {
        push_to_next_track,
        flow_around: bbox,
        overlap,
        bbox,
        search,
    }
}

/// Position of a floater: aligned to a side of the track at its anchor.
pub fn calculate_floater_position(props: &FloaterProperties, req: &PositionRequest) -> FigurePosition {
    let prelim = req.preliminary;
    let track = req.track;
    let du = if props.stretch { track.du } else { prelim.du };
    let u = aligned(&track, du, props.alignment, 0);
    let bbox = LayoutRect::new(u, prelim.v, du, prelim.dv);
    let push_to_next_track = !req.at_track_top && !req.must_position && bbox.v_end() > track.v_end();
    FigurePosition {
        push_to_next_track,
        flow_around: bbox,
        overlap: bbox,
        bbox,
        search: LayoutRect::new(track.u, prelim.v, track.du, (track.v_end() - prelim.v).max(0)),
    }
}

// ── Content ────────────────────────────────────────────────────────

/// Formatted content of a float, in its own local frame.
#[derive(Debug)]
pub struct FloatContent {
    pub status: FormatStatus,
    pub layout: Option<SubpageLayout>,
    pub width: LayoutUnit,
    pub height: LayoutUnit,
}

impl FloatContent {
    fn without(status: FormatStatus) -> Self {
        Self { status, layout: None, width: 0, height: 0 }
    }
}

/// Format the content of `float` at most `max_width` wide.
///
/// Without an explicit width the content is formatted once at the maximum
/// to measure it, then once more at the measured width plus a small slack
/// so the second pass breaks lines the same way. A stretch floater that is
/// not offered the full track width is rejected.
#[allow(clippy::too_many_arguments)]
pub fn format_floating_content(
    ctx: &mut EngineContext,
    host: &LayoutHost,
    float: ParaId,
    max_width: LayoutUnit,
    explicit: Option<LayoutUnit>,
    stretch: bool,
    full_track: bool,
    direction: FlowDirection,
) -> Result<FloatContent> {
    if stretch && !full_track {
        log::debug!("stretch floater {float:?} offered less than the track width");
        return Ok(FloatContent::without(FormatStatus::Rejected));
    }
    let width = match explicit {
        Some(w) => w.min(max_width).max(MIN_WIDTH),
        None => max_width.max(MIN_WIDTH),
    };
    let request = |width: LayoutUnit| NestedRequest {
        width,
        height: MAX_LAYOUT_SIZE,
        columns: ColumnMetrics::single(width),
        direction,
        mode: FormatMode::Bottomless,
        resume: None,
        finite: false,
    };

    let first = format_nested(ctx, host, float, request(width))?;
    if !first.status.made_progress() {
        release_nested(ctx, &first.layout)?;
        return Ok(FloatContent::without(first.status));
    }
    let natural = first.bbox.map(|b| b.u_end()).unwrap_or(MIN_WIDTH).max(MIN_WIDTH);
    if explicit.is_some() || stretch || natural >= width {
        return Ok(FloatContent {
            status: first.status,
            width,
            height: first.height,
            layout: Some(first.layout),
        });
    }

    release_nested(ctx, &first.layout)?;
    ctx.stats.auto_width_passes += 1;
    let width = (natural + ctx.config().auto_width_slack).min(max_width);
    let second = format_nested(ctx, host, float, request(width))?;
    if !second.status.made_progress() {
        release_nested(ctx, &second.layout)?;
        return Ok(FloatContent::without(second.status));
    }
    Ok(FloatContent {
        status: second.status,
        width,
        height: second.height,
        layout: Some(second.layout),
    })
}

// ── Placement ──────────────────────────────────────────────────────

/// What [`place`] did with a float.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Placed(ClientId),
    /// Left for the top of the next track.
    Deferred,
    Rejected,
    /// Already placed in this page context.
    Skipped,
}

/// The node of the float `element` anchored in text paragraph `text`,
/// created on first use.
pub fn anchored_node(ctx: &mut EngineContext, host: &LayoutHost, text: ParaId, element: ElementId) -> Result<ParaId> {
    if let Some((_, id)) = ctx.paragraph(text)?.text()?.anchored.iter().find(|(e, _)| *e == element) {
        if ctx.paragraphs.contains(*id) {
            return Ok(*id);
        }
    }
    let kind = match host.content.element_kind(element) {
        Some(ElementKind::Figure) => ParagraphKind::Figure(FloatingParagraph::default()),
        Some(ElementKind::Floater) => ParagraphKind::Floater(FloatingParagraph::default()),
        other => {
            return Err(LayoutError::invariant(format!("anchor {element:?} is not a float: {other:?}")));
        }
    };
    let (start, _) = host
        .content
        .element_span(element)
        .ok_or(LayoutError::StaleHandle { kind: "element" })?;
    let id = ctx
        .paragraphs
        .insert(ParagraphNode::new(kind, Some(element), Some(text), start));
    ctx.stats.paragraphs_created += 1;
    let cch = current_cch(ctx, host, id)?;
    ctx.paragraph_mut(id)?.last_format_cch = cch;
    let anchored = &mut ctx.paragraph_mut(text)?.text_mut()?.anchored;
    anchored.retain(|(e, _)| *e != element);
    anchored.push((element, id));
    Ok(id)
}

/// Place the float `element` anchored on the line at `line_rect`.
#[allow(clippy::too_many_arguments)]
pub fn place_anchored(
    ctx: &mut EngineContext,
    host: &LayoutHost,
    text: ParaId,
    element: ElementId,
    line_rect: LayoutRect,
    scope: &TrackScope,
    mode: FormatMode,
    at_track_top: bool,
) -> Result<Option<ClientId>> {
    let float = anchored_node(ctx, host, text, element)?;
    let at_top = at_track_top || line_rect.v <= scope.track.v;
    match place(ctx, host, float, line_rect.v, scope, mode, false, at_top)? {
        Placement::Placed(client) => Ok(Some(client)),
        _ => Ok(None),
    }
}

/// Format and position `float` with its anchor at block position `v`, then
/// register it in the scope's page context.
///
/// With `must` set the float is placed even when it does not fit; that is
/// how deferred floats land at the top of the next track.
#[allow(clippy::too_many_arguments)]
pub fn place(
    ctx: &mut EngineContext,
    host: &LayoutHost,
    float: ParaId,
    v: LayoutUnit,
    scope: &TrackScope,
    mode: FormatMode,
    must: bool,
    at_track_top: bool,
) -> Result<Placement> {
    let (element, tag) = {
        let node = ctx.paragraph(float)?;
        let element = node
            .element
            .ok_or_else(|| LayoutError::invariant("float without an element"))?;
        (element, node.tag())
    };
    let already = {
        let pc = ctx.page_context(scope.page_context)?;
        pc.floating()
            .iter()
            .any(|c| ctx.clients.get(*c).map(|c| c.paragraph == Some(float)).unwrap_or(false))
    };
    if already {
        return Ok(Placement::Skipped);
    }

    let is_figure = tag == ParagraphKindTag::Figure;
    let style = host.content.resolved_style(element);
    let (geometry, track_direction, finite) = {
        let pc = ctx.page_context(scope.page_context)?;
        (pc.geometry, pc.direction, pc.finite)
    };
    let props = floater_properties(&style, is_figure, track_direction);
    let mbp = MbpInfo::compute_for_track(&style, ctx.dpi(), track_direction);
    let must = must || !props.delay_if_no_progress || !finite || !mode.is_finite();
    let track = scope.track;

    let (outer_max, full_track) = if is_figure {
        let area = match style.horizontal_anchor.reference_frame() {
            ReferenceFrame::Page => geometry.page,
            ReferenceFrame::Content => geometry.content,
            ReferenceFrame::Column => track,
        };
        (area.du, true)
    } else {
        let pc = ctx.page_context(scope.page_context)?;
        match pc.available_span(&track, v, MIN_WIDTH) {
            Some((_, du)) => (du, du >= track.du),
            None => (track.du, false),
        }
    };
    let max_width = (outer_max - mbp.mbp.horizontal()).max(MIN_WIDTH);
    let explicit = style.width.map(to_layout);

    let content = format_floating_content(
        ctx,
        host,
        float,
        max_width,
        explicit,
        props.stretch,
        full_track,
        style.flow_direction,
    )?;
    let layout = match (content.status, content.layout) {
        (FormatStatus::Rejected, _) => return Ok(Placement::Rejected),
        (_, Some(layout)) => layout,
        (status, None) => {
            log::debug!("float {float:?} content not formatted: {status:?}");
            return defer_or_skip(ctx, scope, float, must);
        }
    };

    let du = if props.stretch { track.du } else { content.width + mbp.mbp.horizontal() };
    let dv = content.height + mbp.mbp.vertical();
    let mut req = PositionRequest {
        preliminary: LayoutRect::new(track.u, v, du, dv),
        page: geometry.page,
        margin: geometry.content,
        track,
        columns: geometry.columns,
        must_position: must,
        at_track_top,
    };
    let offsets = (to_layout(style.horizontal_offset), to_layout(style.vertical_offset));
    let position = |req: &PositionRequest| {
        if is_figure {
            calculate_figure_position(style.horizontal_anchor, props.alignment, style.vertical_anchor, offsets, req)
        } else {
            calculate_floater_position(&props, req)
        }
    };

    let mut pos = position(&req);
    let mut moves = 0;
    loop {
        let pc = ctx.page_context(scope.page_context)?;
        let blocking = pc
            .exclusions()
            .iter()
            .filter(|ex| ex.rect.intersects(&pos.overlap))
            .map(|ex| ex.rect.v_end())
            .max();
        let Some(below) = blocking else {
            break;
        };
        let movable = style.vertical_anchor.parts().is_none() || !is_figure;
        if !movable || moves >= MAX_COLLISION_MOVES || below <= req.preliminary.v {
            if !must {
                release_nested(ctx, &layout)?;
                return defer_or_skip(ctx, scope, float, must);
            }
            log::debug!("float {float:?} overlaps another float");
            break;
        }
        moves += 1;
        req.preliminary.v = below;
        req.at_track_top = false;
        pos = position(&req);
    }

    let overflows = finite && pos.bbox.v_end() > track.v_end() && !at_track_top;
    if pos.push_to_next_track || (overflows && !must) {
        release_nested(ctx, &layout)?;
        return defer_or_skip(ctx, scope, float, must);
    }

    let border = LayoutRect::new(
        pos.bbox.u + mbp.margin.left,
        pos.bbox.v + mbp.margin.top,
        (pos.bbox.du - mbp.margin.horizontal()).max(MIN_WIDTH),
        (pos.bbox.dv - mbp.margin.vertical()).max(0),
    );
    let content_rect = LayoutRect::new(
        border.u + mbp.bp.left,
        border.v + mbp.bp.top,
        (border.du - mbp.bp.horizontal()).max(MIN_WIDTH),
        layout.size.1,
    );
    let mut client = ParagraphClient::new(
        Some(float),
        Some(element),
        tag,
        border,
        style.flow_direction,
        ClientBody::Subpage(layout),
    );
    client.content_rect = content_rect;
    client.mbp = mbp;
    client.page_context = Some(scope.page_context);
    let id = ctx.clients.insert(client);
    {
        let pc = ctx.page_context_mut(scope.page_context)?;
        pc.add_floating(id)?;
        pc.add_exclusion(Exclusion { rect: pos.flow_around, wrap: props.wrap, client: id });
    }

    let cch = current_cch(ctx, host, float)?;
    let node = ctx.paragraph_mut(float)?;
    node.last_rect = Some(pos.bbox);
    node.last_format_cch = cch;
    ctx.stats.paragraphs_formatted += 1;
    ctx.stats.floats_placed += 1;
    log::trace!("placed {tag:?} {float:?} at {:?}", pos.bbox);
    Ok(Placement::Placed(id))
}

fn defer_or_skip(ctx: &mut EngineContext, scope: &TrackScope, float: ParaId, must: bool) -> Result<Placement> {
    if must {
        return Ok(Placement::Skipped);
    }
    ctx.page_context_mut(scope.page_context)?.defer(float);
    ctx.stats.floats_deferred += 1;
    log::debug!("deferred float {float:?} to the next track");
    Ok(Placement::Deferred)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LayoutConfig;
    use crate::content::{DocNode, FlowDocument};
    use crate::page::context::{PageContext, PageGeometry};
    use crate::paragraph::container::first_paragraph;
    use crate::paragraph::{create_root, format, FormatInput};
    use crate::style::Style;
    use crate::text::MonospaceMetrics;

    const CH: LayoutUnit = 2880;
    const LINE: LayoutUnit = 6000;

    fn columns(width: LayoutUnit, gap: LayoutUnit, count: usize) -> ColumnMetrics {
        ColumnMetrics { count, width, gap, ..ColumnMetrics::single(width) }
    }

    #[test]
    fn column_offset_aligns_to_the_spanned_columns() {
        let prelim = LayoutRect::new(100, 0, 50, 10);
        let area = LayoutRect::new(80, 0, 200, 1000);
        let cols = columns(90, 10, 2);
        assert_eq!(calculate_column_offset(&prelim, &area, &cols, AnchorAlignment::Max), 20);
        assert_eq!(calculate_column_offset(&prelim, &area, &cols, AnchorAlignment::Min), -20);
        assert_eq!(calculate_column_offset(&prelim, &area, &cols, AnchorAlignment::Center), 0);
    }

    #[test]
    fn column_anchored_figure_snaps_and_rounds_its_overlap() {
        let track = LayoutRect::new(80, 0, 200, 1000);
        let req = PositionRequest {
            preliminary: LayoutRect::new(100, 40, 50, 10),
            page: LayoutRect::new(0, 0, 400, 1200),
            margin: LayoutRect::new(40, 40, 320, 1120),
            track,
            columns: columns(90, 10, 2),
            must_position: false,
            at_track_top: false,
        };
        let pos = calculate_figure_position(
            HorizontalAnchor::ColumnRight,
            AnchorAlignment::Max,
            VerticalAnchor::ParagraphTop,
            (0, 0),
            &req,
        );
        assert_eq!(pos.bbox.u, 120);
        assert_eq!(pos.bbox.v, 40);
        assert_eq!((pos.overlap.u, pos.overlap.du), (80, 90));
        assert_eq!((pos.search.u, pos.search.du), (80, 90));
        assert!(!pos.push_to_next_track);
    }

    #[test]
    fn page_anchored_figure_ignores_its_anchor() {
        let req = PositionRequest {
            preliminary: LayoutRect::new(100, 500, 50, 10),
            page: LayoutRect::new(0, 0, 400, 1200),
            margin: LayoutRect::new(40, 40, 320, 1120),
            track: LayoutRect::new(40, 40, 320, 1120),
            columns: ColumnMetrics::single(320),
            must_position: false,
            at_track_top: false,
        };
        let pos = calculate_figure_position(
            HorizontalAnchor::PageLeft,
            AnchorAlignment::Min,
            VerticalAnchor::PageBottom,
            (5, 5),
            &req,
        );
        assert_eq!(pos.bbox, LayoutRect::new(5, 1185, 50, 10));
        assert_eq!(pos.overlap, pos.bbox);
    }

    #[test]
    fn figure_below_the_track_is_pushed_unless_forced() {
        let mut req = PositionRequest {
            preliminary: LayoutRect::new(0, 90, 50, 20),
            page: LayoutRect::new(0, 0, 100, 100),
            margin: LayoutRect::new(0, 0, 100, 100),
            track: LayoutRect::new(0, 0, 100, 100),
            columns: ColumnMetrics::single(100),
            must_position: false,
            at_track_top: false,
        };
        let pos = |req: &PositionRequest| {
            calculate_figure_position(
                HorizontalAnchor::ColumnLeft,
                AnchorAlignment::Min,
                VerticalAnchor::ParagraphTop,
                (0, 0),
                req,
            )
        };
        assert!(pos(&req).push_to_next_track);
        req.must_position = true;
        assert!(!pos(&req).push_to_next_track);
    }

    #[test]
    fn rtl_track_mirrors_sides() {
        let style = Style {
            horizontal_alignment: Some(HorizontalAlignment::Left),
            wrap_direction: Some(WrapDirection::Right),
            ..Default::default()
        }
        .resolve(None);
        let props = floater_properties(&style, false, FlowDirection::RightToLeft);
        assert_eq!(props.alignment, AnchorAlignment::Max);
        assert_eq!(props.wrap, WrapDirection::Left);
        assert!(props.delay_if_no_progress);
    }

    fn floater(style: Style, text: &str) -> DocNode {
        DocNode::element(ElementKind::Floater, style, vec![DocNode::paragraph(text)])
    }

    fn setup(doc: &FlowDocument, width: LayoutUnit, height: LayoutUnit, finite: bool) -> (EngineContext, ParaId, TrackScope) {
        let metrics = MonospaceMetrics::default();
        let host = LayoutHost::new(doc, &metrics);
        let mut ctx = EngineContext::new(LayoutConfig::default());
        let root = create_root(&mut ctx, &host).unwrap();
        let p = first_paragraph(&mut ctx, &host, root).unwrap().unwrap();
        let area = LayoutRect::new(0, 0, width, height);
        let geometry = PageGeometry { page: area, content: area, columns: ColumnMetrics::single(width) };
        let page_context = ctx
            .page_contexts
            .insert(PageContext::new(geometry, FlowDirection::LeftToRight, finite));
        (ctx, p, TrackScope { page_context, track: area })
    }

    #[test]
    fn auto_width_converges_in_one_second_pass() {
        let doc = FlowDocument::from_nodes(
            Style::default(),
            vec![DocNode::element(
                ElementKind::Paragraph,
                Style::default(),
                vec![floater(Style::default(), "abc"), DocNode::text("text")],
            )],
        );
        let metrics = MonospaceMetrics::default();
        let host = LayoutHost::new(&doc, &metrics);
        let (mut ctx, p, s) = setup(&doc, 40 * CH, MAX_LAYOUT_SIZE, false);

        let out = format(&mut ctx, &host, p, FormatInput::new(s.track, FlowDirection::LeftToRight), FormatMode::Bottomless, &s)
            .unwrap();
        assert_eq!(out.status, FormatStatus::Complete);
        assert_eq!(ctx.stats.auto_width_passes, 1);
        assert_eq!(ctx.stats.floats_placed, 1);
        let pc = ctx.page_context(s.page_context).unwrap();
        assert_eq!(pc.floating().len(), 1);
        let float = ctx.client(pc.floating()[0]).unwrap();
        assert_eq!(float.rect.du, 3 * CH + 1);
        // Default floaters align right and wrap on both sides.
        assert_eq!(float.rect.u_end(), 40 * CH);
        assert_eq!(pc.exclusions()[0].rect, float.rect);

        let ClientBody::Text(body) = &ctx.client(out.client.unwrap()).unwrap().body else {
            panic!("expected text");
        };
        assert_eq!(body.floats.len(), 1);
        assert!(body.lines[0].rect.du < 40 * CH);
    }

    #[test]
    fn stretch_floater_is_rejected_beside_another_float() {
        let doc = FlowDocument::from_nodes(
            Style::default(),
            vec![DocNode::element(
                ElementKind::Paragraph,
                Style::default(),
                vec![
                    floater(Style::default(), "abc"),
                    floater(
                        Style { horizontal_alignment: Some(HorizontalAlignment::Stretch), ..Default::default() },
                        "def",
                    ),
                    DocNode::text("x"),
                ],
            )],
        );
        let metrics = MonospaceMetrics::default();
        let host = LayoutHost::new(&doc, &metrics);
        let (mut ctx, p, s) = setup(&doc, 40 * CH, MAX_LAYOUT_SIZE, false);

        format(&mut ctx, &host, p, FormatInput::new(s.track, FlowDirection::LeftToRight), FormatMode::Bottomless, &s).unwrap();
        assert_eq!(ctx.stats.floats_placed, 1);
        assert_eq!(ctx.page_context(s.page_context).unwrap().floating().len(), 1);
    }

    #[test]
    fn float_that_does_not_fit_is_deferred() {
        let doc = FlowDocument::from_nodes(
            Style::default(),
            vec![
                DocNode::paragraph("first line"),
                DocNode::element(
                    ElementKind::Paragraph,
                    Style::default(),
                    vec![DocNode::text("y"), floater(Style::default(), "a b c d e"), DocNode::text("z")],
                ),
            ],
        );
        let metrics = MonospaceMetrics::default();
        let host = LayoutHost::new(&doc, &metrics);
        let (mut ctx, first, s) = setup(&doc, 2 * CH, 3 * LINE, true);
        let root = ctx.paragraph(first).unwrap().parent.unwrap();
        let second = crate::paragraph::container::next_paragraph(&mut ctx, &host, root, first).unwrap().unwrap();

        let mut input = FormatInput::new(LayoutRect::new(0, LINE, 2 * CH, 2 * LINE), FlowDirection::LeftToRight);
        input.at_track_top = false;
        let out = format(&mut ctx, &host, second, input, FormatMode::Finite, &s).unwrap();
        assert!(out.status.made_progress());
        assert_eq!(ctx.stats.floats_deferred, 1);
        let pc = ctx.page_context(s.page_context).unwrap();
        assert!(pc.has_deferred());
        assert!(pc.floating().is_empty());
    }
}
