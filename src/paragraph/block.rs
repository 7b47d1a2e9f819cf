//! # Block Objects and Nested Pages
//!
//! UI elements are atomic blocks of a fixed size. Subpages are sections
//! with more than one column; they and the content of figures and floaters
//! are formatted as nested pages with their own page context, laid out
//! from a local origin and positioned by whoever owns the resulting
//! client.

use super::container::{format_segment, union};
use super::{floating, update, ChangeKind, FormatInput, FormatOutput, ParaId, TrackScope};
use crate::client::{ClientBody, ClientId, ColumnRule, SubpageLayout, TrackLayout};
use crate::content::DEFAULT_OBJECT_SIZE;
use crate::engine::{BreakRecord, EngineContext, FormatMode, FormatStatus, LayoutHost};
use crate::error::{LayoutError, Result};
use crate::geometry::margin::realize;
use crate::geometry::{
    collapse_bottom_margin, collapse_top_margin, to_layout, FlowDirection, LayoutRect, LayoutUnit, MbpInfo,
    Thickness, MAX_LAYOUT_SIZE, MIN_WIDTH,
};
use crate::page::context::{ColumnMetrics, FormatFrame, PageContext, PageContextId, PageGeometry};
use crate::style::Clear;

#[derive(Debug, Default)]
pub struct UiElementParagraph;

#[derive(Debug, Default)]
pub struct SubpageParagraph {
    pub segment: super::container::Segment,
}

// ── Tracks ─────────────────────────────────────────────────────────

/// Result of filling the columns of a page context.
#[derive(Debug)]
pub struct TracksOutput {
    pub status: FormatStatus,
    pub tracks: Vec<TrackLayout>,
    /// Deferred floats placed at a column top.
    pub floats: Vec<ClientId>,
    pub resume: Option<BreakRecord>,
    pub bbox: Option<LayoutRect>,
    /// Height of the tallest track.
    pub height: LayoutUnit,
}

/// Fill the columns of `area` with `owner`'s content, in order.
///
/// Floats deferred by one column are placed at the top of the next before
/// its flow. Only the first column may refuse to make progress: later ones
/// start at the top of their track.
#[allow(clippy::too_many_arguments)]
pub fn format_tracks(
    ctx: &mut EngineContext,
    host: &LayoutHost,
    owner: ParaId,
    page_context: PageContextId,
    area: LayoutRect,
    columns: ColumnMetrics,
    direction: FlowDirection,
    mode: FormatMode,
    mut resume: Option<BreakRecord>,
    at_track_top: bool,
) -> Result<TracksOutput> {
    let mut out = TracksOutput {
        status: FormatStatus::Complete,
        tracks: Vec::new(),
        floats: Vec::new(),
        resume: None,
        bbox: None,
        height: 0,
    };
    let count = columns.count.max(1);
    let mut complete = false;
    for index in 0..count {
        let track = columns.column_rect(index, &area);
        let scope = TrackScope { page_context, track };
        for float in ctx.page_context_mut(page_context)?.take_deferred() {
            if !ctx.paragraphs.contains(float) {
                continue;
            }
            if let floating::Placement::Placed(c) =
                floating::place(ctx, host, float, track.v, &scope, mode, true, true)?
            {
                out.floats.push(c);
                out.bbox = union(out.bbox, Some(ctx.client(c)?.rect));
            }
        }

        if complete {
            out.tracks.push(TrackLayout { rect: LayoutRect::new(track.u, track.v, track.du, 0), clients: Vec::new() });
            continue;
        }

        let seg = format_segment(
            ctx,
            host,
            owner,
            track,
            direction,
            resume.take(),
            None,
            mode,
            &scope,
            at_track_top || index > 0,
        )?;
        let used = seg.v_end - track.v;
        out.height = out.height.max(used);
        out.bbox = union(out.bbox, seg.bbox);
        let placed = !seg.clients.is_empty();
        out.tracks.push(TrackLayout {
            rect: LayoutRect::new(track.u, track.v, track.du, used),
            clients: seg.clients,
        });

        match seg.status {
            // The remaining columns stay empty but are still reported.
            FormatStatus::Complete => complete = true,
            FormatStatus::Interrupted => {
                out.status = FormatStatus::Interrupted;
                out.resume = seg.resume;
                return Ok(out);
            }
            _ if index + 1 < count => {
                resume = seg.resume;
                if !placed && index == 0 && !at_track_top {
                    out.status = FormatStatus::NoProgress;
                    return Ok(out);
                }
            }
            _ => {
                let any = out.tracks.iter().any(|t| !t.clients.is_empty()) || !out.floats.is_empty();
                out.status = if any { FormatStatus::Continued } else { FormatStatus::NoProgress };
                out.resume = seg.resume;
            }
        }
    }
    Ok(out)
}

// ── Nested pages ───────────────────────────────────────────────────

/// Shape of a nested page.
#[derive(Debug)]
pub struct NestedRequest {
    pub width: LayoutUnit,
    pub height: LayoutUnit,
    pub columns: ColumnMetrics,
    pub direction: FlowDirection,
    pub mode: FormatMode,
    pub resume: Option<BreakRecord>,
    pub finite: bool,
}

#[derive(Debug)]
pub struct NestedOutput {
    pub status: FormatStatus,
    pub layout: SubpageLayout,
    pub resume: Option<BreakRecord>,
    /// Ink box in the nested page's frame.
    pub bbox: Option<LayoutRect>,
    pub height: LayoutUnit,
}

/// Format `owner`'s content as a nested page at the origin, with its own
/// page context and format frame.
pub fn format_nested(
    ctx: &mut EngineContext,
    host: &LayoutHost,
    owner: ParaId,
    req: NestedRequest,
) -> Result<NestedOutput> {
    format_nested_at(ctx, host, owner, req, true)
}

fn format_nested_at(
    ctx: &mut EngineContext,
    host: &LayoutHost,
    owner: ParaId,
    req: NestedRequest,
    at_track_top: bool,
) -> Result<NestedOutput> {
    let area = LayoutRect::new(0, 0, req.width, req.height);
    let geometry = PageGeometry { page: area, content: area, columns: req.columns };
    let page_context = ctx
        .page_contexts
        .insert(PageContext::new(geometry, req.direction, req.finite));
    let frame = FormatFrame {
        page_size: (req.width, req.height),
        page_margin: Thickness::default(),
        incremental_update: req.mode == FormatMode::UpdateBottomless,
        finite_page: req.finite,
    };
    let (columns, direction, mode, resume) = (req.columns, req.direction, req.mode, req.resume);
    let tracks = ctx.with_format_context(frame, |ctx| {
        format_tracks(ctx, host, owner, page_context, area, columns, direction, mode, resume, at_track_top)
    })?;

    let rule = (columns.count > 1 && columns.rule_width > 0).then_some(ColumnRule {
        width: columns.rule_width,
        color: columns.rule_color,
    });
    Ok(NestedOutput {
        status: tracks.status,
        layout: SubpageLayout {
            page_context,
            size: (req.width, tracks.height),
            direction,
            tracks: tracks.tracks,
            floats: tracks.floats,
            rule,
        },
        resume: tracks.resume,
        bbox: tracks.bbox,
        height: tracks.height,
    })
}

/// Dispose what a nested page produced and drop its page context.
pub fn release_nested(ctx: &mut EngineContext, layout: &SubpageLayout) -> Result<()> {
    for client in layout.clients() {
        crate::client::dispose(ctx, client)?;
    }
    ctx.page_contexts.remove(layout.page_context);
    Ok(())
}

/// Shortest column height that holds all of `owner`'s content, found by a
/// bounded bisection between an even share and the single-column height.
fn balance_columns(
    ctx: &mut EngineContext,
    host: &LayoutHost,
    owner: ParaId,
    columns: ColumnMetrics,
    direction: FlowDirection,
) -> Result<NestedOutput> {
    let trial = |height: LayoutUnit, columns: ColumnMetrics, finite: bool| NestedRequest {
        width: columns.used_width(),
        height,
        columns,
        direction,
        mode: if finite { FormatMode::Finite } else { FormatMode::Bottomless },
        resume: None,
        finite,
    };

    let probe = format_nested(ctx, host, owner, trial(MAX_LAYOUT_SIZE, ColumnMetrics::single(columns.width), false))?;
    release_nested(ctx, &probe.layout)?;
    if !probe.status.made_progress() {
        return format_nested(ctx, host, owner, trial(MAX_LAYOUT_SIZE, columns, false));
    }
    let total = probe.height;
    let mut lo = (total / columns.count.max(1) as LayoutUnit).max(MIN_WIDTH);
    let mut hi = total.max(lo);
    for _ in 0..ctx.config().column_balance_iterations {
        if lo >= hi {
            break;
        }
        let mid = lo + (hi - lo) / 2;
        let attempt = format_nested(ctx, host, owner, trial(mid, columns, true))?;
        let fits = attempt.status == FormatStatus::Complete;
        release_nested(ctx, &attempt.layout)?;
        if fits {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    log::trace!("balanced {} columns of {owner:?} at {hi}", columns.count);

    let balanced = format_nested(ctx, host, owner, trial(hi, columns, true))?;
    if balanced.status == FormatStatus::Complete {
        return Ok(balanced);
    }
    release_nested(ctx, &balanced.layout)?;
    format_nested(ctx, host, owner, trial(total.max(MIN_WIDTH), columns, true))
}

// ── Subpages ───────────────────────────────────────────────────────

pub(crate) fn format_subpage(
    ctx: &mut EngineContext,
    host: &LayoutHost,
    id: ParaId,
    input: FormatInput,
    mode: FormatMode,
    scope: &TrackScope,
) -> Result<FormatOutput> {
    let (element, change) = {
        let node = ctx.paragraph(id)?;
        let element = node
            .element
            .ok_or_else(|| LayoutError::invariant("subpage paragraph without an element"))?;
        (element, node.change)
    };
    let style = host.content.resolved_style(element);
    let mbp = MbpInfo::compute_for_track(&style, ctx.dpi(), input.direction);
    let first_chunk = input.break_record.is_none();
    let resume = match input.break_record {
        None => None,
        Some(BreakRecord::Columns { inner }) => Some(*inner),
        Some(other) => {
            return Err(LayoutError::invariant(format!("subpage resumed with {other:?}")));
        }
    };
    if mode == FormatMode::UpdateBottomless && change != ChangeKind::None && first_chunk {
        update::build_update_records(ctx, host, id)?;
    }

    let r = input.rect;
    let border_v = if first_chunk {
        let (open, space) = collapse_top_margin(&mbp, input.mcs);
        r.v + space + realize(open)
    } else {
        r.v
    };
    let content_v = border_v + if first_chunk { mbp.bp.top } else { 0 };
    let content_width = (r.du - mbp.mbp.horizontal()).max(MIN_WIDTH);
    let columns = ColumnMetrics::compute(content_width, &style);
    let direction = style.flow_direction;

    let nested = if mode.is_finite() {
        let height = (r.v_end() - content_v - mbp.bp.bottom).max(0);
        let req = NestedRequest {
            width: content_width,
            height,
            columns,
            direction,
            mode,
            resume,
            finite: true,
        };
        format_nested_at(ctx, host, id, req, input.at_track_top)?
    } else if columns.count == 1 {
        let req = NestedRequest {
            width: content_width,
            height: MAX_LAYOUT_SIZE,
            columns,
            direction,
            mode,
            resume,
            finite: false,
        };
        format_nested(ctx, host, id, req)?
    } else {
        balance_columns(ctx, host, id, columns, direction)?
    };

    if !nested.status.made_progress() {
        release_nested(ctx, &nested.layout)?;
        return Ok(FormatOutput::empty(nested.status));
    }
    let leftover = ctx.page_context_mut(nested.layout.page_context)?.take_deferred();
    if !leftover.is_empty() {
        let outer = ctx.page_context_mut(scope.page_context)?;
        for float in leftover {
            outer.defer(float);
        }
    }

    let complete = nested.status == FormatStatus::Complete;
    let (mcs, bottom_bp) = if complete {
        (collapse_bottom_margin(&mbp, None).0, mbp.bp.bottom)
    } else {
        (None, 0)
    };
    let height = nested.height;
    let border = LayoutRect::new(
        r.u + mbp.margin.left,
        border_v,
        (r.du - mbp.margin.horizontal()).max(MIN_WIDTH),
        content_v + height + bottom_bp - border_v,
    );
    let content_rect = LayoutRect::new(r.u + mbp.mbp.left, content_v, content_width, height);
    let mut layout = nested.layout;
    layout.size = (content_width, height);
    let client = super::create_client(ctx, id, border, direction, ClientBody::Subpage(layout))?;
    {
        let c = ctx.client_mut(client)?;
        c.content_rect = content_rect;
        c.mbp = mbp;
    }

    let break_record = if complete {
        None
    } else {
        nested.resume.map(|inner| BreakRecord::Columns { inner: Box::new(inner) })
    };
    Ok(FormatOutput {
        status: nested.status,
        client: Some(client),
        used_height: border.v_end() - r.v,
        bbox: Some(border),
        mcs,
        clear: Clear::None,
        break_record,
    })
}

// ── UI elements ────────────────────────────────────────────────────

pub(crate) fn format_ui_element(
    ctx: &mut EngineContext,
    host: &LayoutHost,
    id: ParaId,
    input: FormatInput,
    mode: FormatMode,
) -> Result<FormatOutput> {
    let element = ctx
        .paragraph(id)?
        .element
        .ok_or_else(|| LayoutError::invariant("UI element paragraph without an element"))?;
    let style = host.content.resolved_style(element);
    let mbp = MbpInfo::compute_for_track(&style, ctx.dpi(), input.direction);
    let (w, h) = match ctx.objects.get(&element) {
        Some(size) => *size,
        None => {
            let (w, h) = host.content.object_size(element).unwrap_or(DEFAULT_OBJECT_SIZE);
            let size = (to_layout(w), to_layout(h));
            ctx.objects.insert(element, size);
            size
        }
    };

    let r = input.rect;
    let (open, space) = collapse_top_margin(&mbp, input.mcs);
    let border_v = r.v + space + realize(open);
    let outer_height = h + mbp.bp.vertical();
    if mode.is_finite() && border_v + outer_height > r.v_end() && !input.at_track_top {
        return Ok(FormatOutput::no_progress());
    }
    let available = (r.du - mbp.margin.horizontal()).max(MIN_WIDTH);
    let border = LayoutRect::new(
        r.u + mbp.margin.left,
        border_v,
        (w + mbp.bp.horizontal()).min(available),
        outer_height,
    );
    let client = super::create_client(ctx, id, border, style.flow_direction, ClientBody::UiElement { size: (w, h) })?;
    {
        let c = ctx.client_mut(client)?;
        c.content_rect = LayoutRect::new(border.u + mbp.bp.left, border.v + mbp.bp.top, w, h);
        c.mbp = mbp;
    }
    Ok(FormatOutput {
        status: FormatStatus::Complete,
        client: Some(client),
        used_height: border.v_end() - r.v,
        bbox: Some(border),
        mcs: collapse_bottom_margin(&mbp, None).0,
        clear: Clear::None,
        break_record: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LayoutConfig;
    use crate::content::{DocNode, ElementKind, FlowDocument};
    use crate::paragraph::container::first_paragraph;
    use crate::paragraph::{create_root, format};
    use crate::style::{Dimension, Style};
    use crate::text::MonospaceMetrics;

    const CH: LayoutUnit = 2880;
    const LINE: LayoutUnit = 6000;

    fn scope(ctx: &mut EngineContext, width: LayoutUnit, height: LayoutUnit, finite: bool) -> TrackScope {
        let area = LayoutRect::new(0, 0, width, height);
        let geometry = PageGeometry { page: area, content: area, columns: ColumnMetrics::single(width) };
        let page_context = ctx
            .page_contexts
            .insert(PageContext::new(geometry, FlowDirection::LeftToRight, finite));
        TrackScope { page_context, track: area }
    }

    fn two_columns(paragraphs: usize) -> FlowDocument {
        let kids = (0..paragraphs).map(|i| DocNode::paragraph(format!("p{i}"))).collect();
        FlowDocument::from_nodes(
            Style::default(),
            vec![DocNode::element(
                ElementKind::Section,
                Style { column_count: Some(2), column_gap: Some(0.0), ..Default::default() },
                kids,
            )],
        )
    }

    fn subpage(ctx: &EngineContext, out: &FormatOutput) -> SubpageLayout {
        match &ctx.client(out.client.unwrap()).unwrap().body {
            ClientBody::Subpage(s) => s.clone(),
            other => panic!("expected a subpage, got {other:?}"),
        }
    }

    #[test]
    fn bottomless_columns_are_balanced() {
        let doc = two_columns(4);
        let metrics = MonospaceMetrics::default();
        let host = LayoutHost::new(&doc, &metrics);
        let mut ctx = EngineContext::new(LayoutConfig::default());
        let root = create_root(&mut ctx, &host).unwrap();
        let p = first_paragraph(&mut ctx, &host, root).unwrap().unwrap();
        let s = scope(&mut ctx, 20 * CH, MAX_LAYOUT_SIZE, false);

        let out = format(&mut ctx, &host, p, FormatInput::new(s.track, FlowDirection::LeftToRight), FormatMode::Bottomless, &s)
            .unwrap();
        assert_eq!(out.status, FormatStatus::Complete);
        let layout = subpage(&ctx, &out);
        assert_eq!(layout.tracks.len(), 2);
        assert_eq!(layout.tracks[0].clients.len(), 2);
        assert_eq!(layout.tracks[1].clients.len(), 2);
        assert_eq!(out.used_height, 2 * LINE);
        assert_eq!(layout.tracks[1].rect.u, 10 * CH);
        // Only the kept layout's page context survives the trials.
        assert_eq!(ctx.page_contexts.len(), 2);
    }

    #[test]
    fn finite_columns_fill_in_order_and_continue() {
        let doc = two_columns(5);
        let metrics = MonospaceMetrics::default();
        let host = LayoutHost::new(&doc, &metrics);
        let mut ctx = EngineContext::new(LayoutConfig::default());
        let root = create_root(&mut ctx, &host).unwrap();
        let p = first_paragraph(&mut ctx, &host, root).unwrap().unwrap();
        let s = scope(&mut ctx, 20 * CH, 2 * LINE, true);

        let out = format(&mut ctx, &host, p, FormatInput::new(s.track, FlowDirection::LeftToRight), FormatMode::Finite, &s)
            .unwrap();
        assert_eq!(out.status, FormatStatus::Continued);
        assert!(matches!(out.break_record, Some(BreakRecord::Columns { .. })));
        let layout = subpage(&ctx, &out);
        assert_eq!(layout.tracks.iter().map(|t| t.clients.len()).sum::<usize>(), 4);

        let mut resume = FormatInput::new(s.track, FlowDirection::LeftToRight);
        resume.break_record = out.break_record;
        let rest = format(&mut ctx, &host, p, resume, FormatMode::Finite, &s).unwrap();
        assert_eq!(rest.status, FormatStatus::Complete);
        assert_eq!(subpage(&ctx, &rest).tracks[0].clients.len(), 1);
    }

    #[test]
    fn columns_left_empty_are_still_reported() {
        let doc = two_columns(1);
        let metrics = MonospaceMetrics::default();
        let host = LayoutHost::new(&doc, &metrics);
        let mut ctx = EngineContext::new(LayoutConfig::default());
        let root = create_root(&mut ctx, &host).unwrap();
        let p = first_paragraph(&mut ctx, &host, root).unwrap().unwrap();
        let s = scope(&mut ctx, 20 * CH, 2 * LINE, true);

        let out = format(&mut ctx, &host, p, FormatInput::new(s.track, FlowDirection::LeftToRight), FormatMode::Finite, &s)
            .unwrap();
        assert_eq!(out.status, FormatStatus::Complete);
        let layout = subpage(&ctx, &out);
        assert_eq!(layout.tracks.len(), 2);
        assert_eq!(layout.tracks[0].clients.len(), 1);
        assert!(layout.tracks[1].clients.is_empty());
        assert_eq!(layout.tracks[1].rect.dv, 0);
        assert_eq!(layout.tracks[1].rect.u - layout.tracks[0].rect.u, 10 * CH);
    }

    #[test]
    fn ui_element_takes_its_size_and_does_not_split() {
        let doc = FlowDocument::from_nodes(
            Style::default(),
            vec![DocNode::element(
                ElementKind::BlockUiContainer,
                Style {
                    width: Some(Dimension::Px(50.0)),
                    height: Some(Dimension::Px(40.0)),
                    ..Default::default()
                },
                vec![],
            )],
        );
        let metrics = MonospaceMetrics::default();
        let host = LayoutHost::new(&doc, &metrics);
        let mut ctx = EngineContext::new(LayoutConfig::default());
        let root = create_root(&mut ctx, &host).unwrap();
        let p = first_paragraph(&mut ctx, &host, root).unwrap().unwrap();
        let s = scope(&mut ctx, 100 * CH, to_layout(30.0), true);

        let mut below = FormatInput::new(s.track, FlowDirection::LeftToRight);
        below.at_track_top = false;
        let out = format(&mut ctx, &host, p, below, FormatMode::Finite, &s).unwrap();
        assert_eq!(out.status, FormatStatus::NoProgress);

        let out = format(&mut ctx, &host, p, FormatInput::new(s.track, FlowDirection::LeftToRight), FormatMode::Finite, &s)
            .unwrap();
        assert_eq!(out.status, FormatStatus::Complete);
        let c = ctx.client(out.client.unwrap()).unwrap();
        assert_eq!((c.rect.du, c.rect.dv), (to_layout(50.0), to_layout(40.0)));
        assert_eq!(out.used_height, to_layout(40.0));
    }
}
