//! # Text Paragraphs
//!
//! A text paragraph owns a [`LineComposer`] over its content and formats
//! it line by line into the track: each line gets the inline span that
//! floats leave free at its block position, floats anchored on a line are
//! placed as soon as the line is, and finite formatting stops at the first
//! line that does not fit.
//!
//! The line breaks of the last complete, unobstructed format are cached
//! relative to the paragraph start. An update pass that finds the
//! paragraph unchanged recreates every line from that cache; a change
//! inside the paragraph keeps the lines that end well before it.

use std::rc::Rc;

use super::{floating, paragraph_style, FormatInput, FormatOutput, ParaId, TrackScope};
use crate::client::{ClientBody, ClientId, PlacedLine, TextBody};
use crate::content::ElementId;
use crate::engine::{BreakRecord, EngineContext, FormatMode, FormatStatus, LayoutHost};
use crate::error::{LayoutError, Result};
use crate::geometry::margin::realize;
use crate::geometry::{
    collapse_bottom_margin, collapse_top_margin, to_layout, LayoutRect, LayoutUnit, MbpInfo, MIN_WIDTH,
};
use crate::text::{ComposeMode, Line, LineBreakRecord, LineComposer, TextProperties, TextSource};

/// Bound on how far a line is pushed down past floats before it is placed
/// over them anyway.
const MAX_FLOAT_SKIPS: usize = 64;

#[derive(Debug, Clone)]
struct CachedLine {
    /// Start relative to the composer's first position.
    rel_start: usize,
    length: usize,
}

#[derive(Debug, Clone)]
struct LineCache {
    width: LayoutUnit,
    lines: Vec<CachedLine>,
}

#[derive(Debug)]
pub struct TextParagraph {
    pub source: TextSource,
    composer: Option<Rc<LineComposer>>,
    line_cache: Option<LineCache>,
    /// Offset of a change inside the paragraph, relative to its start,
    /// pending for the next update pass.
    pub(crate) pending_dirty: Option<usize>,
    /// Figure and floater nodes anchored in this paragraph.
    pub(crate) anchored: Vec<(ElementId, ParaId)>,
    /// Embedded objects have been measured once.
    measured: bool,
}

impl TextParagraph {
    pub fn new(source: TextSource) -> Self {
        Self {
            source,
            composer: None,
            line_cache: None,
            pending_dirty: None,
            anchored: Vec::new(),
            measured: false,
        }
    }

    pub fn is_implicit(&self) -> bool {
        matches!(self.source, TextSource::Implicit { .. })
    }

    pub fn has_line_cache(&self) -> bool {
        self.line_cache.is_some()
    }
}

/// The paragraph's composer, rebuilt when its content moved or changed
/// length since it was analysed.
pub fn ensure_composer(ctx: &mut EngineContext, host: &LayoutHost, id: ParaId) -> Result<Rc<LineComposer>> {
    let (source, cached, measured) = {
        let t = ctx.paragraph(id)?.text()?;
        (t.source, t.composer.clone(), t.measured)
    };
    let span = match source {
        TextSource::Element(e) => {
            let span = host
                .content
                .element_span(e)
                .ok_or(LayoutError::StaleHandle { kind: "element" })?;
            Some(span)
        }
        TextSource::Implicit { .. } => None,
    };
    if let Some(c) = cached {
        let still_valid = match (source, span) {
            (_, Some((s, e))) => c.cp_start == s && c.cp_end == e,
            (TextSource::Implicit { start }, None) => c.cp_start == start,
            _ => false,
        };
        if still_valid {
            return Ok(c);
        }
    }

    let props = TextProperties::from_style(&paragraph_style(ctx, host, id)?);
    let mode = if measured { ComposeMode::Render } else { ComposeMode::Measure };
    let composer = Rc::new(LineComposer::analyze(
        host.content,
        host.metrics,
        &mut ctx.objects,
        mode,
        source,
        props,
    )?);
    let t = ctx.paragraph_mut(id)?.text_mut()?;
    t.composer = Some(Rc::clone(&composer));
    t.measured = true;
    Ok(composer)
}

pub fn drop_caches(ctx: &mut EngineContext, id: ParaId) -> Result<()> {
    let t = ctx.paragraph_mut(id)?.text_mut()?;
    t.composer = None;
    t.line_cache = None;
    t.pending_dirty = None;
    t.measured = false;
    Ok(())
}

/// Record a change reported by an update record. `offset` is where an
/// in-place change starts; `None` means the paragraph is new.
pub fn mark_changed(ctx: &mut EngineContext, id: ParaId, offset: Option<usize>) -> Result<()> {
    let t = ctx.paragraph_mut(id)?.text_mut()?;
    t.composer = None;
    t.pending_dirty = offset;
    if offset.is_none() {
        t.line_cache = None;
    }
    Ok(())
}

/// Follow a reused paragraph to its new start. The line cache is relative
/// and survives the move.
pub fn relocate(ctx: &mut EngineContext, id: ParaId, cursor: usize) -> Result<()> {
    let t = ctx.paragraph_mut(id)?.text_mut()?;
    if let TextSource::Implicit { start } = &mut t.source {
        *start = cursor;
    }
    Ok(())
}

/// Undo the placement of floats whose anchors the narrowed `line` no
/// longer covers. The line that does cover them places them again.
#[allow(clippy::too_many_arguments)]
fn unplace_dropped_anchors(
    ctx: &mut EngineContext,
    host: &LayoutHost,
    id: ParaId,
    scope: &TrackScope,
    line: &Line,
    placed_here: Vec<(ElementId, Option<ClientId>)>,
    placed_anchors: &mut Vec<ElementId>,
    floats: &mut Vec<ClientId>,
) -> Result<()> {
    let kept: Vec<ElementId> = line.anchors().into_iter().map(|(e, _)| e).collect();
    for (anchor, client) in placed_here {
        if kept.contains(&anchor) {
            continue;
        }
        placed_anchors.retain(|e| *e != anchor);
        match client {
            Some(client) => {
                floats.retain(|c| *c != client);
                crate::client::dispose(ctx, client)?;
                ctx.stats.floats_placed = ctx.stats.floats_placed.saturating_sub(1);
            }
            None => {
                let float = floating::anchored_node(ctx, host, id, anchor)?;
                ctx.page_context_mut(scope.page_context)?.cancel_deferred(float);
            }
        }
        log::trace!("anchor {anchor:?} moved past the line at {}", line.cp_start);
    }
    Ok(())
}

/// How many cached lines can be recreated instead of re-broken.
fn reusable_lines(
    t: &TextParagraph,
    width: LayoutUnit,
    mode: FormatMode,
    unchanged: bool,
) -> Vec<CachedLine> {
    let Some(cache) = &t.line_cache else {
        return Vec::new();
    };
    if mode != FormatMode::UpdateBottomless || cache.width != width {
        return Vec::new();
    }
    if unchanged {
        return cache.lines.clone();
    }
    let Some(dirty) = t.pending_dirty else {
        return Vec::new();
    };
    // A change can pull the break before it back, so the last line ending
    // before it is re-broken too.
    let before = cache
        .lines
        .iter()
        .take_while(|l| l.rel_start + l.length < dirty)
        .count();
    cache.lines[..before.saturating_sub(1)].to_vec()
}

pub(crate) fn format_text(
    ctx: &mut EngineContext,
    host: &LayoutHost,
    id: ParaId,
    input: FormatInput,
    mode: FormatMode,
    scope: &TrackScope,
) -> Result<FormatOutput> {
    let (element, change) = {
        let node = ctx.paragraph(id)?;
        (node.element, node.change)
    };
    let style = paragraph_style(ctx, host, id)?;
    let mbp = match element {
        Some(_) => MbpInfo::compute_for_track(&style, ctx.dpi(), input.direction),
        None => MbpInfo::empty(),
    };
    let composer = ensure_composer(ctx, host, id)?;

    let first_chunk = input.break_record.is_none();
    let start_cp = match input.break_record {
        None => composer.first_cp(),
        Some(BreakRecord::Text { line }) => line.cp,
        Some(other) => {
            return Err(LayoutError::invariant(format!(
                "text paragraph resumed with {other:?}"
            )));
        }
    };

    let r = input.rect;
    let space_above = if first_chunk {
        let (open, space) = collapse_top_margin(&mbp, input.mcs);
        space + realize(open)
    } else {
        0
    };
    let border_v = r.v + space_above;
    let content_v = border_v + if first_chunk { mbp.bp.top } else { 0 };
    let track = LayoutRect::new(
        r.u + mbp.mbp.left,
        content_v,
        (r.du - mbp.mbp.horizontal()).max(MIN_WIDTH),
        (r.v_end() - content_v).max(MIN_WIDTH),
    );
    let bottom = r.v_end();
    let estimate = to_layout(style.line_advance()).max(MIN_WIDTH);

    let reusable = {
        let t = ctx.paragraph(id)?.text()?;
        let unobstructed = !composer.has_anchors()
            && ctx.page_context(scope.page_context)?.exclusions().is_empty();
        if first_chunk && unobstructed {
            reusable_lines(t, track.du, mode, change == super::ChangeKind::None)
        } else {
            Vec::new()
        }
    };

    let mut cursor = start_cp;
    let mut v = content_v;
    let mut lines: Vec<PlacedLine> = Vec::new();
    let mut floats = Vec::new();
    let mut placed_anchors: Vec<ElementId> = Vec::new();
    let mut obstructed = false;
    let mut recreated = 0;
    let mut status = FormatStatus::Complete;
    let mut break_record = None;

    loop {
        let (mut span_u, mut span_du) = (track.u, track.du);
        {
            let pc = ctx.page_context(scope.page_context)?;
            for _ in 0..MAX_FLOAT_SKIPS {
                match pc.available_span(&track, v, estimate) {
                    Some((u, du)) => {
                        span_u = u;
                        span_du = du;
                        break;
                    }
                    None => match pc.next_free_v(&track, v, estimate) {
                        Some(next) => v = next,
                        None => break,
                    },
                }
            }
        }
        if span_du < track.du {
            obstructed = true;
        }

        let mut line = match reusable.get(lines.len()) {
            Some(cached) if span_du == track.du && composer.cp_start + cached.rel_start == cursor => {
                recreated += 1;
                composer.recreate_line(cursor, cached.length, span_du)?
            }
            _ => composer.format_line(cursor, span_du, None)?,
        };

        if mode.is_finite() && v + line.height > bottom {
            let forced = lines.is_empty() && input.at_track_top;
            if !forced {
                if lines.is_empty() {
                    return Ok(FormatOutput::no_progress());
                }
                status = FormatStatus::Continued;
                break_record = Some(BreakRecord::Text { line: LineBreakRecord { cp: cursor } });
                break;
            }
        }

        let anchors: Vec<ElementId> = line
            .anchors()
            .into_iter()
            .map(|(e, _)| e)
            .filter(|e| !placed_anchors.contains(e))
            .collect();
        if !anchors.is_empty() {
            let mut placed_here = Vec::with_capacity(anchors.len());
            for anchor in anchors {
                placed_anchors.push(anchor);
                let line_rect = LayoutRect::new(track.u, v, track.du, line.height);
                let at_top = input.at_track_top && lines.is_empty();
                let client = floating::place_anchored(ctx, host, id, anchor, line_rect, scope, mode, at_top)?;
                if let Some(client) = client {
                    floats.push(client);
                }
                placed_here.push((anchor, client));
            }
            let pc = ctx.page_context(scope.page_context)?;
            if let Some((u, du)) = pc.available_span(&track, v, line.height) {
                if (u, du) != (span_u, span_du) {
                    obstructed = true;
                    span_u = u;
                    span_du = du;
                    line = composer.format_line(cursor, span_du, None)?;
                    unplace_dropped_anchors(ctx, host, id, scope, &line, placed_here, &mut placed_anchors, &mut floats)?;
                }
            }
        }

        let rect = LayoutRect::new(span_u, v, span_du, line.height);
        v += line.height;
        let next = line.cp_end();
        let done = line.ends_paragraph;
        lines.push(PlacedLine { rect, line });
        if done {
            break;
        }
        if next <= cursor {
            return Err(LayoutError::invariant(format!("line at {cursor} made no progress")));
        }
        cursor = next;
    }

    let complete = status == FormatStatus::Complete;
    let (mcs, bottom_bp) = if complete {
        (collapse_bottom_margin(&mbp, None).0, mbp.bp.bottom)
    } else {
        (None, 0)
    };
    let border = LayoutRect::new(
        r.u + mbp.margin.left,
        border_v,
        (r.du - mbp.margin.horizontal()).max(MIN_WIDTH),
        v + bottom_bp - border_v,
    );
    let content_rect = LayoutRect::new(track.u, content_v, track.du, v - content_v);
    let mirrored = style.flow_direction != input.direction;
    let bbox = ink_box(&lines, mirrored, &border, &mbp);
    let cp_range = match (lines.first(), lines.last()) {
        (Some(f), Some(l)) => (f.line.cp_start, l.line.cp_end()),
        _ => (start_cp, start_cp),
    };

    let fresh = lines.len() - recreated;
    let cache = (complete && first_chunk && !obstructed && !composer.has_anchors()).then(|| LineCache {
        width: track.du,
        lines: lines
            .iter()
            .map(|l| CachedLine {
                rel_start: l.line.cp_start - composer.cp_start,
                length: l.line.length,
            })
            .collect(),
    });
    {
        let t = ctx.paragraph_mut(id)?.text_mut()?;
        if cache.is_some() || !complete {
            t.line_cache = cache;
        }
        t.pending_dirty = None;
    }
    ctx.stats.lines_formatted += fresh;
    ctx.stats.lines_recreated += recreated;
    if fresh == 0 && recreated > 0 {
        ctx.stats.paragraphs_reused += 1;
    }
    log::trace!("text {id:?}: {fresh} line(s) formatted, {recreated} recreated");

    let client = super::create_client(
        ctx,
        id,
        border,
        style.flow_direction,
        ClientBody::Text(TextBody { lines, floats }),
    )?;
    {
        let c = ctx.client_mut(client)?;
        c.content_rect = content_rect;
        c.mbp = mbp;
        c.cp_range = cp_range;
    }

    Ok(FormatOutput {
        status,
        client: Some(client),
        used_height: border.v_end() - r.v,
        bbox: Some(bbox),
        mcs,
        clear: crate::style::Clear::None,
        break_record,
    })
}

/// Tight horizontal extent of the inked lines, widened by border and
/// padding, over the full block extent of the border box.
fn ink_box(lines: &[PlacedLine], mirrored: bool, border: &LayoutRect, mbp: &MbpInfo) -> LayoutRect {
    let mut lo = LayoutUnit::MAX;
    let mut hi = LayoutUnit::MIN;
    for placed in lines {
        let line: &Line = &placed.line;
        let u = if mirrored {
            placed.rect.u_end() - line.start() - line.width
        } else {
            placed.rect.u + line.start()
        };
        lo = lo.min(u);
        hi = hi.max(u + line.width);
    }
    if lo > hi {
        return LayoutRect::new(border.u, border.v, MIN_WIDTH, border.dv);
    }
    let u = lo - mbp.bp.left;
    LayoutRect::new(u, border.v, (hi + mbp.bp.right - u).max(MIN_WIDTH), border.dv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LayoutConfig;
    use crate::content::{DocNode, ElementKind, FlowDocument};
    use crate::geometry::{FlowDirection, MAX_LAYOUT_SIZE};
    use crate::page::context::{ColumnMetrics, PageContext, PageGeometry};
    use crate::paragraph::container::{first_paragraph, format_segment};
    use crate::paragraph::{clear_update_info, create_root, format, FormatInput};
    use crate::style::{Edges, Style};
    use crate::text::MonospaceMetrics;

    // Default 16px font: 9.6px per character, 20px lines.
    const CH: LayoutUnit = 2880;
    const LINE: LayoutUnit = 6000;

    fn scope(ctx: &mut EngineContext, width: LayoutUnit, height: LayoutUnit) -> TrackScope {
        let area = LayoutRect::new(0, 0, width, height);
        let geometry = PageGeometry { page: area, content: area, columns: ColumnMetrics::single(width) };
        let page_context = ctx
            .page_contexts
            .insert(PageContext::new(geometry, FlowDirection::LeftToRight, false));
        TrackScope { page_context, track: area }
    }

    fn input(scope: &TrackScope) -> FormatInput {
        FormatInput::new(scope.track, FlowDirection::LeftToRight)
    }

    fn text_body(ctx: &EngineContext, out: &FormatOutput) -> Vec<PlacedLine> {
        match &ctx.client(out.client.unwrap()).unwrap().body {
            ClientBody::Text(t) => t.lines.clone(),
            other => panic!("not a text body: {other:?}"),
        }
    }

    #[test]
    fn wraps_into_lines() {
        let doc = FlowDocument::from_nodes(Style::default(), vec![DocNode::paragraph("aaa bbb ccc")]);
        let metrics = MonospaceMetrics::default();
        let host = LayoutHost::new(&doc, &metrics);
        let mut ctx = EngineContext::new(LayoutConfig::default());
        let root = create_root(&mut ctx, &host).unwrap();
        let p = first_paragraph(&mut ctx, &host, root).unwrap().unwrap();
        let s = scope(&mut ctx, 8 * CH, MAX_LAYOUT_SIZE);

        let out = format(&mut ctx, &host, p, input(&s), FormatMode::Bottomless, &s).unwrap();
        assert_eq!(out.status, FormatStatus::Complete);
        let lines = text_body(&ctx, &out);
        assert_eq!(lines.len(), 2);
        assert_eq!(out.used_height, 2 * LINE);
        assert_eq!(lines[1].rect.v, LINE);
        assert_eq!(ctx.client(out.client.unwrap()).unwrap().cp_range, (2, 14));
    }

    #[test]
    fn formatting_twice_is_identical() {
        let doc = FlowDocument::from_nodes(
            Style::default(),
            vec![DocNode::paragraph("the quick brown fox jumps over the lazy dog")],
        );
        let metrics = MonospaceMetrics::default();
        let host = LayoutHost::new(&doc, &metrics);
        let mut ctx = EngineContext::new(LayoutConfig::default());
        let root = create_root(&mut ctx, &host).unwrap();
        let p = first_paragraph(&mut ctx, &host, root).unwrap().unwrap();
        let s = scope(&mut ctx, 12 * CH, MAX_LAYOUT_SIZE);

        let a = format(&mut ctx, &host, p, input(&s), FormatMode::Bottomless, &s).unwrap();
        let b = format(&mut ctx, &host, p, input(&s), FormatMode::Bottomless, &s).unwrap();
        let (la, lb) = (text_body(&ctx, &a), text_body(&ctx, &b));
        assert_eq!(la.len(), lb.len());
        for (x, y) in la.iter().zip(&lb) {
            assert_eq!(x.rect, y.rect);
            assert_eq!(x.line, y.line);
        }
    }

    #[test]
    fn finite_break_and_resume() {
        let doc = FlowDocument::from_nodes(Style::default(), vec![DocNode::paragraph("aaa bbb ccc ddd")]);
        let metrics = MonospaceMetrics::default();
        let host = LayoutHost::new(&doc, &metrics);
        let mut ctx = EngineContext::new(LayoutConfig::default());
        let root = create_root(&mut ctx, &host).unwrap();
        let p = first_paragraph(&mut ctx, &host, root).unwrap().unwrap();
        let s = scope(&mut ctx, 4 * CH, 2 * LINE + LINE / 2);

        let first = format(&mut ctx, &host, p, input(&s), FormatMode::Finite, &s).unwrap();
        assert_eq!(first.status, FormatStatus::Continued);
        assert!(first.mcs.is_none());
        assert_eq!(text_body(&ctx, &first).len(), 2);
        assert!(!ctx.client(first.client.unwrap()).unwrap().last_chunk);
        let Some(BreakRecord::Text { line }) = first.break_record.clone() else {
            panic!("expected a text break record");
        };
        assert_eq!(line.cp, 10);

        let mut resume = input(&s);
        resume.break_record = first.break_record;
        let second = format(&mut ctx, &host, p, resume, FormatMode::Finite, &s).unwrap();
        assert_eq!(second.status, FormatStatus::Complete);
        assert_eq!(text_body(&ctx, &second).len(), 2);
        let c = ctx.client(second.client.unwrap()).unwrap();
        assert!(!c.first_chunk && c.last_chunk);
    }

    #[test]
    fn no_progress_below_the_track_top() {
        let doc = FlowDocument::from_nodes(Style::default(), vec![DocNode::paragraph("aaa")]);
        let metrics = MonospaceMetrics::default();
        let host = LayoutHost::new(&doc, &metrics);
        let mut ctx = EngineContext::new(LayoutConfig::default());
        let root = create_root(&mut ctx, &host).unwrap();
        let p = first_paragraph(&mut ctx, &host, root).unwrap().unwrap();
        let s = scope(&mut ctx, 10 * CH, LINE / 2);

        let mut below = input(&s);
        below.at_track_top = false;
        let out = format(&mut ctx, &host, p, below, FormatMode::Finite, &s).unwrap();
        assert_eq!(out.status, FormatStatus::NoProgress);
        assert_eq!(out.used_height, 0);
        assert!(out.bbox.is_none() && out.client.is_none());

        // At the top of a track the first line is forced in.
        let forced = format(&mut ctx, &host, p, input(&s), FormatMode::Finite, &s).unwrap();
        assert_eq!(forced.status, FormatStatus::Complete);
        assert_eq!(forced.used_height, LINE);
    }

    #[test]
    fn adjacent_margins_collapse_to_the_larger() {
        let p = |margin: Edges| {
            DocNode::element(
                ElementKind::Paragraph,
                Style { margin: Some(margin), ..Default::default() },
                vec![DocNode::text("x")],
            )
        };
        let doc = FlowDocument::from_nodes(
            Style::default(),
            vec![
                p(Edges { bottom: 12.0, ..Default::default() }),
                p(Edges { top: 30.0, ..Default::default() }),
            ],
        );
        let metrics = MonospaceMetrics::default();
        let host = LayoutHost::new(&doc, &metrics);
        let mut ctx = EngineContext::new(LayoutConfig::default());
        let root = create_root(&mut ctx, &host).unwrap();
        let s = scope(&mut ctx, 100 * CH, MAX_LAYOUT_SIZE);
        let seg = format_segment(
            &mut ctx,
            &host,
            root,
            s.track,
            FlowDirection::LeftToRight,
            None,
            None,
            FormatMode::Bottomless,
            &s,
            true,
        )
        .unwrap();
        assert_eq!(seg.clients.len(), 2);
        let second = ctx.client(seg.clients[1]).unwrap().rect;
        assert_eq!(second.v, LINE + to_layout(30.0));
    }

    #[test]
    fn unchanged_paragraph_recreates_its_lines() {
        let doc = FlowDocument::from_nodes(Style::default(), vec![DocNode::paragraph("aaa bbb ccc")]);
        let metrics = MonospaceMetrics::default();
        let host = LayoutHost::new(&doc, &metrics);
        let mut ctx = EngineContext::new(LayoutConfig::default());
        let root = create_root(&mut ctx, &host).unwrap();
        let p = first_paragraph(&mut ctx, &host, root).unwrap().unwrap();
        let s = scope(&mut ctx, 4 * CH, MAX_LAYOUT_SIZE);

        let a = format(&mut ctx, &host, p, input(&s), FormatMode::Bottomless, &s).unwrap();
        assert!(ctx.paragraph(p).unwrap().text().unwrap().has_line_cache());
        clear_update_info(&mut ctx, root).unwrap();
        let b = format(&mut ctx, &host, p, input(&s), FormatMode::UpdateBottomless, &s).unwrap();
        assert_eq!(ctx.stats.lines_recreated, 3);
        assert_eq!(ctx.stats.paragraphs_reused, 1);
        let (la, lb) = (text_body(&ctx, &a), text_body(&ctx, &b));
        assert_eq!(la.iter().map(|l| &l.line).collect::<Vec<_>>(), lb.iter().map(|l| &l.line).collect::<Vec<_>>());
    }
}
