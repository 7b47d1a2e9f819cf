//! # Containers and the Pull Protocol
//!
//! A segment is the ordered run of child paragraphs inside one block
//! element. Children are never enumerated up front: the formatter asks for
//! the first one, formats it, then asks for the one after it, and the pull
//! protocol decides at each cursor position whether a cached node still
//! describes the content there or a new one must be created.
//!
//! In update mode the segment's update records steer that decision: nodes
//! before the first affected paragraph are reused untouched, the affected
//! one is re-formatted, and the chain resynchronizes at the record's sync
//! node.
//!
//! [`format_segment`] drives the pull loop for every kind that owns a
//! segment: containers and lists here, page columns, subpages, figure and
//! floater content and table cells elsewhere.

use super::update::UpdateRecord;
use super::{
    chain, child_elements, create_paragraph, dispose, paragraph_end, paragraph_style, text, update,
    ChangeKind, FormatInput, FormatOutput, NewParagraph, ParaId, ParagraphKindTag, TrackScope,
};
use crate::client::{ClientBody, ClientId, ListMarker};
use crate::content::{ElementId, ElementKind, LogicalDirection, PointerContext, TextContainer};
use crate::engine::{BreakRecord, EngineContext, FormatMode, FormatStatus, LayoutHost};
use crate::error::{LayoutError, Result};
use crate::geometry::{
    collapse_bottom_margin, collapse_top_margin, to_layout, FlowDirection, LayoutRect, LayoutUnit,
    MarginCollapsingState, MbpInfo, MIN_WIDTH,
};
use crate::style::Clear;
use crate::text::TextSource;

/// The child chain of a block paragraph.
#[derive(Debug, Default)]
pub struct Segment {
    pub first_child: Option<ParaId>,
    pub(crate) update: Option<Box<UpdateRecord>>,
    /// Set when a change began before the first child; the chain is
    /// rebuilt from scratch on the next incremental pull.
    pub(crate) full_recalc: bool,
}

// ── Paragraph decision ─────────────────────────────────────────────

/// What paragraph starts at `cp` inside `owner`'s content, if any.
///
/// `empty_ok` is false only for the first paragraph of a segment: an empty
/// element still gets one (empty) text paragraph.
pub fn decide_paragraph(
    content: &dyn TextContainer,
    cp: usize,
    owner: ElementId,
    empty_ok: bool,
) -> Option<NewParagraph> {
    let implicit = NewParagraph::Text(TextSource::Implicit { start: cp });
    match content.pointer_context(cp, LogicalDirection::Forward) {
        PointerContext::Text | PointerContext::EmbeddedElement => Some(implicit),
        PointerContext::ElementEnd => {
            // Only the owner's own end can close its content.
            let at_owner_end = content.adjacent_element(cp, LogicalDirection::Forward) == Some(owner);
            if at_owner_end && !empty_ok {
                Some(implicit)
            } else {
                None
            }
        }
        PointerContext::ElementStart => {
            let element = content.adjacent_element(cp, LogicalDirection::Forward)?;
            let decided = match content.element_kind(element)? {
                ElementKind::List => NewParagraph::List(element),
                ElementKind::Table => NewParagraph::Table(element),
                ElementKind::BlockUiContainer => NewParagraph::UiElement(element),
                ElementKind::Paragraph => NewParagraph::Text(TextSource::Element(element)),
                ElementKind::Section => {
                    let style = content.resolved_style(element);
                    if style.column_count > 1 || style.column_width.is_some() {
                        NewParagraph::Subpage(element)
                    } else {
                        NewParagraph::Container(element)
                    }
                }
                ElementKind::ListItem | ElementKind::TableRow | ElementKind::TableCell => {
                    NewParagraph::Container(element)
                }
                ElementKind::Span
                | ElementKind::LineBreak
                | ElementKind::InlineObject
                | ElementKind::Figure
                | ElementKind::Floater => implicit,
            };
            Some(decided)
        }
        PointerContext::None => (!empty_ok).then_some(implicit),
    }
}

// ── Pull protocol ──────────────────────────────────────────────────

fn segment_bounds(ctx: &EngineContext, host: &LayoutHost, owner: ParaId) -> Result<(usize, usize, ElementId)> {
    let element = ctx
        .paragraph(owner)?
        .element
        .ok_or_else(|| LayoutError::invariant("segment owner has no element"))?;
    let (start, end) = host
        .content
        .content_range(element)
        .ok_or(LayoutError::StaleHandle { kind: "element" })?;
    Ok((start, end, element))
}

/// First child paragraph of `owner`.
pub fn first_paragraph(ctx: &mut EngineContext, host: &LayoutHost, owner: ParaId) -> Result<Option<ParaId>> {
    let (start, _, element) = segment_bounds(ctx, host, owner)?;
    let (cached, full_recalc) = {
        let seg = ctx.paragraph(owner)?.segment()?;
        (seg.first_child, seg.full_recalc)
    };
    let cached = if full_recalc && ctx.is_incremental() {
        log::debug!("rebuilding segment of {owner:?} from scratch");
        for child in chain(ctx, cached) {
            dispose(ctx, child)?;
        }
        let seg = ctx.paragraph_mut(owner)?.segment_mut()?;
        seg.full_recalc = false;
        seg.update = None;
        None
    } else {
        cached
    };
    resolve(ctx, host, owner, element, None, cached, start, false)
}

/// The child after `prev`, or `None` at the end of the segment.
pub fn next_paragraph(
    ctx: &mut EngineContext,
    host: &LayoutHost,
    owner: ParaId,
    prev: ParaId,
) -> Result<Option<ParaId>> {
    let (_, end, element) = segment_bounds(ctx, host, owner)?;
    let cursor = paragraph_end(ctx, host, prev)?;
    let cached = ctx.paragraph(prev)?.next;
    if cursor >= end {
        for stale in chain(ctx, cached) {
            dispose(ctx, stale)?;
        }
        return Ok(None);
    }
    resolve(ctx, host, owner, element, Some(prev), cached, cursor, true)
}

/// Live start of a cached node, `None` when its element is gone.
fn candidate_start(ctx: &EngineContext, host: &LayoutHost, id: ParaId) -> Result<Option<usize>> {
    let node = ctx.paragraph(id)?;
    Ok(match node.element {
        Some(e) => host.content.element_span(e).map(|(s, _)| s),
        None => Some(node.cp_first),
    })
}

#[allow(clippy::too_many_arguments)]
fn resolve(
    ctx: &mut EngineContext,
    host: &LayoutHost,
    owner: ParaId,
    element: ElementId,
    prev: Option<ParaId>,
    mut candidate: Option<ParaId>,
    cursor: usize,
    empty_ok: bool,
) -> Result<Option<ParaId>> {
    let wanted = decide_paragraph(host.content, cursor, element, empty_ok);

    while let Some(c) = candidate {
        let is_sync = ctx
            .paragraph(owner)?
            .segment()?
            .update
            .as_ref()
            .map(|r| r.sync == Some(c))
            .unwrap_or(false);
        let start = candidate_start(ctx, host, c)?;
        let matches = match wanted {
            Some(w) => w.matches(ctx.paragraph(c)?),
            None => false,
        };

        if is_sync {
            match start {
                Some(s) if s > cursor => break,
                Some(s) if s == cursor && matches => {
                    update::pop_record(ctx, owner)?;
                    relocate(ctx, c, cursor)?;
                    ctx.paragraph_mut(c)?.change = ChangeKind::None;
                    link(ctx, owner, prev, c)?;
                    log::trace!("resynchronized at {c:?} ({cursor})");
                    return Ok(Some(c));
                }
                _ => {
                    // Content before it overran the sync node; the one after
                    // it becomes the sync point.
                    candidate = ctx.paragraph(c)?.next;
                    dispose(ctx, c)?;
                    continue;
                }
            }
        }

        if matches {
            mark_change(ctx, owner, c)?;
            relocate(ctx, c, cursor)?;
            link(ctx, owner, prev, c)?;
            return Ok(Some(c));
        }
        candidate = ctx.paragraph(c)?.next;
        dispose(ctx, c)?;
    }

    let Some(what) = wanted else {
        for stale in chain(ctx, candidate) {
            dispose(ctx, stale)?;
        }
        return Ok(None);
    };
    let id = create_paragraph(ctx, host, what, owner, cursor)?;
    ctx.paragraph_mut(id)?.next = candidate;
    if let Some(c) = candidate {
        ctx.paragraph_mut(c)?.prev = Some(id);
    }
    link(ctx, owner, prev, id)?;
    if empty_ok && paragraph_end(ctx, host, id)? <= cursor {
        return Err(LayoutError::invariant(format!("paragraph at {cursor} covers no content")));
    }
    Ok(Some(id))
}

/// Assign the change kind of a reused node from the active update record.
fn mark_change(ctx: &mut EngineContext, owner: ParaId, id: ParaId) -> Result<()> {
    let (change, dirty_offset) = {
        let seg = ctx.paragraph_mut(owner)?.segment_mut()?;
        match seg.update.as_deref_mut() {
            Some(r) if !r.in_processing && r.first == Some(id) => {
                r.in_processing = true;
                (r.change, Some(r.first_offset))
            }
            _ => (ChangeKind::None, None),
        }
    };
    let node = ctx.paragraph_mut(id)?;
    node.change = change;
    if change != ChangeKind::None && node.tag() == ParagraphKindTag::Text {
        let offset = if change == ChangeKind::Inside { dirty_offset } else { None };
        text::mark_changed(ctx, id, offset)?;
    }
    Ok(())
}

/// Move a reused node to `cursor`.
fn relocate(ctx: &mut EngineContext, id: ParaId, cursor: usize) -> Result<()> {
    let node = ctx.paragraph_mut(id)?;
    // Update records may already have shifted `cp_first`; the text source
    // still has to follow.
    node.cp_first = cursor;
    if node.tag() == ParagraphKindTag::Text {
        text::relocate(ctx, id, cursor)?;
    }
    Ok(())
}

fn link(ctx: &mut EngineContext, owner: ParaId, prev: Option<ParaId>, id: ParaId) -> Result<()> {
    {
        let node = ctx.paragraph_mut(id)?;
        node.prev = prev;
        node.parent = Some(owner);
    }
    match prev {
        Some(p) => ctx.paragraph_mut(p)?.next = Some(id),
        None => ctx.paragraph_mut(owner)?.segment_mut()?.first_child = Some(id),
    }
    Ok(())
}

// ── Segment formatting ─────────────────────────────────────────────

/// Result of formatting (part of) a segment into one track.
#[derive(Debug)]
pub struct SegmentOutput {
    pub status: FormatStatus,
    pub clients: Vec<ClientId>,
    /// Block position after the last placed paragraph.
    pub v_end: LayoutUnit,
    pub mcs: Option<MarginCollapsingState>,
    pub clear: Clear,
    pub resume: Option<BreakRecord>,
    /// Union of the placed paragraphs' content boxes.
    pub bbox: Option<LayoutRect>,
}

/// Format `owner`'s children into `area`, starting at `resume` or at the
/// first child.
#[allow(clippy::too_many_arguments)]
pub fn format_segment(
    ctx: &mut EngineContext,
    host: &LayoutHost,
    owner: ParaId,
    area: LayoutRect,
    direction: FlowDirection,
    resume: Option<BreakRecord>,
    mcs: Option<MarginCollapsingState>,
    mode: FormatMode,
    scope: &TrackScope,
    at_track_top: bool,
) -> Result<SegmentOutput> {
    let (mut child, mut inner) = match resume {
        Some(BreakRecord::Segment { child, inner }) => {
            ctx.paragraph(child)?;
            (Some(child), inner.map(|b| *b))
        }
        Some(other) => {
            return Err(LayoutError::invariant(format!(
                "segment resumed with a non-segment break record: {other:?}"
            )));
        }
        None => (first_paragraph(ctx, host, owner)?, None),
    };

    let bottom = area.v_end();
    let mut out = SegmentOutput {
        status: FormatStatus::Complete,
        clients: Vec::new(),
        v_end: area.v,
        mcs,
        clear: Clear::None,
        resume: None,
        bbox: None,
    };

    while let Some(id) = child {
        if ctx.checkpoint(host) {
            break;
        }
        if host.interrupted() {
            out.status = FormatStatus::Interrupted;
            out.resume = Some(BreakRecord::Segment { child: id, inner: inner.map(Box::new) });
            break;
        }

        let saved_inner = inner.clone();
        if inner.is_none() {
            let clear = paragraph_clear(ctx, host, id)?;
            if clear != Clear::None {
                let pc = ctx.page_context(scope.page_context)?;
                let cleared = pc.clear_below(&area, out.v_end, clear);
                if cleared > out.v_end {
                    out.v_end = cleared;
                    out.mcs = None;
                }
            }
        }

        let input = FormatInput {
            rect: LayoutRect::new(area.u, out.v_end, area.du, (bottom - out.v_end).max(0)),
            direction,
            mcs: out.mcs.take(),
            clear: out.clear,
            break_record: inner.take(),
            at_track_top: at_track_top && out.clients.is_empty(),
        };
        let result = super::format(ctx, host, id, input, mode, scope)?;

        match result.status {
            FormatStatus::Complete | FormatStatus::Continued => {
                out.clients.extend(result.client);
                out.v_end += result.used_height;
                out.bbox = union(out.bbox, result.bbox);
                out.clear = result.clear;
                if result.status == FormatStatus::Continued {
                    out.status = FormatStatus::Continued;
                    out.resume = Some(BreakRecord::Segment {
                        child: id,
                        inner: result.break_record.map(Box::new),
                    });
                    break;
                }
                out.mcs = result.mcs;
                child = next_paragraph(ctx, host, owner, id)?;
            }
            FormatStatus::Interrupted => {
                out.status = FormatStatus::Interrupted;
                out.resume = Some(BreakRecord::Segment { child: id, inner: saved_inner.map(Box::new) });
                break;
            }
            FormatStatus::NoProgress | FormatStatus::Collision | FormatStatus::Rejected => {
                out.status = if out.clients.is_empty() {
                    FormatStatus::NoProgress
                } else {
                    FormatStatus::Continued
                };
                out.resume = Some(BreakRecord::Segment { child: id, inner: saved_inner.map(Box::new) });
                break;
            }
        }
    }
    Ok(out)
}

fn paragraph_clear(ctx: &EngineContext, host: &LayoutHost, id: ParaId) -> Result<Clear> {
    Ok(match ctx.paragraph(id)?.element {
        Some(_) => paragraph_style(ctx, host, id)?.clear,
        None => Clear::None,
    })
}

pub(crate) fn union(a: Option<LayoutRect>, b: Option<LayoutRect>) -> Option<LayoutRect> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.union(&b)),
        (a, b) => a.or(b),
    }
}

// ── Containers and lists ───────────────────────────────────────────

pub(crate) fn format_container(
    ctx: &mut EngineContext,
    host: &LayoutHost,
    id: ParaId,
    input: FormatInput,
    mode: FormatMode,
    scope: &TrackScope,
) -> Result<FormatOutput> {
    let (element, tag, change) = {
        let node = ctx.paragraph(id)?;
        let element = node
            .element
            .ok_or_else(|| LayoutError::invariant("container paragraph without an element"))?;
        (element, node.tag(), node.change)
    };
    let style = host.content.resolved_style(element);
    let mbp = MbpInfo::compute_for_track(&style, ctx.dpi(), input.direction);
    let first_chunk = input.break_record.is_none();
    if mode == FormatMode::UpdateBottomless && change != ChangeKind::None && first_chunk {
        update::build_update_records(ctx, host, id)?;
    }

    let r = input.rect;
    let (open, top_space) = if first_chunk {
        collapse_top_margin(&mbp, input.mcs)
    } else {
        (None, 0)
    };
    let border_v = r.v + top_space;
    let content_v = border_v + if first_chunk { mbp.bp.top } else { 0 };
    let mut inner = LayoutRect::new(
        r.u + mbp.mbp.left,
        content_v,
        (r.du - mbp.mbp.horizontal()).max(MIN_WIDTH),
        (r.v_end() - content_v).max(MIN_WIDTH),
    );
    if tag == ParagraphKindTag::List {
        let indent = to_layout(style.marker_offset).min(inner.du - MIN_WIDTH).max(0);
        inner.u += indent;
        inner.du -= indent;
    }

    let seg = format_segment(
        ctx,
        host,
        id,
        inner,
        style.flow_direction,
        input.break_record,
        open,
        mode,
        scope,
        input.at_track_top,
    )?;
    if seg.status == FormatStatus::NoProgress {
        return Ok(FormatOutput::no_progress());
    }

    let complete = seg.status == FormatStatus::Complete;
    let (mcs, bottom_space, bottom_bp) = if complete {
        let (m, space) = collapse_bottom_margin(&mbp, seg.mcs);
        (m, space, mbp.bp.bottom)
    } else {
        (None, 0, 0)
    };
    let content_end = seg.v_end + bottom_space;
    let border = LayoutRect::new(
        r.u + mbp.margin.left,
        border_v,
        (r.du - mbp.margin.horizontal()).max(MIN_WIDTH),
        content_end + bottom_bp - border_v,
    );
    let content_rect = LayoutRect::new(inner.u, content_v, inner.du, seg.v_end - content_v);

    let marker = if first_chunk {
        list_marker(host, element, &content_rect)
    } else {
        None
    };
    let client = super::create_client(
        ctx,
        id,
        border,
        style.flow_direction,
        ClientBody::Container { children: seg.clients, marker },
    )?;
    {
        let c = ctx.client_mut(client)?;
        c.content_rect = content_rect;
        c.mbp = mbp;
    }
    let ink_end = seg.bbox.map(|b| b.u_end()).unwrap_or(inner.u) + mbp.bp.right;
    let bbox = LayoutRect::new(border.u, border.v, (ink_end - border.u).max(MIN_WIDTH), border.dv);

    Ok(FormatOutput {
        status: seg.status,
        client: Some(client),
        used_height: border.v_end() - r.v,
        bbox: Some(bbox),
        mcs,
        clear: seg.clear,
        break_record: seg.resume,
    })
}

/// The marker of a list item, placed in the indent its list reserved.
fn list_marker(host: &LayoutHost, item: ElementId, content: &LayoutRect) -> Option<ListMarker> {
    let content_store = host.content;
    if content_store.element_kind(item)? != ElementKind::ListItem {
        return None;
    }
    let list = content_store.parent_element(item)?;
    if content_store.element_kind(list)? != ElementKind::List {
        return None;
    }
    let style = content_store.resolved_style(list);
    let position = child_elements(content_store, list).iter().position(|e| *e == item)?;
    let text = style.marker_style.marker_text(style.start_index + position as u32);
    if text.is_empty() {
        return None;
    }
    let offset = to_layout(style.marker_offset);
    let height = to_layout(style.line_advance());
    let ascent = to_layout(host.metrics.ascent(style.font_size));
    Some(ListMarker {
        text,
        rect: LayoutRect::new(content.u - offset, content.v, offset, height),
        baseline: ascent,
        font_size: style.font_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LayoutConfig;
    use crate::content::{DocNode, FlowDocument};
    use crate::paragraph::create_root;
    use crate::style::Style;
    use crate::text::MonospaceMetrics;

    fn pull_all(ctx: &mut EngineContext, host: &LayoutHost, owner: ParaId) -> Vec<ParaId> {
        let mut out = Vec::new();
        let mut cur = first_paragraph(ctx, host, owner).unwrap();
        while let Some(p) = cur {
            out.push(p);
            cur = next_paragraph(ctx, host, owner, p).unwrap();
        }
        out
    }

    #[test]
    fn decides_kinds_from_content() {
        let doc = FlowDocument::from_nodes(
            Style::default(),
            vec![
                DocNode::text("loose "),
                DocNode::paragraph("p"),
                DocNode::element(ElementKind::List, Style::default(), vec![]),
                DocNode::element(
                    ElementKind::Section,
                    Style { column_count: Some(2), ..Default::default() },
                    vec![DocNode::paragraph("c")],
                ),
            ],
        );
        let root = doc.root();
        assert!(matches!(
            decide_paragraph(&doc, 1, root, false),
            Some(NewParagraph::Text(TextSource::Implicit { start: 1 }))
        ));
        assert!(matches!(
            decide_paragraph(&doc, 7, root, true),
            Some(NewParagraph::Text(TextSource::Element(_)))
        ));
        assert!(matches!(decide_paragraph(&doc, 10, root, true), Some(NewParagraph::List(_))));
        assert!(matches!(decide_paragraph(&doc, 12, root, true), Some(NewParagraph::Subpage(_))));
        let end = doc.symbol_count() - 1;
        assert_eq!(decide_paragraph(&doc, end, root, true), None);
        assert!(decide_paragraph(&doc, end, root, false).is_some());
    }

    #[test]
    fn foreign_element_end_starts_no_paragraph() {
        let doc = FlowDocument::from_nodes(
            Style::default(),
            vec![DocNode::element(
                ElementKind::Paragraph,
                Style::default(),
                vec![DocNode::element(ElementKind::Span, Style::default(), vec![DocNode::text("ab")])],
            )],
        );
        let root = doc.root();
        let span = doc.elements_of_kind(ElementKind::Span)[0];
        let (_, end) = doc.element_span(span).unwrap();
        assert_eq!(decide_paragraph(&doc, end - 1, root, true), None);
        assert_eq!(decide_paragraph(&doc, end - 1, root, false), None);
    }

    #[test]
    fn padding_that_fills_the_track_keeps_a_content_area() {
        use crate::page::context::{ColumnMetrics, PageContext, PageGeometry};
        use crate::paragraph::format;
        use crate::style::Edges;

        let doc = FlowDocument::from_nodes(
            Style::default(),
            vec![DocNode::element(
                ElementKind::Section,
                Style { padding: Some(Edges { top: 40.0, ..Default::default() }), ..Default::default() },
                vec![DocNode::paragraph("a")],
            )],
        );
        let metrics = MonospaceMetrics::default();
        let host = LayoutHost::new(&doc, &metrics);
        let mut ctx = EngineContext::new(LayoutConfig::default());
        let root = create_root(&mut ctx, &host).unwrap();
        let section = first_paragraph(&mut ctx, &host, root).unwrap().unwrap();

        // 40px of padding is exactly the track height.
        let area = LayoutRect::new(0, 0, 20 * 2880, 12000);
        let geometry = PageGeometry { page: area, content: area, columns: ColumnMetrics::single(area.du) };
        let page_context = ctx
            .page_contexts
            .insert(PageContext::new(geometry, FlowDirection::LeftToRight, true));
        let scope = TrackScope { page_context, track: area };
        let out = format(&mut ctx, &host, section, FormatInput::new(area, FlowDirection::LeftToRight), FormatMode::Finite, &scope)
            .unwrap();

        let client = ctx.client(out.client.unwrap()).unwrap();
        assert_eq!(client.content_rect.v, 12000);
        for child in client.body.children() {
            let rect = ctx.client(child).unwrap().rect;
            assert!(rect.du >= MIN_WIDTH);
            assert!(rect.dv >= MIN_WIDTH);
        }
    }

    #[test]
    fn pull_creates_then_reuses() {
        let doc = FlowDocument::from_nodes(
            Style::default(),
            vec![DocNode::paragraph("a"), DocNode::text("loose"), DocNode::paragraph("b")],
        );
        let metrics = MonospaceMetrics::default();
        let host = LayoutHost::new(&doc, &metrics);
        let mut ctx = EngineContext::new(LayoutConfig::default());
        let root = create_root(&mut ctx, &host).unwrap();

        let first = pull_all(&mut ctx, &host, root);
        assert_eq!(first.len(), 3);
        assert_eq!(ctx.stats.paragraphs_created, 4);
        let again = pull_all(&mut ctx, &host, root);
        assert_eq!(first, again);
        assert_eq!(ctx.stats.paragraphs_created, 4);
        assert_eq!(ctx.paragraph(first[1]).unwrap().cp_first, 4);
    }

    #[test]
    fn empty_container_gets_one_empty_paragraph() {
        let doc = FlowDocument::from_nodes(Style::default(), vec![]);
        let metrics = MonospaceMetrics::default();
        let host = LayoutHost::new(&doc, &metrics);
        let mut ctx = EngineContext::new(LayoutConfig::default());
        let root = create_root(&mut ctx, &host).unwrap();
        let kids = pull_all(&mut ctx, &host, root);
        assert_eq!(kids.len(), 1);
        assert_eq!(ctx.paragraph(kids[0]).unwrap().tag(), ParagraphKindTag::Text);
    }

    #[test]
    fn removed_elements_are_dropped_on_pull() {
        let mut doc = FlowDocument::from_nodes(
            Style::default(),
            vec![DocNode::paragraph("a"), DocNode::paragraph("b"), DocNode::paragraph("c")],
        );
        let metrics = MonospaceMetrics::default();
        let mut ctx = EngineContext::new(LayoutConfig::default());
        let before = {
            let host = LayoutHost::new(&doc, &metrics);
            let root = create_root(&mut ctx, &host).unwrap();
            (root, pull_all(&mut ctx, &host, root))
        };
        let (root, kids) = before;
        // Remove the middle paragraph: Start b End.
        doc.remove_range(4, 3).unwrap();
        let host = LayoutHost::new(&doc, &metrics);
        let after = pull_all(&mut ctx, &host, root);
        assert_eq!(after, vec![kids[0], kids[2]]);
        assert!(!ctx.paragraphs.contains(kids[1]));
    }
}
