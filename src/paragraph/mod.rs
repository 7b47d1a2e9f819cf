//! # Paragraph Nodes
//!
//! One [`ParagraphNode`] per logical paragraph of content, kept in the
//! engine context's arena and chained per segment through `prev`/`next`
//! handles. Nodes are created lazily by the pull protocol
//! ([`container::first_paragraph`] / [`container::next_paragraph`]) the
//! first time a position is visited, and live until an update record or a
//! structural invalidation disposes them.
//!
//! Kind-specific state lives in the [`ParagraphKind`] payload; the
//! operations every kind supports are the free functions of this module,
//! which dispatch on the payload:
//!
//! - [`properties`] and [`create_client`]
//! - [`format_finite`], [`format_bottomless`], [`update_bottomless`]
//! - [`clear_update_info`], [`invalidate_structure`],
//!   [`invalidate_format_cache`] and [`dispose`]

pub mod block;
pub mod container;
pub mod floating;
pub mod table;
pub mod text;
pub mod update;

use serde::Serialize;

use crate::client::{self, ClientBody, ClientId, ParagraphClient, UpdateKind};
use crate::content::{ElementId, LogicalDirection, PointerContext, TextContainer};
use crate::engine::{BreakRecord, EngineContext, FormatMode, FormatStatus, Handle, LayoutHost};
use crate::error::{LayoutError, Result};
use crate::geometry::{FlowDirection, LayoutRect, LayoutUnit, MarginCollapsingState};
use crate::page::context::PageContextId;
use crate::style::{Clear, ResolvedStyle};

use block::{SubpageParagraph, UiElementParagraph};
use container::Segment;
use floating::FloatingParagraph;
use table::TableParagraph;
use text::TextParagraph;

pub type ParaId = Handle<ParagraphNode>;

/// The eight paragraph kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ParagraphKindTag {
    Text,
    Container,
    List,
    Table,
    UiElement,
    Figure,
    Floater,
    Subpage,
}

/// What changed in a paragraph since the last pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ChangeKind {
    #[default]
    None,
    Inside,
    New,
}

#[derive(Debug)]
pub enum ParagraphKind {
    Text(TextParagraph),
    Container(Segment),
    List(Segment),
    Table(TableParagraph),
    UiElement(UiElementParagraph),
    Figure(FloatingParagraph),
    Floater(FloatingParagraph),
    Subpage(SubpageParagraph),
}

impl ParagraphKind {
    pub fn tag(&self) -> ParagraphKindTag {
        match self {
            ParagraphKind::Text(_) => ParagraphKindTag::Text,
            ParagraphKind::Container(_) => ParagraphKindTag::Container,
            ParagraphKind::List(_) => ParagraphKindTag::List,
            ParagraphKind::Table(_) => ParagraphKindTag::Table,
            ParagraphKind::UiElement(_) => ParagraphKindTag::UiElement,
            ParagraphKind::Figure(_) => ParagraphKindTag::Figure,
            ParagraphKind::Floater(_) => ParagraphKindTag::Floater,
            ParagraphKind::Subpage(_) => ParagraphKindTag::Subpage,
        }
    }

    /// The child chain of kinds that own one.
    pub fn segment(&self) -> Option<&Segment> {
        match self {
            ParagraphKind::Container(s) | ParagraphKind::List(s) => Some(s),
            ParagraphKind::Figure(f) | ParagraphKind::Floater(f) => Some(&f.segment),
            ParagraphKind::Subpage(s) => Some(&s.segment),
            _ => None,
        }
    }

    pub fn segment_mut(&mut self) -> Option<&mut Segment> {
        match self {
            ParagraphKind::Container(s) | ParagraphKind::List(s) => Some(s),
            ParagraphKind::Figure(f) | ParagraphKind::Floater(f) => Some(&mut f.segment),
            ParagraphKind::Subpage(s) => Some(&mut s.segment),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct ParagraphNode {
    /// The element this paragraph formats. `None` for loose inline content.
    pub element: Option<ElementId>,
    pub parent: Option<ParaId>,
    pub prev: Option<ParaId>,
    pub next: Option<ParaId>,
    /// Start position as of the last pull.
    pub cp_first: usize,
    /// Positions covered when last formatted.
    pub last_format_cch: usize,
    pub change: ChangeKind,
    /// Available rectangle of the last format call.
    pub last_rect: Option<LayoutRect>,
    pub kind: ParagraphKind,
}

impl ParagraphNode {
    pub fn new(kind: ParagraphKind, element: Option<ElementId>, parent: Option<ParaId>, cp_first: usize) -> Self {
        Self {
            element,
            parent,
            prev: None,
            next: None,
            cp_first,
            last_format_cch: 0,
            change: ChangeKind::New,
            last_rect: None,
            kind,
        }
    }

    pub fn tag(&self) -> ParagraphKindTag {
        self.kind.tag()
    }

    pub fn segment(&self) -> Result<&Segment> {
        self.kind
            .segment()
            .ok_or_else(|| LayoutError::invariant(format!("{:?} paragraph has no segment", self.tag())))
    }

    pub fn segment_mut(&mut self) -> Result<&mut Segment> {
        let tag = self.tag();
        self.kind
            .segment_mut()
            .ok_or_else(|| LayoutError::invariant(format!("{tag:?} paragraph has no segment")))
    }

    pub fn text(&self) -> Result<&TextParagraph> {
        match &self.kind {
            ParagraphKind::Text(t) => Ok(t),
            _ => Err(LayoutError::invariant("expected a text paragraph")),
        }
    }

    pub fn text_mut(&mut self) -> Result<&mut TextParagraph> {
        match &mut self.kind {
            ParagraphKind::Text(t) => Ok(t),
            _ => Err(LayoutError::invariant("expected a text paragraph")),
        }
    }
}

/// Generic flags the formatter routes on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParagraphProperties {
    pub kind: ParagraphKindTag,
    pub element: Option<ElementId>,
    pub direction: FlowDirection,
    pub clear: Clear,
    pub is_float: bool,
    /// Whether finite formatting may split it across pages.
    pub can_break: bool,
    pub change: ChangeKind,
}

/// The track a paragraph is being formatted into.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackScope {
    pub page_context: PageContextId,
    pub track: LayoutRect,
}

/// Input shared by the three formatting entry points.
#[derive(Debug)]
pub struct FormatInput {
    /// Available space: the track's inline extent, the current block
    /// position and the height left below it.
    pub rect: LayoutRect,
    /// Direction of the containing track.
    pub direction: FlowDirection,
    pub mcs: Option<MarginCollapsingState>,
    pub clear: Clear,
    pub break_record: Option<BreakRecord>,
    /// Nothing has been placed in the track yet, so the paragraph must
    /// make progress.
    pub at_track_top: bool,
}

impl FormatInput {
    pub fn new(rect: LayoutRect, direction: FlowDirection) -> Self {
        Self {
            rect,
            direction,
            mcs: None,
            clear: Clear::None,
            break_record: None,
            at_track_top: true,
        }
    }
}

#[derive(Debug)]
pub struct FormatOutput {
    pub status: FormatStatus,
    pub client: Option<ClientId>,
    pub used_height: LayoutUnit,
    pub bbox: Option<LayoutRect>,
    pub mcs: Option<MarginCollapsingState>,
    pub clear: Clear,
    pub break_record: Option<BreakRecord>,
}

impl FormatOutput {
    pub fn no_progress() -> Self {
        Self::empty(FormatStatus::NoProgress)
    }

    pub fn empty(status: FormatStatus) -> Self {
        Self {
            status,
            client: None,
            used_height: 0,
            bbox: None,
            mcs: None,
            clear: Clear::None,
            break_record: None,
        }
    }
}

// ── Creation ───────────────────────────────────────────────────────

/// What the pull protocol decided to create at a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewParagraph {
    Text(crate::text::TextSource),
    Container(ElementId),
    List(ElementId),
    Table(ElementId),
    UiElement(ElementId),
    Subpage(ElementId),
}

impl NewParagraph {
    pub fn element(&self) -> Option<ElementId> {
        match *self {
            NewParagraph::Text(crate::text::TextSource::Element(e)) => Some(e),
            NewParagraph::Text(_) => None,
            NewParagraph::Container(e)
            | NewParagraph::List(e)
            | NewParagraph::Table(e)
            | NewParagraph::UiElement(e)
            | NewParagraph::Subpage(e) => Some(e),
        }
    }

    pub fn tag(&self) -> ParagraphKindTag {
        match self {
            NewParagraph::Text(_) => ParagraphKindTag::Text,
            NewParagraph::Container(_) => ParagraphKindTag::Container,
            NewParagraph::List(_) => ParagraphKindTag::List,
            NewParagraph::Table(_) => ParagraphKindTag::Table,
            NewParagraph::UiElement(_) => ParagraphKindTag::UiElement,
            NewParagraph::Subpage(_) => ParagraphKindTag::Subpage,
        }
    }

    /// Whether an existing node already represents this paragraph.
    pub fn matches(&self, node: &ParagraphNode) -> bool {
        self.tag() == node.tag() && self.element() == node.element
    }
}

/// Create the node for `what` at `cp` under `parent`.
pub fn create_paragraph(
    ctx: &mut EngineContext,
    host: &LayoutHost,
    what: NewParagraph,
    parent: ParaId,
    cp: usize,
) -> Result<ParaId> {
    let element = what.element();
    let kind = match what {
        NewParagraph::Text(source) => ParagraphKind::Text(TextParagraph::new(source)),
        NewParagraph::Container(_) => ParagraphKind::Container(Segment::default()),
        NewParagraph::List(_) => ParagraphKind::List(Segment::default()),
        NewParagraph::Table(_) => ParagraphKind::Table(TableParagraph::default()),
        NewParagraph::UiElement(_) => ParagraphKind::UiElement(UiElementParagraph::default()),
        NewParagraph::Subpage(_) => ParagraphKind::Subpage(SubpageParagraph::default()),
    };
    let id = ctx.paragraphs.insert(ParagraphNode::new(kind, element, Some(parent), cp));
    ctx.stats.paragraphs_created += 1;
    let cch = current_cch(ctx, host, id)?;
    ctx.paragraph_mut(id)?.last_format_cch = cch;
    log::trace!("created {:?} paragraph {id:?} at {cp} ({cch} positions)", what.tag());
    Ok(id)
}

/// Create the root node for the document's root element.
pub fn create_root(ctx: &mut EngineContext, host: &LayoutHost) -> Result<ParaId> {
    let root = host.content.root_element();
    let id = ctx
        .paragraphs
        .insert(ParagraphNode::new(ParagraphKind::Container(Segment::default()), Some(root), None, 0));
    ctx.stats.paragraphs_created += 1;
    let cch = current_cch(ctx, host, id)?;
    ctx.paragraph_mut(id)?.last_format_cch = cch;
    Ok(id)
}

/// Positions the paragraph covers in the current content.
pub fn current_cch(ctx: &mut EngineContext, host: &LayoutHost, id: ParaId) -> Result<usize> {
    let node = ctx.paragraph(id)?;
    match (&node.kind, node.element) {
        (ParagraphKind::Text(t), _) if t.is_implicit() => Ok(text::ensure_composer(ctx, host, id)?.cch()),
        (_, Some(e)) => Ok(host.content.element_span(e).map(|(s, end)| end - s).unwrap_or(0)),
        (_, None) => Ok(node.last_format_cch),
    }
}

/// One past the last position of the paragraph in the current content.
pub fn paragraph_end(ctx: &mut EngineContext, host: &LayoutHost, id: ParaId) -> Result<usize> {
    let node = ctx.paragraph(id)?;
    match (&node.kind, node.element) {
        (ParagraphKind::Text(t), _) if t.is_implicit() => Ok(text::ensure_composer(ctx, host, id)?.cp_end),
        (_, Some(e)) => host
            .content
            .element_span(e)
            .map(|(_, end)| end)
            .ok_or(LayoutError::StaleHandle { kind: "element" }),
        (_, None) => Ok(node.cp_first + node.last_format_cch),
    }
}

/// Resolved style of the paragraph's element, or of the nearest ancestor
/// element for loose content.
pub fn paragraph_style(ctx: &EngineContext, host: &LayoutHost, id: ParaId) -> Result<ResolvedStyle> {
    let mut cur = Some(id);
    while let Some(c) = cur {
        let node = ctx.paragraph(c)?;
        if let Some(e) = node.element {
            return Ok(host.content.resolved_style(e));
        }
        cur = node.parent;
    }
    Ok(ResolvedStyle::default())
}

/// Direct child elements of `element`, in order.
pub fn child_elements(content: &dyn TextContainer, element: ElementId) -> Vec<ElementId> {
    let mut out = Vec::new();
    let Some((start, end)) = content.content_range(element) else {
        return out;
    };
    let mut pos = start;
    while pos < end {
        match content.pointer_context(pos, LogicalDirection::Forward) {
            PointerContext::ElementStart | PointerContext::EmbeddedElement => {
                let Some(child) = content.adjacent_element(pos, LogicalDirection::Forward) else {
                    break;
                };
                out.push(child);
                pos = content.element_span(child).map(|(_, e)| e).unwrap_or(pos + 1).max(pos + 1);
            }
            PointerContext::Text => pos += content.text_run(pos).chars().count().max(1),
            _ => pos += 1,
        }
    }
    out
}

// ── Common operations ──────────────────────────────────────────────

pub fn properties(ctx: &EngineContext, host: &LayoutHost, id: ParaId) -> Result<ParagraphProperties> {
    let node = ctx.paragraph(id)?;
    let style = paragraph_style(ctx, host, id)?;
    let tag = node.tag();
    Ok(ParagraphProperties {
        kind: tag,
        element: node.element,
        direction: style.flow_direction,
        clear: if node.element.is_some() { style.clear } else { Clear::None },
        is_float: matches!(tag, ParagraphKindTag::Figure | ParagraphKindTag::Floater),
        can_break: matches!(
            tag,
            ParagraphKindTag::Text
                | ParagraphKindTag::Container
                | ParagraphKindTag::List
                | ParagraphKindTag::Table
                | ParagraphKindTag::Subpage
        ),
        change: node.change,
    })
}

/// A fresh client for one formatted instance of the paragraph.
pub fn create_client(
    ctx: &mut EngineContext,
    id: ParaId,
    rect: LayoutRect,
    direction: FlowDirection,
    body: ClientBody,
) -> Result<ClientId> {
    let node = ctx.paragraph(id)?;
    let client = ParagraphClient::new(Some(id), node.element, node.tag(), rect, direction, body);
    Ok(ctx.clients.insert(client))
}

pub fn format_finite(
    ctx: &mut EngineContext,
    host: &LayoutHost,
    id: ParaId,
    input: FormatInput,
    scope: &TrackScope,
) -> Result<FormatOutput> {
    format(ctx, host, id, input, FormatMode::Finite, scope)
}

pub fn format_bottomless(
    ctx: &mut EngineContext,
    host: &LayoutHost,
    id: ParaId,
    input: FormatInput,
    scope: &TrackScope,
) -> Result<FormatOutput> {
    format(ctx, host, id, input, FormatMode::Bottomless, scope)
}

pub fn update_bottomless(
    ctx: &mut EngineContext,
    host: &LayoutHost,
    id: ParaId,
    input: FormatInput,
    scope: &TrackScope,
) -> Result<FormatOutput> {
    format(ctx, host, id, input, FormatMode::UpdateBottomless, scope)
}

/// Format one paragraph and normalize the result: no height and no box
/// without progress, used height at least the bounding box, chunk flags on
/// the client.
pub fn format(
    ctx: &mut EngineContext,
    host: &LayoutHost,
    id: ParaId,
    mut input: FormatInput,
    mode: FormatMode,
    scope: &TrackScope,
) -> Result<FormatOutput> {
    if input.break_record.is_some() && input.mcs.is_some() {
        // Only the start of a chain collapses top margins.
        input.mcs = None;
    }
    let rect = input.rect;
    let first_chunk = input.break_record.is_none();
    let (tag, change, prev_rect) = {
        let node = ctx.paragraph(id)?;
        (node.tag(), node.change, node.last_rect)
    };

    let mut out = match tag {
        ParagraphKindTag::Text => text::format_text(ctx, host, id, input, mode, scope)?,
        ParagraphKindTag::Container | ParagraphKindTag::List => {
            container::format_container(ctx, host, id, input, mode, scope)?
        }
        ParagraphKindTag::Table => table::format_table(ctx, host, id, input, mode, scope)?,
        ParagraphKindTag::UiElement => block::format_ui_element(ctx, host, id, input, mode)?,
        ParagraphKindTag::Subpage => block::format_subpage(ctx, host, id, input, mode, scope)?,
        ParagraphKindTag::Figure | ParagraphKindTag::Floater => {
            return Err(LayoutError::invariant("floating paragraphs are placed, not formatted in flow"));
        }
    };

    if !out.status.made_progress() {
        if let Some(client) = out.client.take() {
            client::dispose(ctx, client)?;
        }
        out.used_height = 0;
        out.bbox = None;
        out.mcs = None;
    } else {
        match (out.status, out.break_record.is_some()) {
            (FormatStatus::Continued, false) => {
                return Err(LayoutError::invariant("continued paragraph produced no break record"));
            }
            (FormatStatus::Complete, true) => {
                return Err(LayoutError::invariant("complete paragraph produced a break record"));
            }
            _ => {}
        }
        if let Some(bbox) = out.bbox {
            out.used_height = out.used_height.max(bbox.v_end() - rect.v);
        }
        if out.status == FormatStatus::Continued {
            out.mcs = None;
        }
        if let Some(client) = out.client {
            let update = match (mode, change) {
                (FormatMode::UpdateBottomless, ChangeKind::None) => match prev_rect {
                    Some(prev) if prev.v == rect.v && prev.du == rect.du => UpdateKind::NoChange,
                    Some(_) => UpdateKind::Shifted,
                    None => UpdateKind::New,
                },
                (FormatMode::UpdateBottomless, ChangeKind::Inside) => UpdateKind::ChangeInside,
                _ => UpdateKind::New,
            };
            let c = ctx.client_mut(client)?;
            c.first_chunk = first_chunk;
            c.last_chunk = out.break_record.is_none();
            c.update = update;
        }
    }

    let cch = current_cch(ctx, host, id)?;
    let node = ctx.paragraph_mut(id)?;
    node.last_rect = Some(rect);
    node.last_format_cch = cch;
    ctx.stats.paragraphs_formatted += 1;
    Ok(out)
}

// ── Lifecycle ──────────────────────────────────────────────────────

/// The paragraphs a node owns: its segment chain, table cells and
/// anchored floats.
pub fn owned_children(ctx: &EngineContext, id: ParaId) -> Vec<ParaId> {
    let Some(node) = ctx.paragraphs.get(id) else {
        return Vec::new();
    };
    match &node.kind {
        ParagraphKind::Text(t) => t.anchored.iter().map(|(_, p)| *p).collect(),
        ParagraphKind::Table(t) => t.cells.values().copied().collect(),
        kind => kind.segment().map(|s| chain(ctx, s.first_child)).unwrap_or_default(),
    }
}

/// A segment's children starting at `first`, in order.
pub fn chain(ctx: &EngineContext, first: Option<ParaId>) -> Vec<ParaId> {
    let mut out = Vec::new();
    let mut cur = first;
    while let Some(c) = cur {
        if out.len() > ctx.paragraphs.len() {
            log::warn!("paragraph chain cycle at {c:?}");
            break;
        }
        out.push(c);
        cur = ctx.paragraphs.get(c).and_then(|n| n.next);
    }
    out
}

/// Recursively forget incremental-update bookkeeping.
pub fn clear_update_info(ctx: &mut EngineContext, id: ParaId) -> Result<()> {
    for child in owned_children(ctx, id) {
        clear_update_info(ctx, child)?;
    }
    let node = ctx.paragraph_mut(id)?;
    node.change = ChangeKind::None;
    match &mut node.kind {
        ParagraphKind::Text(t) => t.pending_dirty = None,
        kind => {
            if let Some(seg) = kind.segment_mut() {
                seg.update = None;
                seg.full_recalc = false;
            }
        }
    }
    Ok(())
}

/// Dispose every child starting at or after `from`, and invalidate the one
/// containing it. Returns whether this node itself is now invalid.
pub fn invalidate_structure(ctx: &mut EngineContext, id: ParaId, from: usize) -> Result<bool> {
    let (start, end, tag) = {
        let node = ctx.paragraph(id)?;
        (node.cp_first, node.cp_first + node.last_format_cch, node.tag())
    };
    match tag {
        ParagraphKindTag::Text => {
            if from <= end {
                text::drop_caches(ctx, id)?;
                for float in owned_children(ctx, id) {
                    dispose(ctx, float)?;
                }
                ctx.paragraph_mut(id)?.text_mut()?.anchored.clear();
            }
            Ok(start >= from)
        }
        ParagraphKindTag::Table | ParagraphKindTag::UiElement => {
            if from < end {
                for cell in owned_children(ctx, id) {
                    dispose(ctx, cell)?;
                }
                if let ParagraphKind::Table(t) = &mut ctx.paragraph_mut(id)?.kind {
                    t.cells.clear();
                }
            }
            Ok(start >= from)
        }
        _ => {
            let children = owned_children(ctx, id);
            let mut disposing = false;
            for child in children {
                if disposing {
                    dispose(ctx, child)?;
                    continue;
                }
                let (c_start, c_end) = {
                    let c = ctx.paragraph(child)?;
                    (c.cp_first, c.cp_first + c.last_format_cch)
                };
                if c_start >= from {
                    disposing = true;
                    dispose(ctx, child)?;
                } else if from <= c_end && invalidate_structure(ctx, child, from)? {
                    disposing = true;
                    dispose(ctx, child)?;
                }
            }
            let seg = ctx.paragraph_mut(id)?.segment_mut()?;
            seg.update = None;
            Ok(start >= from || seg.first_child.is_none())
        }
    }
}

/// Drop cached measurement, keeping the structure.
pub fn invalidate_format_cache(ctx: &mut EngineContext, id: ParaId) -> Result<()> {
    for child in owned_children(ctx, id) {
        invalidate_format_cache(ctx, child)?;
    }
    if ctx.paragraph(id)?.tag() == ParagraphKindTag::Text {
        text::drop_caches(ctx, id)?;
    }
    if let Some(element) = ctx.paragraph(id)?.element {
        ctx.objects.remove(&element);
    }
    ctx.paragraph_mut(id)?.last_rect = None;
    Ok(())
}

/// Dispose a paragraph and everything it owns, children first. Disposing
/// an already disposed paragraph does nothing.
pub fn dispose(ctx: &mut EngineContext, id: ParaId) -> Result<()> {
    if !ctx.paragraphs.contains(id) {
        return Ok(());
    }
    for child in owned_children(ctx, id) {
        dispose(ctx, child)?;
    }
    unlink(ctx, id)?;
    ctx.paragraphs.remove(id);
    ctx.stats.paragraphs_disposed += 1;
    Ok(())
}

/// Take a paragraph out of its segment chain, patching its neighbours and
/// any update record that points at it.
pub fn unlink(ctx: &mut EngineContext, id: ParaId) -> Result<()> {
    let (prev, next, parent) = {
        let node = ctx.paragraph(id)?;
        (node.prev, node.next, node.parent)
    };
    if let Some(p) = prev.and_then(|p| ctx.paragraphs.get_mut(p)) {
        p.next = next;
    }
    if let Some(n) = next.and_then(|n| ctx.paragraphs.get_mut(n)) {
        n.prev = prev;
    }
    if let Some(seg) = parent
        .and_then(|p| ctx.paragraphs.get_mut(p))
        .and_then(|p| p.kind.segment_mut())
    {
        if seg.first_child == Some(id) {
            seg.first_child = next;
        }
        let mut record = seg.update.as_deref_mut();
        while let Some(r) = record {
            if r.first == Some(id) {
                r.first = None;
                r.in_processing = true;
            }
            if r.sync == Some(id) {
                r.sync = next;
            }
            record = r.next.as_deref_mut();
        }
    }
    let node = ctx.paragraph_mut(id)?;
    node.prev = None;
    node.next = None;
    Ok(())
}
