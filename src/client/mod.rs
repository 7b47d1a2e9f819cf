//! # Paragraph Clients
//!
//! A [`ParagraphClient`] is one formatted instance of a paragraph: the
//! rectangle it was given, its lines or child clients, and the chunk flags
//! of the format call that produced it. Nodes are long-lived and cached;
//! clients are created fresh by every format call and disposed with the
//! page that owns them.
//!
//! Rectangles stored on a client are in the logical frame of the page or
//! subpage that formatted it. [`arrange`] walks the tree once with an
//! [`ArrangeFrame`] and records the physical rectangle of every client;
//! hit testing and reporting work on the arranged result.

pub mod visual;

use serde::Serialize;

use crate::content::{ElementId, TextContainer};
use crate::engine::{EngineContext, Handle, LayoutHost};
use crate::error::{LayoutError, Result};
use crate::geometry::{FlowDirection, FlowTransform, LayoutPoint, LayoutRect, LayoutUnit, MbpInfo, Thickness};
use crate::page::context::{FormatFrame, PageContextId};
use crate::paragraph::{ParaId, ParagraphKindTag};
use crate::style::Color;
use crate::text::{GlyphRun, Line};

pub type ClientId = Handle<ParagraphClient>;

/// How a client relates to the one the previous pass produced for the same
/// paragraph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum UpdateKind {
    /// Take the parent's kind.
    Inherited,
    #[default]
    New,
    NoChange,
    /// Same content, different position.
    Shifted,
    ChangeInside,
}

/// A formatted line and the line box it was placed in.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacedLine {
    pub rect: LayoutRect,
    pub line: Line,
}

#[derive(Debug, Clone, Default)]
pub struct TextBody {
    pub lines: Vec<PlacedLine>,
    /// Floats anchored on these lines and placed with them.
    pub floats: Vec<ClientId>,
}

/// Marker glyphs of a list item, in the indent its list reserved.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMarker {
    pub text: String,
    pub rect: LayoutRect,
    pub baseline: LayoutUnit,
    pub font_size: f64,
}

#[derive(Debug, Clone)]
pub struct TableRowLayout {
    pub rect: LayoutRect,
    pub cells: Vec<ClientId>,
}

/// One column of a page or subpage.
#[derive(Debug, Clone)]
pub struct TrackLayout {
    pub rect: LayoutRect,
    pub clients: Vec<ClientId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnRule {
    pub width: LayoutUnit,
    pub color: Color,
}

/// Content of a nested page: a multi-column section, a figure or a
/// floater. Its tracks are laid out from a local origin.
#[derive(Debug, Clone)]
pub struct SubpageLayout {
    pub page_context: PageContextId,
    pub size: (LayoutUnit, LayoutUnit),
    pub direction: FlowDirection,
    pub tracks: Vec<TrackLayout>,
    /// Floats placed at a track top after being deferred.
    pub floats: Vec<ClientId>,
    pub rule: Option<ColumnRule>,
}

impl SubpageLayout {
    pub fn clients(&self) -> impl Iterator<Item = ClientId> + '_ {
        self.tracks
            .iter()
            .flat_map(|t| t.clients.iter().copied())
            .chain(self.floats.iter().copied())
    }
}

#[derive(Debug, Clone)]
pub enum ClientBody {
    Empty,
    Text(TextBody),
    Container {
        children: Vec<ClientId>,
        marker: Option<ListMarker>,
    },
    Table {
        rows: Vec<TableRowLayout>,
    },
    UiElement {
        size: (LayoutUnit, LayoutUnit),
    },
    Subpage(SubpageLayout),
}

impl ClientBody {
    /// Clients this body owns.
    pub fn children(&self) -> Vec<ClientId> {
        match self {
            ClientBody::Empty | ClientBody::UiElement { .. } => Vec::new(),
            ClientBody::Text(t) => t.floats.clone(),
            ClientBody::Container { children, .. } => children.clone(),
            ClientBody::Table { rows } => rows.iter().flat_map(|r| r.cells.iter().copied()).collect(),
            ClientBody::Subpage(s) => s.clients().collect(),
        }
    }
}

/// The frame a client was arranged in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrangeFrame {
    pub transform: FlowTransform,
    pub direction: FlowDirection,
}

impl ArrangeFrame {
    pub fn new(transform: FlowTransform, direction: FlowDirection) -> Self {
        Self { transform, direction }
    }

    /// Frame of a nested page whose content box is `content` in this frame.
    pub fn nested(&self, content: &LayoutRect, direction: FlowDirection) -> ArrangeFrame {
        ArrangeFrame {
            transform: self.transform.nested(content, direction != self.direction),
            direction,
        }
    }
}

/// Physical placement recorded by [`arrange`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Arranged {
    /// Border box on the page.
    pub rect: LayoutRect,
    pub frame: ArrangeFrame,
    /// Frame of the nested content, for subpage bodies.
    pub content_frame: Option<ArrangeFrame>,
}

#[derive(Debug)]
pub struct ParagraphClient {
    pub paragraph: Option<ParaId>,
    pub element: Option<ElementId>,
    pub kind: ParagraphKindTag,
    /// Border box in the formatting frame.
    pub rect: LayoutRect,
    pub content_rect: LayoutRect,
    pub mbp: MbpInfo,
    /// The paragraph's own direction.
    pub direction: FlowDirection,
    pub first_chunk: bool,
    pub last_chunk: bool,
    /// Positions covered by this chunk's lines.
    pub cp_range: (usize, usize),
    pub update: UpdateKind,
    pub body: ClientBody,
    /// Page context a floating client is registered in.
    pub page_context: Option<PageContextId>,
    pub arranged: Option<Arranged>,
}

impl ParagraphClient {
    pub fn new(
        paragraph: Option<ParaId>,
        element: Option<ElementId>,
        kind: ParagraphKindTag,
        rect: LayoutRect,
        direction: FlowDirection,
        body: ClientBody,
    ) -> Self {
        Self {
            paragraph,
            element,
            kind,
            rect,
            content_rect: rect,
            mbp: MbpInfo::empty(),
            direction,
            first_chunk: true,
            last_chunk: true,
            cp_range: (0, 0),
            update: UpdateKind::New,
            body,
            page_context: None,
            arranged: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Self::new(
            None,
            None,
            ParagraphKindTag::Text,
            LayoutRect::default(),
            FlowDirection::LeftToRight,
            ClientBody::Empty,
        )
    }
}

/// Dispose a client and everything it owns. Floating clients leave their
/// page context's registry; subpage bodies release their page context.
pub fn dispose(ctx: &mut EngineContext, id: ClientId) -> Result<()> {
    let Some(client) = ctx.clients.remove(id) else {
        return Ok(());
    };
    if let Some(pc) = client.page_context.and_then(|pc| ctx.page_contexts.get_mut(pc)) {
        pc.remove_floating(id);
    }
    for child in client.body.children() {
        dispose(ctx, child)?;
    }
    if let ClientBody::Subpage(s) = &client.body {
        ctx.page_contexts.remove(s.page_context);
    }
    Ok(())
}

// ── Arrange ────────────────────────────────────────────────────────

/// Resolve the physical rectangle of `id` and everything below it.
///
/// Children of containers, tables and text floats share the frame of the
/// client; subpage content gets a nested frame, mirrored when its direction
/// differs, with a format context pushed around it.
pub fn arrange(ctx: &mut EngineContext, id: ClientId, frame: ArrangeFrame) -> Result<()> {
    let (rect, content_rect, body_kind) = {
        let c = ctx.client(id)?;
        (c.rect, c.content_rect, subpage_info(&c.body))
    };
    let children = ctx.client(id)?.body.children();

    match body_kind {
        Some((direction, size)) => {
            let inner = frame.nested(&content_rect, direction);
            ctx.client_mut(id)?.arranged = Some(Arranged {
                rect: frame.transform.apply(&rect),
                frame,
                content_frame: Some(inner),
            });
            let nested = FormatFrame {
                page_size: size,
                page_margin: Thickness::default(),
                incremental_update: false,
                finite_page: false,
            };
            ctx.with_format_context(nested, |ctx| {
                for child in children {
                    arrange(ctx, child, inner)?;
                }
                Ok(())
            })
        }
        None => {
            ctx.client_mut(id)?.arranged = Some(Arranged {
                rect: frame.transform.apply(&rect),
                frame,
                content_frame: None,
            });
            for child in children {
                arrange(ctx, child, frame)?;
            }
            Ok(())
        }
    }
}

fn subpage_info(body: &ClientBody) -> Option<(FlowDirection, (LayoutUnit, LayoutUnit))> {
    match body {
        ClientBody::Subpage(s) => Some((s.direction, s.size)),
        _ => None,
    }
}

pub(crate) fn arranged(client: &ParagraphClient) -> Result<Arranged> {
    client
        .arranged
        .ok_or_else(|| LayoutError::invariant("client used before it was arranged"))
}

/// Frame the items of a placed line are positioned in.
pub fn line_frame(client: &ParagraphClient, frame: &ArrangeFrame, line: &PlacedLine) -> FlowTransform {
    frame.transform.nested(&line.rect, client.direction != frame.direction)
}

// ── Hit testing ────────────────────────────────────────────────────

/// The element under `point` (physical page coordinates).
///
/// Floats registered in a subpage's page context are tested before its
/// flow. When nothing inside is hit the client's own element is returned,
/// provided its rectangle contains the point.
pub fn input_hit_test(ctx: &EngineContext, id: ClientId, point: LayoutPoint) -> Result<Option<ElementId>> {
    let client = ctx.client(id)?;
    let arr = arranged(client)?;

    let hit = match &client.body {
        ClientBody::Text(t) => {
            let mut found = None;
            for placed in &t.lines {
                if !arr.frame.transform.apply(&placed.rect).contains(point) {
                    continue;
                }
                let frame = line_frame(client, &arr.frame, placed);
                found = placed
                    .line
                    .inline_objects()
                    .into_iter()
                    .find(|(_, r)| frame.apply(r).contains(point))
                    .map(|(e, _)| e);
                break;
            }
            found
        }
        ClientBody::Container { children, .. } => first_hit(ctx, children.iter().copied(), point)?,
        ClientBody::Table { rows } => first_hit(ctx, rows.iter().flat_map(|r| r.cells.iter().copied()), point)?,
        ClientBody::Subpage(s) => {
            let floats = ctx
                .page_context(s.page_context)
                .map(|pc| pc.floating().to_vec())
                .unwrap_or_default();
            match first_hit(ctx, floats.into_iter(), point)? {
                Some(e) => Some(e),
                None => first_hit(ctx, s.clients(), point)?,
            }
        }
        ClientBody::Empty | ClientBody::UiElement { .. } => None,
    };

    Ok(hit.or_else(|| {
        if arr.rect.contains(point) {
            client.element
        } else {
            None
        }
    }))
}

pub fn first_hit(
    ctx: &EngineContext,
    clients: impl Iterator<Item = ClientId>,
    point: LayoutPoint,
) -> Result<Option<ElementId>> {
    for c in clients {
        if let Some(e) = input_hit_test(ctx, c, point)? {
            return Ok(Some(e));
        }
    }
    Ok(None)
}

/// The content position closest to `point`, searching lines whose block
/// range contains it.
pub fn text_position_from_point(ctx: &EngineContext, id: ClientId, point: LayoutPoint) -> Result<Option<usize>> {
    let client = ctx.client(id)?;
    let arr = arranged(client)?;
    match &client.body {
        ClientBody::Text(t) => {
            for placed in &t.lines {
                let physical = arr.frame.transform.apply(&placed.rect);
                if point.v < physical.v || point.v >= physical.v_end() {
                    continue;
                }
                let local = line_frame(client, &arr.frame, placed).inverse_point(point);
                return Ok(Some(placed.line.cp_from_distance(local.u)));
            }
            Ok(None)
        }
        ClientBody::Empty | ClientBody::UiElement { .. } => Ok(None),
        body => {
            for child in body.children() {
                let contains_v = ctx
                    .client(child)?
                    .arranged
                    .map(|a| point.v >= a.rect.v && point.v < a.rect.v_end())
                    .unwrap_or(false);
                if contains_v {
                    if let Some(cp) = text_position_from_point(ctx, child, point)? {
                        return Ok(Some(cp));
                    }
                }
            }
            Ok(None)
        }
    }
}

// ── Reporting ──────────────────────────────────────────────────────

/// Positions this client covers. The element's own start and end edges are
/// folded in only when this client holds the element's first and last
/// chunk.
pub fn text_content_range(ctx: &EngineContext, host: &LayoutHost, id: ClientId) -> Result<Option<(usize, usize)>> {
    let client = ctx.client(id)?;
    let inner = match &client.body {
        ClientBody::Text(t) => match (t.lines.first(), t.lines.last()) {
            (Some(first), Some(last)) => Some((first.line.cp_start, last.line.cp_end())),
            _ => None,
        },
        ClientBody::Empty | ClientBody::UiElement { .. } => None,
        body => {
            let mut range: Option<(usize, usize)> = None;
            for child in body.children() {
                if ctx.client(child)?.page_context.is_some() {
                    continue;
                }
                if let Some((s, e)) = text_content_range(ctx, host, child)? {
                    range = Some(match range {
                        Some((rs, re)) => (rs.min(s), re.max(e)),
                        None => (s, e),
                    });
                }
            }
            range
        }
    };
    Ok(fold_edges(client, host.content, inner))
}

fn fold_edges(client: &ParagraphClient, content: &dyn TextContainer, inner: Option<(usize, usize)>) -> Option<(usize, usize)> {
    let span = client.element.and_then(|e| content.element_span(e));
    match (inner, span) {
        (None, Some(span)) if client.first_chunk && client.last_chunk => Some(span),
        (None, _) => None,
        (Some((s, e)), Some((es, ee))) => {
            let s = if client.first_chunk { es.min(s) } else { s };
            let e = if client.last_chunk { ee.max(e) } else { e };
            Some((s, e))
        }
        (Some(r), None) => Some(r),
    }
}

/// Report of one arranged line.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineResult {
    pub cp_start: usize,
    pub length: usize,
    pub rect: LayoutRect,
    pub baseline: LayoutUnit,
    pub width: LayoutUnit,
    pub ellipsis: bool,
    pub mirrored: bool,
    pub runs: Vec<GlyphRun>,
}

/// Report of one arranged client and everything below it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParagraphResult {
    pub kind: ParagraphKindTag,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element: Option<ElementId>,
    pub rect: LayoutRect,
    pub first_chunk: bool,
    pub last_chunk: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_range: Option<(usize, usize)>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub lines: Vec<LineResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marker: Option<ListMarker>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ParagraphResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub floats: Vec<ParagraphResult>,
}

pub fn paragraph_results(ctx: &EngineContext, host: &LayoutHost, id: ClientId) -> Result<ParagraphResult> {
    let client = ctx.client(id)?;
    let arr = arranged(client)?;
    let mut lines = Vec::new();
    let mut children = Vec::new();
    let mut floats = Vec::new();
    let mut marker = None;

    match &client.body {
        ClientBody::Text(t) => {
            for placed in &t.lines {
                let frame = line_frame(client, &arr.frame, placed);
                lines.push(LineResult {
                    cp_start: placed.line.cp_start,
                    length: placed.line.length,
                    rect: arr.frame.transform.apply(&placed.rect),
                    baseline: placed.line.baseline,
                    width: placed.line.width,
                    ellipsis: placed.line.shows_ellipsis(),
                    mirrored: frame.mirrored,
                    runs: placed.line.glyph_runs(),
                });
            }
            for f in &t.floats {
                floats.push(paragraph_results(ctx, host, *f)?);
            }
        }
        ClientBody::Container { children: kids, marker: m } => {
            marker = m.clone().map(|mut m| {
                m.rect = arr.frame.transform.apply(&m.rect);
                m
            });
            for c in kids {
                children.push(paragraph_results(ctx, host, *c)?);
            }
        }
        ClientBody::Table { rows } => {
            for cell in rows.iter().flat_map(|r| r.cells.iter()) {
                children.push(paragraph_results(ctx, host, *cell)?);
            }
        }
        ClientBody::Subpage(s) => {
            for c in s.tracks.iter().flat_map(|t| t.clients.iter()) {
                children.push(paragraph_results(ctx, host, *c)?);
            }
            for f in &s.floats {
                floats.push(paragraph_results(ctx, host, *f)?);
            }
        }
        ClientBody::Empty | ClientBody::UiElement { .. } => {}
    }

    Ok(ParagraphResult {
        kind: client.kind,
        element: client.element,
        rect: arr.rect,
        first_chunk: client.first_chunk,
        last_chunk: client.last_chunk,
        content_range: text_content_range(ctx, host, id)?,
        lines,
        marker,
        children,
        floats,
    })
}
