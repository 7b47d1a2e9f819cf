//! # Visuals
//!
//! The retained, render-ready form of an arranged client tree. A
//! [`Visual`] holds what a renderer draws for one client (background,
//! border, glyph runs, markers, column rules) at an offset from its
//! parent, so a client that only moved is updated by rewriting one
//! offset.
//!
//! [`validate_visual`] reconciles the previous pass's visuals with the
//! clients of this pass, driven by each client's [`UpdateKind`].

use std::collections::HashMap;

use serde::Serialize;

use super::{arranged, line_frame, ClientBody, ClientId, ListMarker, ParagraphClient, UpdateKind};
use crate::content::ElementId;
use crate::engine::EngineContext;
use crate::error::Result;
use crate::geometry::{LayoutPoint, LayoutRect, LayoutUnit, Thickness};
use crate::paragraph::{ParaId, ParagraphKindTag};
use crate::style::Color;
use crate::text::GlyphRun;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineVisual {
    /// Line box relative to the owning visual.
    pub rect: LayoutRect,
    pub baseline: LayoutUnit,
    pub mirrored: bool,
    pub runs: Vec<GlyphRun>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BorderVisual {
    pub thickness: Thickness,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<Color>,
}

/// What a visual draws besides its children.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum VisualContent {
    Empty,
    Text { lines: Vec<LineVisual> },
    Container {
        #[serde(skip_serializing_if = "Option::is_none")]
        marker: Option<ListMarker>,
    },
    Object { size: (LayoutUnit, LayoutUnit) },
    /// Nested page with one track.
    Simple,
    /// Nested page with several tracks and the rules between them.
    Complex { rules: Vec<LayoutRect>, rule_color: Color },
}

impl VisualContent {
    fn shape(&self) -> Shape {
        match self {
            VisualContent::Simple => Shape::Simple,
            VisualContent::Complex { .. } => Shape::Complex,
            _ => Shape::Flat,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Flat,
    Simple,
    Complex,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Visual {
    #[serde(skip)]
    pub paragraph: Option<ParaId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element: Option<ElementId>,
    pub kind: ParagraphKindTag,
    /// Origin relative to the parent visual.
    pub offset: LayoutPoint,
    pub size: (LayoutUnit, LayoutUnit),
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background: Option<Color>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub border: Option<BorderVisual>,
    pub content: VisualContent,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Visual>,
}

/// Counters of one validation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualStats {
    pub created: usize,
    pub reused: usize,
    pub shifted: usize,
    /// Clients outside the viewport, left without a visual.
    pub skipped: usize,
    /// Nested pages whose single/multi-track structure flipped.
    pub morphed: usize,
}

/// The previous pass's visuals of one parent, looked up by paragraph.
#[derive(Debug, Default)]
pub struct VisualCache {
    by_paragraph: HashMap<ParaId, Vec<Visual>>,
}

impl VisualCache {
    pub fn new(visuals: Vec<Visual>) -> Self {
        let mut by_paragraph: HashMap<ParaId, Vec<Visual>> = HashMap::new();
        for v in visuals.into_iter().rev() {
            if let Some(p) = v.paragraph {
                by_paragraph.entry(p).or_default().push(v);
            }
        }
        Self { by_paragraph }
    }

    /// The next unclaimed old visual of `paragraph`, in tree order.
    pub fn take(&mut self, paragraph: Option<ParaId>) -> Option<Visual> {
        self.by_paragraph.get_mut(&paragraph?)?.pop()
    }
}

/// Reconcile the visual of client `id` with `old`, the visual its
/// paragraph had in the previous pass.
///
/// `New` rebuilds the subtree; `NoChange` keeps `old` untouched;
/// `Shifted` keeps it at a new offset; `ChangeInside` rebuilds this
/// level and reconciles each child against its own previous visual.
/// `Inherited` takes the parent's kind. Clients whose arranged rectangle
/// misses `viewport` get no visual.
pub fn validate_visual(
    ctx: &EngineContext,
    id: ClientId,
    origin: LayoutPoint,
    inherited: UpdateKind,
    old: Option<Visual>,
    viewport: Option<&LayoutRect>,
    stats: &mut VisualStats,
) -> Result<Option<Visual>> {
    let client = ctx.client(id)?;
    let arr = arranged(client)?;
    if let Some(view) = viewport {
        if !view.intersects(&arr.rect) {
            stats.skipped += 1;
            return Ok(None);
        }
    }
    let offset = LayoutPoint::new(arr.rect.u - origin.u, arr.rect.v - origin.v);
    let mut kind = match (inherited, client.update) {
        (UpdateKind::New, _) => UpdateKind::New,
        (parent, UpdateKind::Inherited) => parent,
        (_, own) => own,
    };
    let old = old.filter(|o| o.paragraph == client.paragraph && o.kind == client.kind);
    if old.is_none() {
        kind = UpdateKind::New;
    }

    let content = build_content(client)?;
    if let Some(o) = &old {
        if o.content.shape() != content.shape() {
            log::trace!("visual of {id:?} morphs {:?} -> {:?}", o.content.shape(), content.shape());
            stats.morphed += 1;
            kind = UpdateKind::New;
        }
    }

    match (kind, old) {
        (UpdateKind::NoChange, Some(o)) if o.offset == offset => {
            stats.reused += 1;
            Ok(Some(o))
        }
        (UpdateKind::NoChange | UpdateKind::Shifted, Some(mut o)) => {
            stats.shifted += 1;
            o.offset = offset;
            Ok(Some(o))
        }
        (kind, old) => {
            let child_kind = if kind == UpdateKind::New { UpdateKind::New } else { UpdateKind::ChangeInside };
            let mut cache = VisualCache::new(old.map(|o| o.children).unwrap_or_default());
            let here = LayoutPoint::new(arr.rect.u, arr.rect.v);
            let mut children = Vec::new();
            for child in client.body.children() {
                let paragraph = ctx.client(child)?.paragraph;
                let previous = if child_kind == UpdateKind::New { None } else { cache.take(paragraph) };
                if let Some(v) = validate_visual(ctx, child, here, child_kind, previous, viewport, stats)? {
                    children.push(v);
                }
            }
            stats.created += 1;
            Ok(Some(Visual {
                paragraph: client.paragraph,
                element: client.element,
                kind: client.kind,
                offset,
                size: (arr.rect.du, arr.rect.dv),
                background: client.mbp.background,
                border: border_of(client, arr.frame.transform.mirrored),
                content,
                children,
            }))
        }
    }
}

fn border_of(client: &ParagraphClient, mirrored: bool) -> Option<BorderVisual> {
    let mut thickness = client.mbp.border;
    if thickness.is_zero() {
        return None;
    }
    if mirrored {
        thickness.mirror();
    }
    Some(BorderVisual { thickness, color: client.mbp.border_color })
}

fn relative(rect: LayoutRect, origin: &LayoutRect) -> LayoutRect {
    LayoutRect::new(rect.u - origin.u, rect.v - origin.v, rect.du, rect.dv)
}

fn build_content(client: &ParagraphClient) -> Result<VisualContent> {
    let arr = arranged(client)?;
    Ok(match &client.body {
        ClientBody::Empty => VisualContent::Empty,
        ClientBody::Text(t) => VisualContent::Text {
            lines: t
                .lines
                .iter()
                .map(|placed| LineVisual {
                    rect: relative(arr.frame.transform.apply(&placed.rect), &arr.rect),
                    baseline: placed.line.baseline,
                    mirrored: line_frame(client, &arr.frame, placed).mirrored,
                    runs: placed.line.glyph_runs(),
                })
                .collect(),
        },
        ClientBody::Container { marker, .. } => VisualContent::Container {
            marker: marker.clone().map(|mut m| {
                m.rect = relative(arr.frame.transform.apply(&m.rect), &arr.rect);
                m
            }),
        },
        ClientBody::Table { .. } => VisualContent::Empty,
        ClientBody::UiElement { size } => VisualContent::Object { size: *size },
        ClientBody::Subpage(s) if s.tracks.len() <= 1 => VisualContent::Simple,
        ClientBody::Subpage(s) => {
            let frame = arr.content_frame.unwrap_or(arr.frame);
            let height = s.tracks.iter().map(|t| t.rect.dv).max().unwrap_or(0);
            let (rules, rule_color) = match s.rule {
                Some(rule) => {
                    let rects = s
                        .tracks
                        .windows(2)
                        .map(|pair| {
                            let middle = (pair[0].rect.u_end() + pair[1].rect.u) / 2;
                            let local = LayoutRect::new(middle - rule.width / 2, 0, rule.width, height);
                            relative(frame.transform.apply(&local), &arr.rect)
                        })
                        .collect();
                    (rects, rule.color)
                }
                None => (Vec::new(), Color::TRANSPARENT),
            };
            VisualContent::Complex { rules, rule_color }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{arrange, ArrangeFrame, PlacedLine, TextBody};
    use crate::geometry::{FlowDirection, FlowTransform};

    fn frame() -> ArrangeFrame {
        ArrangeFrame::new(FlowTransform::identity(1000), FlowDirection::LeftToRight)
    }

    fn container(ctx: &mut EngineContext, children: Vec<ClientId>, rect: LayoutRect) -> ClientId {
        let mut c = ParagraphClient::detached();
        c.kind = ParagraphKindTag::Container;
        c.rect = rect;
        c.body = ClientBody::Container { children, marker: None };
        ctx.clients.insert(c)
    }

    fn leaf(ctx: &mut EngineContext, paragraph: ParaId, rect: LayoutRect, update: UpdateKind) -> ClientId {
        let mut c = ParagraphClient::detached();
        c.paragraph = Some(paragraph);
        c.rect = rect;
        c.update = update;
        c.body = ClientBody::Text(TextBody { lines: Vec::<PlacedLine>::new(), floats: Vec::new() });
        ctx.clients.insert(c)
    }

    fn paragraphs(ctx: &mut EngineContext, n: usize) -> Vec<ParaId> {
        use crate::paragraph::{ParagraphKind, ParagraphNode};
        use crate::paragraph::container::Segment;
        (0..n)
            .map(|_| ctx.paragraphs.insert(ParagraphNode::new(ParagraphKind::Container(Segment::default()), None, None, 0)))
            .collect()
    }

    #[test]
    fn unchanged_children_are_reused_and_moved_ones_shifted() {
        let mut ctx = EngineContext::new(crate::config::LayoutConfig::default());
        let p = paragraphs(&mut ctx, 3);
        let a = leaf(&mut ctx, p[0], LayoutRect::new(0, 0, 100, 10), UpdateKind::New);
        let b = leaf(&mut ctx, p[1], LayoutRect::new(0, 10, 100, 10), UpdateKind::New);
        let root = container(&mut ctx, vec![a, b], LayoutRect::new(0, 0, 100, 20));
        arrange(&mut ctx, root, frame()).unwrap();
        let mut stats = VisualStats::default();
        let first = validate_visual(&ctx, root, LayoutPoint::default(), UpdateKind::New, None, None, &mut stats)
            .unwrap()
            .unwrap();
        assert_eq!(stats.created, 3);

        // Next pass: a new paragraph pushes `b` down; `a` is untouched.
        let a2 = leaf(&mut ctx, p[0], LayoutRect::new(0, 0, 100, 10), UpdateKind::NoChange);
        let n = leaf(&mut ctx, p[2], LayoutRect::new(0, 10, 100, 10), UpdateKind::New);
        let b2 = leaf(&mut ctx, p[1], LayoutRect::new(0, 20, 100, 10), UpdateKind::Shifted);
        let root2 = container(&mut ctx, vec![a2, n, b2], LayoutRect::new(0, 0, 100, 30));
        ctx.client_mut(root2).unwrap().update = UpdateKind::ChangeInside;
        arrange(&mut ctx, root2, frame()).unwrap();
        let mut stats = VisualStats::default();
        let second = validate_visual(&ctx, root2, LayoutPoint::default(), UpdateKind::Inherited, Some(first), None, &mut stats)
            .unwrap()
            .unwrap();
        // The root has no paragraph, so it is rebuilt; `a` is reused as is.
        assert_eq!(stats.reused, 1);
        assert_eq!(stats.shifted, 1);
        assert_eq!(second.children.len(), 3);
        assert_eq!(second.children[2].offset, LayoutPoint::new(0, 20));
    }

    #[test]
    fn viewport_skips_clients_outside_it() {
        let mut ctx = EngineContext::new(crate::config::LayoutConfig::default());
        let p = paragraphs(&mut ctx, 2);
        let a = leaf(&mut ctx, p[0], LayoutRect::new(0, 0, 100, 10), UpdateKind::New);
        let b = leaf(&mut ctx, p[1], LayoutRect::new(0, 500, 100, 10), UpdateKind::New);
        let root = container(&mut ctx, vec![a, b], LayoutRect::new(0, 0, 100, 510));
        arrange(&mut ctx, root, frame()).unwrap();
        let mut stats = VisualStats::default();
        let view = LayoutRect::new(0, 0, 100, 100);
        let v = validate_visual(&ctx, root, LayoutPoint::default(), UpdateKind::New, None, Some(&view), &mut stats)
            .unwrap()
            .unwrap();
        assert_eq!(v.children.len(), 1);
        assert_eq!(stats.skipped, 1);
    }
}
