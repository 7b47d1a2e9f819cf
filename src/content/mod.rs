//! # Content Model
//!
//! The layout core never walks an element tree directly. It sees content as
//! a flat position space: every character, element start, element end and
//! embedded object occupies exactly one position. [`TextContainer`] is the
//! collaborator interface over that space; [`FlowDocument`] is the in-memory
//! implementation the crate ships with.
//!
//! ```text
//!   <Section><Paragraph>Hi</Paragraph></Section>
//!   0        1          2 3 4          5
//!   Start(0) Start(1)   H i End(1)     End(0)
//! ```
//!
//! Documents load from JSON: a root `style` and a list of `blocks`, each a
//! tagged `DocNode`.

use serde::{Deserialize, Serialize};

use crate::error::{LayoutError, Result};
use crate::page::dirty::DirtyTextRange;
use crate::style::{ResolvedStyle, Style};

/// Identifier of one element in a content store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ElementId(pub u32);

/// Element categories the layout core distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementKind {
    Section,
    Paragraph,
    List,
    ListItem,
    Table,
    TableRow,
    TableCell,
    BlockUiContainer,
    Span,
    LineBreak,
    InlineObject,
    Figure,
    Floater,
}

impl ElementKind {
    /// Block-level elements start their own paragraph.
    pub fn is_block(self) -> bool {
        matches!(
            self,
            ElementKind::Section
                | ElementKind::Paragraph
                | ElementKind::List
                | ElementKind::ListItem
                | ElementKind::Table
                | ElementKind::TableRow
                | ElementKind::TableCell
                | ElementKind::BlockUiContainer
        )
    }

    /// Figures and floaters: anchored inline, formatted as nested pages.
    pub fn is_floating(self) -> bool {
        matches!(self, ElementKind::Figure | ElementKind::Floater)
    }

    /// Elements whose content is never text.
    fn is_leaf(self) -> bool {
        matches!(
            self,
            ElementKind::BlockUiContainer | ElementKind::LineBreak | ElementKind::InlineObject
        )
    }
}

/// What sits next to a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PointerContext {
    Text,
    ElementStart,
    ElementEnd,
    EmbeddedElement,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalDirection {
    Forward,
    Backward,
}

/// The content source the layout core reads from.
///
/// Positions run from 0 to [`TextContainer::symbol_count`]; a position sits
/// between two symbols. Context queries look at the symbol after the
/// position (`Forward`) or before it (`Backward`).
pub trait TextContainer {
    fn symbol_count(&self) -> usize;

    fn pointer_context(&self, position: usize, direction: LogicalDirection) -> PointerContext;

    /// The element whose start, end or embedded symbol is adjacent to
    /// `position` in `direction`.
    fn adjacent_element(&self, position: usize, direction: LogicalDirection) -> Option<ElementId>;

    fn offset_between(&self, a: usize, b: usize) -> isize {
        b as isize - a as isize
    }

    /// The run of characters starting at `position`, up to the next
    /// non-character symbol. Empty when `position` is not in text.
    fn text_run(&self, position: usize) -> String;

    fn element_kind(&self, element: ElementId) -> Option<ElementKind>;

    /// Positions `(start, end)` of the element: `start` is its start symbol,
    /// `end` is one past its end symbol.
    fn element_span(&self, element: ElementId) -> Option<(usize, usize)>;

    fn parent_element(&self, element: ElementId) -> Option<ElementId>;

    fn root_element(&self) -> ElementId;

    fn style(&self, element: ElementId) -> Option<&Style>;

    /// Incremented on every mutation.
    fn generation(&self) -> u64;

    /// Natural size in pixels of an embedded object or UI block.
    fn object_size(&self, element: ElementId) -> Option<(f64, f64)>;

    /// Style with inherited values filled in from the ancestors.
    fn resolved_style(&self, element: ElementId) -> ResolvedStyle {
        let parent = self.parent_element(element).map(|p| self.resolved_style(p));
        match self.style(element) {
            Some(style) => style.resolve(parent.as_ref()),
            None => parent.unwrap_or_default(),
        }
    }

    /// Positions just inside the element's start and end symbols.
    fn content_range(&self, element: ElementId) -> Option<(usize, usize)> {
        let (start, end) = self.element_span(element)?;
        if self.element_kind(element)? == ElementKind::InlineObject {
            return Some((start, start));
        }
        Some((start + 1, end - 1))
    }
}

/// Default size of embedded objects that do not set one.
pub const DEFAULT_OBJECT_SIZE: (f64, f64) = (16.0, 16.0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Symbol {
    Char(char),
    Start(ElementId),
    End(ElementId),
    Embedded(ElementId),
}

#[derive(Debug, Clone)]
struct ElementEntry {
    kind: ElementKind,
    style: Style,
    parent: Option<ElementId>,
    span: Option<(usize, usize)>,
}

/// A node of the JSON document tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DocNode {
    Text {
        text: String,
    },
    Element {
        kind: ElementKind,
        #[serde(default)]
        style: Style,
        #[serde(default)]
        children: Vec<DocNode>,
    },
}

impl DocNode {
    pub fn text(text: impl Into<String>) -> DocNode {
        DocNode::Text { text: text.into() }
    }

    pub fn element(kind: ElementKind, style: Style, children: Vec<DocNode>) -> DocNode {
        DocNode::Element { kind, style, children }
    }

    /// A `Paragraph` holding one text run.
    pub fn paragraph(text: impl Into<String>) -> DocNode {
        DocNode::element(ElementKind::Paragraph, Style::default(), vec![DocNode::text(text)])
    }

    fn symbol_len(&self) -> usize {
        match self {
            DocNode::Text { text } => text.chars().count(),
            DocNode::Element { kind: ElementKind::InlineObject, .. } => 1,
            DocNode::Element { kind, .. } if kind.is_leaf() => 2,
            DocNode::Element { children, .. } => {
                2 + children.iter().map(DocNode::symbol_len).sum::<usize>()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentJson {
    #[serde(default)]
    style: Style,
    #[serde(default)]
    blocks: Vec<DocNode>,
}

/// In-memory flow document: a symbol stream over an element table.
///
/// Every mutation records a dirty range (collected with
/// [`FlowDocument::take_changes`]) and bumps the generation.
#[derive(Debug, Clone)]
pub struct FlowDocument {
    symbols: Vec<Symbol>,
    elements: Vec<ElementEntry>,
    generation: u64,
    changes: Vec<DirtyTextRange>,
}

impl Default for FlowDocument {
    fn default() -> Self {
        Self::new(Style::default())
    }
}

impl FlowDocument {
    /// An empty document whose root section carries `style`.
    pub fn new(style: Style) -> Self {
        let root = ElementEntry {
            kind: ElementKind::Section,
            style,
            parent: None,
            span: None,
        };
        let mut doc = FlowDocument {
            symbols: vec![Symbol::Start(ElementId(0)), Symbol::End(ElementId(0))],
            elements: vec![root],
            generation: 0,
            changes: Vec::new(),
        };
        doc.reindex();
        doc
    }

    pub fn from_nodes(style: Style, blocks: Vec<DocNode>) -> Self {
        let mut doc = Self::new(style);
        let mut symbols = vec![Symbol::Start(ElementId(0))];
        for block in &blocks {
            doc.emit(block, ElementId(0), &mut symbols);
        }
        symbols.push(Symbol::End(ElementId(0)));
        doc.symbols = symbols;
        doc.reindex();
        doc
    }

    /// Parse a JSON document: `{"style": {...}, "blocks": [...]}`.
    pub fn from_json(json: &str) -> Result<Self> {
        let parsed: DocumentJson = serde_json::from_str(json)?;
        Ok(Self::from_nodes(parsed.style, parsed.blocks))
    }

    pub fn root(&self) -> ElementId {
        ElementId(0)
    }

    /// Dirty ranges recorded since the last call.
    pub fn take_changes(&mut self) -> Vec<DirtyTextRange> {
        std::mem::take(&mut self.changes)
    }

    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Elements of `kind` in document order.
    pub fn elements_of_kind(&self, kind: ElementKind) -> Vec<ElementId> {
        self.symbols
            .iter()
            .filter_map(|s| match s {
                Symbol::Start(id) | Symbol::Embedded(id) => Some(*id),
                _ => None,
            })
            .filter(|id| self.element_kind(*id) == Some(kind))
            .collect()
    }

    /// The concatenated characters of an element's content.
    pub fn plain_text(&self, element: ElementId) -> String {
        let Some((start, end)) = self.content_range(element) else {
            return String::new();
        };
        self.symbols[start..end]
            .iter()
            .filter_map(|s| match s {
                Symbol::Char(c) => Some(*c),
                _ => None,
            })
            .collect()
    }

    /// The innermost element whose content contains `position`.
    pub fn element_at(&self, position: usize) -> Option<ElementId> {
        if position == 0 || position >= self.symbols.len() {
            return None;
        }
        let mut depth = 0usize;
        for symbol in self.symbols[..position].iter().rev() {
            match symbol {
                Symbol::End(_) => depth += 1,
                Symbol::Start(id) if depth == 0 => return Some(*id),
                Symbol::Start(_) => depth -= 1,
                _ => {}
            }
        }
        None
    }

    pub fn insert_text(&mut self, position: usize, text: &str) -> Result<()> {
        self.check_insertion_point(position)?;
        let chars: Vec<Symbol> = text.chars().map(Symbol::Char).collect();
        if chars.is_empty() {
            return Ok(());
        }
        let added = chars.len();
        self.symbols.splice(position..position, chars);
        self.record(DirtyTextRange::new(position, 0, added));
        Ok(())
    }

    /// Remove `len` symbols at `position`. The range must hold whole
    /// elements only.
    pub fn remove_range(&mut self, position: usize, len: usize) -> Result<()> {
        let end = position
            .checked_add(len)
            .filter(|end| position >= 1 && *end < self.symbols.len())
            .ok_or_else(|| LayoutError::InvalidContent(format!("range {position}+{len} out of bounds")))?;
        let mut depth = 0isize;
        for symbol in &self.symbols[position..end] {
            match symbol {
                Symbol::Start(_) => depth += 1,
                Symbol::End(_) => {
                    depth -= 1;
                    if depth < 0 {
                        return Err(LayoutError::InvalidContent(
                            "removal would split an element".to_string(),
                        ));
                    }
                }
                _ => {}
            }
        }
        if depth != 0 {
            return Err(LayoutError::InvalidContent(
                "removal would split an element".to_string(),
            ));
        }
        if len == 0 {
            return Ok(());
        }
        self.symbols.drain(position..end);
        self.record(DirtyTextRange::new(position, len, 0));
        Ok(())
    }

    /// Insert an element subtree at `position` and return its id.
    pub fn insert_element(&mut self, position: usize, node: DocNode) -> Result<ElementId> {
        self.check_insertion_point(position)?;
        let DocNode::Element { .. } = &node else {
            return Err(LayoutError::InvalidContent("expected an element node".to_string()));
        };
        let parent = self
            .element_at(position)
            .ok_or_else(|| LayoutError::InvalidContent(format!("position {position} out of bounds")))?;
        let first_new = self.elements.len() as u32;
        let mut symbols = Vec::with_capacity(node.symbol_len());
        self.emit(&node, parent, &mut symbols);
        let added = symbols.len();
        self.symbols.splice(position..position, symbols);
        self.record(DirtyTextRange::new(position, 0, added));
        Ok(ElementId(first_new))
    }

    /// Replace an element's style. The element's whole span becomes dirty.
    pub fn set_style(&mut self, element: ElementId, style: Style) -> Result<()> {
        let (start, end) = self
            .element_span(element)
            .ok_or_else(|| LayoutError::InvalidContent(format!("unknown element {}", element.0)))?;
        self.elements[element.0 as usize].style = style;
        let len = end - start;
        self.record(DirtyTextRange::new(start, len, len));
        Ok(())
    }

    fn check_insertion_point(&self, position: usize) -> Result<()> {
        if position == 0 || position >= self.symbols.len() {
            return Err(LayoutError::InvalidContent(format!(
                "position {position} is outside the document"
            )));
        }
        match self.element_at(position).and_then(|e| self.element_kind(e)) {
            Some(kind) if kind.is_leaf() => Err(LayoutError::InvalidContent(format!(
                "cannot insert inside a {kind:?}"
            ))),
            _ => Ok(()),
        }
    }

    fn record(&mut self, range: DirtyTextRange) {
        self.generation += 1;
        self.changes.push(range);
        self.reindex();
    }

    fn emit(&mut self, node: &DocNode, parent: ElementId, out: &mut Vec<Symbol>) {
        match node {
            DocNode::Text { text } => out.extend(text.chars().map(Symbol::Char)),
            DocNode::Element { kind, style, children } => {
                let id = ElementId(self.elements.len() as u32);
                self.elements.push(ElementEntry {
                    kind: *kind,
                    style: style.clone(),
                    parent: Some(parent),
                    span: None,
                });
                if *kind == ElementKind::InlineObject {
                    out.push(Symbol::Embedded(id));
                    return;
                }
                out.push(Symbol::Start(id));
                if !kind.is_leaf() {
                    for child in children {
                        self.emit(child, id, out);
                    }
                }
                out.push(Symbol::End(id));
            }
        }
    }

    fn reindex(&mut self) {
        for entry in &mut self.elements {
            entry.span = None;
        }
        let mut stack: Vec<(ElementId, usize)> = Vec::new();
        for (pos, symbol) in self.symbols.iter().enumerate() {
            match symbol {
                Symbol::Start(id) => stack.push((*id, pos)),
                Symbol::End(_) => {
                    if let Some((id, start)) = stack.pop() {
                        self.elements[id.0 as usize].span = Some((start, pos + 1));
                    }
                }
                Symbol::Embedded(id) => self.elements[id.0 as usize].span = Some((pos, pos + 1)),
                Symbol::Char(_) => {}
            }
        }
    }

    fn entry(&self, element: ElementId) -> Option<&ElementEntry> {
        self.elements.get(element.0 as usize).filter(|e| e.span.is_some())
    }
}

impl TextContainer for FlowDocument {
    fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    fn pointer_context(&self, position: usize, direction: LogicalDirection) -> PointerContext {
        let symbol = match direction {
            LogicalDirection::Forward => self.symbols.get(position),
            LogicalDirection::Backward => position.checked_sub(1).and_then(|p| self.symbols.get(p)),
        };
        match symbol {
            Some(Symbol::Char(_)) => PointerContext::Text,
            Some(Symbol::Start(_)) => PointerContext::ElementStart,
            Some(Symbol::End(_)) => PointerContext::ElementEnd,
            Some(Symbol::Embedded(_)) => PointerContext::EmbeddedElement,
            None => PointerContext::None,
        }
    }

    fn adjacent_element(&self, position: usize, direction: LogicalDirection) -> Option<ElementId> {
        let symbol = match direction {
            LogicalDirection::Forward => self.symbols.get(position),
            LogicalDirection::Backward => position.checked_sub(1).and_then(|p| self.symbols.get(p)),
        };
        match symbol {
            Some(Symbol::Start(id) | Symbol::End(id) | Symbol::Embedded(id)) => Some(*id),
            _ => None,
        }
    }

    fn text_run(&self, position: usize) -> String {
        self.symbols
            .get(position..)
            .unwrap_or(&[])
            .iter()
            .map_while(|s| match s {
                Symbol::Char(c) => Some(*c),
                _ => None,
            })
            .collect()
    }

    fn element_kind(&self, element: ElementId) -> Option<ElementKind> {
        self.entry(element).map(|e| e.kind)
    }

    fn element_span(&self, element: ElementId) -> Option<(usize, usize)> {
        self.entry(element).and_then(|e| e.span)
    }

    fn parent_element(&self, element: ElementId) -> Option<ElementId> {
        self.entry(element).and_then(|e| e.parent)
    }

    fn root_element(&self) -> ElementId {
        ElementId(0)
    }

    fn style(&self, element: ElementId) -> Option<&Style> {
        self.entry(element).map(|e| &e.style)
    }

    fn generation(&self) -> u64 {
        self.generation
    }

    fn object_size(&self, element: ElementId) -> Option<(f64, f64)> {
        let entry = self.entry(element)?;
        if !matches!(entry.kind, ElementKind::InlineObject | ElementKind::BlockUiContainer) {
            return None;
        }
        let w = entry
            .style
            .width
            .and_then(|d| d.resolve(0.0))
            .unwrap_or(DEFAULT_OBJECT_SIZE.0);
        let h = entry
            .style
            .height
            .and_then(|d| d.resolve(0.0))
            .unwrap_or(DEFAULT_OBJECT_SIZE.1);
        Some((w.max(0.0), h.max(0.0)))
    }
}
