//! Integration tests for the Galley layout pipeline.
//!
//! These tests exercise the public path from a document (built in code or
//! read from JSON) to page results. They verify:
//! - JSON deserialization feeds the engine correctly
//! - Finite pagination breaks and continues paragraphs
//! - Page columns fill in order
//! - Floaters are reported in physical coordinates
//! - Bottomless formatting reflows incrementally after edits
//! - Incremental results match a fresh format of the edited document

use galley::client::ParagraphResult;
use galley::document::PageSlot;
use galley::engine::FormatMode;
use galley::geometry::FlowDirection;
use galley::style::{Style, TextAlign};
use galley::text::{MetricsKind, MonospaceMetrics};
use galley::*;
use proptest::prelude::*;

// ─── Helpers ────────────────────────────────────────────────────

/// Monospace advance of one character at the default font size.
const CH: LayoutUnit = 2880;
/// Default line height.
const LINE: LayoutUnit = 6000;

fn monospace() -> LayoutConfig {
    LayoutConfig {
        metrics: MetricsKind::Monospace,
        ..Default::default()
    }
}

fn make_paragraphs(n: usize) -> Vec<DocNode> {
    (0..n).map(|i| DocNode::paragraph(format!("p{i}"))).collect()
}

fn make_document(blocks: Vec<DocNode>) -> FlowDocument {
    FlowDocument::from_nodes(Style::default(), blocks)
}

fn paragraph_count(page: &PageResult) -> usize {
    page.columns.iter().map(|c| c.paragraphs.len()).sum()
}

// ─── Pagination ─────────────────────────────────────────────────

#[test]
fn test_empty_document() {
    let doc = make_document(vec![]);
    let pages = paginate(&doc, monospace(), (20 * CH, 2 * LINE), Thickness::default()).unwrap();
    assert_eq!(pages.len(), 1);
    assert_eq!(paragraph_count(&pages[0]), 1);
}

#[test]
fn test_content_overflow_creates_new_page() {
    let doc = make_document(make_paragraphs(5));
    let pages = paginate(&doc, monospace(), (20 * CH, 2 * LINE), Thickness::default()).unwrap();
    assert_eq!(pages.len(), 3);
    let counts: Vec<usize> = pages.iter().map(paragraph_count).collect();
    assert_eq!(counts, vec![2, 2, 1]);
}

#[test]
fn test_page_margins_shrink_the_content_area() {
    let doc = make_document(make_paragraphs(2));
    let margin = Thickness::uniform(CH);
    let pages = paginate(&doc, monospace(), (20 * CH, 2 * LINE + 2 * CH), margin).unwrap();
    assert_eq!(pages.len(), 1);
    let column = &pages[0].columns[0];
    assert_eq!(column.rect.u, CH);
    assert_eq!(column.rect.v, CH);
    assert_eq!(column.rect.du, 18 * CH);
    assert_eq!(column.paragraphs.len(), 2);
}

#[test]
fn test_paragraph_splits_across_pages() {
    let doc = make_document(vec![DocNode::paragraph(
        "aaaaaaaaaaaaaaa bbbbbbbbbbbbbbb ccccccccccccccc",
    )]);
    let pages = paginate(&doc, monospace(), (20 * CH, 2 * LINE), Thickness::default()).unwrap();
    assert_eq!(pages.len(), 2);

    let first = &pages[0].columns[0].paragraphs[0];
    assert!(first.first_chunk);
    assert!(!first.last_chunk);
    assert_eq!(first.lines.len(), 2);

    let rest = &pages[1].columns[0].paragraphs[0];
    assert!(!rest.first_chunk);
    assert!(rest.last_chunk);
    assert_eq!(rest.lines.len(), 1);
    assert_eq!(rest.lines[0].cp_start, first.lines[1].cp_start + first.lines[1].length);
}

#[test]
fn test_page_content_ranges_are_contiguous() {
    let doc = make_document(make_paragraphs(5));
    let pages = paginate(&doc, monospace(), (20 * CH, 2 * LINE), Thickness::default()).unwrap();
    let ranges: Vec<(usize, usize)> = pages.iter().map(|p| p.content_range.unwrap()).collect();
    for pair in ranges.windows(2) {
        assert_eq!(pair[0].1, pair[1].0);
    }
}

#[test]
fn test_page_columns_fill_in_order() {
    let style = Style {
        column_count: Some(2),
        column_gap: Some(0.0),
        ..Default::default()
    };
    let doc = FlowDocument::from_nodes(style, make_paragraphs(6));
    let pages = paginate(&doc, monospace(), (40 * CH, 2 * LINE), Thickness::default()).unwrap();
    assert_eq!(pages.len(), 2);

    let first = &pages[0];
    assert_eq!(first.columns.len(), 2);
    assert_eq!(first.columns[0].paragraphs.len(), 2);
    assert_eq!(first.columns[1].paragraphs.len(), 2);
    assert_eq!(first.columns[1].rect.u, 20 * CH);
    assert_eq!(paragraph_count(&pages[1]), 2);
}

// ─── JSON Input ─────────────────────────────────────────────────

#[test]
fn test_minimal_json() {
    let json = r#"{
        "blocks": [
            { "type": "Element", "kind": "Paragraph", "children": [{ "type": "Text", "text": "hello" }] }
        ]
    }"#;
    let pages = paginate_json(json, monospace(), (20 * CH, 2 * LINE), Thickness::default()).unwrap();
    assert_eq!(pages.len(), 1);
    let para = &pages[0].columns[0].paragraphs[0];
    assert_eq!(para.lines.len(), 1);
    // Five characters plus the paragraph's end edge.
    assert_eq!(para.lines[0].length, 6);
}

#[test]
fn test_camel_case_style_json() {
    let json = r#"{
        "style": { "columnCount": 2, "columnGap": 0 },
        "blocks": [
            { "type": "Element", "kind": "Paragraph", "style": { "textAlign": "Center" },
              "children": [{ "type": "Text", "text": "ab" }] }
        ]
    }"#;
    let doc = FlowDocument::from_json(json).unwrap();
    let para = doc.elements_of_kind(ElementKind::Paragraph)[0];
    assert_eq!(doc.resolved_style(para).text_align, TextAlign::Center);
    let pages = paginate(&doc, monospace(), (40 * CH, 2 * LINE), Thickness::default()).unwrap();
    assert_eq!(pages[0].columns.len(), 2);
}

#[test]
fn test_invalid_json_is_rejected() {
    let err = paginate_json("{ not json", monospace(), (20 * CH, 2 * LINE), Thickness::default());
    assert!(matches!(err, Err(LayoutError::InvalidDocument(_))));
}

#[test]
fn test_page_results_serialize_camel_case() {
    let doc = make_document(make_paragraphs(1));
    let pages = paginate(&doc, monospace(), (20 * CH, 2 * LINE), Thickness::default()).unwrap();
    let json = serde_json::to_string(&pages).unwrap();
    assert!(json.contains("\"firstChunk\":true"));
    assert!(json.contains("\"contentRange\""));
}

// ─── Floaters ───────────────────────────────────────────────────

fn make_floater_paragraph(floater_style: Style) -> DocNode {
    DocNode::element(
        ElementKind::Paragraph,
        Style::default(),
        vec![
            DocNode::element(ElementKind::Floater, floater_style, vec![DocNode::paragraph("abc")]),
            DocNode::text("text"),
        ],
    )
}

#[test]
fn test_floater_is_reported_with_its_paragraph() {
    let doc = make_document(vec![make_floater_paragraph(Style::default())]);
    let pages = paginate(&doc, monospace(), (40 * CH, 4 * LINE), Thickness::default()).unwrap();
    assert_eq!(pages.len(), 1);
    let para = &pages[0].columns[0].paragraphs[0];
    assert_eq!(para.floats.len(), 1);
    let float = &para.floats[0];
    // Floaters align right by default.
    assert_eq!(float.rect.u_end(), 40 * CH);
    assert_eq!(float.children.len(), 1);
    assert!(para.lines[0].rect.du < 40 * CH);
}

#[test]
fn test_rtl_floater_lands_on_the_physical_right() {
    let style = Style {
        flow_direction: Some(FlowDirection::RightToLeft),
        ..Default::default()
    };
    let doc = FlowDocument::from_nodes(style, vec![make_floater_paragraph(Style::default())]);
    let pages = paginate(&doc, monospace(), (40 * CH, 4 * LINE), Thickness::default()).unwrap();
    let para = &pages[0].columns[0].paragraphs[0];
    let float = &para.floats[0];
    assert_eq!(float.rect.u_end(), 40 * CH);
}

fn anchored_floater_paragraph(before: &str) -> DocNode {
    DocNode::element(
        ElementKind::Paragraph,
        Style::default(),
        vec![
            DocNode::text(before),
            DocNode::element(ElementKind::Floater, Style::default(), vec![DocNode::paragraph("w w w")]),
            DocNode::text(" after the float"),
        ],
    )
}

fn count_floats(result: &ParagraphResult, counts: &mut std::collections::HashMap<ElementId, usize>) {
    for float in &result.floats {
        if let Some(element) = float.element {
            *counts.entry(element).or_default() += 1;
        }
        count_floats(float, counts);
    }
    for child in &result.children {
        count_floats(child, counts);
    }
}

#[test]
fn test_each_floater_is_placed_once_across_pages() {
    for before in ["here ", "float here ", "a b c d e f "] {
        let blocks = (0..4).map(|_| anchored_floater_paragraph(before)).collect();
        let doc = make_document(blocks);
        let pages = paginate(&doc, monospace(), (10 * CH, 4 * LINE), Thickness::default()).unwrap();

        let mut counts = std::collections::HashMap::new();
        for page in &pages {
            for para in page.columns.iter().flat_map(|c| c.paragraphs.iter()) {
                count_floats(para, &mut counts);
            }
            for float in &page.floats {
                if let Some(element) = float.element {
                    *counts.entry(element).or_default() += 1;
                }
            }
        }
        for floater in doc.elements_of_kind(ElementKind::Floater) {
            assert_eq!(counts.get(&floater), Some(&1), "floater {floater:?} after {before:?}");
        }
    }
}

// ─── Bottomless Formatting ──────────────────────────────────────

#[test]
fn test_bottomless_page_grows_with_content() {
    let mut doc = make_document(make_paragraphs(2));
    let metrics = MonospaceMetrics::default();
    let mut formatter = DocumentFormatter::new(monospace());

    let first = formatter
        .format_bottomless(&doc, &metrics, (20 * CH, 0), Thickness::default())
        .unwrap();
    assert_eq!(first.size, (20 * CH, 2 * LINE));

    let end = doc.symbol_count() - 1;
    doc.insert_element(end, DocNode::paragraph("new")).unwrap();
    formatter.add_dirty_ranges(doc.take_changes());

    let second = formatter
        .format_bottomless(&doc, &metrics, (20 * CH, 0), Thickness::default())
        .unwrap();
    assert_eq!(second.size, (20 * CH, 3 * LINE));
    let page = formatter.page(PageSlot::Bottomless).unwrap();
    assert_eq!(page.last_mode(), Some(FormatMode::UpdateBottomless));
    assert_eq!(page.clients().len(), 3);
    formatter.close().unwrap();
}

#[test]
fn test_bottomless_hit_testing() {
    let doc = make_document(make_paragraphs(3));
    let metrics = MonospaceMetrics::default();
    let mut formatter = DocumentFormatter::new(monospace());
    formatter
        .format_bottomless(&doc, &metrics, (20 * CH, 0), Thickness::default())
        .unwrap();
    formatter.arrange(PageSlot::Bottomless).unwrap();

    let third = doc.elements_of_kind(ElementKind::Paragraph)[2];
    let hit = formatter
        .input_hit_test(PageSlot::Bottomless, LayoutPoint::new(CH / 2, 2 * LINE + 10))
        .unwrap();
    assert_eq!(hit, Some(third));

    let miss = formatter
        .input_hit_test(PageSlot::Bottomless, LayoutPoint::new(CH / 2, 10 * LINE))
        .unwrap();
    assert_eq!(miss, None);
}

#[test]
fn test_switching_to_pages_after_bottomless() {
    let doc = make_document(make_paragraphs(4));
    let metrics = MonospaceMetrics::default();
    let mut formatter = DocumentFormatter::new(monospace());
    formatter
        .format_bottomless(&doc, &metrics, (20 * CH, 0), Thickness::default())
        .unwrap();
    assert!(!formatter.is_paginated());

    let size = (20 * CH, 2 * LINE);
    assert!(formatter.format_page(&doc, &metrics, size, Thickness::default(), 1).unwrap().is_some());
    assert!(formatter.format_page(&doc, &metrics, size, Thickness::default(), 2).unwrap().is_none());
    assert!(formatter.is_paginated());
    assert_eq!(formatter.formatted_page_count(), 2);
    assert!(formatter.page(PageSlot::Bottomless).is_none());
}

// ─── Incremental Reformatting ───────────────────────────────────

fn mixed_blocks() -> Vec<DocNode> {
    vec![
        DocNode::paragraph("alpha beta gamma delta"),
        DocNode::text("loose text here"),
        DocNode::paragraph("epsilon zeta eta"),
        DocNode::paragraph("omega psi chi rho tau"),
        DocNode::paragraph("theta"),
    ]
}

#[derive(Debug, Clone, Copy)]
enum Edit {
    InsertText,
    RemoveOne,
    InsertParagraph,
}

fn edit_strategy() -> impl Strategy<Value = Edit> {
    prop_oneof![Just(Edit::InsertText), Just(Edit::RemoveOne), Just(Edit::InsertParagraph)]
}

/// Apply `edit` at `pos`; false when the document rejects it.
fn apply_edit(doc: &mut FlowDocument, edit: Edit, pos: usize) -> bool {
    match edit {
        Edit::InsertText => doc.insert_text(pos, "zz q").is_ok(),
        Edit::RemoveOne => doc.remove_range(pos, 1).is_ok(),
        Edit::InsertParagraph => doc.insert_element(pos, DocNode::paragraph("new")).is_ok(),
    }
}

fn bottomless_report(
    formatter: &mut DocumentFormatter,
    doc: &FlowDocument,
    metrics: &MonospaceMetrics,
) -> Result<serde_json::Value> {
    formatter.format_bottomless(doc, metrics, (12 * CH, 0), Thickness::default())?;
    formatter.arrange(PageSlot::Bottomless)?;
    let page = formatter.page_results(doc, metrics, PageSlot::Bottomless)?;
    Ok(serde_json::to_value(page).unwrap())
}

fn finite_report(
    formatter: &mut DocumentFormatter,
    doc: &FlowDocument,
    metrics: &MonospaceMetrics,
    size: (LayoutUnit, LayoutUnit),
) -> Result<Vec<serde_json::Value>> {
    let mut pages = Vec::new();
    let mut index = 0;
    while formatter.format_page(doc, metrics, size, Thickness::default(), index)?.is_some() {
        formatter.arrange(PageSlot::Finite(index))?;
        let page = formatter.page_results(doc, metrics, PageSlot::Finite(index))?;
        pages.push(serde_json::to_value(page).unwrap());
        index += 1;
    }
    Ok(pages)
}

#[test]
fn test_finite_edit_pulls_content_back_onto_the_previous_page() {
    let size = (12 * CH, 3 * LINE);
    let metrics = MonospaceMetrics::default();
    let mut doc = make_document(vec![
        DocNode::paragraph("one"),
        DocNode::paragraph("two"),
        DocNode::paragraph("omega psi chi rho tau"),
    ]);
    let mut formatter = DocumentFormatter::new(monospace());
    let before = finite_report(&mut formatter, &doc, &metrics, size).unwrap();
    assert_eq!(before.len(), 2);

    // "chi" starts the second page; shortened, it fits on the first.
    let omega = doc.elements_of_kind(ElementKind::Paragraph)[2];
    let (start, _) = doc.element_span(omega).unwrap();
    doc.remove_range(start + 1 + "omega psi ch".len(), 1).unwrap();
    formatter.add_dirty_ranges(doc.take_changes());

    let incremental = finite_report(&mut formatter, &doc, &metrics, size).unwrap();
    let fresh: Vec<serde_json::Value> = paginate(&doc, monospace(), size, Thickness::default())
        .unwrap()
        .into_iter()
        .map(|p| serde_json::to_value(p).unwrap())
        .collect();
    assert_eq!(incremental, fresh);
    let first_page_lines = fresh[0]["columns"][0]["paragraphs"][2]["lines"].as_array().unwrap().len();
    assert_eq!(first_page_lines, 1);
    assert_eq!(fresh[0]["columns"][0]["paragraphs"][2]["lines"][0]["length"], 13);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(96))]

    /// Reflowing a bottomless page after one edit gives the layout a fresh
    /// formatter computes for the edited document.
    #[test]
    fn bottomless_reflow_matches_fresh_format(edit in edit_strategy(), pos in 1usize..80) {
        let metrics = MonospaceMetrics::default();
        let mut doc = make_document(mixed_blocks());
        let mut formatter = DocumentFormatter::new(monospace());
        bottomless_report(&mut formatter, &doc, &metrics).unwrap();

        prop_assume!(apply_edit(&mut doc, edit, pos));
        let fresh = bottomless_report(&mut DocumentFormatter::new(monospace()), &doc, &metrics);
        prop_assume!(fresh.is_ok());

        formatter.add_dirty_ranges(doc.take_changes());
        let incremental = bottomless_report(&mut formatter, &doc, &metrics).unwrap();
        prop_assert_eq!(incremental, fresh.unwrap());

        // A second pass with nothing dirty changes nothing.
        let again = bottomless_report(&mut formatter, &doc, &metrics).unwrap();
        let fresh = bottomless_report(&mut DocumentFormatter::new(monospace()), &doc, &metrics).unwrap();
        prop_assert_eq!(again, fresh);
    }

    /// Repaginating after one edit gives the pages a fresh pagination of the
    /// edited document gives.
    #[test]
    fn repagination_matches_fresh_pagination(edit in edit_strategy(), pos in 1usize..80) {
        let size = (12 * CH, 3 * LINE);
        let metrics = MonospaceMetrics::default();
        let mut doc = make_document(mixed_blocks());
        let mut formatter = DocumentFormatter::new(monospace());
        finite_report(&mut formatter, &doc, &metrics, size).unwrap();

        prop_assume!(apply_edit(&mut doc, edit, pos));
        let fresh = finite_report(&mut DocumentFormatter::new(monospace()), &doc, &metrics, size);
        prop_assume!(fresh.is_ok());

        formatter.add_dirty_ranges(doc.take_changes());
        let incremental = finite_report(&mut formatter, &doc, &metrics, size).unwrap();
        prop_assert_eq!(incremental, fresh.unwrap());
    }
}
