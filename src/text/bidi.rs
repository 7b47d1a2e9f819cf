//! # BiDi Text Support
//!
//! Implements UAX#9 (Unicode Bidirectional Algorithm) for mixed LTR/RTL text.
//! Uses `unicode-bidi` for level resolution.
//!
//! The pipeline:
//! 1. Resolve embedding levels once per paragraph
//! 2. After line breaking, items on each line are visually reordered (L2)
//! 3. Characters at odd levels are drawn with their mirrored glyph (L4)

use unicode_bidi::{BidiInfo, Level};

use crate::geometry::FlowDirection;

/// Resolve one embedding level per char of `text`.
///
/// `direction` sets the paragraph level. The text may contain paragraph
/// separators; levels are still reported for every char.
pub fn resolve_levels(text: &str, direction: FlowDirection) -> Vec<u8> {
    if text.is_empty() {
        return Vec::new();
    }
    let para_level = match direction {
        FlowDirection::LeftToRight => Level::ltr(),
        FlowDirection::RightToLeft => Level::rtl(),
    };
    if direction == FlowDirection::LeftToRight && is_pure_ltr(text) {
        return vec![0; text.chars().count()];
    }

    let info = BidiInfo::new(text, Some(para_level));
    text.char_indices()
        .map(|(byte, _)| info.levels.get(byte).map(|l| l.number()).unwrap_or(para_level.number()))
        .collect()
}

/// Check if text has no RTL characters at all.
/// This is a fast path to skip BiDi processing for the common case.
pub fn is_pure_ltr(text: &str) -> bool {
    !text.chars().any(is_rtl_char)
}

/// Check if a character has an RTL BiDi class (R, AL, or AN).
fn is_rtl_char(ch: char) -> bool {
    matches!(ch,
        '\u{0590}'..='\u{08FF}' |  // Hebrew, Arabic, Syriac, Thaana, NKo, ...
        '\u{FB1D}'..='\u{FDFF}' |  // Presentation forms
        '\u{FE70}'..='\u{FEFF}' |
        '\u{10800}'..='\u{10FFF}' |
        '\u{1E800}'..='\u{1EEFF}' |
        '\u{200F}' | '\u{202B}' | '\u{202E}' | '\u{2067}'
    )
}

/// Visual order of a line's items, as indices into `levels`.
///
/// Standard L2 reordering: from the highest level down to the lowest odd
/// level, reverse every run at that level or higher.
pub fn visual_order(levels: &[u8]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..levels.len()).collect();
    let Some(&max_level) = levels.iter().max() else {
        return order;
    };
    if max_level == 0 {
        return order;
    }
    let min_level = levels.iter().copied().min().unwrap_or(0);
    let min_odd = if min_level % 2 == 1 { min_level } else { min_level + 1 };

    let mut current = max_level;
    while current >= min_odd {
        let mut i = 0;
        while i < order.len() {
            if levels[order[i]] >= current {
                let start = i;
                while i < order.len() && levels[order[i]] >= current {
                    i += 1;
                }
                order[start..i].reverse();
            } else {
                i += 1;
            }
        }
        if current == 0 {
            break;
        }
        current -= 1;
    }
    order
}

/// Mirrored form of a bracket-like character, for display at odd levels.
pub fn mirror_char(ch: char) -> char {
    match ch {
        '(' => ')',
        ')' => '(',
        '[' => ']',
        ']' => '[',
        '{' => '}',
        '}' => '{',
        '<' => '>',
        '>' => '<',
        '«' => '»',
        '»' => '«',
        '‹' => '›',
        '›' => '‹',
        '⁅' => '⁆',
        '⁆' => '⁅',
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pure_ltr() {
        assert!(is_pure_ltr("Hello World"));
        assert!(!is_pure_ltr("שלום"));
    }

    #[test]
    fn test_levels_mixed() {
        let levels = resolve_levels("ab שלום cd", FlowDirection::LeftToRight);
        assert_eq!(levels.len(), 10);
        assert_eq!(levels[0], 0);
        assert_eq!(levels[3], 1);
        assert_eq!(levels[9], 0);
    }

    #[test]
    fn test_rtl_paragraph_level() {
        let levels = resolve_levels("abc", FlowDirection::RightToLeft);
        assert!(levels.iter().all(|l| *l == 2));
    }

    #[test]
    fn test_visual_order_reverses_rtl_run() {
        assert_eq!(visual_order(&[0, 0, 1, 1, 1, 0]), vec![0, 1, 4, 3, 2, 5]);
        assert_eq!(visual_order(&[0, 0, 0]), vec![0, 1, 2]);
        assert_eq!(visual_order(&[1, 2, 2, 1]), vec![3, 1, 2, 0]);
    }

    #[test]
    fn test_mirroring() {
        assert_eq!(mirror_char('('), ')');
        assert_eq!(mirror_char('a'), 'a');
        assert_eq!(mirror_char(mirror_char('«')), '«');
    }
}
