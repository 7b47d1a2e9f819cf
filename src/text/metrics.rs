//! Character metrics used by the line composer.
//!
//! Glyph shaping and font fallback happen outside the layout core. The
//! composer only needs advances and vertical extents, which a host supplies
//! through [`TextMetrics`].

use serde::Deserialize;

/// Advance and extent source for text measurement. All values are pixels.
pub trait TextMetrics {
    fn advance(&self, ch: char, font_size: f64) -> f64;

    fn ascent(&self, font_size: f64) -> f64 {
        font_size * 0.8
    }

    fn descent(&self, font_size: f64) -> f64 {
        font_size * 0.2
    }
}

/// Which built-in metrics a configuration selects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum MetricsKind {
    #[default]
    Proportional,
    Monospace,
}

/// Every visible character has the same advance.
#[derive(Debug, Clone, Copy)]
pub struct MonospaceMetrics {
    /// Advance as a fraction of the font size.
    pub em_ratio: f64,
}

impl Default for MonospaceMetrics {
    fn default() -> Self {
        Self { em_ratio: 0.6 }
    }
}

impl TextMetrics for MonospaceMetrics {
    fn advance(&self, ch: char, font_size: f64) -> f64 {
        if is_zero_width(ch) {
            0.0
        } else if ch == '\t' {
            font_size * self.em_ratio * 4.0
        } else {
            font_size * self.em_ratio
        }
    }
}

/// Approximate proportional advances, in thousandths of an em, by
/// character class.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProportionalMetrics;

impl ProportionalMetrics {
    fn units(ch: char) -> u32 {
        match ch {
            ' ' => 278,
            '\t' => 1112,
            'i' | 'j' | 'l' | '.' | ',' | ':' | ';' | '\'' | '!' | '|' => 222,
            'f' | 't' | 'r' | '(' | ')' | '[' | ']' | '-' => 333,
            'm' | 'w' => 833,
            'M' | 'W' => 889,
            'A'..='Z' => 667,
            '0'..='9' => 556,
            'a'..='z' => 500,
            '\u{3000}'..='\u{9FFF}' | '\u{AC00}'..='\u{D7AF}' | '\u{FF00}'..='\u{FFEF}' => 1000,
            _ => 556,
        }
    }
}

impl TextMetrics for ProportionalMetrics {
    fn advance(&self, ch: char, font_size: f64) -> f64 {
        if is_zero_width(ch) {
            return 0.0;
        }
        Self::units(ch) as f64 / 1000.0 * font_size
    }

    fn ascent(&self, font_size: f64) -> f64 {
        font_size * 0.718
    }

    fn descent(&self, font_size: f64) -> f64 {
        font_size * 0.207
    }
}

fn is_zero_width(ch: char) -> bool {
    matches!(ch, '\n' | '\r' | '\u{200B}'..='\u{200F}' | '\u{2028}' | '\u{2029}' | '\u{2060}' | '\u{FEFF}')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monospace_is_uniform() {
        let m = MonospaceMetrics::default();
        assert_eq!(m.advance('i', 10.0), m.advance('W', 10.0));
        assert_eq!(m.advance('\n', 10.0), 0.0);
    }

    #[test]
    fn proportional_distinguishes_classes() {
        let m = ProportionalMetrics;
        assert!(m.advance('W', 12.0) > m.advance('i', 12.0));
        assert!((m.advance(' ', 10.0) - 2.78).abs() < 1e-9);
    }
}
