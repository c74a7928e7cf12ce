//! Decides whether a chat line is worth sending for translation.
//!
//! Classification is a coarse script census: characters are counted as
//! native (kana and CJK ideographs), foreign (Latin letters) or neither, and
//! the ratios against the total length drive the decision. The order of the
//! checks in [`TranslationMode::Selective`] is policy and must not be
//! rearranged.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "camelCase")]
#[serde(rename_all = "camelCase")]
pub enum TranslationMode {
    /// Translate everything.
    All,
    /// Native/foreign ratio policy.
    #[default]
    Selective,
    /// Translate only lines dominated by the foreign script.
    TargetScriptOnly,
}

/// Ratio thresholds in percent (0-100).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub native: f64,
    pub foreign: f64,
    pub target_script: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            native: 30.0,
            foreign: 50.0,
            target_script: 50.0,
        }
    }
}

/// Below this many substantive characters a line is treated as noise.
const MIN_SUBSTANTIVE_CHARS: usize = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScriptCounts {
    pub total: usize,
    pub native: usize,
    pub foreign: usize,
    /// Everything except whitespace, digits and punctuation.
    pub substantive: usize,
}

impl ScriptCounts {
    pub fn of(text: &str) -> Self {
        let mut counts = ScriptCounts::default();
        for c in text.trim().chars() {
            counts.total += 1;
            if is_native_char(c) {
                counts.native += 1;
            } else if is_foreign_char(c) {
                counts.foreign += 1;
            }
            if !(c.is_whitespace() || c.is_numeric() || is_punctuation(c)) {
                counts.substantive += 1;
            }
        }
        counts
    }

    pub fn native_ratio(&self) -> f64 {
        ratio(self.native, self.total)
    }

    pub fn foreign_ratio(&self) -> f64 {
        ratio(self.foreign, self.total)
    }
}

fn ratio(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

fn is_native_char(c: char) -> bool {
    matches!(c,
        '\u{3005}'                  // 々
        | '\u{3040}'..='\u{309F}'   // hiragana
        | '\u{30A0}'..='\u{30FF}'   // katakana
        | '\u{31F0}'..='\u{31FF}'
        | '\u{3400}'..='\u{4DBF}'
        | '\u{4E00}'..='\u{9FFF}'
        | '\u{F900}'..='\u{FAFF}'
        | '\u{FF66}'..='\u{FF9F}'   // halfwidth katakana
    )
}

fn is_foreign_char(c: char) -> bool {
    c.is_ascii_alphabetic()
        || matches!(c, '\u{00C0}'..='\u{024F}' if c != '\u{00D7}' && c != '\u{00F7}')
}

fn is_punctuation(c: char) -> bool {
    c.is_ascii_punctuation()
        || matches!(c,
            '\u{2000}'..='\u{206F}'
            | '\u{3000}'..='\u{3004}'
            | '\u{3006}'..='\u{303F}'
            | '\u{FF01}'..='\u{FF0F}'
            | '\u{FF1A}'..='\u{FF20}'
            | '\u{FF3B}'..='\u{FF40}'
            | '\u{FF5B}'..='\u{FF65}'
        )
}

/// Whether `text` should be translated under `mode`.
///
/// Empty or whitespace-only text is never eligible.
pub fn is_eligible(text: &str, mode: TranslationMode, thresholds: &Thresholds) -> bool {
    let counts = ScriptCounts::of(text);
    if counts.total == 0 {
        return false;
    }

    match mode {
        TranslationMode::All => true,
        TranslationMode::TargetScriptOnly => {
            counts.foreign_ratio() >= thresholds.target_script / 100.0
        }
        TranslationMode::Selective => is_eligible_selective(&counts, thresholds),
    }
}

fn is_eligible_selective(counts: &ScriptCounts, thresholds: &Thresholds) -> bool {
    if counts.native_ratio() >= thresholds.native / 100.0 {
        // Already readable.
        return false;
    }
    if counts.foreign_ratio() >= thresholds.foreign / 100.0 {
        return true;
    }
    if counts.substantive < MIN_SUBSTANTIVE_CHARS {
        return false;
    }
    counts.foreign > counts.native
}
