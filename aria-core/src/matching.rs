//! Fuzzy title/artist comparison shared by the delivery adapters, the lyrics
//! cascade and the plug-in `matching` capability.

use std::sync::{Mutex, OnceLock};

/// Transliteration is an external collaborator (lookup tables live in the
/// host). The engine only needs "kana to romaji" for alternate search
/// queries; absence degrades to skipping those query variants.
pub trait Transliterator: Send + Sync {
    fn to_romaji(&self, text: &str) -> String;
}

static TRANSLITERATOR: OnceLock<Mutex<Option<Box<dyn Transliterator>>>> = OnceLock::new();

fn transliterator_slot() -> &'static Mutex<Option<Box<dyn Transliterator>>> {
    TRANSLITERATOR.get_or_init(|| Mutex::new(None))
}

pub fn set_transliterator(t: Box<dyn Transliterator>) {
    *transliterator_slot().lock().expect("transliterator slot") = Some(t);
}

pub fn to_romaji(text: &str) -> Option<String> {
    let slot = transliterator_slot().lock().expect("transliterator slot");
    slot.as_ref().map(|t| t.to_romaji(text))
}

/// Hiragana, katakana or CJK ideograph presence.
pub fn contains_japanese(text: &str) -> bool {
    text.chars().any(|c| {
        matches!(c,
            '\u{3040}'..='\u{309f}' | '\u{30a0}'..='\u{30ff}' | '\u{4e00}'..='\u{9fff}')
    })
}

/// Keep printable ASCII only; collapses whitespace runs.
pub fn clean_to_ascii(text: &str) -> String {
    let filtered: String = text
        .chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { ' ' })
        .collect();
    filtered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Collapse separators/punctuation so titles like "Doctor / Cops" and
/// "Doctor _ Cops" still match.
pub fn normalize_loose_title(title: &str) -> String {
    let trimmed = title.trim().to_lowercase();
    if trimmed.is_empty() {
        return String::new();
    }
    let mut out = String::with_capacity(trimmed.len());
    for c in trimmed.chars() {
        if c.is_alphanumeric() {
            out.push(c);
        } else if c.is_whitespace()
            || matches!(c, '/' | '\\' | '_' | '-' | '|' | '.' | '&' | '+')
        {
            out.push(' ');
        }
        // Other punctuation/symbols (including emoji) are dropped.
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn has_alphanumeric(value: &str) -> bool {
    value.chars().any(|c| c.is_alphanumeric())
}

/// True when the string carries no CJK/Cyrillic/Arabic/Hangul runs. Used to
/// relax matching when vendors return transliterated aliases.
pub fn is_latin_script(s: &str) -> bool {
    for c in s.chars() {
        let cp = c as u32;
        if cp < 128 {
            continue;
        }
        // Latin extended ranges are fine.
        if (0x0100..=0x024f).contains(&cp)
            || (0x1e00..=0x1eff).contains(&cp)
            || (0x00c0..=0x00ff).contains(&cp)
        {
            continue;
        }
        if (0x4e00..=0x9fff).contains(&cp)
            || (0x3040..=0x309f).contains(&cp)
            || (0x30a0..=0x30ff).contains(&cp)
            || (0xac00..=0xd7af).contains(&cp)
            || (0x0600..=0x06ff).contains(&cp)
            || (0x0400..=0x04ff).contains(&cp)
        {
            return false;
        }
    }
    true
}

/// Split a joined artist credit on the usual collaboration separators.
pub fn split_artists(artists: &str) -> Vec<String> {
    let mut normalized = artists.to_string();
    for sep in [" feat. ", " feat ", " ft. ", " ft ", " & ", " and ", ", ", " x "] {
        normalized = normalized.replace(sep, "|");
    }
    normalized
        .split('|')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

fn same_words_unordered(a: &str, b: &str) -> bool {
    let mut words_a: Vec<&str> = a.split_whitespace().collect();
    let mut words_b: Vec<&str> = b.split_whitespace().collect();
    if words_a.is_empty() || words_a.len() != words_b.len() {
        return false;
    }
    words_a.sort_unstable();
    words_b.sort_unstable();
    words_a == words_b
}

pub fn artists_match(expected: &str, found: &str) -> bool {
    let norm_expected = expected.trim().to_lowercase();
    let norm_found = found.trim().to_lowercase();

    if norm_expected == norm_found
        || norm_expected.contains(&norm_found)
        || norm_found.contains(&norm_expected)
    {
        return true;
    }

    for exp in split_artists(&norm_expected) {
        for fnd in split_artists(&norm_found) {
            if exp == fnd || exp.contains(&fnd) || fnd.contains(&exp) {
                return true;
            }
            if same_words_unordered(&exp, &fnd) {
                return true;
            }
        }
    }

    // Cross-script pairs can't be compared textually; trust the upstream
    // ISRC/duration signal instead of rejecting.
    is_latin_script(expected) != is_latin_script(found)
}

const VERSION_PATTERNS: &[&str] = &[
    "remaster", "remastered", "deluxe", "bonus", "single",
    "album version", "radio edit", "original mix", "extended",
    "club mix", "remix", "live", "acoustic", "demo",
];

/// Strip trailing "(... Remaster)" / "[... Live]" style version qualifiers.
pub fn clean_title(title: &str) -> String {
    let mut cleaned = title.to_string();

    for (open, close) in [('(', ')'), ('[', ']')] {
        loop {
            let Some(start) = cleaned.rfind(open) else { break };
            let Some(end) = cleaned.rfind(close) else { break };
            if end <= start {
                break;
            }
            let content = cleaned[start + 1..end].to_lowercase();
            if VERSION_PATTERNS.iter().any(|p| content.contains(p)) {
                let tail = cleaned[end + close.len_utf8()..].to_string();
                cleaned.truncate(start);
                let trimmed = cleaned.trim_end().to_string();
                cleaned = trimmed + &tail;
            } else {
                break;
            }
        }
    }

    const DASH_PATTERNS: &[&str] = &[
        " - remaster", " - remastered", " - single version", " - radio edit",
        " - live", " - acoustic", " - demo", " - remix",
    ];
    for pattern in DASH_PATTERNS {
        if cleaned.to_lowercase().ends_with(pattern) {
            cleaned.truncate(cleaned.len() - pattern.len());
        }
    }

    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Title up to the first parenthetical/bracket/dash qualifier.
pub fn extract_core_title(title: &str) -> String {
    let mut cut = title.len();
    for marker in ["(", "[", " - "] {
        if let Some(idx) = title.find(marker) {
            if idx > 0 && idx < cut {
                cut = idx;
            }
        }
    }
    title[..cut].trim().to_string()
}

pub fn titles_match(expected: &str, found: &str) -> bool {
    let norm_expected = expected.trim().to_lowercase();
    let norm_found = found.trim().to_lowercase();

    if norm_expected == norm_found
        || norm_expected.contains(&norm_found)
        || norm_found.contains(&norm_expected)
    {
        return true;
    }

    let clean_expected = clean_title(&norm_expected);
    let clean_found = clean_title(&norm_found);
    if clean_expected == clean_found {
        return true;
    }
    if !clean_expected.is_empty()
        && !clean_found.is_empty()
        && (clean_expected.contains(&clean_found) || clean_found.contains(&clean_expected))
    {
        return true;
    }

    let core_expected = extract_core_title(&norm_expected);
    let core_found = extract_core_title(&norm_found);
    if !core_expected.is_empty() && core_expected == core_found {
        return true;
    }

    let loose_expected = normalize_loose_title(&norm_expected);
    let loose_found = normalize_loose_title(&norm_found);
    if !loose_expected.is_empty() && !loose_found.is_empty() {
        if loose_expected == loose_found
            || loose_expected.contains(&loose_found)
            || loose_found.contains(&loose_expected)
        {
            return true;
        }
    }

    // Symbol/emoji-heavy titles often come back as textual aliases; if the
    // artist/duration already matched upstream, avoid a false reject.
    if (!has_alphanumeric(expected) || !has_alphanumeric(found))
        && !expected.trim().is_empty()
        && !found.trim().is_empty()
    {
        return true;
    }

    is_latin_script(expected) != is_latin_script(found)
}

/// Normalised similarity in [0,1] for the plug-in `matching.compareStrings`
/// capability.
pub fn compare_strings(a: &str, b: &str) -> f64 {
    let la = normalize_loose_title(a);
    let lb = normalize_loose_title(b);
    if la.is_empty() && lb.is_empty() {
        return if a.trim() == b.trim() { 1.0 } else { 0.0 };
    }
    strsim::normalized_levenshtein(&la, &lb)
}

/// Duration comparison for plug-ins: both in seconds, tolerance inclusive.
pub fn compare_duration(a_sec: f64, b_sec: f64, tolerance_sec: f64) -> bool {
    (a_sec - b_sec).abs() <= tolerance_sec
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loose_title_collapses_separators() {
        assert_eq!(normalize_loose_title("Doctor / Cops"), "doctor cops");
        assert_eq!(normalize_loose_title("Doctor _ Cops"), "doctor cops");
        assert_eq!(normalize_loose_title("  A|B&C+D  "), "a b c d");
        assert_eq!(normalize_loose_title("🎵🎵"), "");
    }

    #[test]
    fn clean_title_strips_version_qualifiers() {
        assert_eq!(clean_title("Song (2011 Remaster)"), "Song");
        assert_eq!(clean_title("Song [Live]"), "Song");
        assert_eq!(clean_title("Song - Radio Edit"), "Song");
        assert_eq!(clean_title("Song (Part II)"), "Song (Part II)");
    }

    #[test]
    fn titles_match_variants() {
        assert!(titles_match("Karma Police", "Karma Police - Remastered"));
        assert!(titles_match("Doctor / Cops", "Doctor _ Cops"));
        assert!(titles_match("夜に駆ける", "Yoru ni Kakeru"));
        assert!(!titles_match("Creep", "Paranoid Android"));
    }

    #[test]
    fn artists_match_variants() {
        assert!(artists_match("Daft Punk feat. Pharrell Williams", "Daft Punk"));
        assert!(artists_match("Simon & Garfunkel", "Garfunkel, Simon"));
        assert!(!artists_match("Radiohead", "Muse"));
    }

    #[test]
    fn split_artists_separators() {
        assert_eq!(
            split_artists("a feat. b & c, d x e"),
            vec!["a", "b", "c", "d", "e"]
        );
    }

    #[test]
    fn compare_helpers() {
        assert!(compare_strings("Karma Police", "karma police") > 0.99);
        assert!(compare_strings("Karma Police", "No Surprises") < 0.5);
        assert!(compare_duration(180.0, 182.5, 3.0));
        assert!(!compare_duration(180.0, 200.0, 3.0));
    }

    #[test]
    fn japanese_detection() {
        assert!(contains_japanese("夜に駆ける"));
        assert!(contains_japanese("ヨルシカ"));
        assert!(!contains_japanese("yorushika"));
    }
}
