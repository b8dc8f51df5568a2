//! Lowering of the "pax" lyrics proxy payloads (Apple Music / QQ Music)
//! into LRC text. Syllable payloads become inline `<mm:ss.cc>` word timing
//! with optional `v1:`/`v2:` voice turns and `[bg:...]` background lines.

use serde::Deserialize;

use crate::error::EngineError;

use super::lrc::{ms_to_lrc_timestamp, ms_to_lrc_timestamp_inline};

#[derive(Debug, Clone, Deserialize)]
struct PaxResponse {
    #[serde(rename = "type", default)]
    lyrics_type: String,
    #[serde(default)]
    content: Option<Vec<PaxLine>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct PaxLine {
    #[serde(default)]
    text: Vec<PaxSyllable>,
    #[serde(default)]
    timestamp: i64,
    #[serde(rename = "oppositeTurn", default)]
    opposite_turn: bool,
    #[serde(default)]
    background: bool,
    #[serde(rename = "backgroundText", default)]
    background_text: Vec<PaxSyllable>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct PaxSyllable {
    #[serde(default)]
    text: String,
    /// true when the syllable continues the previous one (no space).
    #[serde(default)]
    part: bool,
    #[serde(default)]
    timestamp: Option<i64>,
    #[serde(rename = "endtime", default)]
    endtime: Option<i64>,
}

fn append_syllables(out: &mut String, syllables: &[PaxSyllable]) {
    let mut last_start = String::new();
    for syllable in syllables {
        if let Some(ts) = syllable.timestamp {
            let start = format!("<{}>", ms_to_lrc_timestamp_inline(ts));
            if start != last_start {
                out.push_str(&start);
                last_start = start;
            }
        }
        out.push_str(&syllable.text);
        if !syllable.part {
            out.push(' ');
        }
        if let Some(end) = syllable.endtime {
            out.push_str(&format!("<{}>", ms_to_lrc_timestamp_inline(end)));
        }
    }
}

fn format_content(lyrics_type: &str, content: &[PaxLine], multi_person: bool) -> String {
    let mut out = String::new();
    for (i, line) in content.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let timestamp = ms_to_lrc_timestamp(line.timestamp);

        if lyrics_type.eq_ignore_ascii_case("Syllable") {
            out.push_str(&timestamp);
            if multi_person {
                out.push_str(if line.opposite_turn { "v2:" } else { "v1:" });
            }
            append_syllables(&mut out, &line.text);

            if line.background && multi_person && !line.background_text.is_empty() {
                out.push_str("\n[bg:");
                append_syllables(&mut out, &line.background_text);
                out.push(']');
            }
        } else if let Some(first) = line.text.first() {
            out.push_str(&timestamp);
            out.push_str(&first.text);
        }
    }
    out.trim().to_string()
}

/// Lower a pax proxy payload (wrapped or bare-array form) to LRC text.
pub fn format_pax_lyrics_to_lrc(raw_json: &str, multi_person: bool) -> Result<String, EngineError> {
    if let Ok(resp) = serde_json::from_str::<PaxResponse>(raw_json) {
        if let Some(content) = resp.content {
            return Ok(format_content(&resp.lyrics_type, &content, multi_person));
        }
    }
    if let Ok(lines) = serde_json::from_str::<Vec<PaxLine>>(raw_json) {
        if !lines.is_empty() {
            return Ok(format_content("Syllable", &lines, multi_person));
        }
    }
    Err(EngineError::Parse("failed to parse pax lyrics response".to_string()))
}
