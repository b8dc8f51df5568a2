use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::error::EngineError;
use crate::logbuf;
use crate::matching::normalize_loose_title;

use super::model::{LyricsLine, LyricsResponse, SyncType};

fn lrc_line_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\[(\d{2}):(\d{2})\.(\d{2,3})\](.*)$").expect("lrc pattern"))
}

/// `[mm:ss.cc]` / `[mm:ss.ccc]` timestamp to milliseconds; two fraction
/// digits are centiseconds, three are milliseconds.
fn lrc_timestamp_to_ms(minutes: &str, seconds: &str, fraction: &str) -> i64 {
    let min: i64 = minutes.parse().unwrap_or(0);
    let sec: i64 = seconds.parse().unwrap_or(0);
    let mut frac: i64 = fraction.parse().unwrap_or(0);
    if fraction.len() == 2 {
        frac *= 10;
    }
    min * 60_000 + sec * 1000 + frac
}

pub fn ms_to_lrc_timestamp_inline(ms: i64) -> String {
    let total_seconds = ms / 1000;
    let minutes = total_seconds / 60;
    let seconds = total_seconds % 60;
    let centiseconds = (ms % 1000) / 10;
    format!("{minutes:02}:{seconds:02}.{centiseconds:02}")
}

pub fn ms_to_lrc_timestamp(ms: i64) -> String {
    format!("[{}]", ms_to_lrc_timestamp_inline(ms))
}

/// Parse LRC text into timed lines. End times are derived from the next
/// line's start; the tail gets start+5s. `[bg:...]` background-vocal tags
/// attach to the preceding timed line so they survive re-emission.
pub fn parse_synced_lyrics(synced: &str) -> Vec<LyricsLine> {
    let mut lines: Vec<LyricsLine> = Vec::new();

    for raw in synced.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with("[bg:") {
            if let Some(last) = lines.last_mut() {
                last.words = format!("{}\n{line}", last.words).trim().to_string();
            }
            continue;
        }
        let Some(caps) = lrc_line_pattern().captures(line) else {
            continue;
        };
        let start_ms = lrc_timestamp_to_ms(&caps[1], &caps[2], &caps[3]);
        let words = caps[4].trim().to_string();
        if words.is_empty() {
            continue;
        }
        lines.push(LyricsLine {
            start_time_ms: start_ms,
            words,
            end_time_ms: 0,
        });
    }

    let count = lines.len();
    for i in 0..count.saturating_sub(1) {
        lines[i].end_time_ms = lines[i + 1].start_time_ms;
    }
    if let Some(last) = lines.last_mut() {
        last.end_time_ms = last.start_time_ms + 5000;
    }

    lines
}

/// Emit metadata-headed LRC ([ti:]/[ar:]/[by:]) from a lyrics response.
pub fn convert_to_lrc_with_metadata(
    lyrics: &LyricsResponse,
    track_name: &str,
    artist_name: &str,
) -> String {
    if lyrics.lines.is_empty() {
        return String::new();
    }

    let mut out = String::new();
    out.push_str(&format!("[ti:{track_name}]\n"));
    out.push_str(&format!("[ar:{artist_name}]\n"));
    out.push_str("[by:aria]\n\n");

    for line in &lyrics.lines {
        if line.words.is_empty() {
            continue;
        }
        if lyrics.sync_type == SyncType::LineSynced {
            out.push_str(&ms_to_lrc_timestamp(line.start_time_ms));
        }
        out.push_str(&line.words);
        out.push('\n');
    }

    out
}

/// Write a `.lrc` sidecar next to the audio file.
pub fn save_lrc_sidecar(audio_path: &Path, lrc_content: &str) -> Result<PathBuf, EngineError> {
    if lrc_content.is_empty() {
        return Err(EngineError::InvalidRequest("empty LRC content".to_string()));
    }
    let lrc_path = audio_path.with_extension("lrc");
    std::fs::write(&lrc_path, lrc_content)?;
    logbuf::debug("Lyrics", format!("saved LRC file: {}", lrc_path.display()));
    Ok(lrc_path)
}

/// Strip feat/remaster/live/etc. suffixes, then fall back to the loose form
/// for providers whose separators differ.
pub fn simplify_track_name(name: &str) -> String {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        [
            r"\s*\(feat\..*?\)",
            r"\s*\(ft\..*?\)",
            r"\s*\(featuring.*?\)",
            r"\s*\(with.*?\)",
            r"\s*-\s*Remaster(ed)?.*$",
            r"\s*-\s*\d{4}\s*Remaster.*$",
            r"\s*\(Remaster(ed)?.*?\)",
            r"\s*\(Deluxe.*?\)",
            r"\s*\(Bonus.*?\)",
            r"\s*\(Live.*?\)",
            r"\s*\(Acoustic.*?\)",
            r"\s*\(Radio Edit\)",
            r"\s*\(Single Version\)",
        ]
        .iter()
        .map(|p| Regex::new(&format!("(?i){p}")).expect("simplify pattern"))
        .collect()
    });

    let mut result = name.to_string();
    for pattern in patterns {
        result = pattern.replace_all(&result, "").into_owned();
    }
    let result = result.trim();
    if result.is_empty() {
        return String::new();
    }

    let loose = normalize_loose_title(result);
    if loose.is_empty() {
        result.to_string()
    } else {
        loose
    }
}

/// First artist of a joined credit.
pub fn normalize_artist_name(name: &str) -> String {
    let lower = name.to_lowercase();
    let mut cut = name.len();
    for sep in [", ", "; ", " & ", " feat. ", " ft. ", " featuring ", " with "] {
        if let Some(idx) = lower.find(sep) {
            if idx > 0 && idx < cut {
                cut = idx;
            }
        }
    }
    // Lowercasing can shift byte offsets for a few scripts; fall back to the
    // whole name rather than split mid-character.
    name.get(..cut).unwrap_or(name).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_centi_and_milli_forms() {
        let lines = parse_synced_lyrics("[00:12.34]one\n[00:15.345]two\n");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].start_time_ms, 12_340);
        assert_eq!(lines[1].start_time_ms, 15_345);
        // End of line 0 is line 1's start; tail gets +5s.
        assert_eq!(lines[0].end_time_ms, 15_345);
        assert_eq!(lines[1].end_time_ms, 20_345);
    }

    #[test]
    fn background_tags_attach_to_previous_line() {
        let lines = parse_synced_lyrics("[00:01.00]lead\n[bg:echo]\n[00:02.00]next\n");
        assert_eq!(lines.len(), 2);
        assert!(lines[0].words.contains("[bg:echo]"));
    }

    #[test]
    fn emit_parse_roundtrip_preserves_timing() {
        let source = "[00:10.00]alpha\n[00:20.50]beta\n[01:02.03]gamma";
        let lines = parse_synced_lyrics(source);
        let response = LyricsResponse {
            lines: lines.clone(),
            sync_type: SyncType::LineSynced,
            instrumental: false,
            plain_lyrics: String::new(),
            provider: "test".to_string(),
            source: "test".to_string(),
        };
        let emitted = convert_to_lrc_with_metadata(&response, "Track", "Artist");
        assert!(emitted.starts_with("[ti:Track]\n[ar:Artist]\n[by:aria]\n"));

        let reparsed = parse_synced_lyrics(&emitted);
        assert_eq!(reparsed.len(), lines.len());
        for (a, b) in reparsed.iter().zip(lines.iter()) {
            assert_eq!(a.start_time_ms, b.start_time_ms);
            assert_eq!(a.words, b.words);
        }
    }

    #[test]
    fn timestamp_formatting() {
        assert_eq!(ms_to_lrc_timestamp(62_030), "[01:02.03]");
        assert_eq!(ms_to_lrc_timestamp_inline(500), "00:00.50");
    }

    #[test]
    fn simplify_strips_qualifiers() {
        assert_eq!(simplify_track_name("Song (feat. Guest)"), "song");
        assert_eq!(simplify_track_name("Song - 2011 Remaster"), "song");
        assert_eq!(simplify_track_name("Doctor / Cops"), "doctor cops");
    }

    #[test]
    fn primary_artist_extraction() {
        assert_eq!(normalize_artist_name("A, B & C"), "A");
        assert_eq!(normalize_artist_name("Solo"), "Solo");
        assert_eq!(normalize_artist_name("X feat. Y"), "X");
    }
}
