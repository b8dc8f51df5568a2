use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncType {
    LineSynced,
    Unsynced,
    Instrumental,
}

impl SyncType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LineSynced => "LINE_SYNCED",
            Self::Unsynced => "UNSYNCED",
            Self::Instrumental => "INSTRUMENTAL",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LyricsLine {
    pub start_time_ms: i64,
    pub words: String,
    /// 0 means unknown; inferred as the next line's start at emission.
    pub end_time_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LyricsResponse {
    pub lines: Vec<LyricsLine>,
    pub sync_type: SyncType,
    #[serde(default)]
    pub instrumental: bool,
    #[serde(default)]
    pub plain_lyrics: String,
    pub provider: String,
    pub source: String,
}

impl LyricsResponse {
    pub fn unsynced_from_plain(text: &str, provider: &str, source: &str) -> Self {
        let lines = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| LyricsLine {
                start_time_ms: 0,
                words: l.to_string(),
                end_time_ms: 0,
            })
            .collect();
        Self {
            lines,
            sync_type: SyncType::Unsynced,
            instrumental: false,
            plain_lyrics: text.to_string(),
            provider: provider.to_string(),
            source: source.to_string(),
        }
    }
}

/// Provider-specific lyric fetch behaviour, configured by the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LyricsFetchOptions {
    #[serde(default)]
    pub include_translation_netease: bool,
    #[serde(default)]
    pub include_romanization_netease: bool,
    #[serde(default = "default_true")]
    pub multi_person_word_by_word: bool,
    #[serde(default)]
    pub musixmatch_language: String,
}

fn default_true() -> bool {
    true
}

impl Default for LyricsFetchOptions {
    fn default() -> Self {
        Self {
            include_translation_netease: false,
            include_romanization_netease: false,
            multi_person_word_by_word: true,
            musixmatch_language: String::new(),
        }
    }
}

impl LyricsFetchOptions {
    /// Clamp the language override to a plain short code.
    pub fn normalized(mut self) -> Self {
        let lang: String = self
            .musixmatch_language
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .take(16)
            .collect();
        self.musixmatch_language = lang;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_options_language_normalization() {
        let opts = LyricsFetchOptions {
            musixmatch_language: "  EN_us; drop table".to_string(),
            ..Default::default()
        };
        assert_eq!(opts.normalized().musixmatch_language, "en_usdroptable");
    }

    #[test]
    fn unsynced_from_plain_skips_blank_lines() {
        let resp = LyricsResponse::unsynced_from_plain("a\n\n b \n", "P", "S");
        assert_eq!(resp.lines.len(), 2);
        assert_eq!(resp.lines[1].words, "b");
        assert_eq!(resp.sync_type, SyncType::Unsynced);
    }
}
