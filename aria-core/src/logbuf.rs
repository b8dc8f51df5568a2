use std::collections::VecDeque;
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use regex::Regex;
use serde::{Deserialize, Serialize};

const MAX_ENTRIES: usize = 1000;
const MAX_MESSAGE_CHARS: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: String,
    pub tag: String,
    pub message: String,
}

struct LogBuffer {
    entries: VecDeque<LogEntry>,
    /// Index of the first retained entry since process start; keeps
    /// `get_since` cursors stable across ring eviction.
    base_index: usize,
    enabled: bool,
}

fn buffer() -> &'static Mutex<LogBuffer> {
    static BUF: OnceLock<Mutex<LogBuffer>> = OnceLock::new();
    BUF.get_or_init(|| {
        Mutex::new(LogBuffer {
            entries: VecDeque::with_capacity(MAX_ENTRIES),
            base_index: 0,
            // Sub-error levels are off by default; the host can enable them.
            enabled: false,
        })
    })
}

fn redaction_patterns() -> &'static [Regex; 4] {
    static RE: OnceLock<[Regex; 4]> = OnceLock::new();
    RE.get_or_init(|| {
        [
            Regex::new(r"(?i)\bAuthorization\b\s*[:=]\s*Bearer\s+[A-Za-z0-9._~+/\-]+=*")
                .expect("authorization pattern"),
            Regex::new(
                r"(?i)\b(access[_\s-]?token|refresh[_\s-]?token|id[_\s-]?token|client[_\s-]?secret|authorization|password|api[_\s-]?key)\b(\s*[:=]\s*)([^\s,;]+)",
            )
            .expect("key-value pattern"),
            Regex::new(
                r"(?i)([?&](?:access_token|refresh_token|id_token|token|client_secret|api_key|apikey|password)=)[^&\s]+",
            )
            .expect("query pattern"),
            Regex::new(r"(?i)\bBearer\s+[A-Za-z0-9._~+/\-]+=*").expect("bearer pattern"),
        ]
    })
}

/// Redact credential-shaped substrings before a message hits storage.
pub fn redact(message: &str) -> String {
    let [auth, kv, query, bearer] = redaction_patterns();
    let out = auth.replace_all(message, "Authorization: Bearer [REDACTED]");
    let out = kv.replace_all(&out, "${1}${2}[REDACTED]");
    let out = query.replace_all(&out, "${1}[REDACTED]");
    let out = bearer.replace_all(&out, "Bearer [REDACTED]");
    out.into_owned()
}

fn truncate(message: &str) -> String {
    let count = message.chars().count();
    if count <= MAX_MESSAGE_CHARS {
        return message.to_string();
    }
    let mut out: String = message.chars().take(MAX_MESSAGE_CHARS).collect();
    out.push_str("...[truncated]");
    out
}

fn wall_clock_hms() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let secs = now.as_secs();
    let millis = now.subsec_millis();
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        (secs / 3600) % 24,
        (secs / 60) % 60,
        secs % 60,
        millis
    )
}

pub fn set_enabled(enabled: bool) {
    if let Ok(mut buf) = buffer().lock() {
        buf.enabled = enabled;
    }
}

pub fn is_enabled() -> bool {
    buffer().lock().map(|b| b.enabled).unwrap_or(false)
}

pub fn add(level: &str, tag: &str, message: &str) {
    match level {
        "ERROR" | "FATAL" => tracing::error!(target: "aria", "[{tag}] {message}"),
        "WARN" => tracing::warn!(target: "aria", "[{tag}] {message}"),
        "DEBUG" => tracing::debug!(target: "aria", "[{tag}] {message}"),
        _ => tracing::info!(target: "aria", "[{tag}] {message}"),
    }

    let Ok(mut buf) = buffer().lock() else {
        return;
    };
    // Errors are always retained so the host can surface failures even with
    // verbose logging switched off.
    if !buf.enabled && level != "ERROR" && level != "FATAL" {
        return;
    }

    let message = truncate(&redact(message));
    if buf.entries.len() >= MAX_ENTRIES {
        buf.entries.pop_front();
        buf.base_index += 1;
    }
    buf.entries.push_back(LogEntry {
        timestamp: wall_clock_hms(),
        level: level.to_string(),
        tag: tag.to_string(),
        message,
    });
}

pub fn debug(tag: &str, message: impl AsRef<str>) {
    add("DEBUG", tag, message.as_ref());
}

pub fn info(tag: &str, message: impl AsRef<str>) {
    add("INFO", tag, message.as_ref());
}

pub fn warn(tag: &str, message: impl AsRef<str>) {
    add("WARN", tag, message.as_ref());
}

pub fn error(tag: &str, message: impl AsRef<str>) {
    add("ERROR", tag, message.as_ref());
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogPage {
    pub logs: Vec<LogEntry>,
    pub next_index: usize,
}

/// Entries at absolute index >= `index`, plus the cursor for the next poll.
pub fn get_since(index: usize) -> LogPage {
    let Ok(buf) = buffer().lock() else {
        return LogPage { logs: Vec::new(), next_index: index };
    };
    let end = buf.base_index + buf.entries.len();
    let start = index.clamp(buf.base_index, end);
    let logs = buf
        .entries
        .iter()
        .skip(start - buf.base_index)
        .cloned()
        .collect();
    LogPage { logs, next_index: end }
}

pub fn get_all() -> Vec<LogEntry> {
    buffer()
        .lock()
        .map(|b| b.entries.iter().cloned().collect())
        .unwrap_or_default()
}

pub fn clear() {
    if let Ok(mut buf) = buffer().lock() {
        let evicted = buf.entries.len();
        buf.entries.clear();
        buf.base_index += evicted;
    }
}

pub fn count() -> usize {
    buffer().lock().map(|b| b.entries.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_bearer_and_key_value_tokens() {
        let s = redact("Authorization: Bearer abc.def-ghi sent access_token=sekrit123 ok");
        assert!(!s.contains("abc.def-ghi"), "{s}");
        assert!(!s.contains("sekrit123"), "{s}");
        assert!(s.contains("[REDACTED]"));
    }

    #[test]
    fn redacts_refresh_token_and_query_params() {
        let s = redact("callback?refresh_token=aaa&x=1 refresh_token=bbb");
        assert!(!s.contains("aaa"), "{s}");
        assert!(!s.contains("bbb"), "{s}");
    }

    #[test]
    fn plain_text_untouched() {
        let s = "searching tidal for artist - title";
        assert_eq!(redact(s), s);
    }

    // Single test so the global buffer is not mutated from parallel threads.
    #[test]
    fn buffer_filtering_and_cursor() {
        set_enabled(false);
        clear();
        let base = get_since(usize::MAX).next_index;
        add("DEBUG", "t", "dropped");
        add("ERROR", "t", "kept");
        let page = get_since(base);
        assert_eq!(page.logs.len(), 1);
        assert_eq!(page.logs[0].level, "ERROR");

        set_enabled(true);
        add("INFO", "t", "one");
        add("INFO", "t", "two");
        let page2 = get_since(page.next_index);
        assert_eq!(page2.logs.len(), 2);
        assert!(get_since(page2.next_index).logs.is_empty());
        set_enabled(false);
    }
}
