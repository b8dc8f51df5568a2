pub mod apple;
pub mod lrclib;
pub mod musixmatch;
pub mod netease;
pub mod qq;

use serde_json::Value;

/// Lyrics proxies sometimes answer 200 with a JSON error envelope instead of
/// lyric content; detect those so the cascade moves on.
pub(crate) fn detect_error_payload(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    let payload: Value = serde_json::from_str(trimmed).ok()?;
    let obj = payload.as_object()?;

    const LYRICS_KEYS: &[&str] = &[
        "lyrics", "lyric", "lrc", "content", "lines", "syncedLyrics", "unsyncedLyrics",
    ];
    if LYRICS_KEYS.iter().any(|k| obj.contains_key(*k)) {
        return None;
    }

    for key in ["message", "error", "detail", "reason"] {
        if let Some(msg) = obj.get(key).and_then(Value::as_str) {
            let msg = msg.trim();
            if !msg.is_empty() {
                return Some(msg.to_string());
            }
        }
    }
    if obj.get("success").and_then(Value::as_bool) == Some(false) {
        return Some("request unsuccessful".to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_payloads_detected() {
        assert_eq!(
            detect_error_payload(r#"{"message":"not found"}"#),
            Some("not found".to_string())
        );
        assert_eq!(
            detect_error_payload(r#"{"success":false}"#),
            Some("request unsuccessful".to_string())
        );
        assert!(detect_error_payload(r#"{"lyrics":"...", "message":"x"}"#).is_none());
        assert!(detect_error_payload("[00:01.00]line").is_none());
    }
}
