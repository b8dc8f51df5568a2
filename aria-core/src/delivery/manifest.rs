//! Tidal v2 manifest decoding: a base64 blob that is either BTS JSON
//! (direct, single-part stream) or a DASH MPD with a segment timeline.

use std::sync::OnceLock;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use serde::Deserialize;

use crate::error::EngineError;
use crate::logbuf;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedManifest {
    /// Non-empty for BTS manifests: the whole stream in one URL.
    pub direct_url: String,
    /// DASH initialization segment URL.
    pub init_url: String,
    /// DASH media segment URLs, $Number$-instantiated from 1.
    pub media_urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct BtsManifest {
    #[serde(default)]
    urls: Vec<String>,
}

fn unescape_entities(s: &str) -> String {
    s.replace("&amp;", "&")
}

struct DashTemplate {
    init: String,
    media: String,
    segment_count: usize,
}

fn parse_dash_xml(manifest: &str) -> DashTemplate {
    let mut template = DashTemplate {
        init: String::new(),
        media: String::new(),
        segment_count: 0,
    };

    let mut reader = Reader::from_str(manifest);
    reader.config_mut().trim_text(true);
    let mut in_timeline = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if name == "SegmentTemplate" {
                    for attr in e.attributes().flatten() {
                        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                        let value = String::from_utf8_lossy(&attr.value).into_owned();
                        if key == "initialization" && template.init.is_empty() {
                            template.init = unescape_entities(&value);
                        } else if key == "media" && template.media.is_empty() {
                            template.media = unescape_entities(&value);
                        }
                    }
                } else if name == "SegmentTimeline" {
                    in_timeline = true;
                } else if name == "S" && in_timeline {
                    let mut repeat = 0usize;
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"r" {
                            repeat = String::from_utf8_lossy(&attr.value)
                                .parse()
                                .unwrap_or(0);
                        }
                    }
                    // Each S entry is one segment plus r repeats.
                    template.segment_count += repeat + 1;
                }
            }
            Ok(Event::End(ref e)) => {
                if e.name().as_ref() == b"SegmentTimeline" {
                    in_timeline = false;
                }
            }
            Ok(Event::Eof) => break,
            Err(err) => {
                logbuf::debug("Tidal", format!("MPD XML error: {err}, falling back to regex"));
                break;
            }
            _ => {}
        }
    }

    template
}

fn regex_fallback(manifest: &str, template: &mut DashTemplate) {
    static INIT_RE: OnceLock<Regex> = OnceLock::new();
    static MEDIA_RE: OnceLock<Regex> = OnceLock::new();
    static SEG_RE: OnceLock<Regex> = OnceLock::new();

    let init_re = INIT_RE.get_or_init(|| Regex::new(r#"initialization="([^"]+)""#).expect("init re"));
    let media_re = MEDIA_RE.get_or_init(|| Regex::new(r#"media="([^"]+)""#).expect("media re"));
    let seg_re =
        SEG_RE.get_or_init(|| Regex::new(r#"<S\s+d="(\d+)"(?:\s+r="(\d+)")?"#).expect("seg re"));

    if template.init.is_empty() {
        if let Some(caps) = init_re.captures(manifest) {
            template.init = unescape_entities(&caps[1]);
        }
    }
    if template.media.is_empty() {
        if let Some(caps) = media_re.captures(manifest) {
            template.media = unescape_entities(&caps[1]);
        }
    }
    if template.segment_count == 0 {
        for caps in seg_re.captures_iter(manifest) {
            let repeat: usize = caps
                .get(2)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0);
            template.segment_count += repeat + 1;
        }
    }
}

/// Decode a Tidal v2 manifest blob into either a direct URL or a DASH
/// init+segments list.
pub fn parse_manifest(manifest_b64: &str) -> Result<ParsedManifest, EngineError> {
    let bytes = B64
        .decode(manifest_b64.trim())
        .map_err(|e| EngineError::Parse(format!("failed to decode manifest: {e}")))?;
    let manifest = String::from_utf8_lossy(&bytes).into_owned();

    if manifest.trim_start().starts_with('{') {
        let bts: BtsManifest = serde_json::from_slice(&bytes)
            .map_err(|e| EngineError::Parse(format!("failed to parse BTS manifest: {e}")))?;
        let Some(first) = bts.urls.into_iter().next() else {
            return Err(EngineError::Parse("no URLs in BTS manifest".to_string()));
        };
        return Ok(ParsedManifest {
            direct_url: first,
            ..Default::default()
        });
    }

    let mut template = parse_dash_xml(&manifest);
    if template.init.is_empty() || template.media.is_empty() || template.segment_count == 0 {
        regex_fallback(&manifest, &mut template);
    }

    if template.init.is_empty() {
        return Err(EngineError::Parse(
            "no initialization URL found in manifest".to_string(),
        ));
    }
    if template.media.is_empty() {
        return Err(EngineError::Parse("no media URL template found in manifest".to_string()));
    }
    if template.segment_count == 0 {
        return Err(EngineError::Parse("no segments found in manifest".to_string()));
    }

    let media_urls = (1..=template.segment_count)
        .map(|i| template.media.replace("$Number$", &i.to_string()))
        .collect();

    Ok(ParsedManifest {
        direct_url: String::new(),
        init_url: template.init,
        media_urls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(s: &str) -> String {
        B64.encode(s)
    }

    #[test]
    fn bts_manifest_yields_direct_url() {
        let blob = encode(
            r#"{"mimeType":"audio/flac","codecs":"flac","encryptionType":"NONE","urls":["https://cdn/a.flac","https://cdn/b.flac"]}"#,
        );
        let parsed = parse_manifest(&blob).unwrap();
        assert_eq!(parsed.direct_url, "https://cdn/a.flac");
        assert!(parsed.init_url.is_empty());
        assert!(parsed.media_urls.is_empty());
    }

    #[test]
    fn dash_manifest_counts_segments() {
        let mpd = r#"<?xml version="1.0"?>
<MPD><Period><AdaptationSet><Representation>
<SegmentTemplate initialization="https://cdn/init.mp4?a=1&amp;b=2" media="https://cdn/seg_$Number$.mp4">
<SegmentTimeline><S d="9600" r="2"/><S d="4800"/></SegmentTimeline>
</SegmentTemplate>
</Representation></AdaptationSet></Period></MPD>"#;
        let parsed = parse_manifest(&encode(mpd)).unwrap();
        // d=9600 r=2 contributes 3, the trailing S one more.
        assert_eq!(parsed.media_urls.len(), 4);
        assert_eq!(parsed.init_url, "https://cdn/init.mp4?a=1&b=2");
        assert_eq!(parsed.media_urls[0], "https://cdn/seg_1.mp4");
        assert_eq!(parsed.media_urls[3], "https://cdn/seg_4.mp4");
    }

    #[test]
    fn malformed_xml_uses_regex_fallback() {
        let broken = r#"<MPD><SegmentTemplate initialization="https://cdn/i.mp4" media="https://cdn/m_$Number$.mp4"><SegmentTimeline><S d="100" r="1"><oops</MPD"#;
        let parsed = parse_manifest(&encode(broken)).unwrap();
        assert_eq!(parsed.media_urls.len(), 2);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_manifest("not-base64!!").is_err());
        assert!(parse_manifest(&encode("{\"urls\":[]}")).is_err());
        assert!(parse_manifest(&encode("<MPD></MPD>")).is_err());
    }
}
