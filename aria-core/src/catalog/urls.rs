use serde::Serialize;
use url::Url;

use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedUri {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub id: String,
}

fn invalid() -> EngineError {
    EngineError::InvalidRequest("invalid Spotify URL or URI".to_string())
}

const SPOTIFY_ENTITY_TYPES: &[&str] = &["album", "track", "playlist", "artist"];

/// Accepts `spotify:type:id`, `open.spotify.com/[intl-xx/][embed/]type/id`,
/// `embed.spotify.com?uri=...`, `/user/.../playlist/id` and bare playlist
/// IDs.
pub fn parse_spotify_uri(input: &str) -> Result<ParsedUri, EngineError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(invalid());
    }

    if let Some(rest) = trimmed.strip_prefix("spotify:") {
        let parts: Vec<&str> = rest.split(':').collect();
        if parts.len() == 2 && SPOTIFY_ENTITY_TYPES.contains(&parts[0]) {
            return Ok(ParsedUri {
                entity_type: parts[0].to_string(),
                id: parts[1].to_string(),
            });
        }
        return Err(invalid());
    }

    let Ok(parsed) = Url::parse(trimmed) else {
        // Plain ID with no scheme/host defaults to playlist.
        let id = trimmed.trim_matches('/');
        if id.is_empty() || id.contains('/') {
            return Err(invalid());
        }
        return Ok(ParsedUri {
            entity_type: "playlist".to_string(),
            id: id.to_string(),
        });
    };

    let host = parsed.host_str().unwrap_or_default();
    if host == "embed.spotify.com" {
        let embedded = parsed
            .query_pairs()
            .find(|(k, _)| k == "uri")
            .map(|(_, v)| v.into_owned())
            .ok_or_else(invalid)?;
        return parse_spotify_uri(&embedded);
    }

    if host != "open.spotify.com" && host != "play.spotify.com" {
        return Err(invalid());
    }

    let mut parts: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();

    if parts.first() == Some(&"embed") {
        parts.remove(0);
    }
    if parts.first().map(|p| p.starts_with("intl-")).unwrap_or(false) {
        parts.remove(0);
    }

    if parts.len() == 2 && SPOTIFY_ENTITY_TYPES.contains(&parts[0]) {
        return Ok(ParsedUri {
            entity_type: parts[0].to_string(),
            id: parts[1].to_string(),
        });
    }
    // Nested playlist URLs: /user/{user}/playlist/{id}
    if parts.len() == 4 && parts[2] == "playlist" {
        return Ok(ParsedUri {
            entity_type: "playlist".to_string(),
            id: parts[3].to_string(),
        });
    }

    Err(invalid())
}

/// `deezer.com/[lang/]type/id` and `deezer.page.link` short links.
pub fn parse_deezer_url(input: &str) -> Result<ParsedUri, EngineError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(EngineError::InvalidRequest("empty URL".to_string()));
    }
    let parsed =
        Url::parse(trimmed).map_err(|_| EngineError::InvalidRequest("invalid URL".to_string()))?;

    let host = parsed.host_str().unwrap_or_default();
    if host != "www.deezer.com" && host != "deezer.com" && host != "deezer.page.link" {
        return Err(EngineError::InvalidRequest("not a Deezer URL".to_string()));
    }

    let mut parts: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();

    // Two-letter language prefix, e.g. /en/track/123.
    if parts.first().map(|p| p.len() == 2).unwrap_or(false) {
        parts.remove(0);
    }
    if parts.len() < 2 {
        return Err(EngineError::InvalidRequest(
            "invalid Deezer URL format".to_string(),
        ));
    }

    match parts[0] {
        "track" | "album" | "artist" | "playlist" => Ok(ParsedUri {
            entity_type: parts[0].to_string(),
            id: parts[1].to_string(),
        }),
        other => Err(EngineError::InvalidRequest(format!(
            "unsupported Deezer resource type: {other}"
        ))),
    }
}

/// Last path segment of a Deezer-style URL (query stripped).
pub(crate) fn last_numeric_segment(link: &str) -> String {
    let trimmed = link.split('?').next().unwrap_or("");
    trimmed
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spotify_uri_forms() {
        let cases = [
            ("spotify:track:4iV5W9uYEdYUVa79Axb7Rh", "track", "4iV5W9uYEdYUVa79Axb7Rh"),
            ("https://open.spotify.com/track/4iV5W9uYEdYUVa79Axb7Rh?si=x", "track", "4iV5W9uYEdYUVa79Axb7Rh"),
            ("https://open.spotify.com/intl-ja/album/abc123", "album", "abc123"),
            ("https://open.spotify.com/embed/playlist/p1", "playlist", "p1"),
            ("https://open.spotify.com/user/u1/playlist/p2", "playlist", "p2"),
            ("https://embed.spotify.com/?uri=spotify:artist:a9", "artist", "a9"),
        ];
        for (input, ty, id) in cases {
            let parsed = parse_spotify_uri(input).unwrap_or_else(|e| panic!("{input}: {e}"));
            assert_eq!(parsed.entity_type, ty, "{input}");
            assert_eq!(parsed.id, id, "{input}");
        }
    }

    #[test]
    fn spotify_rejects_garbage() {
        assert!(parse_spotify_uri("").is_err());
        assert!(parse_spotify_uri("https://example.com/track/x").is_err());
        assert!(parse_spotify_uri("spotify:nope:x").is_err());
    }

    #[test]
    fn deezer_url_forms() {
        let parsed = parse_deezer_url("https://www.deezer.com/en/track/3135556").unwrap();
        assert_eq!(parsed.entity_type, "track");
        assert_eq!(parsed.id, "3135556");

        let parsed = parse_deezer_url("https://deezer.com/album/42").unwrap();
        assert_eq!(parsed.entity_type, "album");

        assert!(parse_deezer_url("https://deezer.com/radio/1").is_err());
        assert!(parse_deezer_url("https://spotify.com/track/1").is_err());
    }

    #[test]
    fn last_segment_extraction() {
        assert_eq!(last_numeric_segment("https://www.deezer.com/track/3135556?x=1"), "3135556");
        assert_eq!(last_numeric_segment("https://tidal.com/browse/track/999"), "999");
    }
}
