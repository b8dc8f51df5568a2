use thiserror::Error;

/// Engine-wide error taxonomy. The FFI layer maps variants onto the
/// `error_type` discriminator strings the host understands.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Spotify client credentials were never configured by the host.
    #[error("spotify credentials not configured: {0}")]
    NoCredentials(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited (429)")]
    RateLimited { retry_after: Option<u64> },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("transport error: {0}")]
    Transport(String),

    /// Positive ISP-blocking detection. Never retried.
    #[error("ISP blocking detected for {domain}: {reason} - try using VPN or change DNS to 1.1.1.1/8.8.8.8")]
    IspBlocking {
        domain: String,
        reason: String,
        #[source]
        cause: Option<reqwest::Error>,
    },

    /// Stream URL resolved but the payload is encrypted; the caller decrypts
    /// with the supplied key.
    #[error("stream requires client-side decryption")]
    EncryptedStream { url: String, key: String, format: String },

    #[error("download cancelled")]
    Cancelled,

    #[error("incomplete download: expected {expected} bytes, got {written} bytes")]
    IncompleteDownload { expected: u64, written: u64 },

    #[error("extension error: {0}")]
    Extension(String),

    #[error("all providers failed: {0}")]
    AllProvidersFailed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("{0}")]
    Other(String),
}

impl EngineError {
    /// Stable discriminator for host-facing responses.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::NoCredentials(_) => "no_credentials",
            Self::NotFound(_) => "not_found",
            Self::RateLimited { .. } => "rate_limited",
            Self::IspBlocking { .. } => "isp_blocking",
            Self::EncryptedStream { .. } => "encrypted_stream",
            Self::Cancelled => "cancelled",
            Self::IncompleteDownload { .. } => "incomplete_download",
            Self::Extension(_) => "extension_error",
            Self::AllProvidersFailed(_) => "all_providers_failed",
            _ => "resolve_failed",
        }
    }

    /// Heuristic used when classifying provider failures for the host: the
    /// adapters surface vendor "nothing matched" conditions as plain text.
    pub fn is_not_found_message(message: &str) -> bool {
        let lower = message.trim().to_ascii_lowercase();
        if lower.is_empty() {
            return false;
        }
        const PATTERNS: &[&str] = &[
            "failed to find tidal track",
            "failed to find qobuz track",
            "could not find amazon url",
            "could not find youtube url",
            "could not find track",
            "no tracks found",
            "track not available",
            "track not found",
            "no stream provider available",
        ];
        PATTERNS.iter().any(|p| lower.contains(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_type_discriminators() {
        assert_eq!(EngineError::Cancelled.error_type(), "cancelled");
        assert_eq!(
            EngineError::NotFound("x".into()).error_type(),
            "not_found"
        );
        assert_eq!(
            EngineError::IncompleteDownload { expected: 10, written: 5 }.error_type(),
            "incomplete_download"
        );
        assert_eq!(
            EngineError::Parse("bad".into()).error_type(),
            "resolve_failed"
        );
    }

    #[test]
    fn not_found_message_patterns() {
        assert!(EngineError::is_not_found_message("No tracks found for ISRC"));
        assert!(EngineError::is_not_found_message("failed to find Tidal track: x"));
        assert!(!EngineError::is_not_found_message("server exploded"));
        assert!(!EngineError::is_not_found_message(""));
    }
}
