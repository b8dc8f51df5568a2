use url::Url;

/// Outcome of the ISP-blocking heuristics for one failed request.
#[derive(Debug, Clone)]
pub struct IspBlockIndication {
    pub domain: String,
    pub reason: String,
}

pub(crate) fn extract_domain(raw_url: &str) -> String {
    if raw_url.is_empty() {
        return "unknown".to_string();
    }
    if let Ok(parsed) = Url::parse(raw_url) {
        if let Some(host) = parsed.host_str() {
            return host.to_string();
        }
    }
    let stripped = raw_url
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    match stripped.find('/') {
        Some(idx) if idx > 0 => stripped[..idx].to_string(),
        _ => stripped.to_string(),
    }
}

/// Classify a transport error against known ISP interception signatures.
///
/// Operates on the rendered error chain because reqwest wraps hyper/rustls
/// errors opaquely; the distinguishing detail survives only in the text.
pub fn classify_blocking(err: &reqwest::Error, request_url: &str) -> Option<IspBlockIndication> {
    let domain = extract_domain(request_url);

    let mut chain = String::new();
    chain.push_str(&err.to_string().to_ascii_lowercase());
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        chain.push(' ');
        chain.push_str(&inner.to_string().to_ascii_lowercase());
        source = inner.source();
    }

    const PATTERNS: &[(&str, &str)] = &[
        ("dns error", "DNS resolution failed - domain may be blocked by ISP"),
        ("no such host", "DNS lookup failed - domain may be blocked by ISP"),
        ("failed to lookup address", "DNS resolution failed - domain may be blocked by ISP"),
        ("connection refused", "Connection refused - port may be blocked by ISP/firewall"),
        ("connection reset", "Connection reset - ISP may be intercepting traffic"),
        ("timed out", "Connection timed out - ISP may be blocking access"),
        ("network unreachable", "Network unreachable - ISP may be blocking route"),
        ("host unreachable", "Host unreachable - ISP may be blocking destination"),
        ("invalid peer certificate", "Certificate error - ISP may be using MITM proxy"),
        ("certificate", "Certificate error - ISP may be using MITM proxy"),
        ("tls", "TLS error - ISP may be intercepting HTTPS traffic"),
        ("unexpected eof", "Connection closed unexpectedly - ISP may be blocking"),
    ];

    for (pattern, reason) in PATTERNS {
        if chain.contains(pattern) {
            return Some(IspBlockIndication {
                domain: domain.clone(),
                reason: (*reason).to_string(),
            });
        }
    }
    None
}

/// Indicator substrings that mark a 403/451 body as an ISP block page rather
/// than an origin-server refusal.
pub(crate) fn body_looks_like_block_page(body: &str) -> Option<&'static str> {
    const INDICATORS: &[&str] = &[
        "blocked",
        "forbidden",
        "access denied",
        "not available in your",
        "restricted",
        "censored",
        "unavailable for legal",
        "blocked by",
    ];
    let lower = body.to_ascii_lowercase();
    INDICATORS.iter().find(|i| lower.contains(**i)).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_extraction() {
        assert_eq!(extract_domain("https://api.song.link/v1?x=1"), "api.song.link");
        assert_eq!(extract_domain("api.deezer.com/track/1"), "api.deezer.com");
        assert_eq!(extract_domain(""), "unknown");
    }

    #[test]
    fn block_page_indicators() {
        assert_eq!(
            body_looks_like_block_page("<html>Access Denied by policy</html>"),
            Some("access denied")
        );
        assert_eq!(body_looks_like_block_page("all good"), None);
    }
}
