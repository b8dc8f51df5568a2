use std::time::Duration;

use bytes::Bytes;
use reqwest::{Client, Method, Response, StatusCode};

use crate::error::EngineError;
use crate::logbuf;

use super::blocking::{body_looks_like_block_page, classify_blocking, extract_domain};
use super::client::random_desktop_user_agent;

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(16),
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    fn next_delay(&self, current: Duration) -> Duration {
        let scaled = current.mul_f64(self.backoff_factor);
        scaled.min(self.max_delay)
    }
}

/// Parse `Retry-After` as integer seconds or an HTTP date. Missing or
/// malformed values fall back to 60s.
fn retry_after_duration(resp: &Response) -> Duration {
    const DEFAULT: Duration = Duration::from_secs(60);
    let Some(raw) = resp
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
    else {
        return DEFAULT;
    };
    if let Ok(secs) = raw.trim().parse::<u64>() {
        return Duration::from_secs(secs);
    }
    if let Ok(when) = httpdate_parse(raw.trim()) {
        let now = std::time::SystemTime::now();
        if let Ok(until) = when.duration_since(now) {
            return until;
        }
    }
    DEFAULT
}

// RFC 7231 IMF-fixdate, e.g. "Wed, 21 Oct 2015 07:28:00 GMT".
fn httpdate_parse(s: &str) -> Result<std::time::SystemTime, ()> {
    let parts: Vec<&str> = s.split_whitespace().collect();
    if parts.len() != 6 || !parts[5].eq_ignore_ascii_case("GMT") {
        return Err(());
    }
    let day: u64 = parts[1].parse().map_err(|_| ())?;
    let month = match parts[2] {
        "Jan" => 1u64, "Feb" => 2, "Mar" => 3, "Apr" => 4, "May" => 5, "Jun" => 6,
        "Jul" => 7, "Aug" => 8, "Sep" => 9, "Oct" => 10, "Nov" => 11, "Dec" => 12,
        _ => return Err(()),
    };
    let year: u64 = parts[3].parse().map_err(|_| ())?;
    let hms: Vec<u64> = parts[4]
        .split(':')
        .map(|p| p.parse().map_err(|_| ()))
        .collect::<Result<_, _>>()?;
    if hms.len() != 3 || year < 1970 {
        return Err(());
    }

    let is_leap = |y: u64| (y % 4 == 0 && y % 100 != 0) || y % 400 == 0;
    let days_in = |m: u64, y: u64| match m {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        _ => if is_leap(y) { 29 } else { 28 },
    };
    let mut days: u64 = 0;
    for y in 1970..year {
        days += if is_leap(y) { 366 } else { 365 };
    }
    for m in 1..month {
        days += days_in(m, year);
    }
    days += day.saturating_sub(1);
    let secs = days * 86_400 + hms[0] * 3600 + hms[1] * 60 + hms[2];
    Ok(std::time::UNIX_EPOCH + Duration::from_secs(secs))
}

async fn sniff_block_page(resp: Response, url: &str) -> Result<Response, EngineError> {
    let status = resp.status();
    if status != StatusCode::FORBIDDEN && status.as_u16() != 451 {
        return Ok(resp);
    }
    let domain = extract_domain(url);
    let body = resp.text().await.unwrap_or_default();
    if let Some(indicator) = body_looks_like_block_page(&body) {
        logbuf::error(
            "HTTP",
            format!("ISP BLOCKING DETECTED via HTTP {status} for {domain} (matched '{indicator}')"),
        );
        return Err(EngineError::IspBlocking {
            domain,
            reason: format!("HTTP {} block page (matched '{indicator}')", status.as_u16()),
            cause: None,
        });
    }
    Err(EngineError::Transport(format!("HTTP {} from {domain}", status.as_u16())))
}

/// One attempt, no retries: randomised User-Agent, ISP-blocking
/// classification on transport failure, status handed back for the caller's
/// own mapping.
pub async fn request<F>(
    client: &Client,
    method: Method,
    url: &str,
    build: F,
) -> Result<Response, EngineError>
where
    F: FnOnce(reqwest::RequestBuilder) -> reqwest::RequestBuilder,
{
    let req = build(client.request(method, url))
        .header(reqwest::header::USER_AGENT, random_desktop_user_agent());
    match req.send().await {
        Ok(resp) => Ok(resp),
        Err(err) => {
            if let Some(block) = classify_blocking(&err, url) {
                logbuf::error(
                    "HTTP",
                    format!("ISP BLOCKING DETECTED: {} ({})", block.domain, block.reason),
                );
                return Err(EngineError::IspBlocking {
                    domain: block.domain,
                    reason: block.reason,
                    cause: Some(err),
                });
            }
            Err(EngineError::Http(err))
        }
    }
}

/// Execute a request with exponential backoff, 429 `Retry-After` handling and
/// ISP-blocking short-circuit. `build` is invoked per attempt so the body can
/// be re-created; each attempt carries a freshly randomised User-Agent.
pub async fn request_with_retry<F>(
    client: &Client,
    method: Method,
    url: &str,
    config: RetryConfig,
    mut build: F,
) -> Result<Response, EngineError>
where
    F: FnMut(reqwest::RequestBuilder) -> reqwest::RequestBuilder,
{
    let mut delay = config.initial_delay;
    let mut last_err: Option<EngineError> = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            tokio::time::sleep(delay).await;
            delay = config.next_delay(delay);
        }

        let req = build(client.request(method.clone(), url))
            .header(reqwest::header::USER_AGENT, random_desktop_user_agent());

        let resp = match req.send().await {
            Ok(r) => r,
            Err(err) => {
                if let Some(block) = classify_blocking(&err, url) {
                    logbuf::error(
                        "HTTP",
                        format!("ISP BLOCKING DETECTED: {} ({})", block.domain, block.reason),
                    );
                    // Retrying a blocked domain only burns time.
                    return Err(EngineError::IspBlocking {
                        domain: block.domain,
                        reason: block.reason,
                        cause: Some(err),
                    });
                }
                logbuf::warn(
                    "HTTP",
                    format!(
                        "request failed (attempt {}/{}): {err}",
                        attempt + 1,
                        config.max_retries + 1
                    ),
                );
                last_err = Some(EngineError::Http(err));
                continue;
            }
        };

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let wait = retry_after_duration(&resp);
            last_err = Some(EngineError::RateLimited {
                retry_after: Some(wait.as_secs()),
            });
            if attempt < config.max_retries {
                logbuf::warn("HTTP", format!("rate limited, waiting {}s", wait.as_secs()));
                tokio::time::sleep(wait).await;
            }
            continue;
        }

        if status == StatusCode::FORBIDDEN || status.as_u16() == 451 {
            match sniff_block_page(resp, url).await {
                Err(e @ EngineError::IspBlocking { .. }) => return Err(e),
                Err(e) => return Err(e),
                Ok(r) => return Ok(r),
            }
        }

        if status.is_server_error() {
            last_err = Some(EngineError::Transport(format!(
                "server error: HTTP {}",
                status.as_u16()
            )));
            continue;
        }

        // Remaining 4xx are terminal; hand the response back for the caller's
        // own status mapping.
        return Ok(resp);
    }

    Err(last_err.unwrap_or_else(|| {
        EngineError::Transport(format!(
            "request failed after {} attempts",
            config.max_retries + 1
        ))
    }))
}

/// Read the full body, rejecting empty payloads.
pub async fn read_body_bytes(resp: Response) -> Result<Bytes, EngineError> {
    let body = resp.bytes().await?;
    if body.is_empty() {
        return Err(EngineError::Transport("response body is empty".to_string()));
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn httpdate_roundtrip() {
        let t = httpdate_parse("Thu, 01 Jan 1970 00:01:40 GMT").unwrap();
        assert_eq!(
            t.duration_since(std::time::UNIX_EPOCH).unwrap().as_secs(),
            100
        );
        assert!(httpdate_parse("not a date").is_err());
    }

    #[test]
    fn backoff_is_capped() {
        let cfg = RetryConfig::default();
        let mut d = cfg.initial_delay;
        for _ in 0..10 {
            d = cfg.next_delay(d);
        }
        assert_eq!(d, Duration::from_secs(16));
    }
}
