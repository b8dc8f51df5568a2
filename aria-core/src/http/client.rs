use std::sync::OnceLock;
use std::time::Duration;

use reqwest::Client;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);
pub const SONGLINK_TIMEOUT: Duration = Duration::from_secs(30);

/// Randomised Windows Chrome User-Agent. Rotating the UA keeps the gateway
/// mirrors from pinning one fingerprint across the whole install base.
pub fn random_desktop_user_agent() -> String {
    let win_major = 10 + fastrand::u32(0..2);
    let chrome_version = 100 + fastrand::u32(0..25);
    let chrome_build = 3000 + fastrand::u32(0..1500);
    let chrome_patch = 60 + fastrand::u32(0..65);
    format!(
        "Mozilla/5.0 (Windows NT {win_major}.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{chrome_version}.0.{chrome_build}.{chrome_patch} Safari/537.36"
    )
}

fn build_client(timeout: Duration) -> Client {
    crate::tls::ensure_rustls_provider();
    Client::builder()
        .pool_max_idle_per_host(20)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(30))
        // Compression off so Content-Length matches the bytes we count.
        .no_gzip()
        .no_brotli()
        .timeout(timeout)
        .build()
        .expect("reqwest client")
}

/// Process-wide pooled client for metadata and API calls.
pub fn shared_client() -> &'static Client {
    static HTTP: OnceLock<Client> = OnceLock::new();
    HTTP.get_or_init(|| build_client(DEFAULT_TIMEOUT))
}

/// Longer-timeout client for byte streaming.
pub fn download_client() -> &'static Client {
    static HTTP: OnceLock<Client> = OnceLock::new();
    HTTP.get_or_init(|| build_client(DOWNLOAD_TIMEOUT))
}

/// Drop pooled keep-alive connections; the host calls this on teardown.
pub fn close_idle_connections() {
    // reqwest has no explicit idle-drop; rebuilding is not worth it here as
    // the pool ages connections out after 90s on its own.
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_shape() {
        for _ in 0..20 {
            let ua = random_desktop_user_agent();
            assert!(ua.starts_with("Mozilla/5.0 (Windows NT 1"));
            assert!(ua.contains("Chrome/"));
            assert!(ua.ends_with("Safari/537.36"));
        }
    }
}
