use std::sync::Once;

static PROVIDER: Once = Once::new();

/// Select a process-level rustls CryptoProvider before the first TLS handshake.
///
/// When both ring and aws-lc end up in the dependency graph, rustls refuses to
/// pick one implicitly. The host may also have installed a provider already,
/// so the install result is ignored.
pub fn ensure_rustls_provider() {
    PROVIDER.call_once(|| {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}
