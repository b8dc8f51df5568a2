mod blocking;
mod client;
mod ratelimit;
mod retry;

pub use blocking::{classify_blocking, IspBlockIndication};
pub use client::{
    close_idle_connections, download_client, random_desktop_user_agent, shared_client,
    DEFAULT_TIMEOUT, DOWNLOAD_TIMEOUT, SONGLINK_TIMEOUT,
};
pub use ratelimit::{idhs_limiter, songlink_limiter, RateLimiter};
pub use retry::{read_body_bytes, request, request_with_retry, RetryConfig};
