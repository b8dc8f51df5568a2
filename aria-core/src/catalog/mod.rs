mod cache;
pub mod deezer;
pub mod model;
pub mod spotify;
mod urls;

pub use cache::TtlCache;
pub use urls::{parse_deezer_url, parse_spotify_uri, ParsedUri};
