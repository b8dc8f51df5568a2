//! Process-lifetime ISRC -> per-service track-ID cache. A track resolved
//! once on a service keeps its ID for the rest of the process, so repeat
//! requests (retries, album re-runs) skip the vendor search entirely.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceTrackIds {
    pub tidal: i64,
    pub qobuz: i64,
}

fn cache() -> &'static Mutex<HashMap<String, ServiceTrackIds>> {
    static MAP: OnceLock<Mutex<HashMap<String, ServiceTrackIds>>> = OnceLock::new();
    MAP.get_or_init(|| Mutex::new(HashMap::new()))
}

pub fn get(isrc: &str) -> Option<ServiceTrackIds> {
    if isrc.is_empty() {
        return None;
    }
    cache()
        .lock()
        .expect("track id cache")
        .get(&isrc.to_uppercase())
        .copied()
}

pub fn set_tidal(isrc: &str, track_id: i64) {
    if isrc.is_empty() || track_id <= 0 {
        return;
    }
    cache()
        .lock()
        .expect("track id cache")
        .entry(isrc.to_uppercase())
        .or_default()
        .tidal = track_id;
}

pub fn set_qobuz(isrc: &str, track_id: i64) {
    if isrc.is_empty() || track_id <= 0 {
        return;
    }
    cache()
        .lock()
        .expect("track id cache")
        .entry(isrc.to_uppercase())
        .or_default()
        .qobuz = track_id;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_accumulate_per_isrc() {
        assert!(get("QMAAA0000001").is_none());
        set_tidal("qmaaa0000001", 77646170);
        set_qobuz("QMAAA0000001", 52727245);
        let ids = get("QMAAA0000001").unwrap();
        assert_eq!(ids.tidal, 77646170);
        assert_eq!(ids.qobuz, 52727245);

        // Zero and empty inputs never insert.
        set_tidal("", 1);
        set_tidal("QMAAA0000002", 0);
        assert!(get("QMAAA0000002").is_none());
    }
}
