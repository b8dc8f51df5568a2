use std::collections::HashMap;
use std::io::Write;
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemProgress {
    pub item_id: String,
    pub bytes_total: i64,
    pub bytes_received: i64,
    /// 0.0 to 1.0
    pub progress: f64,
    pub speed_mbps: f64,
    pub is_downloading: bool,
    /// "downloading", "finalizing", "completed"
    pub status: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MultiProgress {
    pub items: HashMap<String, ItemProgress>,
}

/// Legacy single-slot view, derived from the keyed store (the first item
/// still marked downloading, else the most recent entry).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LegacyProgress {
    pub current_file: String,
    /// percentage, 0..100
    pub progress: f64,
    pub speed_mbps: f64,
    pub bytes_total: i64,
    pub bytes_received: i64,
    pub is_downloading: bool,
    pub status: String,
}

fn store() -> &'static Mutex<HashMap<String, ItemProgress>> {
    static MAP: OnceLock<Mutex<HashMap<String, ItemProgress>>> = OnceLock::new();
    MAP.get_or_init(|| Mutex::new(HashMap::new()))
}

pub fn start_item(item_id: &str) {
    if item_id.is_empty() {
        return;
    }
    let mut map = store().lock().expect("progress store");
    map.insert(
        item_id.to_string(),
        ItemProgress {
            item_id: item_id.to_string(),
            bytes_total: 0,
            bytes_received: 0,
            progress: 0.0,
            speed_mbps: 0.0,
            is_downloading: true,
            status: "downloading".to_string(),
        },
    );
}

pub fn set_item_total(item_id: &str, total: i64) {
    let mut map = store().lock().expect("progress store");
    if let Some(item) = map.get_mut(item_id) {
        item.bytes_total = total;
    }
}

pub fn set_item_received(item_id: &str, received: i64, speed_mbps: f64) {
    let mut map = store().lock().expect("progress store");
    if let Some(item) = map.get_mut(item_id) {
        item.bytes_received = received;
        item.speed_mbps = speed_mbps;
        if item.bytes_total > 0 {
            item.progress = received as f64 / item.bytes_total as f64;
        }
    }
}

pub fn add_item_received(item_id: &str, delta: i64) {
    let mut map = store().lock().expect("progress store");
    if let Some(item) = map.get_mut(item_id) {
        item.bytes_received += delta;
        if item.bytes_total > 0 {
            item.progress = item.bytes_received as f64 / item.bytes_total as f64;
        }
    }
}

/// Direct fraction update, used by the segmented (DASH) path where per-byte
/// totals are unknown.
pub fn set_item_progress(item_id: &str, progress: f64, received: i64, total: i64) {
    let mut map = store().lock().expect("progress store");
    if let Some(item) = map.get_mut(item_id) {
        item.progress = progress;
        if received > 0 {
            item.bytes_received = received;
        }
        if total > 0 {
            item.bytes_total = total;
        }
    }
}

pub fn set_item_finalizing(item_id: &str) {
    let mut map = store().lock().expect("progress store");
    if let Some(item) = map.get_mut(item_id) {
        item.progress = 1.0;
        item.status = "finalizing".to_string();
    }
}

pub fn complete_item(item_id: &str) {
    let mut map = store().lock().expect("progress store");
    if let Some(item) = map.get_mut(item_id) {
        item.progress = 1.0;
        item.is_downloading = false;
        item.status = "completed".to_string();
    }
}

pub fn remove_item(item_id: &str) {
    store().lock().expect("progress store").remove(item_id);
}

pub fn clear_all_item_progress() {
    store().lock().expect("progress store").clear();
}

pub fn item_progress(item_id: &str) -> Option<ItemProgress> {
    store().lock().expect("progress store").get(item_id).cloned()
}

pub fn all_item_progress() -> MultiProgress {
    MultiProgress {
        items: store().lock().expect("progress store").clone(),
    }
}

pub fn legacy_progress() -> LegacyProgress {
    let map = store().lock().expect("progress store");
    let active = map
        .values()
        .find(|i| i.is_downloading)
        .or_else(|| map.values().next());
    match active {
        Some(item) => LegacyProgress {
            current_file: item.item_id.clone(),
            progress: item.progress * 100.0,
            speed_mbps: item.speed_mbps,
            bytes_total: item.bytes_total,
            bytes_received: item.bytes_received,
            is_downloading: item.is_downloading,
            status: item.status.clone(),
        },
        None => LegacyProgress::default(),
    }
}

const REPORT_THRESHOLD: i64 = 64 * 1024;

/// Write-through adapter: counts bytes into the keyed store as they land in
/// the underlying sink. Updates are batched to 64 KiB to keep lock traffic
/// off the hot write path, with a speed estimate per interval.
pub struct ProgressWriter<W: Write> {
    inner: W,
    item_id: String,
    current: i64,
    last_reported: i64,
    last_time: Instant,
    last_bytes: i64,
}

impl<W: Write> ProgressWriter<W> {
    pub fn new(inner: W, item_id: &str) -> Self {
        Self {
            inner,
            item_id: item_id.to_string(),
            current: 0,
            last_reported: 0,
            last_time: Instant::now(),
            last_bytes: 0,
        }
    }

    pub fn bytes_written(&self) -> i64 {
        self.current
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    fn report(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_time).as_secs_f64();
        let speed = if elapsed > 0.0 {
            (self.current - self.last_bytes) as f64 / (1024.0 * 1024.0) / elapsed
        } else {
            0.0
        };
        set_item_received(&self.item_id, self.current, speed);
        self.last_reported = self.current;
        self.last_time = now;
        self.last_bytes = self.current;
    }
}

impl<W: Write> Write for ProgressWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.current += n as i64;
        if self.last_reported == 0 || self.current - self.last_reported >= REPORT_THRESHOLD {
            self.report();
        }
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.report();
        self.inner.flush()
    }
}
