use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use tokio_util::sync::CancellationToken;

struct CancelEntry {
    token: CancellationToken,
    cancelled: bool,
}

fn registry() -> &'static Mutex<HashMap<String, CancelEntry>> {
    static MAP: OnceLock<Mutex<HashMap<String, CancelEntry>>> = OnceLock::new();
    MAP.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Allocate (or adopt) the cancellation token for one download item.
///
/// Ordering-safe: if `cancel` arrived before `init`, the stored tombstone is
/// returned already cancelled, so the download aborts before any I/O.
pub fn init_cancel(item_id: &str) -> CancellationToken {
    if item_id.is_empty() {
        return CancellationToken::new();
    }
    let mut map = registry().lock().expect("cancel registry");
    if let Some(entry) = map.get(item_id) {
        if entry.cancelled {
            return entry.token.clone();
        }
    }
    let token = CancellationToken::new();
    map.insert(
        item_id.to_string(),
        CancelEntry {
            token: token.clone(),
            cancelled: false,
        },
    );
    token
}

/// Flag an item as cancelled and fire its token. Unknown items get a
/// tombstone so a later `init_cancel` observes the cancellation.
pub fn cancel(item_id: &str) {
    if item_id.is_empty() {
        return;
    }
    let mut map = registry().lock().expect("cancel registry");
    match map.get_mut(item_id) {
        Some(entry) => {
            entry.cancelled = true;
            entry.token.cancel();
        }
        None => {
            let token = CancellationToken::new();
            token.cancel();
            map.insert(
                item_id.to_string(),
                CancelEntry { token, cancelled: true },
            );
        }
    }
    drop(map);
    super::progress::remove_item(item_id);
}

pub fn is_cancelled(item_id: &str) -> bool {
    if item_id.is_empty() {
        return false;
    }
    registry()
        .lock()
        .expect("cancel registry")
        .get(item_id)
        .map(|e| e.cancelled)
        .unwrap_or(false)
}

pub fn clear_cancel(item_id: &str) {
    if item_id.is_empty() {
        return;
    }
    registry().lock().expect("cancel registry").remove(item_id);
}
