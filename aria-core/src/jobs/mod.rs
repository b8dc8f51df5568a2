mod cancel;
mod progress;

pub use cancel::{cancel, clear_cancel, init_cancel, is_cancelled};
pub use progress::{
    add_item_received, all_item_progress, clear_all_item_progress, complete_item,
    item_progress, legacy_progress, remove_item, set_item_finalizing, set_item_progress,
    set_item_received, set_item_total, start_item, ItemProgress, LegacyProgress,
    MultiProgress, ProgressWriter,
};
