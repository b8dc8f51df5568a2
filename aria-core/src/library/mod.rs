mod isrc_index;
mod quality;
mod scan;
pub mod tags;

pub use isrc_index::{
    add_to_index, check_files_exist_parallel, check_isrc_exists, file_exists_non_empty,
    invalidate_index, prebuild_index, ExistenceProbe, FileExistence,
};
pub use quality::{audio_quality, AudioQuality};
pub use scan::{
    read_audio_metadata, scan_library_folder, scan_library_incremental, IncrementalScan,
    KnownFile, LibraryTrack,
};
