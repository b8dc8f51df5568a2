use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AudioQuality {
    pub bit_depth: u32,
    pub sample_rate: u32,
    pub total_samples: u64,
    pub duration_sec: u64,
    pub bitrate_kbps: u32,
}

/// Decode the fixed 34-byte FLAC STREAMINFO block.
///
/// Bit layout after the two 16-bit block sizes and the 24+24 frame sizes:
/// bytes 10..13 carry the 20-bit sample rate, 3-bit channels-1 and the top
/// bit of bits-per-sample-1; bytes 13..18 the remaining 4 bps bits and the
/// 36-bit total-sample count.
fn parse_streaminfo(info: &[u8; 34]) -> (u32, u32, u64) {
    let sample_rate =
        ((info[10] as u32) << 12) | ((info[11] as u32) << 4) | ((info[12] as u32) >> 4);
    let bit_depth = (((info[12] as u32) & 0x01) << 4 | (info[13] as u32) >> 4) + 1;
    let total_samples = ((info[13] as u64) & 0x0f) << 32
        | (info[14] as u64) << 24
        | (info[15] as u64) << 16
        | (info[16] as u64) << 8
        | (info[17] as u64);
    (sample_rate, bit_depth, total_samples)
}

fn flac_quality(path: &Path) -> Result<AudioQuality, EngineError> {
    let mut file = File::open(path)?;
    let mut marker = [0u8; 4];
    file.read_exact(&mut marker)?;
    if &marker != b"fLaC" {
        return Err(EngineError::Parse("not a FLAC stream".to_string()));
    }

    let mut header = [0u8; 4];
    file.read_exact(&mut header)?;
    if header[0] & 0x7f != 0 {
        return Err(EngineError::Parse("first block is not STREAMINFO".to_string()));
    }

    let mut info = [0u8; 34];
    file.read_exact(&mut info)?;
    let (sample_rate, bit_depth, total_samples) = parse_streaminfo(&info);

    let duration_sec = if sample_rate > 0 {
        total_samples / sample_rate as u64
    } else {
        0
    };
    let file_size = file.metadata().map(|m| m.len()).unwrap_or(0);
    let bitrate_kbps = if duration_sec > 0 {
        (file_size * 8 / duration_sec / 1000) as u32
    } else {
        0
    };

    Ok(AudioQuality {
        bit_depth,
        sample_rate,
        total_samples,
        duration_sec,
        bitrate_kbps,
    })
}

fn container_quality(path: &Path) -> Result<AudioQuality, EngineError> {
    use lofty::file::AudioFile;
    use lofty::prelude::*;

    let tagged = lofty::read_from_path(path)
        .map_err(|e| EngineError::Parse(format!("properties read failed: {e}")))?;
    let props = tagged.properties();
    let duration_sec = props.duration().as_secs();
    let sample_rate = props.sample_rate().unwrap_or(0);
    Ok(AudioQuality {
        bit_depth: props.bit_depth().map(u32::from).unwrap_or(16),
        sample_rate,
        total_samples: sample_rate as u64 * duration_sec,
        duration_sec,
        bitrate_kbps: props
            .audio_bitrate()
            .or_else(|| props.overall_bitrate())
            .unwrap_or(0),
    })
}

/// Container quality descriptor. FLAC goes through the explicit STREAMINFO
/// decoder; other containers ask the tagging collaborator for properties.
pub fn audio_quality(path: &Path) -> Result<AudioQuality, EngineError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    if ext == "flac" {
        return flac_quality(path);
    }
    container_quality(path)
}
