//! Narrow wrapper around the tagging collaborator (lofty). Everything the
//! engine knows about container tags goes through this module so the codec
//! dependency stays at one seam.

use std::path::Path;

use lofty::config::WriteOptions;
use lofty::file::{AudioFile, TaggedFileExt};
use lofty::picture::{MimeType, Picture, PictureType};
use lofty::tag::{Accessor, ItemKey, ItemValue, Tag, TagItem, TagType};

use crate::error::EngineError;

#[derive(Debug, Clone, Default)]
pub struct TrackTags {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub album_artist: String,
    pub date: String,
    pub track_number: u32,
    pub total_tracks: u32,
    pub disc_number: u32,
    pub isrc: String,
    pub lyrics: String,
    pub genre: String,
    pub duration_sec: u64,
}

fn text(tag: &Tag, key: &ItemKey) -> String {
    tag.get_string(key).unwrap_or_default().to_string()
}

fn leading_number(s: &str) -> u32 {
    let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

/// Read common tags from any supported container (FLAC/MP3/M4A/Ogg).
pub fn read_tags(path: &Path) -> Result<TrackTags, EngineError> {
    let tagged = lofty::read_from_path(path)
        .map_err(|e| EngineError::Parse(format!("tag read failed for {}: {e}", path.display())))?;

    let mut out = TrackTags::default();
    out.duration_sec = tagged.properties().duration().as_secs();

    let Some(tag) = tagged.primary_tag().or_else(|| tagged.first_tag()) else {
        return Ok(out);
    };

    out.title = tag.title().unwrap_or_default().to_string();
    out.artist = tag.artist().unwrap_or_default().to_string();
    out.album = tag.album().unwrap_or_default().to_string();
    out.album_artist = text(tag, &ItemKey::AlbumArtist);
    out.genre = tag.genre().unwrap_or_default().to_string();
    out.isrc = text(tag, &ItemKey::Isrc).to_uppercase();
    out.lyrics = text(tag, &ItemKey::Lyrics);

    out.date = text(tag, &ItemKey::RecordingDate);
    if out.date.is_empty() {
        out.date = text(tag, &ItemKey::Year);
    }

    out.track_number = tag
        .track()
        .unwrap_or_else(|| leading_number(&text(tag, &ItemKey::TrackNumber)));
    out.total_tracks = tag.track_total().unwrap_or(0);
    out.disc_number = tag.disk().unwrap_or(0);

    Ok(out)
}

/// Set Vorbis comments on a FLAC file and replace any existing picture
/// blocks with a single front cover. Non-FLAC outputs are left untagged in
/// this path; the host tags them after container conversion.
pub fn embed_flac_tags(
    path: &Path,
    tags: &TrackTags,
    cover_jpeg: Option<&[u8]>,
) -> Result<(), EngineError> {
    let mut tagged = lofty::read_from_path(path)
        .map_err(|e| EngineError::Parse(format!("tag parse failed for {}: {e}", path.display())))?;

    let tag = match tagged.tag_mut(TagType::VorbisComments) {
        Some(t) => t,
        None => {
            tagged.insert_tag(Tag::new(TagType::VorbisComments));
            tagged
                .tag_mut(TagType::VorbisComments)
                .expect("vorbis tag just inserted")
        }
    };

    tag.set_title(tags.title.clone());
    tag.set_artist(tags.artist.clone());
    tag.set_album(tags.album.clone());
    if !tags.album_artist.is_empty() {
        tag.insert_text(ItemKey::AlbumArtist, tags.album_artist.clone());
    }
    if !tags.date.is_empty() {
        tag.insert_text(ItemKey::RecordingDate, tags.date.clone());
    }
    if tags.track_number > 0 {
        tag.set_track(tags.track_number);
        if tags.total_tracks > 0 {
            tag.set_track_total(tags.total_tracks);
        }
    }
    if tags.disc_number > 0 {
        tag.set_disk(tags.disc_number);
    }
    if !tags.isrc.is_empty() {
        tag.insert_text(ItemKey::Isrc, tags.isrc.clone());
    }
    if !tags.genre.is_empty() {
        tag.set_genre(tags.genre.clone());
    }
    if !tags.lyrics.is_empty() {
        tag.insert_text(ItemKey::Lyrics, tags.lyrics.clone());
        // Players disagree on the comment name; write both spellings.
        tag.insert(TagItem::new(
            ItemKey::Unknown("UNSYNCEDLYRICS".to_string()),
            ItemValue::Text(tags.lyrics.clone()),
        ));
    }

    if let Some(data) = cover_jpeg {
        while !tag.pictures().is_empty() {
            tag.remove_picture(0);
        }
        tag.push_picture(Picture::new_unchecked(
            PictureType::CoverFront,
            Some(MimeType::Jpeg),
            None,
            data.to_vec(),
        ));
    }

    tagged
        .save_to_path(path, WriteOptions::default())
        .map_err(|e| EngineError::Parse(format!("tag write failed for {}: {e}", path.display())))?;
    Ok(())
}

/// First embedded picture of a file, as (bytes, mime).
pub fn extract_cover(path: &Path) -> Option<(Vec<u8>, String)> {
    let tagged = lofty::read_from_path(path).ok()?;
    let tag = tagged.primary_tag().or_else(|| tagged.first_tag())?;
    let pic = tag
        .pictures()
        .iter()
        .find(|p| p.pic_type() == PictureType::CoverFront)
        .or_else(|| tag.pictures().first())?;
    let mime = pic
        .mime_type()
        .map(|m| m.to_string())
        .unwrap_or_else(|| "image/jpeg".to_string());
    Some((pic.data().to_vec(), mime))
}

pub fn supported_extension(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "flac" => Some("flac"),
        "mp3" => Some("mp3"),
        "m4a" => Some("m4a"),
        "ogg" | "opus" => Some("ogg"),
        _ => None,
    }
}
