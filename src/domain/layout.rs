//! File naming rules for the on-disk layout:
//!
//! ```text
//! uploads/video-<millis>-<n>.<ext>
//! hls/<assetId>/index.m3u8
//! hls/<assetId>/segment###.ts
//! thumbnails/thumb-<assetId>.jpg
//! ```

use super::asset::AssetId;
use chrono::Utc;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use uuid::Uuid;

pub const UPLOADS_DIR: &str = "uploads";
pub const HLS_DIR: &str = "hls";
pub const THUMBNAILS_DIR: &str = "thumbnails";
pub const PLAYLIST_NAME: &str = "index.m3u8";
/// Segment template handed to the encoder.
pub const SEGMENT_TEMPLATE: &str = "segment%03d.ts";

pub const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
pub const SEGMENT_CONTENT_TYPE: &str = "video/mp2t";
pub const THUMBNAIL_CONTENT_TYPE: &str = "image/jpeg";

const VIDEO_EXTENSIONS: [&str; 6] = ["mp4", "mpeg", "mov", "avi", "webm", "mkv"];

fn segment_regex() -> &'static Regex {
    static SEGMENT: OnceLock<Regex> = OnceLock::new();
    SEGMENT.get_or_init(|| Regex::new(r"^segment\d{3}\.ts$").expect("static regex"))
}

pub fn segment_file_name(index: usize) -> String {
    format!("segment{:03}.ts", index)
}

/// `segment` + exactly three digits + `.ts`, nothing else.
pub fn is_valid_segment_name(name: &str) -> bool {
    segment_regex().is_match(name)
}

/// Rejects anything able to leave the thumbnails directory.
pub fn is_valid_thumbnail_name(name: &str) -> bool {
    !name.is_empty() && !name.contains("..") && !name.contains('/') && !name.contains('\\')
}

pub fn thumbnail_file_name(id: &AssetId) -> String {
    format!("thumb-{}.jpg", id)
}

/// Public path stored on completed assets.
pub fn hls_public_path(id: &AssetId) -> String {
    format!("/{}/{}/{}", HLS_DIR, id, PLAYLIST_NAME)
}

pub fn is_accepted_video_file(original_name: &str) -> bool {
    Path::new(original_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            VIDEO_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

/// `video-<unix millis>-<0..1e9>` plus the original extension.
pub fn generate_source_name(original_name: &str) -> String {
    let suffix = (Uuid::new_v4().as_u128() % 1_000_000_000) as u64;
    let ext = Path::new(original_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext))
        .unwrap_or_default();
    format!("video-{}-{}{}", Utc::now().timestamp_millis(), suffix, ext)
}
