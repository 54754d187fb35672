//! Media playlists as produced by the segmenting encoder.

use std::fmt::Write as _;

#[derive(Debug, Clone, PartialEq)]
pub struct MediaSegment {
    pub duration: f64,
    pub uri: String,
}

/// Single-rendition media playlist as written by the encoder.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaPlaylist {
    pub version: u8,
    pub target_duration: u64,
    pub media_sequence: u64,
    pub segments: Vec<MediaSegment>,
    pub end_list: bool,
    pub playlist_type: Option<String>,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PlaylistError {
    #[error("playlist is empty")]
    Empty,
    #[error("missing #EXTM3U header")]
    MissingHeader,
    #[error("invalid tag on line {line}: {content}")]
    InvalidTag { line: usize, content: String },
    #[error("segment uri without #EXTINF on line {line}")]
    OrphanUri { line: usize },
}

impl MediaPlaylist {
    pub fn new(target_duration: u64) -> Self {
        Self {
            version: 3,
            target_duration,
            media_sequence: 0,
            segments: Vec::new(),
            end_list: true,
            playlist_type: None,
        }
    }

    pub fn add_segment(&mut self, duration: f64, uri: String) {
        self.segments.push(MediaSegment { duration, uri });
    }

    pub fn total_duration(&self) -> f64 {
        self.segments.iter().map(|s| s.duration).sum()
    }

    pub fn parse(content: &str) -> Result<Self, PlaylistError> {
        let mut lines = content
            .lines()
            .enumerate()
            .map(|(i, l)| (i + 1, l.trim()))
            .filter(|(_, l)| !l.is_empty());

        match lines.next() {
            None => return Err(PlaylistError::Empty),
            Some((_, "#EXTM3U")) => {}
            Some(_) => return Err(PlaylistError::MissingHeader),
        }

        let mut playlist = MediaPlaylist::new(0);
        playlist.end_list = false;
        let mut pending_duration: Option<f64> = None;

        for (line_no, line) in lines {
            let invalid = || PlaylistError::InvalidTag {
                line: line_no,
                content: line.to_string(),
            };

            if let Some(value) = line.strip_prefix("#EXTINF:") {
                let duration = value.split(',').next().unwrap_or_default();
                pending_duration = Some(duration.trim().parse().map_err(|_| invalid())?);
            } else if let Some(value) = line.strip_prefix("#EXT-X-TARGETDURATION:") {
                playlist.target_duration = value.trim().parse().map_err(|_| invalid())?;
            } else if let Some(value) = line.strip_prefix("#EXT-X-VERSION:") {
                playlist.version = value.trim().parse().map_err(|_| invalid())?;
            } else if let Some(value) = line.strip_prefix("#EXT-X-MEDIA-SEQUENCE:") {
                playlist.media_sequence = value.trim().parse().map_err(|_| invalid())?;
            } else if let Some(value) = line.strip_prefix("#EXT-X-PLAYLIST-TYPE:") {
                playlist.playlist_type = Some(value.trim().to_string());
            } else if line == "#EXT-X-ENDLIST" {
                playlist.end_list = true;
            } else if line.starts_with('#') {
                // Unknown tags and comments are ignored
            } else {
                let duration = pending_duration
                    .take()
                    .ok_or(PlaylistError::OrphanUri { line: line_no })?;
                playlist.add_segment(duration, line.to_string());
            }
        }

        Ok(playlist)
    }

    pub fn render(&self) -> String {
        let mut out = String::from("#EXTM3U\n");
        let _ = writeln!(out, "#EXT-X-VERSION:{}", self.version);
        let _ = writeln!(out, "#EXT-X-TARGETDURATION:{}", self.target_duration);
        let _ = writeln!(out, "#EXT-X-MEDIA-SEQUENCE:{}", self.media_sequence);
        if let Some(pt) = &self.playlist_type {
            let _ = writeln!(out, "#EXT-X-PLAYLIST-TYPE:{}", pt);
        }
        for segment in &self.segments {
            let _ = writeln!(out, "#EXTINF:{:.6},", segment.duration);
            let _ = writeln!(out, "{}", segment.uri);
        }
        if self.end_list {
            out.push_str("#EXT-X-ENDLIST\n");
        }
        out
    }
}
