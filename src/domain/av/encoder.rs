use super::cmd::{HlsEncodeRequest, TranscodeExecutor};
use crate::domain::hls::{MediaPlaylist, PlaylistError};
use crate::domain::layout::is_valid_segment_name;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("could not prepare output directory: {0}")]
    OutputDir(#[source] std::io::Error),
    #[error("failed to run encoder: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("encoder exited with status {code:?}: {stderr}")]
    Exited { code: Option<i32>, stderr: String },
    #[error("playlist missing or empty")]
    MissingPlaylist,
    #[error("invalid playlist: {0}")]
    Playlist(#[from] PlaylistError),
    #[error("playlist references missing segment {0}")]
    MissingSegment(String),
    #[error("playlist references no segments")]
    NoSegments,
    #[error("playlist was not finalized")]
    Unfinished,
}

/// Verified result of a finished encode.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedOutput {
    pub output_dir: PathBuf,
    pub playlist_path: PathBuf,
    pub segment_count: usize,
    /// Sum of segment durations, in seconds.
    pub duration: f64,
}

/// Drives the external encoder to produce `index.m3u8` + `segment###.ts`.
pub struct HlsEncoder<E> {
    executor: Arc<E>,
    segment_seconds: u32,
}

impl<E> Clone for HlsEncoder<E> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
            segment_seconds: self.segment_seconds,
        }
    }
}

impl<E: TranscodeExecutor> HlsEncoder<E> {
    pub fn new(executor: Arc<E>, segment_seconds: u32) -> Self {
        Self {
            executor,
            segment_seconds: segment_seconds.max(1),
        }
    }

    /// Encodes `source` into `output_dir`.
    ///
    /// On any error the output directory is removed before returning, so a
    /// failed encode never leaves servable files behind.
    pub async fn encode(
        &self,
        source: &Path,
        output_dir: &Path,
        duration_hint: Option<f64>,
        progress: UnboundedSender<u8>,
    ) -> Result<EncodedOutput, EncodeError> {
        let result = self
            .encode_inner(source, output_dir, duration_hint, progress)
            .await;
        if let Err(e) = &result {
            tracing::error!(output = %output_dir.display(), error = %e, "HLS encode failed");
            remove_output_dir(output_dir).await;
        }
        result
    }

    async fn encode_inner(
        &self,
        source: &Path,
        output_dir: &Path,
        duration_hint: Option<f64>,
        progress: UnboundedSender<u8>,
    ) -> Result<EncodedOutput, EncodeError> {
        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(EncodeError::OutputDir)?;

        let request = HlsEncodeRequest {
            source: source.to_path_buf(),
            output_dir: output_dir.to_path_buf(),
            segment_seconds: self.segment_seconds,
            duration_hint,
        };

        tracing::info!(source = %source.display(), output = %output_dir.display(), "HLS encode started");
        let exit = self
            .executor
            .run_hls_encode(&request, progress)
            .await
            .map_err(EncodeError::Spawn)?;
        if !exit.success() {
            return Err(EncodeError::Exited {
                code: exit.code,
                stderr: exit.stderr_tail,
            });
        }

        let output = verify_output(output_dir).await?;
        tracing::info!(
            output = %output_dir.display(),
            segments = output.segment_count,
            duration = output.duration,
            "HLS encode completed"
        );
        Ok(output)
    }
}

/// Checks that the playlist exists, parses, is closed, and that every
/// referenced segment is present and non-empty.
pub async fn verify_output(output_dir: &Path) -> Result<EncodedOutput, EncodeError> {
    let playlist_path = output_dir.join(crate::domain::layout::PLAYLIST_NAME);
    let content = match tokio::fs::read_to_string(&playlist_path).await {
        Ok(content) if !content.trim().is_empty() => content,
        _ => return Err(EncodeError::MissingPlaylist),
    };

    let playlist = MediaPlaylist::parse(&content)?;
    if !playlist.end_list {
        return Err(EncodeError::Unfinished);
    }
    if playlist.segments.is_empty() {
        return Err(EncodeError::NoSegments);
    }
    for segment in &playlist.segments {
        if !is_valid_segment_name(&segment.uri) {
            return Err(EncodeError::MissingSegment(segment.uri.clone()));
        }
        match tokio::fs::metadata(output_dir.join(&segment.uri)).await {
            Ok(meta) if meta.len() > 0 => {}
            _ => return Err(EncodeError::MissingSegment(segment.uri.clone())),
        }
    }

    Ok(EncodedOutput {
        output_dir: output_dir.to_path_buf(),
        playlist_path,
        segment_count: playlist.segments.len(),
        duration: playlist.total_duration(),
    })
}

/// Recursive, tolerant of the directory already being gone.
pub async fn remove_output_dir(output_dir: &Path) {
    match tokio::fs::remove_dir_all(output_dir).await {
        Ok(()) => tracing::debug!(output = %output_dir.display(), "Removed HLS output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(output = %output_dir.display(), error = %e, "Could not remove HLS output")
        }
    }
}
