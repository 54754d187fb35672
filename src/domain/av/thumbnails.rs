use super::cmd::{FrameGrabRequest, TranscodeExecutor};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const THUMBNAIL_WIDTH: u32 = 1280;
pub const THUMBNAIL_HEIGHT: u32 = 720;

/// Grabs one preview frame. Best effort: every failure ends in `None`.
pub struct ThumbnailExtractor<E> {
    executor: Arc<E>,
    offset_secs: f64,
}

impl<E> Clone for ThumbnailExtractor<E> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
            offset_secs: self.offset_secs,
        }
    }
}

impl<E: TranscodeExecutor> ThumbnailExtractor<E> {
    pub fn new(executor: Arc<E>, offset_secs: f64) -> Self {
        Self {
            executor,
            offset_secs,
        }
    }

    /// Writes a frame at the configured offset to `output`.
    ///
    /// `known_duration` of 0 means the probe could not tell; the grab is
    /// attempted anyway and judged by its output.
    pub async fn extract(
        &self,
        source: &Path,
        output: &Path,
        known_duration: u64,
    ) -> Option<PathBuf> {
        if known_duration > 0 && (known_duration as f64) < self.offset_secs {
            tracing::warn!(
                source = %source.display(),
                duration = known_duration,
                offset = self.offset_secs,
                "Source shorter than thumbnail offset, skipping thumbnail"
            );
            return None;
        }

        if let Some(parent) = output.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                tracing::warn!(error = %e, "Thumbnail directory unavailable");
                return None;
            }
        }

        let request = FrameGrabRequest {
            source: source.to_path_buf(),
            offset_secs: self.offset_secs,
            width: THUMBNAIL_WIDTH,
            height: THUMBNAIL_HEIGHT,
            output: output.to_path_buf(),
        };

        let failure = match self.executor.run_frame_grab(&request).await {
            Ok(result) if result.status.success() => match tokio::fs::metadata(output).await {
                Ok(meta) if meta.len() > 0 => {
                    tracing::info!(thumbnail = %output.display(), "Thumbnail generated");
                    return Some(output.to_path_buf());
                }
                _ => String::from("encoder produced no image"),
            },
            Ok(result) => String::from_utf8_lossy(&result.stderr).trim().to_string(),
            Err(e) => e.to_string(),
        };

        tracing::warn!(
            source = %source.display(),
            error = %failure,
            "Thumbnail generation failed"
        );
        let _ = tokio::fs::remove_file(output).await;
        None
    }
}
