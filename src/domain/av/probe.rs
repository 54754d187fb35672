use super::cmd::ProbeRunner;
use crate::domain::asset::{MediaMetadata, Resolution};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("failed to run ffprobe: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("ffprobe exited with {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },
    #[error("unreadable ffprobe output: {0}")]
    Output(#[from] serde_json::Error),
    #[error("no video stream found")]
    NoVideoStream,
}

/// First video stream of a probed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct VideoStreamInfo {
    pub codec: String,
    pub width: u32,
    pub height: u32,
}

impl VideoStreamInfo {
    pub(crate) fn from_stream(stream_data: &Value) -> Option<Self> {
        match stream_data.get("codec_type").and_then(|v| v.as_str()) {
            Some("video") => Some(Self {
                codec: stream_data
                    .get("codec_name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .to_string(),
                width: stream_data.get("width").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
                height: stream_data
                    .get("height")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0) as u32,
            }),
            _ => None,
        }
    }
}

/// ffprobe renders numbers in `format` as strings; accept both.
fn number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn parse_probe_output(v: &Value) -> Result<MediaMetadata, ProbeError> {
    let video = v
        .get("streams")
        .and_then(|s| s.as_array())
        .and_then(|streams| streams.iter().find_map(VideoStreamInfo::from_stream))
        .ok_or(ProbeError::NoVideoStream)?;

    let format = v.get("format");
    let duration = number(format.and_then(|f| f.get("duration")))
        .filter(|d| d.is_finite() && *d > 0.0)
        .map(|d| d.round() as u64)
        .unwrap_or(0);
    let file_size = number(format.and_then(|f| f.get("size")))
        .filter(|s| s.is_finite() && *s > 0.0)
        .map(|s| s as u64)
        .unwrap_or(0);

    Ok(MediaMetadata {
        duration,
        file_size,
        resolution: Resolution {
            width: video.width,
            height: video.height,
        },
        codec: video.codec,
    })
}

/// Extracts duration, size, resolution and codec of an uploaded file.
pub struct MetadataProbe<P> {
    runner: Arc<P>,
}

impl<P> Clone for MetadataProbe<P> {
    fn clone(&self) -> Self {
        Self {
            runner: self.runner.clone(),
        }
    }
}

impl<P: ProbeRunner> MetadataProbe<P> {
    pub fn new(runner: Arc<P>) -> Self {
        Self { runner }
    }

    pub async fn probe(&self, path: &Path) -> Result<MediaMetadata, ProbeError> {
        let output = self.runner.run_ffprobe(path).await?;
        if !output.status.success() {
            return Err(ProbeError::Failed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let v: Value = serde_json::from_slice(&output.stdout)?;
        parse_probe_output(&v)
    }
}
