//! Seams around the external `ffprobe`/`ffmpeg` binaries.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc::UnboundedSender;

/// Lines of encoder stderr kept for the failure message.
const STDERR_TAIL_LINES: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct HlsEncodeRequest {
    pub source: PathBuf,
    pub output_dir: PathBuf,
    pub segment_seconds: u32,
    pub duration_hint: Option<f64>,
}

impl HlsEncodeRequest {
    pub fn playlist_path(&self) -> PathBuf {
        self.output_dir.join(crate::domain::layout::PLAYLIST_NAME)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderExit {
    pub code: Option<i32>,
    pub stderr_tail: String,
}

impl EncoderExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameGrabRequest {
    pub source: PathBuf,
    pub offset_secs: f64,
    pub width: u32,
    pub height: u32,
    pub output: PathBuf,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProbeRunner: Send + Sync {
    /// `ffprobe -show_format -show_streams` as JSON.
    async fn run_ffprobe(&self, path: &Path) -> io::Result<Output>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TranscodeExecutor: Send + Sync {
    /// Runs the segmenting encode to completion, sending percent values on `progress`.
    async fn run_hls_encode(
        &self,
        request: &HlsEncodeRequest,
        progress: UnboundedSender<u8>,
    ) -> io::Result<EncoderExit>;

    async fn run_frame_grab(&self, request: &FrameGrabRequest) -> io::Result<Output>;
}

/// Everything the ingest pipeline needs from the external media tools.
pub trait MediaToolchain: ProbeRunner + TranscodeExecutor {}

impl<T: ProbeRunner + TranscodeExecutor> MediaToolchain for T {}

/// Invokes the ffmpeg tool suite installed on the host.
#[derive(Debug, Clone)]
pub struct FfmpegCli {
    ffmpeg_bin: String,
    ffprobe_bin: String,
}

impl FfmpegCli {
    pub fn new(ffmpeg_bin: impl Into<String>, ffprobe_bin: impl Into<String>) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
            ffprobe_bin: ffprobe_bin.into(),
        }
    }
}

impl Default for FfmpegCli {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

#[async_trait]
impl ProbeRunner for FfmpegCli {
    async fn run_ffprobe(&self, path: &Path) -> io::Result<Output> {
        Command::new(&self.ffprobe_bin)
            .arg("-v")
            .arg("error")
            .arg("-show_format")
            .arg("-show_streams")
            .arg("-print_format")
            .arg("json")
            .arg(path)
            .kill_on_drop(true)
            .output()
            .await
    }
}

#[async_trait]
impl TranscodeExecutor for FfmpegCli {
    async fn run_hls_encode(
        &self,
        request: &HlsEncodeRequest,
        progress: UnboundedSender<u8>,
    ) -> io::Result<EncoderExit> {
        let mut child = Command::new(&self.ffmpeg_bin)
            .args(hls_encode_args(request))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
            if let Some(stderr) = stderr {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            }
            Vec::from(tail).join("\n")
        });

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                if let Some(percent) = parse_progress_line(&line, request.duration_hint) {
                    // Receiver may be gone when nobody tracks progress
                    let _ = progress.send(percent);
                }
            }
        }

        let status = child.wait().await?;
        let stderr_tail = stderr_task.await.unwrap_or_default();

        Ok(EncoderExit {
            code: status.code(),
            stderr_tail,
        })
    }

    async fn run_frame_grab(&self, request: &FrameGrabRequest) -> io::Result<Output> {
        Command::new(&self.ffmpeg_bin)
            .args(frame_grab_args(request))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
    }
}

/// Single rendition, baseline profile, ~`segment_seconds` segments numbered from 0.
pub fn hls_encode_args(request: &HlsEncodeRequest) -> Vec<OsString> {
    let segment_pattern = request
        .output_dir
        .join(crate::domain::layout::SEGMENT_TEMPLATE);

    vec![
        "-y".into(),
        "-nostats".into(),
        "-progress".into(),
        "pipe:1".into(),
        "-i".into(),
        request.source.clone().into_os_string(),
        "-profile:v".into(),
        "baseline".into(),
        "-level".into(),
        "3.0".into(),
        "-start_number".into(),
        "0".into(),
        "-hls_time".into(),
        request.segment_seconds.to_string().into(),
        "-hls_list_size".into(),
        "0".into(),
        "-f".into(),
        "hls".into(),
        "-hls_segment_filename".into(),
        segment_pattern.into_os_string(),
        request.playlist_path().into_os_string(),
    ]
}

pub fn frame_grab_args(request: &FrameGrabRequest) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-y".into(),
        "-ss".into(),
        format!("{:.3}", request.offset_secs).into(),
        "-i".into(),
        request.source.clone().into_os_string(),
        "-frames:v".into(),
        "1".into(),
        "-vf".into(),
        format!("scale={}:{}", request.width, request.height).into(),
    ];
    args.push(request.output.clone().into_os_string());
    args
}

/// Turns one `-progress` key=value line into a percentage.
///
/// `out_time_us`/`out_time_ms` are both microseconds in ffmpeg's output.
/// `progress=end` always maps to 100.
pub fn parse_progress_line(line: &str, duration_hint: Option<f64>) -> Option<u8> {
    let (key, value) = line.trim().split_once('=')?;
    match key {
        "progress" if value == "end" => Some(100),
        "out_time_us" | "out_time_ms" => {
            let duration = duration_hint.filter(|d| *d > 0.0)?;
            let micros: f64 = value.parse().ok()?;
            if micros < 0.0 {
                return None;
            }
            let percent = (micros / 1_000_000.0 / duration * 100.0).round();
            Some(percent.clamp(0.0, 100.0) as u8)
        }
        _ => None,
    }
}
