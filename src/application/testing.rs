//! Scripted stand-in for ffmpeg/ffprobe that writes real files.

use crate::domain::av::cmd::{
    EncoderExit, FrameGrabRequest, HlsEncodeRequest, ProbeRunner, TranscodeExecutor,
};
use crate::domain::av::encoder::tests::write_fake_output;
use async_trait::async_trait;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{ExitStatus, Output};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Clone, Copy)]
pub enum EncodeScript {
    Succeed,
    Fail,
    /// Fails the first `n` runs, then succeeds.
    FailTimes(u32),
    Hang,
}

#[derive(Debug)]
pub struct FakeToolchain {
    /// `None` makes the probe fail like on a corrupt file.
    pub duration: Option<f64>,
    pub encode: EncodeScript,
    pub encode_runs: AtomicU32,
}

impl FakeToolchain {
    pub fn new(duration: Option<f64>, encode: EncodeScript) -> Self {
        Self {
            duration,
            encode,
            encode_runs: AtomicU32::new(0),
        }
    }

    pub fn runs(&self) -> u32 {
        self.encode_runs.load(Ordering::SeqCst)
    }
}

fn output(code: i32, stdout: String, stderr: &str) -> Output {
    Output {
        status: ExitStatus::from_raw(code << 8),
        stdout: stdout.into_bytes(),
        stderr: stderr.as_bytes().to_vec(),
    }
}

#[async_trait]
impl ProbeRunner for FakeToolchain {
    async fn run_ffprobe(&self, _path: &Path) -> io::Result<Output> {
        Ok(match self.duration {
            Some(duration) => output(
                0,
                serde_json::json!({
                    "streams": [{"codec_type": "video", "codec_name": "h264", "width": 1280, "height": 720}],
                    "format": {"duration": duration.to_string()}
                })
                .to_string(),
                "",
            ),
            None => output(1, String::new(), "Invalid data found when processing input"),
        })
    }
}

#[async_trait]
impl TranscodeExecutor for FakeToolchain {
    async fn run_hls_encode(
        &self,
        request: &HlsEncodeRequest,
        progress: UnboundedSender<u8>,
    ) -> io::Result<EncoderExit> {
        let run = self.encode_runs.fetch_add(1, Ordering::SeqCst) + 1;
        let fail = EncoderExit {
            code: Some(1),
            stderr_tail: String::from("Invalid data found when processing input"),
        };
        let succeed = |request: &HlsEncodeRequest| {
            for percent in [25u8, 50, 100] {
                let _ = progress.send(percent);
            }
            write_fake_output(
                &request.output_dir,
                self.duration.unwrap_or(10.0),
                request.segment_seconds as f64,
            );
            EncoderExit {
                code: Some(0),
                stderr_tail: String::new(),
            }
        };
        Ok(match self.encode {
            EncodeScript::Succeed => succeed(request),
            EncodeScript::FailTimes(n) if run > n => succeed(request),
            EncodeScript::Fail | EncodeScript::FailTimes(_) => {
                std::fs::write(request.output_dir.join("segment000.ts"), b"partial")?;
                fail
            }
            EncodeScript::Hang => {
                std::fs::write(request.output_dir.join("segment000.ts"), b"partial")?;
                tokio::time::sleep(Duration::from_secs(3600)).await;
                fail
            }
        })
    }

    async fn run_frame_grab(&self, request: &FrameGrabRequest) -> io::Result<Output> {
        match self.duration {
            Some(_) => {
                std::fs::write(&request.output, b"\xff\xd8jpeg")?;
                Ok(output(0, String::new(), ""))
            }
            None => Ok(output(1, String::new(), "Invalid data found when processing input")),
        }
    }
}
