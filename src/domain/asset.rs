//! Asset record and its processing lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque unique identifier of an uploaded video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(Uuid);

impl AssetId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AssetId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AssetId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Legal edges: pending -> processing -> {completed, failed}.
    pub fn can_transition_to(self, next: ProcessingStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("illegal status transition {from} -> {to}")]
    IllegalTransition {
        from: ProcessingStatus,
        to: ProcessingStatus,
    },

    #[error("stale encode attempt {job} (record is on attempt {record})")]
    StaleAttempt { job: u32, record: u32 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Values extracted by the metadata probe. Zeroed when probing fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaMetadata {
    /// Seconds, rounded.
    pub duration: u64,
    pub file_size: u64,
    pub resolution: Resolution,
    pub codec: String,
}

impl Default for MediaMetadata {
    fn default() -> Self {
        Self {
            duration: 0,
            file_size: 0,
            resolution: Resolution::default(),
            codec: String::from("unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Visibility {
    pub public: bool,
    pub requires_gated_access: bool,
}

impl Default for Visibility {
    fn default() -> Self {
        Self {
            public: false,
            requires_gated_access: true,
        }
    }
}

/// Catalog fields shown to viewers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetDetails {
    pub title: String,
    pub description: String,
    pub genre: String,
    pub tags: Vec<String>,
}

pub const DEFAULT_GENRE: &str = "Uncategorized";

impl AssetDetails {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            genre: String::from(DEFAULT_GENRE),
            tags: Vec::new(),
        }
    }
}

/// Splits a comma separated tag list, trimming and dropping empty entries.
pub fn parse_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub id: AssetId,
    /// Generated file name under `uploads/`.
    pub source_file: String,
    pub metadata: MediaMetadata,
    /// File name under `thumbnails/`.
    pub thumbnail: Option<String>,
    /// Public path of the playlist, set together with `ready`.
    pub hls_path: Option<String>,
    pub ready: bool,
    pub status: ProcessingStatus,
    pub processing_error: Option<String>,
    /// Encode progress in percent, only ever raised within one attempt.
    pub progress: u8,
    pub attempts: u32,
    pub owner: String,
    pub visibility: Visibility,
    pub details: AssetDetails,
    pub views: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// When a worker picked up the current attempt; `None` while it is queued.
    pub processing_started_at: Option<DateTime<Utc>>,
}

impl Asset {
    pub fn new(
        id: AssetId,
        source_file: String,
        owner: String,
        visibility: Visibility,
        details: AssetDetails,
        metadata: MediaMetadata,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            source_file,
            metadata,
            thumbnail: None,
            hls_path: None,
            ready: false,
            status: ProcessingStatus::Pending,
            processing_error: None,
            progress: 0,
            attempts: 0,
            owner,
            visibility,
            details,
            views: 0,
            created_at: now,
            updated_at: now,
            processing_started_at: None,
        }
    }

    fn transition(
        &mut self,
        next: ProcessingStatus,
        now: DateTime<Utc>,
    ) -> Result<(), LifecycleError> {
        if !self.status.can_transition_to(next) {
            return Err(LifecycleError::IllegalTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// `pending -> processing`; opens the first encode attempt.
    pub fn start_processing(&mut self, now: DateTime<Utc>) -> Result<(), LifecycleError> {
        self.transition(ProcessingStatus::Processing, now)?;
        self.attempts = 1;
        self.progress = 0;
        self.processing_started_at = None;
        Ok(())
    }

    /// A worker dequeued `attempt`; its encode clock starts now.
    pub fn begin_attempt(
        &mut self,
        attempt: u32,
        now: DateTime<Utc>,
    ) -> Result<(), LifecycleError> {
        self.ensure_attempt(attempt)?;
        self.processing_started_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Fails unless the record is processing and on the given attempt.
    pub fn ensure_attempt(&self, attempt: u32) -> Result<(), LifecycleError> {
        if self.status != ProcessingStatus::Processing {
            return Err(LifecycleError::IllegalTransition {
                from: self.status,
                to: ProcessingStatus::Processing,
            });
        }
        if self.attempts != attempt {
            return Err(LifecycleError::StaleAttempt {
                job: attempt,
                record: self.attempts,
            });
        }
        Ok(())
    }

    pub fn record_progress(&mut self, attempt: u32, percent: u8) -> Result<bool, LifecycleError> {
        self.ensure_attempt(attempt)?;
        let percent = percent.min(100);
        if percent <= self.progress {
            return Ok(false);
        }
        self.progress = percent;
        Ok(true)
    }

    /// Opens the next attempt while staying in `processing`.
    pub fn begin_retry(&mut self, attempt: u32, now: DateTime<Utc>) -> Result<u32, LifecycleError> {
        self.ensure_attempt(attempt)?;
        self.attempts += 1;
        self.progress = 0;
        self.updated_at = now;
        self.processing_started_at = None;
        Ok(self.attempts)
    }

    /// `processing -> completed`.
    pub fn complete(
        &mut self,
        attempt: u32,
        hls_path: String,
        now: DateTime<Utc>,
    ) -> Result<(), LifecycleError> {
        self.ensure_attempt(attempt)?;
        self.transition(ProcessingStatus::Completed, now)?;
        self.hls_path = Some(hls_path);
        self.ready = true;
        self.progress = 100;
        self.processing_error = None;
        Ok(())
    }

    /// `processing -> failed`.
    pub fn fail(
        &mut self,
        attempt: u32,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), LifecycleError> {
        self.ensure_attempt(attempt)?;
        self.transition(ProcessingStatus::Failed, now)?;
        self.hls_path = None;
        self.ready = false;
        self.processing_error = Some(error.into());
        Ok(())
    }

    /// When the current attempt stops being allowed to run. Queued attempts
    /// and terminal records have none.
    pub fn deadline(&self, timeout: chrono::Duration) -> Option<DateTime<Utc>> {
        match self.status {
            ProcessingStatus::Pending => Some(self.created_at + timeout),
            ProcessingStatus::Processing => self.processing_started_at.map(|t| t + timeout),
            ProcessingStatus::Completed | ProcessingStatus::Failed => None,
        }
    }
}
