use crate::adapters::local::fs::MediaStore;
use crate::domain::asset::{AssetId, ProcessingStatus};
use crate::domain::layout::{
    is_valid_segment_name, is_valid_thumbnail_name, PLAYLIST_CONTENT_TYPE, SEGMENT_CONTENT_TYPE,
    THUMBNAIL_CONTENT_TYPE,
};
use crate::ports::repository::{AssetRepository, RepositoryError};
use std::path::PathBuf;
use std::sync::Arc;

pub const PLAYLIST_CACHE_CONTROL: &str = "no-cache, no-store, must-revalidate";
pub const SEGMENT_CACHE_CONTROL: &str = "public, max-age=3600";
pub const THUMBNAIL_CACHE_CONTROL: &str = "public, max-age=86400";

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("Invalid file name")]
    InvalidName,
    #[error("Not found")]
    NotFound,
    #[error("Video is still processing")]
    NotReady { status: ProcessingStatus },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// A file ready to be sent, with the headers it must carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServedFile {
    pub path: PathBuf,
    pub size: u64,
    pub content_type: &'static str,
    pub cache_control: &'static str,
}

pub struct StreamService<R> {
    repo: Arc<R>,
    store: MediaStore,
}

impl<R: AssetRepository> StreamService<R> {
    pub fn new(repo: Arc<R>, store: MediaStore) -> Self {
        Self { repo, store }
    }

    /// Only `ready` assets have a playlist, whatever happens to be on disk.
    pub async fn get_playlist(&self, id: &AssetId) -> Result<ServedFile, StreamError> {
        let asset = self.repo.get(id).await?.ok_or(StreamError::NotFound)?;
        if !asset.ready || asset.status != ProcessingStatus::Completed {
            return Err(StreamError::NotReady {
                status: asset.status,
            });
        }

        let path = self.store.playlist_path(id);
        match existing_file(path, PLAYLIST_CONTENT_TYPE, PLAYLIST_CACHE_CONTROL).await {
            Some(file) => Ok(file),
            None => {
                tracing::error!(asset_id = %id, "Asset marked ready but its playlist is missing");
                Err(StreamError::NotFound)
            }
        }
    }

    /// The name is checked before anything touches the filesystem.
    pub async fn get_segment(&self, id: &AssetId, name: &str) -> Result<ServedFile, StreamError> {
        if !is_valid_segment_name(name) {
            return Err(StreamError::InvalidName);
        }
        // Segments of an unfinished encode are never served
        match self.repo.get(id).await? {
            Some(asset) if asset.ready => {}
            _ => return Err(StreamError::NotFound),
        }
        existing_file(
            self.store.segment_path(id, name),
            SEGMENT_CONTENT_TYPE,
            SEGMENT_CACHE_CONTROL,
        )
        .await
        .ok_or(StreamError::NotFound)
    }

    pub async fn get_thumbnail(&self, name: &str) -> Result<ServedFile, StreamError> {
        if !is_valid_thumbnail_name(name) {
            return Err(StreamError::InvalidName);
        }
        existing_file(
            self.store.thumbnail_path(name),
            THUMBNAIL_CONTENT_TYPE,
            THUMBNAIL_CACHE_CONTROL,
        )
        .await
        .ok_or(StreamError::NotFound)
    }
}

async fn existing_file(
    path: PathBuf,
    content_type: &'static str,
    cache_control: &'static str,
) -> Option<ServedFile> {
    let meta = tokio::fs::metadata(&path).await.ok()?;
    meta.is_file().then_some(ServedFile {
        path,
        size: meta.len(),
        content_type,
        cache_control,
    })
}
