//! On-disk layout of sources, HLS output and thumbnails, partitioned by asset id.

use crate::domain::asset::AssetId;
use crate::domain::av::encoder::remove_output_dir;
use crate::domain::layout::{
    thumbnail_file_name, HLS_DIR, PLAYLIST_NAME, THUMBNAILS_DIR, UPLOADS_DIR,
};
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
}

/// What a cleanup actually removed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub source_removed: bool,
    pub hls_removed: bool,
    pub thumbnail_removed: bool,
}

impl MediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_dirs(&self) -> io::Result<()> {
        for dir in [UPLOADS_DIR, HLS_DIR, THUMBNAILS_DIR] {
            tokio::fs::create_dir_all(self.root.join(dir)).await?;
        }
        Ok(())
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join(UPLOADS_DIR)
    }

    pub fn source_path(&self, source_file: &str) -> PathBuf {
        self.uploads_dir().join(source_file)
    }

    pub fn hls_dir(&self, id: &AssetId) -> PathBuf {
        self.root.join(HLS_DIR).join(id.to_string())
    }

    pub fn playlist_path(&self, id: &AssetId) -> PathBuf {
        self.hls_dir(id).join(PLAYLIST_NAME)
    }

    /// Callers validate `segment` first.
    pub fn segment_path(&self, id: &AssetId, segment: &str) -> PathBuf {
        self.hls_dir(id).join(segment)
    }

    /// Callers validate `file_name` first.
    pub fn thumbnail_path(&self, file_name: &str) -> PathBuf {
        self.root.join(THUMBNAILS_DIR).join(file_name)
    }

    pub fn thumbnail_path_for(&self, id: &AssetId) -> PathBuf {
        self.thumbnail_path(&thumbnail_file_name(id))
    }

    /// Removes the HLS output directory of one asset.
    pub async fn remove_hls_output(&self, id: &AssetId) -> bool {
        let dir = self.hls_dir(id);
        let existed = tokio::fs::try_exists(&dir).await.unwrap_or(false);
        remove_output_dir(&dir).await;
        existed
    }

    /// Removes every artifact owned by an asset. Missing files are not errors.
    pub async fn cleanup(
        &self,
        id: &AssetId,
        source_file: Option<&str>,
        thumbnail: Option<&str>,
    ) -> CleanupReport {
        let source_removed = match source_file {
            Some(name) => remove_file_if_present(&self.source_path(name)).await,
            None => false,
        };
        let hls_removed = self.remove_hls_output(id).await;

        // The generated name is deterministic, so try it even without a record
        let mut thumbnail_removed = remove_file_if_present(&self.thumbnail_path_for(id)).await;
        if let Some(name) = thumbnail {
            if name != thumbnail_file_name(id) {
                thumbnail_removed |= remove_file_if_present(&self.thumbnail_path(name)).await;
            }
        }

        let report = CleanupReport {
            source_removed,
            hls_removed,
            thumbnail_removed,
        };
        tracing::info!(asset_id = %id, ?report, "Cleanup finished");
        report
    }
}

async fn remove_file_if_present(path: &Path) -> bool {
    match tokio::fs::remove_file(path).await {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Could not remove file");
            false
        }
    }
}
