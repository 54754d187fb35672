use crate::adapters::local::events::{hub::EventHub, AssetEvent};
use crate::adapters::local::fs::MediaStore;
use crate::domain::asset::{
    Asset, AssetDetails, AssetId, LifecycleError, ProcessingStatus, Visibility,
};
use crate::domain::av::cmd::MediaToolchain;
use crate::domain::av::probe::MetadataProbe;
use crate::domain::av::thumbnails::ThumbnailExtractor;
use crate::domain::jobs::EncodeJob;
use crate::domain::layout::thumbnail_file_name;
use crate::ports::queue::{JobQueuePort, QueueError};
use crate::ports::repository::{asset_update, AssetRepository, RepositoryError};
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Title is required")]
    MissingTitle,
    #[error("asset {0} not found")]
    NotFound(AssetId),
    #[error("server busy: {0}")]
    Busy(QueueError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Repository(RepositoryError),
}

impl From<RepositoryError> for IngestError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::NotFound(id) => IngestError::NotFound(id),
            other => IngestError::Repository(other),
        }
    }
}

/// An upload already streamed to `uploads/<source_file>`.
#[derive(Debug, Clone)]
pub struct NewAsset {
    pub source_file: String,
    pub owner: String,
    pub visibility: Visibility,
    pub details: AssetDetails,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    AlreadyGone,
}

/// Polling view of an asset's pipeline state.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct AssetStatus {
    pub status: ProcessingStatus,
    pub progress: u8,
    pub ready: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CatalogQuery {
    pub page: Option<usize>,
    pub limit: Option<usize>,
    pub genre: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CatalogPage {
    pub videos: Vec<Asset>,
    pub total: usize,
    pub page: usize,
    pub pages: usize,
    pub limit: usize,
}

/// Editable catalog fields. Processing state is out of reach here.
#[derive(Debug, Clone, Default)]
pub struct DetailsPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub genre: Option<String>,
    pub tags: Option<Vec<String>>,
    pub public: Option<bool>,
    pub requires_gated_access: Option<bool>,
}

const DEFAULT_PAGE_SIZE: usize = 12;

pub struct IngestService<R, Q, E> {
    repo: Arc<R>,
    queue: Arc<Q>,
    probe: MetadataProbe<E>,
    thumbnails: ThumbnailExtractor<E>,
    store: MediaStore,
    events: Arc<EventHub>,
}

impl<R, Q, E> IngestService<R, Q, E>
where
    R: AssetRepository + 'static,
    Q: JobQueuePort + 'static,
    E: MediaToolchain + 'static,
{
    pub fn new(
        repo: Arc<R>,
        queue: Arc<Q>,
        toolchain: Arc<E>,
        store: MediaStore,
        events: Arc<EventHub>,
        thumbnail_offset_secs: f64,
    ) -> Self {
        Self {
            repo,
            queue,
            probe: MetadataProbe::new(toolchain.clone()),
            thumbnails: ThumbnailExtractor::new(toolchain, thumbnail_offset_secs),
            store,
            events,
        }
    }

    pub fn store(&self) -> &MediaStore {
        &self.store
    }

    /// Probe, thumbnail, record, enqueue. Returns once the encode is queued;
    /// the record is `processing` by then.
    pub async fn create(&self, request: NewAsset) -> Result<Asset, IngestError> {
        let source_path = self.store.source_path(&request.source_file);
        if request.details.title.trim().is_empty() {
            let _ = tokio::fs::remove_file(&source_path).await;
            return Err(IngestError::MissingTitle);
        }

        let id = AssetId::new();
        let mut metadata = match self.probe.probe(&source_path).await {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!(asset_id = %id, error = %e, "Metadata probe failed, using defaults");
                Default::default()
            }
        };
        if metadata.file_size == 0 {
            if let Ok(meta) = tokio::fs::metadata(&source_path).await {
                metadata.file_size = meta.len();
            }
        }

        let thumbnail = self
            .thumbnails
            .extract(&source_path, &self.store.thumbnail_path_for(&id), metadata.duration)
            .await
            .map(|_| thumbnail_file_name(&id));

        let duration_hint = (metadata.duration > 0).then_some(metadata.duration as f64);
        let source_file = request.source_file.clone();
        let mut asset = Asset::new(
            id,
            request.source_file,
            request.owner,
            request.visibility,
            request.details,
            metadata,
            Utc::now(),
        );
        asset.thumbnail = thumbnail.clone();

        let asset = match self.record_processing(&asset).await {
            Ok(asset) => asset,
            Err(e) => {
                tracing::error!(asset_id = %id, error = %e, "Could not record upload, rolling back");
                self.roll_back(&id, &source_file, thumbnail.as_deref()).await;
                return Err(e.into());
            }
        };

        let job = EncodeJob {
            asset_id: id,
            source_path,
            attempt: asset.attempts,
            duration_hint,
        };
        if let Err(e) = self.queue.try_enqueue(job) {
            tracing::warn!(asset_id = %id, error = %e, "Encode queue rejected upload, rolling back");
            self.roll_back(&id, &source_file, thumbnail.as_deref()).await;
            return Err(IngestError::Busy(e));
        }

        tracing::info!(asset_id = %id, title = %asset.details.title, "Asset queued for encoding");
        self.events.publish(AssetEvent::Status {
            asset_id: id,
            status: asset.status,
            error: None,
        });
        Ok(asset)
    }

    async fn record_processing(&self, asset: &Asset) -> Result<Asset, RepositoryError> {
        self.repo.insert(asset).await?;
        self.repo
            .update(&asset.id, asset_update(|a| a.start_processing(Utc::now())))
            .await
    }

    /// Undoes a half-finished `create`, leaving no record and no files.
    async fn roll_back(&self, id: &AssetId, source_file: &str, thumbnail: Option<&str>) {
        if let Err(e) = self.repo.remove(id).await {
            tracing::warn!(asset_id = %id, error = %e, "Could not remove record during rollback");
        }
        self.store.cleanup(id, Some(source_file), thumbnail).await;
    }

    /// Removes the record and every artifact it owns. Safe to repeat.
    pub async fn delete(&self, id: &AssetId) -> Result<DeleteOutcome, IngestError> {
        let removed = self.repo.remove(id).await?;
        self.store
            .cleanup(
                id,
                removed.as_ref().map(|a| a.source_file.as_str()),
                removed.as_ref().and_then(|a| a.thumbnail.as_deref()),
            )
            .await;
        Ok(match removed {
            Some(_) => {
                tracing::info!(asset_id = %id, "Asset deleted");
                DeleteOutcome::Deleted
            }
            None => DeleteOutcome::AlreadyGone,
        })
    }

    pub async fn get(&self, id: &AssetId) -> Result<Asset, IngestError> {
        self.repo
            .get(id)
            .await?
            .ok_or(IngestError::NotFound(*id))
    }

    /// Playback fetch; bumps the view counter.
    pub async fn record_view(&self, id: &AssetId) -> Result<Asset, IngestError> {
        let asset = self
            .repo
            .update(
                id,
                asset_update(|a| {
                    a.views += 1;
                    Ok(())
                }),
            )
            .await?;
        Ok(asset)
    }

    pub async fn status(&self, id: &AssetId) -> Result<AssetStatus, IngestError> {
        let asset = self.get(id).await?;
        Ok(AssetStatus {
            status: asset.status,
            progress: asset.progress,
            ready: asset.ready,
            error: asset.processing_error,
        })
    }

    pub async fn update_details(
        &self,
        id: &AssetId,
        patch: DetailsPatch,
    ) -> Result<Asset, IngestError> {
        if matches!(&patch.title, Some(title) if title.trim().is_empty()) {
            return Err(IngestError::MissingTitle);
        }
        let asset = self
            .repo
            .update(
                id,
                asset_update(move |a| {
                    if let Some(title) = patch.title {
                        a.details.title = title;
                    }
                    if let Some(description) = patch.description {
                        a.details.description = description;
                    }
                    if let Some(genre) = patch.genre {
                        a.details.genre = genre;
                    }
                    if let Some(tags) = patch.tags {
                        a.details.tags = tags;
                    }
                    if let Some(public) = patch.public {
                        a.visibility.public = public;
                    }
                    if let Some(gated) = patch.requires_gated_access {
                        a.visibility.requires_gated_access = gated;
                    }
                    a.updated_at = Utc::now();
                    Ok(())
                }),
            )
            .await?;
        Ok(asset)
    }

    /// Completed assets, newest first.
    pub async fn list_catalog(&self, query: CatalogQuery) -> Result<CatalogPage, IngestError> {
        let genre = query
            .genre
            .filter(|g| !g.is_empty() && !g.eq_ignore_ascii_case("all"));
        let needle = query
            .search
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());

        let mut videos: Vec<Asset> = self
            .repo
            .list()
            .await?
            .into_iter()
            .filter(|a| a.status == ProcessingStatus::Completed)
            .filter(|a| genre.as_ref().map_or(true, |g| &a.details.genre == g))
            .filter(|a| needle.as_ref().map_or(true, |n| matches_search(a, n)))
            .collect();
        videos.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let limit = query.limit.filter(|l| *l > 0).unwrap_or(DEFAULT_PAGE_SIZE);
        let page = query.page.filter(|p| *p > 0).unwrap_or(1);
        let total = videos.len();
        let videos = videos
            .into_iter()
            .skip((page - 1).saturating_mul(limit))
            .take(limit)
            .collect();

        Ok(CatalogPage {
            videos,
            total,
            page,
            pages: total.div_ceil(limit),
            limit,
        })
    }

    pub async fn genres(&self) -> Result<Vec<String>, IngestError> {
        let genres: BTreeSet<String> = self
            .repo
            .list()
            .await?
            .into_iter()
            .filter(|a| a.status == ProcessingStatus::Completed)
            .map(|a| a.details.genre)
            .collect();
        Ok(genres.into_iter().collect())
    }
}

fn matches_search(asset: &Asset, needle: &str) -> bool {
    asset.details.title.to_lowercase().contains(needle)
        || asset.details.description.to_lowercase().contains(needle)
        || asset
            .details
            .tags
            .iter()
            .any(|t| t.to_lowercase().contains(needle))
}
