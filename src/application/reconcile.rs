//! Bounds the lifetime of background work: records that never reached a
//! terminal state are failed once their deadline has passed.

use crate::adapters::local::events::{hub::EventHub, AssetEvent};
use crate::adapters::local::fs::MediaStore;
use crate::domain::asset::{Asset, AssetId, ProcessingStatus};
use crate::ports::repository::{asset_update, AssetRepository, RepositoryError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub const INTERRUPTED_ERROR: &str = "processing interrupted by a server restart";

pub struct Reconciler<R> {
    repo: Arc<R>,
    store: MediaStore,
    events: Arc<EventHub>,
    timeout: Duration,
}

impl<R: AssetRepository + 'static> Reconciler<R> {
    pub fn new(repo: Arc<R>, store: MediaStore, events: Arc<EventHub>, timeout: Duration) -> Self {
        Self {
            repo,
            store,
            events,
            timeout,
        }
    }

    /// Fails every record whose current attempt outlived the encode timeout.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<Vec<AssetId>, RepositoryError> {
        let timeout = chrono::Duration::from_std(self.timeout)
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        let message = format!("processing timed out after {}s", self.timeout.as_secs());
        self.fail_matching(now, &message, |asset| {
            asset.deadline(timeout).is_some_and(|deadline| deadline <= now)
        })
            .await
    }

    /// Startup pass. The queue lives in memory, so nothing left over from a
    /// previous run will ever be picked up again.
    pub async fn recover(&self, now: DateTime<Utc>) -> Result<Vec<AssetId>, RepositoryError> {
        self.fail_matching(now, INTERRUPTED_ERROR, |_| true).await
    }

    async fn fail_matching<F>(
        &self,
        now: DateTime<Utc>,
        message: &str,
        expired: F,
    ) -> Result<Vec<AssetId>, RepositoryError>
    where
        F: Fn(&Asset) -> bool,
    {
        let mut failed = Vec::new();
        for asset in self.repo.list().await? {
            if asset.status.is_terminal() || !expired(&asset) {
                continue;
            }
            let (observed_status, observed_attempt) = (asset.status, asset.attempts);
            let error = message.to_string();
            let update = asset_update(move |a| {
                // Re-checked under the store lock: a retry may have started meanwhile
                if observed_status == ProcessingStatus::Pending {
                    a.start_processing(now)?;
                }
                let attempt = if observed_status == ProcessingStatus::Pending {
                    a.attempts
                } else {
                    observed_attempt
                };
                a.fail(attempt, error, now)
            });
            match self.repo.update(&asset.id, update).await {
                Ok(updated) => {
                    tracing::warn!(asset_id = %asset.id, error = %message, "Reconciled stuck asset");
                    self.store.remove_hls_output(&asset.id).await;
                    self.events.publish(AssetEvent::Status {
                        asset_id: asset.id,
                        status: updated.status,
                        error: updated.processing_error,
                    });
                    failed.push(asset.id);
                }
                Err(RepositoryError::NotFound(_)) | Err(RepositoryError::Lifecycle(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(failed)
    }

    pub fn spawn_periodic(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match self.sweep(Utc::now()).await {
                    Ok(failed) if !failed.is_empty() => {
                        tracing::info!(count = failed.len(), "Reconcile sweep failed stuck assets")
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "Reconcile sweep failed"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::local::json_store::JsonFileRepository;
    use crate::domain::asset::{AssetDetails, MediaMetadata, Visibility};

    fn asset(created: DateTime<Utc>) -> Asset {
        Asset::new(
            AssetId::new(),
            String::from("video-1-1.mp4"),
            String::from("admin"),
            Visibility::default(),
            AssetDetails::titled("Clip"),
            MediaMetadata::default(),
            created,
        )
    }

    async fn reconciler(
        dir: &tempfile::TempDir,
    ) -> (Arc<JsonFileRepository>, Reconciler<JsonFileRepository>) {
        let repo = Arc::new(JsonFileRepository::in_memory());
        let store = MediaStore::new(dir.path());
        let reconciler = Reconciler::new(
            repo.clone(),
            store,
            Arc::new(EventHub::new()),
            Duration::from_secs(60),
        );
        (repo, reconciler)
    }

    #[tokio::test]
    async fn test_sweep_fails_only_expired_processing() {
        let dir = tempfile::tempdir().unwrap();
        let (repo, reconciler) = reconciler(&dir).await;
        let now = Utc::now();

        let mut stuck = asset(now - chrono::Duration::minutes(5));
        stuck.start_processing(now - chrono::Duration::minutes(5)).unwrap();
        stuck.begin_attempt(1, now - chrono::Duration::minutes(5)).unwrap();
        let mut fresh = asset(now - chrono::Duration::minutes(5));
        fresh.start_processing(now - chrono::Duration::minutes(5)).unwrap();
        fresh.begin_attempt(1, now).unwrap();
        let mut done = asset(now - chrono::Duration::hours(1));
        done.start_processing(now - chrono::Duration::hours(1)).unwrap();
        done.complete(1, String::from("/hls/x/index.m3u8"), now).unwrap();
        for a in [&stuck, &fresh, &done] {
            repo.insert(a).await.unwrap();
        }
        let stuck_dir = dir.path().join("hls").join(stuck.id.to_string());
        std::fs::create_dir_all(&stuck_dir).unwrap();

        let failed = reconciler.sweep(now).await.unwrap();
        assert_eq!(failed, vec![stuck.id]);

        let stuck = repo.get(&stuck.id).await.unwrap().unwrap();
        assert_eq!(stuck.status, ProcessingStatus::Failed);
        assert_eq!(
            stuck.processing_error.as_deref(),
            Some("processing timed out after 60s")
        );
        assert!(!stuck_dir.exists());
        assert_eq!(
            repo.get(&fresh.id).await.unwrap().unwrap().status,
            ProcessingStatus::Processing
        );
        assert_eq!(
            repo.get(&done.id).await.unwrap().unwrap().status,
            ProcessingStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_sweep_ignores_jobs_still_waiting_in_queue() {
        let dir = tempfile::tempdir().unwrap();
        let (repo, reconciler) = reconciler(&dir).await;
        let created = Utc::now();
        let mut queued = asset(created);
        queued.start_processing(created).unwrap();
        repo.insert(&queued).await.unwrap();

        let later = created + chrono::Duration::hours(3);
        assert!(reconciler.sweep(later).await.unwrap().is_empty());

        // Picked up late; the deadline counts from here
        let begin = asset_update(move |a| a.begin_attempt(1, later));
        repo.update(&queued.id, begin).await.unwrap();
        assert!(reconciler
            .sweep(later + chrono::Duration::seconds(30))
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            reconciler
                .sweep(later + chrono::Duration::seconds(61))
                .await
                .unwrap(),
            vec![queued.id]
        );
    }

    #[tokio::test]
    async fn test_sweep_fails_stuck_pending() {
        let dir = tempfile::tempdir().unwrap();
        let (repo, reconciler) = reconciler(&dir).await;
        let now = Utc::now();
        let pending = asset(now - chrono::Duration::minutes(2));
        repo.insert(&pending).await.unwrap();

        assert_eq!(reconciler.sweep(now).await.unwrap(), vec![pending.id]);
        let stored = repo.get(&pending.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ProcessingStatus::Failed);
        assert_eq!(stored.attempts, 1);
    }

    #[tokio::test]
    async fn test_recover_fails_everything_in_flight() {
        let dir = tempfile::tempdir().unwrap();
        let (repo, reconciler) = reconciler(&dir).await;
        let now = Utc::now();
        let mut running = asset(now);
        running.start_processing(now).unwrap();
        repo.insert(&running).await.unwrap();

        assert_eq!(reconciler.recover(now).await.unwrap(), vec![running.id]);
        let stored = repo.get(&running.id).await.unwrap().unwrap();
        assert_eq!(stored.processing_error.as_deref(), Some(INTERRUPTED_ERROR));

        assert!(reconciler.recover(now).await.unwrap().is_empty());
    }
}
