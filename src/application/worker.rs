use crate::adapters::local::events::{hub::EventHub, AssetEvent};
use crate::adapters::local::fs::MediaStore;
use crate::domain::asset::{AssetId, ProcessingStatus};
use crate::domain::av::cmd::TranscodeExecutor;
use crate::domain::av::encoder::{remove_output_dir, HlsEncoder};
use crate::domain::jobs::EncodeJob;
use crate::domain::layout::hls_public_path;
use crate::ports::queue::JobQueuePort;
use crate::ports::repository::{asset_update, AssetRepository, RepositoryError};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// How one dequeued job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed(String),
    /// Re-queued as the given attempt.
    Retried(u32),
    /// The record was deleted while the job ran.
    Abandoned,
    /// The record moved on (reconciled or superseded); nothing was written.
    Stale,
}

pub struct WorkerService<R, Q, E> {
    repo: Arc<R>,
    queue: Arc<Q>,
    encoder: HlsEncoder<E>,
    store: MediaStore,
    events: Arc<EventHub>,
    timeout: Duration,
    max_attempts: u32,
}

impl<R, Q, E> WorkerService<R, Q, E>
where
    R: AssetRepository + 'static,
    Q: JobQueuePort + 'static,
    E: TranscodeExecutor + 'static,
{
    pub fn new(
        repo: Arc<R>,
        queue: Arc<Q>,
        encoder: HlsEncoder<E>,
        store: MediaStore,
        events: Arc<EventHub>,
        timeout: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            repo,
            queue,
            encoder,
            store,
            events,
            timeout,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Spawns `workers` loops sharing the queue. They end once it is closed.
    pub fn start(self: &Arc<Self>, workers: usize) -> Vec<JoinHandle<()>> {
        let handles = (0..workers.max(1))
            .map(|worker_id| {
                let worker = self.clone();
                tokio::spawn(async move { worker.run_worker_loop(worker_id).await })
            })
            .collect::<Vec<_>>();
        tracing::info!(workers = handles.len(), "Started transcoding workers");
        handles
    }

    pub async fn run_worker_loop(&self, worker_id: usize) {
        tracing::debug!(worker_id, "Worker started");
        while let Some(job) = self.queue.dequeue_job().await {
            let outcome = self.process_job(&job).await;
            tracing::debug!(worker_id, asset_id = %job.asset_id, ?outcome, "Job finished");
        }
        tracing::debug!(worker_id, "Worker stopped, queue closed");
    }

    pub async fn process_job(&self, job: &EncodeJob) -> JobOutcome {
        let id = job.asset_id;
        let attempt = job.attempt;
        let begin = asset_update(move |a| a.begin_attempt(attempt, Utc::now()));
        match self.repo.update(&id, begin).await {
            Ok(_) => {}
            Err(RepositoryError::NotFound(_)) => {
                tracing::info!(asset_id = %id, "Asset deleted before encoding started");
                return JobOutcome::Abandoned;
            }
            Err(RepositoryError::Lifecycle(e)) => {
                tracing::info!(asset_id = %id, error = %e, "Skipping job that is no longer current");
                return JobOutcome::Stale;
            }
            Err(e) => {
                // Stays processing until the next startup recovery
                tracing::error!(asset_id = %id, error = %e, "Could not start encode attempt");
                return JobOutcome::Failed(e.to_string());
            }
        }

        let output_dir = self.store.hls_dir(&id);
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let forwarder = self.forward_progress(id, job.attempt, progress_rx);

        tracing::info!(asset_id = %id, attempt = job.attempt, "Encoding started");
        let encoded = tokio::time::timeout(
            self.timeout,
            self.encoder
                .encode(&job.source_path, &output_dir, job.duration_hint, progress_tx),
        )
        .await;
        let _ = forwarder.await;

        let result = match encoded {
            Ok(Ok(_output)) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => {
                // The dropped future killed the encoder child; its partial output is ours to remove
                remove_output_dir(&output_dir).await;
                Err(format!("processing timed out after {}s", self.timeout.as_secs()))
            }
        };

        match result {
            Ok(()) => self.finish(job).await,
            Err(message) if job.attempt < self.max_attempts => self.retry(job, message).await,
            Err(message) => self.fail(job, message).await,
        }
    }

    fn forward_progress(
        &self,
        id: AssetId,
        attempt: u32,
        mut progress: mpsc::UnboundedReceiver<u8>,
    ) -> JoinHandle<()> {
        let repo = self.repo.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            // Each attempt starts at 0, so only rising values need the store
            let mut last = 0u8;
            while let Some(percent) = progress.recv().await {
                let percent = percent.min(100);
                if percent <= last {
                    continue;
                }
                let update = asset_update(move |a| a.record_progress(attempt, percent).map(|_| ()));
                match repo.update(&id, update).await {
                    Ok(asset) if asset.progress == percent => {
                        last = percent;
                        tracing::debug!(asset_id = %id, percent, "Encode progress");
                        events.publish(AssetEvent::Progress {
                            asset_id: id,
                            percent,
                        });
                    }
                    Ok(asset) => last = asset.progress,
                    Err(e) => tracing::debug!(asset_id = %id, error = %e, "Progress not recorded"),
                }
            }
        })
    }

    async fn finish(&self, job: &EncodeJob) -> JobOutcome {
        let id = job.asset_id;
        let attempt = job.attempt;
        let update = asset_update(move |a| a.complete(attempt, hls_public_path(&id), Utc::now()));
        match self.repo.update(&id, update).await {
            Ok(asset) => {
                tracing::info!(asset_id = %id, "Encoding completed");
                self.publish_status(&id, asset.status, None);
                JobOutcome::Completed
            }
            Err(e) => self.discard_output(job, e).await,
        }
    }

    async fn retry(&self, job: &EncodeJob, message: String) -> JobOutcome {
        let id = job.asset_id;
        let attempt = job.attempt;
        let next = match self
            .repo
            .update(&id, asset_update(move |a| a.begin_retry(attempt, Utc::now()).map(|_| ())))
            .await
        {
            Ok(asset) => asset.attempts,
            Err(e) => return self.discard_output(job, e).await,
        };

        let retry = EncodeJob {
            attempt: next,
            ..job.clone()
        };
        match self.queue.try_enqueue(retry.clone()) {
            Ok(()) => {
                tracing::warn!(asset_id = %id, attempt = next, error = %message, "Encoding failed, retrying");
                self.publish_status(&id, ProcessingStatus::Processing, Some(message));
                JobOutcome::Retried(next)
            }
            Err(e) => {
                self.fail(&retry, format!("{}; retry could not be queued: {}", message, e))
                    .await
            }
        }
    }

    async fn fail(&self, job: &EncodeJob, message: String) -> JobOutcome {
        let id = job.asset_id;
        let attempt = job.attempt;
        let error = message.clone();
        match self
            .repo
            .update(&id, asset_update(move |a| a.fail(attempt, error, Utc::now())))
            .await
        {
            Ok(asset) => {
                tracing::error!(asset_id = %id, error = %message, "Encoding failed");
                self.publish_status(&id, asset.status, Some(message.clone()));
                JobOutcome::Failed(message)
            }
            Err(e) => self.discard_output(job, e).await,
        }
    }

    /// The write-back was refused, so whatever this job produced must not survive
    /// unless a newer attempt owns the directory.
    async fn discard_output(&self, job: &EncodeJob, error: RepositoryError) -> JobOutcome {
        let id = job.asset_id;
        match error {
            RepositoryError::NotFound(_) => {
                tracing::info!(asset_id = %id, "Asset deleted during encoding, discarding output");
                self.store.remove_hls_output(&id).await;
                JobOutcome::Abandoned
            }
            RepositoryError::Lifecycle(e) => {
                let superseded = matches!(
                    self.repo.get(&id).await,
                    Ok(Some(a))
                        if a.status == ProcessingStatus::Processing && a.attempts > job.attempt
                );
                if !superseded {
                    self.store.remove_hls_output(&id).await;
                }
                tracing::info!(asset_id = %id, error = %e, "Dropping stale encode result");
                JobOutcome::Stale
            }
            other => {
                tracing::error!(asset_id = %id, error = %other, "Could not persist encode result");
                JobOutcome::Failed(other.to_string())
            }
        }
    }

    fn publish_status(&self, id: &AssetId, status: ProcessingStatus, error: Option<String>) {
        self.events.publish(AssetEvent::Status {
            asset_id: *id,
            status,
            error,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::local::json_store::JsonFileRepository;
    use crate::adapters::local::queue::BoundedQueue;
    use crate::application::ingest::{IngestService, NewAsset};
    use crate::application::reconcile::Reconciler;
    use crate::application::testing::{EncodeScript, FakeToolchain};
    use crate::domain::asset::{Asset, AssetDetails, MediaMetadata, Visibility};
    use crate::domain::hls::MediaPlaylist;
    use crate::domain::layout::generate_source_name;

    struct Harness {
        _dir: tempfile::TempDir,
        repo: Arc<JsonFileRepository>,
        queue: Arc<BoundedQueue>,
        store: MediaStore,
        events: Arc<EventHub>,
        toolchain: Arc<FakeToolchain>,
        worker: Arc<WorkerService<JsonFileRepository, BoundedQueue, FakeToolchain>>,
    }

    async fn harness(script: EncodeScript, max_attempts: u32, timeout: Duration) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaStore::new(dir.path());
        store.ensure_dirs().await.unwrap();
        let repo = Arc::new(JsonFileRepository::in_memory());
        let queue = Arc::new(BoundedQueue::new(4));
        let events = Arc::new(EventHub::new());
        let toolchain = Arc::new(FakeToolchain::new(Some(30.0), script));
        let worker = Arc::new(WorkerService::new(
            repo.clone(),
            queue.clone(),
            HlsEncoder::new(toolchain.clone(), 10),
            store.clone(),
            events.clone(),
            timeout,
            max_attempts,
        ));
        Harness {
            _dir: dir,
            repo,
            queue,
            store,
            events,
            toolchain,
            worker,
        }
    }

    async fn processing_job(h: &Harness) -> EncodeJob {
        let mut asset = Asset::new(
            AssetId::new(),
            String::from("video-1-1.mp4"),
            String::from("admin"),
            Visibility::default(),
            AssetDetails::titled("Clip"),
            MediaMetadata::default(),
            Utc::now(),
        );
        asset.start_processing(Utc::now()).unwrap();
        h.repo.insert(&asset).await.unwrap();
        EncodeJob {
            asset_id: asset.id,
            source_path: h.store.source_path(&asset.source_file),
            attempt: 1,
            duration_hint: Some(30.0),
        }
    }

    #[tokio::test]
    async fn test_thirty_second_source_completes_with_three_segments() {
        let h = harness(EncodeScript::Succeed, 1, Duration::from_secs(60)).await;
        let job = processing_job(&h).await;
        let mut events = h.events.subscribe();

        assert_eq!(h.worker.process_job(&job).await, JobOutcome::Completed);

        let asset = h.repo.get(&job.asset_id).await.unwrap().unwrap();
        assert_eq!(asset.status, ProcessingStatus::Completed);
        assert!(asset.ready);
        assert_eq!(asset.progress, 100);
        assert_eq!(asset.hls_path, Some(hls_public_path(&job.asset_id)));

        let playlist = std::fs::read_to_string(h.store.playlist_path(&job.asset_id)).unwrap();
        let playlist = MediaPlaylist::parse(&playlist).unwrap();
        assert!(playlist.segments.len() >= 3);

        let mut saw_progress = false;
        let mut saw_completed = false;
        while let Ok(event) = events.try_recv() {
            match event {
                AssetEvent::Progress { .. } => saw_progress = true,
                AssetEvent::Status { status, .. } => {
                    saw_completed |= status == ProcessingStatus::Completed
                }
            }
        }
        assert!(saw_progress && saw_completed);
    }

    #[tokio::test]
    async fn test_failed_encode_leaves_no_output() {
        let h = harness(EncodeScript::Fail, 1, Duration::from_secs(60)).await;
        let job = processing_job(&h).await;

        assert!(matches!(
            h.worker.process_job(&job).await,
            JobOutcome::Failed(_)
        ));

        let asset = h.repo.get(&job.asset_id).await.unwrap().unwrap();
        assert_eq!(asset.status, ProcessingStatus::Failed);
        assert!(!asset.ready);
        assert!(asset
            .processing_error
            .as_deref()
            .is_some_and(|e| !e.is_empty()));
        assert!(!h.store.hls_dir(&job.asset_id).exists());
    }

    #[tokio::test]
    async fn test_retry_requeues_then_completes() {
        let h = harness(EncodeScript::FailTimes(1), 2, Duration::from_secs(60)).await;
        let job = processing_job(&h).await;

        assert_eq!(h.worker.process_job(&job).await, JobOutcome::Retried(2));
        let asset = h.repo.get(&job.asset_id).await.unwrap().unwrap();
        assert_eq!(asset.status, ProcessingStatus::Processing);
        assert_eq!(asset.attempts, 2);
        assert_eq!(asset.progress, 0);

        let retry = h.queue.dequeue_job().await.unwrap();
        assert_eq!(retry.attempt, 2);
        assert_eq!(h.worker.process_job(&retry).await, JobOutcome::Completed);
        assert_eq!(h.toolchain.runs(), 2);
    }

    #[tokio::test]
    async fn test_retries_exhausted_fail_the_asset() {
        let h = harness(EncodeScript::Fail, 2, Duration::from_secs(60)).await;
        let job = processing_job(&h).await;

        assert_eq!(h.worker.process_job(&job).await, JobOutcome::Retried(2));
        let retry = h.queue.dequeue_job().await.unwrap();
        assert!(matches!(
            h.worker.process_job(&retry).await,
            JobOutcome::Failed(_)
        ));
        let asset = h.repo.get(&job.asset_id).await.unwrap().unwrap();
        assert_eq!(asset.status, ProcessingStatus::Failed);
        assert_eq!(asset.attempts, 2);
    }

    #[tokio::test]
    async fn test_timeout_fails_and_removes_output() {
        let h = harness(EncodeScript::Hang, 1, Duration::from_millis(50)).await;
        let job = processing_job(&h).await;

        match h.worker.process_job(&job).await {
            JobOutcome::Failed(message) => assert!(message.contains("timed out")),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(!h.store.hls_dir(&job.asset_id).exists());
    }

    #[tokio::test]
    async fn test_time_in_queue_does_not_count_against_timeout() {
        let h = harness(EncodeScript::Succeed, 1, Duration::from_secs(60)).await;
        let job = processing_job(&h).await;
        let reconciler = Reconciler::new(
            h.repo.clone(),
            h.store.clone(),
            h.events.clone(),
            Duration::from_secs(60),
        );

        let waited = Utc::now() + chrono::Duration::seconds(61);
        assert!(reconciler.sweep(waited).await.unwrap().is_empty());

        assert_eq!(h.worker.process_job(&job).await, JobOutcome::Completed);
        assert_eq!(h.toolchain.runs(), 1);
        let asset = h.repo.get(&job.asset_id).await.unwrap().unwrap();
        assert!(asset.processing_started_at.is_some());
    }

    #[tokio::test]
    async fn test_repeated_progress_is_neither_stored_nor_published() {
        let h = harness(EncodeScript::Succeed, 1, Duration::from_secs(60)).await;
        let job = processing_job(&h).await;
        let mut events = h.events.subscribe();

        let (tx, rx) = mpsc::unbounded_channel();
        let forwarder = h.worker.forward_progress(job.asset_id, job.attempt, rx);
        for percent in [50u8, 50, 50, 40] {
            tx.send(percent).unwrap();
        }
        drop(tx);
        forwarder.await.unwrap();

        let mut published = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let AssetEvent::Progress { percent, .. } = event {
                published.push(percent);
            }
        }
        assert_eq!(published, vec![50]);
        let asset = h.repo.get(&job.asset_id).await.unwrap().unwrap();
        assert_eq!(asset.progress, 50);
    }

    #[tokio::test]
    async fn test_corrupt_upload_ends_failed_without_output() {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaStore::new(dir.path());
        store.ensure_dirs().await.unwrap();
        let repo = Arc::new(JsonFileRepository::in_memory());
        let queue = Arc::new(BoundedQueue::new(4));
        let events = Arc::new(EventHub::new());
        let toolchain = Arc::new(FakeToolchain::new(None, EncodeScript::Fail));
        let ingest = IngestService::new(
            repo.clone(),
            queue.clone(),
            toolchain.clone(),
            store.clone(),
            events.clone(),
            3.0,
        );
        let worker = WorkerService::new(
            repo.clone(),
            queue.clone(),
            HlsEncoder::new(toolchain, 10),
            store.clone(),
            events,
            Duration::from_secs(60),
            1,
        );

        let name = generate_source_name("corrupt.mp4");
        std::fs::write(store.source_path(&name), b"not a video").unwrap();
        let asset = ingest
            .create(NewAsset {
                source_file: name,
                owner: String::from("admin"),
                visibility: Visibility::default(),
                details: AssetDetails::titled("Broken"),
            })
            .await
            .unwrap();
        assert_eq!(asset.status, ProcessingStatus::Processing);
        assert_eq!(asset.metadata.duration, 0);
        assert!(asset.thumbnail.is_none());

        let job = queue.dequeue_job().await.unwrap();
        assert!(matches!(
            worker.process_job(&job).await,
            JobOutcome::Failed(_)
        ));

        let stored = repo.get(&asset.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ProcessingStatus::Failed);
        assert!(!stored.ready);
        assert!(stored
            .processing_error
            .as_deref()
            .is_some_and(|e| !e.is_empty()));
        assert!(!store.hls_dir(&asset.id).exists());
    }

    #[tokio::test]
    async fn test_deleted_before_start_is_abandoned() {
        let h = harness(EncodeScript::Succeed, 1, Duration::from_secs(60)).await;
        let job = processing_job(&h).await;
        h.repo.remove(&job.asset_id).await.unwrap();

        assert_eq!(h.worker.process_job(&job).await, JobOutcome::Abandoned);
        assert_eq!(h.toolchain.runs(), 0);
    }

    #[tokio::test]
    async fn test_completion_after_delete_discards_output() {
        let h = harness(EncodeScript::Succeed, 1, Duration::from_secs(60)).await;
        let job = processing_job(&h).await;

        // Encode finished on disk, then the delete won the race to the record
        crate::domain::av::encoder::tests::write_fake_output(
            &h.store.hls_dir(&job.asset_id),
            30.0,
            10.0,
        );
        h.repo.remove(&job.asset_id).await.unwrap();

        assert_eq!(h.worker.finish(&job).await, JobOutcome::Abandoned);
        assert!(!h.store.hls_dir(&job.asset_id).exists());
        assert!(h.repo.get(&job.asset_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_attempt_writes_nothing() {
        let h = harness(EncodeScript::Succeed, 1, Duration::from_secs(60)).await;
        let job = processing_job(&h).await;
        h.repo
            .update(
                &job.asset_id,
                asset_update(|a| a.fail(1, "processing timed out after 1s", Utc::now())),
            )
            .await
            .unwrap();

        assert_eq!(h.worker.process_job(&job).await, JobOutcome::Stale);
        let asset = h.repo.get(&job.asset_id).await.unwrap().unwrap();
        assert_eq!(asset.status, ProcessingStatus::Failed);
        assert_eq!(h.toolchain.runs(), 0);
    }

    #[tokio::test]
    async fn test_pool_drains_queue() {
        let h = harness(EncodeScript::Succeed, 1, Duration::from_secs(60)).await;
        let a = processing_job(&h).await;
        let b = processing_job(&h).await;
        h.queue.try_enqueue(a.clone()).unwrap();
        h.queue.try_enqueue(b.clone()).unwrap();
        h.queue.close();

        for handle in h.worker.start(2) {
            handle.await.unwrap();
        }
        for job in [a, b] {
            let asset = h.repo.get(&job.asset_id).await.unwrap().unwrap();
            assert_eq!(asset.status, ProcessingStatus::Completed);
        }
    }
}
