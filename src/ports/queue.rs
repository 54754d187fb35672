use crate::domain::jobs::EncodeJob;
use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("encode queue is full ({capacity} jobs waiting)")]
    Full { capacity: usize },
    #[error("encode queue is closed")]
    Closed,
}

#[async_trait]
pub trait JobQueuePort: Send + Sync {
    /// Admits a job without waiting; a full queue is reported, never awaited.
    fn try_enqueue(&self, job: EncodeJob) -> Result<(), QueueError>;

    /// Waits for the next job, `None` once the queue is closed and drained.
    async fn dequeue_job(&self) -> Option<EncodeJob>;

    fn close(&self);
}
