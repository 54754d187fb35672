//! In-process `JobQueuePort` with a fixed capacity.

use crate::domain::jobs::EncodeJob;
use crate::ports::queue::{JobQueuePort, QueueError};
use async_trait::async_trait;
use std::sync::Mutex as StdMutex;
use tokio::sync::{mpsc, Mutex};

pub struct BoundedQueue {
    capacity: usize,
    sender: StdMutex<Option<mpsc::Sender<EncodeJob>>>,
    receiver: Mutex<mpsc::Receiver<EncodeJob>>,
}

impl BoundedQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            capacity,
            sender: StdMutex::new(Some(sender)),
            receiver: Mutex::new(receiver),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn sender(&self) -> Option<mpsc::Sender<EncodeJob>> {
        self.sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl JobQueuePort for BoundedQueue {
    fn try_enqueue(&self, job: EncodeJob) -> Result<(), QueueError> {
        let sender = self.sender().ok_or(QueueError::Closed)?;
        sender.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::Full {
                capacity: self.capacity,
            },
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })
    }

    async fn dequeue_job(&self) -> Option<EncodeJob> {
        // One waiter holds the receiver; the others queue on the lock.
        self.receiver.lock().await.recv().await
    }

    fn close(&self) {
        self.sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::asset::AssetId;
    use std::path::PathBuf;

    fn job() -> EncodeJob {
        EncodeJob {
            asset_id: AssetId::new(),
            source_path: PathBuf::from("uploads/video-1-1.mp4"),
            attempt: 1,
            duration_hint: None,
        }
    }

    #[tokio::test]
    async fn test_backpressure_when_full() {
        let queue = BoundedQueue::new(2);
        queue.try_enqueue(job()).unwrap();
        queue.try_enqueue(job()).unwrap();
        assert_eq!(
            queue.try_enqueue(job()),
            Err(QueueError::Full { capacity: 2 })
        );

        assert!(queue.dequeue_job().await.is_some());
        queue.try_enqueue(job()).unwrap();
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = BoundedQueue::new(4);
        let (a, b) = (job(), job());
        queue.try_enqueue(a.clone()).unwrap();
        queue.try_enqueue(b.clone()).unwrap();
        assert_eq!(queue.dequeue_job().await, Some(a));
        assert_eq!(queue.dequeue_job().await, Some(b));
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let queue = BoundedQueue::new(4);
        queue.try_enqueue(job()).unwrap();
        queue.close();

        assert_eq!(queue.try_enqueue(job()), Err(QueueError::Closed));
        assert!(queue.dequeue_job().await.is_some());
        assert!(queue.dequeue_job().await.is_none());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        assert_eq!(BoundedQueue::new(0).capacity(), 1);
    }
}
