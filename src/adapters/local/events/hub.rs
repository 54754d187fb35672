use super::AssetEvent;
use tokio::sync::broadcast;

#[derive(Debug)]
pub struct EventHub {
    sender: broadcast::Sender<AssetEvent>,
}

impl EventHub {
    pub fn new() -> Self {
        // Slow subscribers lag and skip; progress is also persisted on the record
        let (sender, _) = broadcast::channel(256);
        Self { sender }
    }

    /// Returns how many subscribers saw the event; zero is normal.
    pub fn publish(&self, event: AssetEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AssetEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}
