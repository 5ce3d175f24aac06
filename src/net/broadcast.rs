//! Fire-and-forget fan-out to every connected client

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::trace;

/// Publish a payload to every connected client.
///
/// Implementations must not block the caller; the scheduler publishes from
/// inside its tick.
pub trait Broadcast: Send + Sync {
    /// Returns the number of subscribers that will see the payload
    fn publish(&self, payload: Arc<str>) -> usize;
}

/// [`Broadcast`] over a `tokio::sync::broadcast` channel.
///
/// Subscribers that fall more than `capacity` payloads behind lag and lose
/// the oldest ones.
#[derive(Debug, Clone)]
pub struct ChannelBroadcaster {
    sender: broadcast::Sender<Arc<str>>,
}

impl ChannelBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<str>> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Broadcast for ChannelBroadcaster {
    fn publish(&self, payload: Arc<str>) -> usize {
        // Err only means nobody is listening
        match self.sender.send(payload) {
            Ok(receivers) => receivers,
            Err(_) => {
                trace!("Broadcast dropped, no subscribers");
                0
            }
        }
    }
}
