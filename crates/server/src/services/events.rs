// Per-listing change notifications for live feeds.

use std::collections::HashMap;

use tokio::sync::{broadcast, RwLock};
use tokio_stream::{
    wrappers::{errors::BroadcastStreamRecvError, BroadcastStream},
    StreamExt,
};

#[derive(Debug, Clone)]
pub enum ListingEvent {
    RatingChanged,
    CommentsChanged,
    Removed,
    /// Produced locally when a subscriber fell behind and must refetch.
    Resync,
}

// Registry keyed by listing id
#[derive(Default)]
pub struct EventHub {
    rooms: RwLock<HashMap<String, broadcast::Sender<ListingEvent>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, listing_id: &str) -> Subscription {
        let mut rooms = self.rooms.write().await;
        // Rooms whose last feed went away without a publish are dropped here.
        rooms.retain(|_, sender| sender.receiver_count() > 0);
        let sender = rooms
            .entry(listing_id.to_string())
            .or_insert_with(|| broadcast::channel(64).0);
        Subscription {
            stream: BroadcastStream::new(sender.subscribe()),
        }
    }

    pub async fn publish(&self, listing_id: &str, event: ListingEvent) {
        let removed = matches!(event, ListingEvent::Removed);

        let mut rooms = self.rooms.write().await;
        if let Some(sender) = rooms.get(listing_id) {
            // No receivers left is fine; the room is pruned below.
            let _ = sender.send(event);
            if removed || sender.receiver_count() == 0 {
                rooms.remove(listing_id);
            }
        }
    }

    /// Drops the room if nobody is listening any more.
    pub async fn release(&self, listing_id: &str) {
        let mut rooms = self.rooms.write().await;
        if rooms
            .get(listing_id)
            .is_some_and(|sender| sender.receiver_count() == 0)
        {
            rooms.remove(listing_id);
        }
    }

    #[cfg(test)]
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

pub struct Subscription {
    stream: BroadcastStream<ListingEvent>,
}

impl Subscription {
    /// Next event for the listing; `None` once it is removed or the hub is gone.
    pub async fn recv(&mut self) -> Option<ListingEvent> {
        match self.stream.next().await {
            Some(Ok(ListingEvent::Removed)) | None => None,
            Some(Ok(event)) => Some(event),
            Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                tracing::debug!(skipped, "live feed lagged, resyncing");
                Some(ListingEvent::Resync)
            }
        }
    }
}
