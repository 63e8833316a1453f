use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for LISTEN/NOTIFY per provider. Clients subscribe to
/// `provider_{ulid}` channels and receive calendar and booking events.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to notifications for a provider. Creates the channel if needed.
    pub fn subscribe(&self, provider_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(provider_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, provider_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&provider_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Remove a channel (e.g. when the provider is deleted).
    pub fn remove(&self, provider_id: &Ulid) {
        self.channels.remove(provider_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Booking, BookingStatus, Span};

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let pid = Ulid::new();
        let mut rx = hub.subscribe(pid);

        let event = Event::BookingCreated {
            booking: Booking {
                id: Ulid::new(),
                service_id: Ulid::new(),
                provider_id: pid,
                span: Span::new(1_773_100_800_000, 1_773_104_400_000),
                status: BookingStatus::Confirmed,
                buffer_before_min: 0,
                buffer_after_min: 0,
                client_name: None,
                client_email: None,
            },
        };
        hub.send(pid, &event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let pid = Ulid::new();
        // No subscriber — should not panic
        hub.send(pid, &Event::ProviderDeleted { id: pid });
    }
}
