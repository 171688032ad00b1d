//! Account lifecycle broadcast.

use tokio::sync::broadcast;

use keyfort_common::UserId;

/// Transitions other components react to (UI surfaces, sync engines).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    LoggedIn { user_id: UserId },
    LoggedOut { user_id: UserId },
    /// In-memory keys dropped while the account stays signed in.
    Locked { user_id: UserId },
    /// The account is still on legacy master-key encryption and this
    /// client is not allowed to migrate it.
    KeyMigrationRequired,
}

/// Cloneable handle to a broadcast channel of lifecycle events.
///
/// Publishing never blocks and never fails; events sent while nobody is
/// subscribed are dropped.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: LifecycleEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_all_subscribers_see_events() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        let user = UserId::random();
        bus.publish(LifecycleEvent::LoggedIn {
            user_id: user.clone(),
        });

        let expected = LifecycleEvent::LoggedIn { user_id: user };
        assert_eq!(rx1.recv().await.unwrap(), expected);
        assert_eq!(rx2.recv().await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_fine() {
        let bus = EventBus::default();
        bus.publish(LifecycleEvent::KeyMigrationRequired);
    }
}
