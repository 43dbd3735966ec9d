use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

struct Slot<T> {
    id: u64,
    sender: mpsc::Sender<Arc<T>>,
}

struct Inner<T> {
    subscribers: Mutex<Vec<Slot<T>>>,
    next_id: Mutex<u64>,
}

/// Fan-out channel for immutable event snapshots. Every live subscription
/// gets a shared reference to each fired event; a subscriber that has fallen
/// behind its channel capacity misses events instead of stalling the
/// producer.
pub struct Dispatcher<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Dispatcher<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T> Default for Dispatcher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Dispatcher<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                subscribers: Mutex::new(Vec::new()),
                next_id: Mutex::new(0),
            }),
        }
    }

    pub fn subscribe(&self, capacity: usize) -> Subscription<T> {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let id = {
            let mut next_id = self.inner.next_id.lock();
            let id = *next_id;
            *next_id += 1;
            id
        };
        self.inner.subscribers.lock().push(Slot { id, sender });
        Subscription { id, receiver, dispatcher: Arc::downgrade(&self.inner) }
    }

    pub fn fire(&self, event: T) {
        self.fire_arc(Arc::new(event))
    }

    pub fn fire_arc(&self, event: Arc<T>) {
        let mut subscribers = self.inner.subscribers.lock();
        subscribers.retain(|slot| match slot.sender.try_send(event.clone()) {
            Ok(()) => true,
            // full channel: drop the event for this subscriber only
            Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }
}

pub struct Subscription<T> {
    id: u64,
    receiver: mpsc::Receiver<Arc<T>>,
    dispatcher: std::sync::Weak<Inner<T>>,
}

impl<T> Subscription<T> {
    pub async fn recv(&mut self) -> Option<Arc<T>> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Arc<T>> {
        self.receiver.try_recv().ok()
    }

    pub fn unsubscribe(self) {}
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(inner) = self.dispatcher.upgrade() {
            inner.subscribers.lock().retain(|slot| slot.id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_subscriber_observes_fired_events() {
        let dispatcher = Dispatcher::new();
        let mut first = dispatcher.subscribe(4);
        let mut second = dispatcher.subscribe(4);
        dispatcher.fire(7u64);
        assert_eq!(*first.recv().await.unwrap(), 7);
        assert_eq!(*second.recv().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_slow_subscriber_drops_instead_of_blocking() {
        let dispatcher = Dispatcher::new();
        let mut subscription = dispatcher.subscribe(2);
        for i in 0..5u64 {
            dispatcher.fire(i);
        }
        // only the first `capacity` events survive
        assert_eq!(*subscription.recv().await.unwrap(), 0);
        assert_eq!(*subscription.recv().await.unwrap(), 1);
        assert!(subscription.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_slot() {
        let dispatcher = Dispatcher::new();
        let subscription = dispatcher.subscribe(1);
        assert_eq!(dispatcher.subscriber_count(), 1);
        subscription.unsubscribe();
        assert_eq!(dispatcher.subscriber_count(), 0);
        dispatcher.fire(1u64);
    }
}
