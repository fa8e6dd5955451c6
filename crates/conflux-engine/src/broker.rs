//! In-process event broker
//!
//! ```text
//!  Publisher ──┐
//!  Publisher ──┼──► queue ──(join)──► callbacks[event]
//!  Publisher ──┘
//! ```
//!
//! Publishers only enqueue; no callback runs at publish time. Delivery
//! happens in [`EventBroker::join`], on the task that calls it: the queue is
//! closed, then every queued message is handed to the callbacks registered
//! for its event, in publish order.
//!
//! Since nothing drains the queue before `join`, publishing never waits.
//! The configured capacity is a high-water mark: a run that queues more
//! messages keeps all of them and logs a warning.
//!
//! The subscription table ([`Subscriptions`]) outlives brokers: the engine
//! keeps one table and binds a fresh broker to it for every run.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

use crate::events::{EventName, TaskMessage};

/// Subscriber callback
pub type Callback = Arc<dyn Fn(&TaskMessage) + Send + Sync>;

/// Handle identifying one subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Raw value
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

/// Shared table of callbacks keyed by event name
#[derive(Clone, Default)]
pub struct Subscriptions {
    table: Arc<RwLock<HashMap<EventName, Vec<(SubscriptionId, Callback)>>>>,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for Subscriptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.table.read();
        let counts: HashMap<_, _> = table.iter().map(|(e, cbs)| (*e, cbs.len())).collect();
        f.debug_struct("Subscriptions").field("callbacks", &counts).finish()
    }
}

impl Subscriptions {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `event`
    pub fn subscribe<F>(&self, event: EventName, callback: F) -> SubscriptionId
    where
        F: Fn(&TaskMessage) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.table
            .write()
            .entry(event)
            .or_default()
            .push((id, Arc::new(callback)));
        debug!(event = %event, id = id.0, "Subscribed");
        id
    }

    /// Remove a subscription, `false` if it was not registered for `event`
    pub fn unsubscribe(&self, event: EventName, id: SubscriptionId) -> bool {
        let mut table = self.table.write();
        let Some(callbacks) = table.get_mut(&event) else {
            return false;
        };
        let before = callbacks.len();
        callbacks.retain(|(existing, _)| *existing != id);
        let removed = callbacks.len() < before;
        if callbacks.is_empty() {
            table.remove(&event);
        }
        if removed {
            debug!(event = %event, id = id.0, "Unsubscribed");
        }
        removed
    }

    /// Number of callbacks registered for `event`
    pub fn count(&self, event: EventName) -> usize {
        self.table.read().get(&event).map_or(0, Vec::len)
    }

    /// Whether no callbacks are registered at all
    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }

    /// Snapshot of the callbacks for `event`, so none run under the lock
    fn callbacks_for(&self, event: EventName) -> Vec<Callback> {
        self.table
            .read()
            .get(&event)
            .map(|cbs| cbs.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default()
    }

    fn dispatch(&self, message: &TaskMessage) {
        for callback in self.callbacks_for(message.event) {
            if std::panic::catch_unwind(AssertUnwindSafe(|| callback(message))).is_err() {
                error!(event = %message.event, "Subscriber callback panicked");
            }
        }
    }
}

/// Sending half of the event channel
#[derive(Debug, Clone)]
pub struct Publisher {
    tx: mpsc::UnboundedSender<TaskMessage>,
    queued: Arc<AtomicUsize>,
    capacity: usize,
}

impl Publisher {
    /// Enqueue a message for delivery at [`EventBroker::join`].
    ///
    /// Never invokes callbacks and never waits. A message published after
    /// the broker was torn down is dropped with a warning.
    pub fn publish(&self, message: TaskMessage) {
        trace!(event = %message.event, "Publishing");
        if let Err(mpsc::error::SendError(message)) = self.tx.send(message) {
            warn!(event = %message.event, "Event channel closed, message dropped");
            return;
        }
        let queued = self.queued.fetch_add(1, Ordering::Relaxed) + 1;
        if queued == self.capacity + 1 {
            warn!(
                capacity = self.capacity,
                "Event queue is above its capacity, messages are held until the run ends"
            );
        }
    }
}

/// Channel and publisher for one run
pub struct EventBroker {
    publisher: Publisher,
    subscriptions: Subscriptions,
    rx: mpsc::UnboundedReceiver<TaskMessage>,
}

impl EventBroker {
    /// Create a broker bound to `subscriptions`, warning once more than
    /// `capacity` messages are waiting for delivery
    pub fn new(capacity: usize, subscriptions: Subscriptions) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<TaskMessage>();
        Self {
            publisher: Publisher {
                tx,
                queued: Arc::new(AtomicUsize::new(0)),
                capacity: capacity.max(1),
            },
            subscriptions,
            rx,
        }
    }

    /// Register a callback on the bound subscription table
    pub fn subscribe<F>(&self, event: EventName, callback: F) -> SubscriptionId
    where
        F: Fn(&TaskMessage) + Send + Sync + 'static,
    {
        self.subscriptions.subscribe(event, callback)
    }

    /// Remove a callback from the bound subscription table
    pub fn unsubscribe(&self, event: EventName, id: SubscriptionId) -> bool {
        self.subscriptions.unsubscribe(event, id)
    }

    /// A publisher for this broker's channel
    pub fn publisher(&self) -> Publisher {
        self.publisher.clone()
    }

    /// Messages published and not yet delivered
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Close the channel and deliver every queued message on the calling task.
    ///
    /// Returns the number of messages delivered. Publishers still held
    /// elsewhere stay valid, but what they publish afterwards is dropped.
    pub async fn join(mut self) -> u64 {
        self.rx.close();
        let mut delivered = 0u64;
        while let Some(message) = self.rx.recv().await {
            self.subscriptions.dispatch(&message);
            delivered += 1;
        }
        debug!(delivered, "Event broker drained");
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::Operation;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn op() -> Arc<Operation> {
        Arc::new(Operation::new("op"))
    }

    fn recorder(subs: &Subscriptions, event: EventName) -> (SubscriptionId, Arc<Mutex<Vec<TaskMessage>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let id = subs.subscribe(event, move |m| sink.lock().push(m.clone()));
        (id, seen)
    }

    #[tokio::test]
    async fn test_delivers_in_publish_order() {
        let subs = Subscriptions::new();
        let (_, logs) = recorder(&subs, EventName::Log);

        let broker = EventBroker::new(2, subs.clone());
        let publisher = broker.publisher();
        for i in 0..10u64 {
            publisher.publish(TaskMessage::log("op", "i", format!("page {i}"), Some(i)));
        }
        drop(publisher);
        assert_eq!(broker.join().await, 10);

        let rows: Vec<_> = logs.lock().iter().map(|m| m.payload.row_count).collect();
        assert_eq!(rows, (0..10).map(Some).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_only_matching_event_callbacks_run() {
        let subs = Subscriptions::new();
        let (_, started) = recorder(&subs, EventName::Started);
        let (_, finished) = recorder(&subs, EventName::Finished);

        let broker = EventBroker::new(8, subs);
        broker.publisher().publish(TaskMessage::started(&op()));
        broker.join().await;

        assert_eq!(started.lock().len(), 1);
        assert!(finished.lock().is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_symmetry() {
        let subs = Subscriptions::new();
        let (id, seen) = recorder(&subs, EventName::Started);
        assert_eq!(subs.count(EventName::Started), 1);

        assert!(!subs.unsubscribe(EventName::Finished, id));
        assert!(subs.unsubscribe(EventName::Started, id));
        assert!(!subs.unsubscribe(EventName::Started, id));
        assert!(subs.is_empty());

        let broker = EventBroker::new(8, subs);
        broker.publisher().publish(TaskMessage::started(&op()));
        broker.join().await;
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_panicking_callback_does_not_stop_delivery() {
        let subs = Subscriptions::new();
        subs.subscribe(EventName::Log, |_| panic!("subscriber bug"));
        let (_, seen) = recorder(&subs, EventName::Log);

        let broker = EventBroker::new(4, subs);
        let publisher = broker.publisher();
        publisher.publish(TaskMessage::log("op", "i", "a", None));
        publisher.publish(TaskMessage::log("op", "i", "b", None));
        drop(publisher);
        assert_eq!(broker.join().await, 2);
        assert_eq!(seen.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_broker_subscribe_proxies_to_table() {
        let subs = Subscriptions::new();
        let broker = EventBroker::new(1, subs.clone());
        let id = broker.subscribe(EventName::Finished, |_| {});
        assert_eq!(subs.count(EventName::Finished), 1);
        assert!(broker.unsubscribe(EventName::Finished, id));
        broker.join().await;
    }

    #[tokio::test]
    async fn test_callbacks_wait_for_join() {
        let subs = Subscriptions::new();
        let (_, seen) = recorder(&subs, EventName::Started);

        let broker = EventBroker::new(8, subs);
        broker.publisher().publish(TaskMessage::started(&op()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(seen.lock().is_empty());
        assert_eq!(broker.pending(), 1);

        assert_eq!(broker.join().await, 1);
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_callbacks_run_on_joining_thread() {
        let subs = Subscriptions::new();
        let threads = Arc::new(Mutex::new(Vec::new()));
        let sink = threads.clone();
        subs.subscribe(EventName::Log, move |_| sink.lock().push(std::thread::current().id()));

        let broker = EventBroker::new(8, subs);
        let publisher = broker.publisher();
        let handle = tokio::spawn(async move {
            for i in 0..5u64 {
                publisher.publish(TaskMessage::log("op", "i", "page", Some(i)));
            }
        });
        handle.await.unwrap();

        let joiner = std::thread::current().id();
        assert_eq!(broker.join().await, 5);
        let threads = threads.lock();
        assert_eq!(threads.len(), 5);
        assert!(threads.iter().all(|id| *id == joiner));
    }

    #[tokio::test]
    async fn test_publish_past_capacity_does_not_wait() {
        let subs = Subscriptions::new();
        let (_, seen) = recorder(&subs, EventName::Log);

        let broker = EventBroker::new(2, subs);
        let publisher = broker.publisher();
        for i in 0..50u64 {
            publisher.publish(TaskMessage::log("op", "i", "page", Some(i)));
        }
        assert_eq!(broker.pending(), 50);
        assert_eq!(broker.join().await, 50);
        assert_eq!(seen.lock().len(), 50);
    }

    #[tokio::test]
    async fn test_publish_after_join_is_dropped() {
        let subs = Subscriptions::new();
        let (_, seen) = recorder(&subs, EventName::Log);

        let broker = EventBroker::new(2, subs);
        let publisher = broker.publisher();
        assert_eq!(broker.join().await, 0);
        publisher.publish(TaskMessage::log("op", "i", "late", None));
        assert!(seen.lock().is_empty());
    }
}
