//! Broadcast Hub
//!
//! Fans published values out to a dynamic set of subscribers.
//! A single control task owns the subscriber registry. Every mutation
//! reaches it through one ordered command queue, so no locks guard the set
//! and each caller's operations take effect in the order they were issued.

use futures_util::FutureExt;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Capacity of the command queue between callers and the control loop
const HANDOFF_CAPACITY: usize = 1;

/// Opaque identifier of a registered subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Outcome of a single non-blocking delivery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The value was handed to the subscriber
    Sent,
    /// The subscriber had not read its previous value; the new value replaced it
    DroppedFull,
    /// The subscriber's receiver is gone
    DroppedClosed,
}

/// Error from [`Subscription::try_recv`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TryRecvError {
    #[error("no value pending")]
    Empty,

    #[error("subscription closed")]
    Closed,
}

/// Hub-side end of a subscriber's one-value slot
struct Slot<T> {
    sender: watch::Sender<Option<T>>,
    pending: Arc<AtomicBool>,
}

fn slot<T>(id: SubscriptionId) -> (Slot<T>, Subscription<T>) {
    let (sender, receiver) = watch::channel(None);
    let pending = Arc::new(AtomicBool::new(false));

    (
        Slot {
            sender,
            pending: Arc::clone(&pending),
        },
        Subscription {
            id,
            receiver,
            pending,
        },
    )
}

/// A subscriber's handle to its own delivery slot
///
/// Only values published after the subscription was registered are received.
/// The slot holds the newest unread value; a subscriber that falls behind
/// skips straight to it. Pass the handle to [`Broadcaster::unsubscribe`]
/// before dropping it.
pub struct Subscription<T> {
    id: SubscriptionId,
    receiver: watch::Receiver<Option<T>>,
    pending: Arc<AtomicBool>,
}

impl<T: Clone> Subscription<T> {
    /// Identifier the hub knows this subscription by
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next value
    ///
    /// Returns `None` once the hub has stopped or dropped this subscription
    /// and no unread value remains.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            self.receiver.changed().await.ok()?;
            if let Some(value) = self.take() {
                return Some(value);
            }
        }
    }

    /// Take the pending value, if any, without waiting
    pub fn try_recv(&mut self) -> Result<T, TryRecvError> {
        match self.receiver.changed().now_or_never() {
            None => Err(TryRecvError::Empty),
            Some(Err(_)) => Err(TryRecvError::Closed),
            Some(Ok(())) => self.take().ok_or(TryRecvError::Empty),
        }
    }

    fn take(&mut self) -> Option<T> {
        self.pending.store(false, Ordering::Release);
        let value = self.receiver.borrow_and_update().clone();
        value
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Work for the control loop, applied strictly in arrival order
enum Command<T> {
    Subscribe(SubscriptionId, Slot<T>),
    Unsubscribe(SubscriptionId),
    Publish(T),
}

/// Receiving ends consumed by the control loop
struct LoopInputs<T> {
    command_rx: mpsc::Receiver<Command<T>>,
    stop_rx: watch::Receiver<bool>,
}

/// One-to-many distributor for values of type `T`
///
/// Slow subscribers lose values instead of stalling the publisher: each
/// subscriber holds at most one undelivered value, and a newer value
/// replaces an unread one.
pub struct Broadcaster<T> {
    command_tx: mpsc::Sender<Command<T>>,
    stop_tx: watch::Sender<bool>,
    /// Taken by `start`; present until the loop is spawned
    inputs: Mutex<Option<LoopInputs<T>>>,
    next_id: AtomicU64,
    subscriber_count: Arc<AtomicUsize>,
    running: Arc<AtomicBool>,
}

impl<T> Broadcaster<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a hub; call [`Broadcaster::start`] before using it
    pub fn new() -> Self {
        let (command_tx, command_rx) = mpsc::channel(HANDOFF_CAPACITY);
        let (stop_tx, stop_rx) = watch::channel(false);

        Self {
            command_tx,
            stop_tx,
            inputs: Mutex::new(Some(LoopInputs { command_rx, stop_rx })),
            next_id: AtomicU64::new(0),
            subscriber_count: Arc::new(AtomicUsize::new(0)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Spawn the control loop
    ///
    /// The loop runs until [`Broadcaster::stop`] is called or the hub is dropped.
    pub fn start(&self) -> Result<JoinHandle<()>, HubError> {
        let inputs = self
            .inputs
            .lock()
            .map_err(|_| HubError::Poisoned)?
            .take()
            .ok_or(HubError::AlreadyStarted)?;

        self.running.store(true, Ordering::SeqCst);

        let count = Arc::clone(&self.subscriber_count);
        let running = Arc::clone(&self.running);

        Ok(tokio::spawn(async move {
            run_loop(inputs, &count).await;
            count.store(0, Ordering::SeqCst);
            running.store(false, Ordering::SeqCst);
            tracing::debug!("Broadcast hub stopped");
        }))
    }

    /// Signal the control loop to terminate
    ///
    /// Later calls to `publish`, `subscribe` and `unsubscribe` return promptly
    /// without effect.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);

        // A hub that never started still has to release late callers
        if let Ok(mut inputs) = self.inputs.lock() {
            inputs.take();
        }
    }

    /// Register a new subscriber
    ///
    /// Values published before this call returned are never delivered to it.
    pub async fn subscribe(&self) -> Subscription<T> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (slot, subscription) = slot(id);

        if self
            .command_tx
            .send(Command::Subscribe(id, slot))
            .await
            .is_err()
        {
            tracing::debug!(subscription = %id, "Subscribe after hub stopped");
        }

        subscription
    }

    /// Deregister a subscription
    ///
    /// Once this returns, later publishes are not delivered to it.
    pub async fn unsubscribe(&self, subscription: &Subscription<T>) {
        let id = subscription.id;
        if self.command_tx.send(Command::Unsubscribe(id)).await.is_err() {
            tracing::debug!(subscription = %id, "Unsubscribe after hub stopped");
        }
    }

    /// Hand a value to the control loop for fan-out
    ///
    /// Waits only for the loop's one-slot handoff, never for subscribers.
    pub async fn publish(&self, value: T) {
        if self.command_tx.send(Command::Publish(value)).await.is_err() {
            tracing::debug!("Publish after hub stopped, value dropped");
        }
    }

    /// Number of subscriptions currently registered with the loop
    pub fn subscriber_count(&self) -> usize {
        self.subscriber_count.load(Ordering::SeqCst)
    }

    /// Whether the control loop is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl<T> Default for Broadcaster<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

async fn run_loop<T: Clone>(inputs: LoopInputs<T>, count: &AtomicUsize) {
    let LoopInputs {
        mut command_rx,
        mut stop_rx,
    } = inputs;

    let mut subscribers: HashMap<SubscriptionId, Slot<T>> = HashMap::new();

    loop {
        tokio::select! {
            biased;

            _ = stop_rx.changed() => break,

            command = command_rx.recv() => match command {
                Some(Command::Subscribe(id, slot)) => {
                    subscribers.insert(id, slot);
                    tracing::trace!(subscription = %id, "Subscriber added");
                }
                Some(Command::Unsubscribe(id)) => {
                    if subscribers.remove(&id).is_some() {
                        tracing::trace!(subscription = %id, "Subscriber removed");
                    }
                }
                Some(Command::Publish(message)) => fan_out(&mut subscribers, message),
                None => break,
            },
        }

        count.store(subscribers.len(), Ordering::SeqCst);
    }
}

fn fan_out<T: Clone>(subscribers: &mut HashMap<SubscriptionId, Slot<T>>, message: T) {
    let mut sent = 0usize;
    let mut replaced = 0usize;
    let mut closed = Vec::new();

    for (id, slot) in subscribers.iter() {
        match deliver(slot, message.clone()) {
            Delivery::Sent => sent += 1,
            Delivery::DroppedFull => replaced += 1,
            Delivery::DroppedClosed => closed.push(*id),
        }
    }

    for id in &closed {
        subscribers.remove(id);
    }

    tracing::trace!(
        sent,
        replaced,
        pruned = closed.len(),
        "Broadcast message"
    );
}

/// Zero-wait delivery into one subscriber's slot
///
/// The `DroppedFull` count is advisory: a read racing the delivery may be
/// counted either way, but the slot always ends up holding `message`.
fn deliver<T>(slot: &Slot<T>, message: T) -> Delivery {
    if slot.sender.is_closed() {
        return Delivery::DroppedClosed;
    }

    let unread = slot.pending.swap(true, Ordering::AcqRel);
    slot.sender.send_replace(Some(message));

    if unread {
        Delivery::DroppedFull
    } else {
        Delivery::Sent
    }
}

/// Errors returned by the broadcast hub
#[derive(Debug, Error)]
pub enum HubError {
    #[error("Broadcast hub already started")]
    AlreadyStarted,

    #[error("Broadcast hub state lock poisoned")]
    Poisoned,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::{sleep, timeout};

    async fn wait_for_count(hub: &Broadcaster<i32>, expected: usize) {
        for _ in 0..100 {
            if hub.subscriber_count() == expected {
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "subscriber count stayed at {} (expected {})",
            hub.subscriber_count(),
            expected
        );
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let hub = Broadcaster::<i32>::new();
        let handle = hub.start().unwrap();

        let result = timeout(Duration::from_secs(1), async {
            for i in 0..10 {
                hub.publish(i).await;
            }
        })
        .await;
        assert!(result.is_ok());

        hub.stop();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_single_subscriber_then_unsubscribe() {
        let hub = Broadcaster::<String>::new();
        let handle = hub.start().unwrap();

        let mut sub = hub.subscribe().await;
        hub.publish("msg".to_string()).await;

        let received = timeout(Duration::from_secs(1), sub.recv()).await.unwrap();
        assert_eq!(received.as_deref(), Some("msg"));

        hub.unsubscribe(&sub).await;
        hub.publish("msg2".to_string()).await;
        sleep(Duration::from_millis(20)).await;

        assert!(sub.try_recv().is_err());

        hub.stop();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_fan_out_to_all_subscribers() {
        let hub = Broadcaster::<i32>::new();
        let handle = hub.start().unwrap();

        let mut tasks = Vec::new();
        for _ in 0..5 {
            let mut sub = hub.subscribe().await;
            tasks.push(tokio::spawn(async move { sub.recv().await }));
        }

        hub.publish(1).await;

        for task in tasks {
            let received = timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
            assert_eq!(received, Some(1));
        }

        hub.stop();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_slow_subscriber_does_not_block() {
        let hub = Broadcaster::<i32>::new();
        let handle = hub.start().unwrap();

        let mut idle = hub.subscribe().await;
        let mut active = hub.subscribe().await;

        for i in 1..=3 {
            timeout(Duration::from_millis(500), hub.publish(i))
                .await
                .expect("publish blocked on an idle subscriber");
            let received = timeout(Duration::from_secs(1), active.recv()).await.unwrap();
            assert_eq!(received, Some(i));
        }

        // The idle subscriber skips straight to the newest value
        assert_eq!(idle.try_recv().unwrap(), 3);
        assert_eq!(idle.try_recv(), Err(TryRecvError::Empty));

        hub.stop();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_publish_order_preserved() {
        let hub = Broadcaster::<i32>::new();
        let handle = hub.start().unwrap();
        let mut sub = hub.subscribe().await;

        let mut seen = Vec::new();
        for i in 0..20 {
            hub.publish(i).await;
            seen.push(timeout(Duration::from_secs(1), sub.recv()).await.unwrap().unwrap());
        }
        assert_eq!(seen, (0..20).collect::<Vec<_>>());

        hub.stop();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_pruned() {
        let hub = Broadcaster::<i32>::new();
        let handle = hub.start().unwrap();

        let keep = hub.subscribe().await;
        let gone = hub.subscribe().await;
        wait_for_count(&hub, 2).await;

        drop(gone);
        hub.publish(7).await;
        wait_for_count(&hub, 1).await;

        hub.unsubscribe(&keep).await;
        wait_for_count(&hub, 0).await;

        hub.stop();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_start_twice_rejected() {
        let hub = Broadcaster::<i32>::new();
        let handle = hub.start().unwrap();

        assert!(matches!(hub.start(), Err(HubError::AlreadyStarted)));

        hub.stop();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_calls_after_stop_do_not_hang() {
        let hub = Broadcaster::<i32>::new();
        let handle = hub.start().unwrap();
        assert!(hub.is_running());

        hub.stop();
        handle.await.unwrap();
        assert!(!hub.is_running());

        let result = timeout(Duration::from_secs(1), async {
            for i in 0..5 {
                hub.publish(i).await;
            }
            let mut sub = hub.subscribe().await;
            hub.unsubscribe(&sub).await;
            sub.recv().await
        })
        .await;

        assert_eq!(result.unwrap(), None);
        hub.stop();
    }

    #[tokio::test]
    async fn test_stop_without_start_releases_callers() {
        let hub = Broadcaster::<i32>::new();
        hub.stop();

        let result = timeout(Duration::from_secs(1), async {
            hub.publish(1).await;
            hub.publish(2).await;
        })
        .await;
        assert!(result.is_ok());
        assert!(matches!(hub.start(), Err(HubError::AlreadyStarted)));
    }

    #[test]
    fn test_deliver_outcomes() {
        let (slot, mut sub) = slot::<i32>(SubscriptionId(0));

        assert_eq!(deliver(&slot, 1), Delivery::Sent);
        assert_eq!(deliver(&slot, 2), Delivery::DroppedFull);
        assert_eq!(sub.try_recv().unwrap(), 2);
        assert_eq!(sub.try_recv(), Err(TryRecvError::Empty));

        assert_eq!(deliver(&slot, 3), Delivery::Sent);
        drop(sub);
        assert_eq!(deliver(&slot, 4), Delivery::DroppedClosed);
    }

    #[test]
    fn test_unread_value_survives_hub_side_close() {
        let (slot, mut sub) = slot::<i32>(SubscriptionId(0));

        deliver(&slot, 9);
        drop(slot);

        assert_eq!(sub.try_recv().unwrap(), 9);
        assert_eq!(sub.try_recv(), Err(TryRecvError::Closed));
    }

    #[tokio::test]
    async fn test_subscribe_after_publish_sees_only_later_values() {
        let hub = Broadcaster::<i32>::new();
        let handle = hub.start().unwrap();

        for i in 0..50 {
            hub.publish(i).await;
            let mut sub = hub.subscribe().await;
            hub.publish(i + 1000).await;

            let received = timeout(Duration::from_secs(1), sub.recv()).await.unwrap();
            assert_eq!(received, Some(i + 1000));
            assert_eq!(sub.try_recv(), Err(TryRecvError::Empty));

            hub.unsubscribe(&sub).await;
        }

        hub.stop();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_nothing_from_earlier_publish() {
        let hub = Broadcaster::<i32>::new();
        let handle = hub.start().unwrap();

        hub.publish(1).await;
        let mut sub = hub.subscribe().await;
        sleep(Duration::from_millis(20)).await;

        assert_eq!(sub.try_recv(), Err(TryRecvError::Empty));

        hub.stop();
        handle.await.unwrap();
    }
}
