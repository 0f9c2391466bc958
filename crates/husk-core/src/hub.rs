//! Sample broadcast hub
//!
//! Fans decoded samples out to any number of subscribers without ever
//! blocking the producer. Broadcasts land on a bounded ingress queue
//! drained by a single worker task; each subscriber gets its own bounded
//! queue that is offered every sample and skipped (with a drop count)
//! when full. The most recent sample is cached so a fresh subscriber
//! starts with an initial reading instead of a blank screen.
//!
//! Ordering: per subscriber, samples arrive in broadcast order. Across
//! subscribers only the set of dropped samples may differ.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::sample::Sample;

/// Broadcast-side queue depth; overflow here drops the sample entirely.
const INGRESS_CAPACITY: usize = 128;

/// Per-subscriber queue depth; overflow drops the sample for that
/// subscriber only.
const SUBSCRIBER_CAPACITY: usize = 16;

struct HubState {
    subscribers: HashMap<u64, mpsc::Sender<Sample>>,
    next_id: u64,
    last: Option<Sample>,
    dropped: u64,
}

pub struct EventHub {
    ingress: Mutex<Option<mpsc::Sender<Sample>>>,
    state: Arc<Mutex<HubState>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Handle for one subscriber; receives samples via [`Subscription::recv`].
/// Dropping it detaches the subscriber from the hub.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<Sample>,
    state: Arc<Mutex<HubState>>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next sample, or `None` once the hub has closed.
    pub async fn recv(&mut self) -> Option<Sample> {
        self.rx.recv().await
    }

    /// Non-blocking variant for tick-driven consumers.
    pub fn try_recv(&mut self) -> Option<Sample> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.state.lock().subscribers.remove(&self.id);
    }
}

impl EventHub {
    /// Create the hub and start its fan-out worker. Must be called from
    /// within a tokio runtime.
    pub fn new() -> Arc<Self> {
        let (tx, mut rx) = mpsc::channel::<Sample>(INGRESS_CAPACITY);
        let state = Arc::new(Mutex::new(HubState {
            subscribers: HashMap::new(),
            next_id: 0,
            last: None,
            dropped: 0,
        }));

        let worker_state = state.clone();
        let worker = tokio::spawn(async move {
            while let Some(sample) = rx.recv().await {
                let mut state = worker_state.lock();
                state.last = Some(sample);
                let mut gone = Vec::new();
                let mut dropped = 0;
                for (&id, tx) in &state.subscribers {
                    match tx.try_send(sample) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            dropped += 1;
                            trace!(subscriber = id, key = sample.key, "subscriber full, sample dropped");
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => gone.push(id),
                    }
                }
                state.dropped += dropped;
                for id in gone {
                    state.subscribers.remove(&id);
                }
            }
            // Ingress closed: end every subscriber's sequence.
            worker_state.lock().subscribers.clear();
            debug!("event hub worker stopped");
        });

        Arc::new(Self {
            ingress: Mutex::new(Some(tx)),
            state,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Register a subscriber. If a sample has ever been broadcast the
    /// latest one is delivered immediately as a snapshot.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;

        if let Some(last) = state.last {
            // Capacity is fresh, cannot fail.
            let _ = tx.try_send(last);
        }
        state.subscribers.insert(id, tx);

        Subscription {
            id,
            rx,
            state: self.state.clone(),
        }
    }

    /// Offer a sample to every subscriber. Never blocks; if the ingress
    /// queue is full the sample is dropped and counted.
    pub fn broadcast(&self, sample: Sample) {
        let ingress = self.ingress.lock();
        let Some(tx) = ingress.as_ref() else {
            return;
        };
        if tx.try_send(sample).is_err() {
            self.state.lock().dropped += 1;
            trace!(key = sample.key, "ingress full, sample dropped");
        }
    }

    /// Samples dropped so far, ingress overflow and subscriber overflow
    /// combined.
    pub fn dropped(&self) -> u64 {
        self.state.lock().dropped
    }

    /// Latest broadcast sample, if any.
    pub fn last(&self) -> Option<Sample> {
        self.state.lock().last
    }

    /// Stop the worker and terminate every subscriber's sequence.
    pub fn close(&self) {
        self.ingress.lock().take();
    }
}

impl Drop for EventHub {
    fn drop(&mut self) {
        self.ingress.lock().take();
        if let Some(worker) = self.worker.lock().take() {
            worker.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn settle() {
        // Give the fan-out worker a chance to drain the ingress queue.
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    fn sample(n: i64) -> Sample {
        Sample::new("RPM", n, n as f64)
    }

    #[tokio::test]
    async fn delivers_in_broadcast_order() {
        let hub = EventHub::new();
        let mut sub = hub.subscribe();

        for n in 0..5 {
            hub.broadcast(sample(n));
        }
        settle().await;

        for n in 0..5 {
            assert_eq!(sub.recv().await.unwrap().timestamp_ms, n);
        }
    }

    #[tokio::test]
    async fn late_subscriber_gets_snapshot() {
        let hub = EventHub::new();
        for n in 0..3 {
            hub.broadcast(sample(n));
        }
        settle().await;

        let mut sub = hub.subscribe();
        assert_eq!(sub.recv().await.unwrap().timestamp_ms, 2);

        hub.broadcast(sample(9));
        settle().await;
        assert_eq!(sub.recv().await.unwrap().timestamp_ms, 9);
    }

    #[tokio::test]
    async fn no_snapshot_before_first_broadcast() {
        let hub = EventHub::new();
        let mut sub = hub.subscribe();
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn slow_subscriber_drops_excess() {
        let hub = EventHub::new();
        let mut sub = hub.subscribe();

        for n in 0..SUBSCRIBER_CAPACITY as i64 + 4 {
            hub.broadcast(sample(n));
            settle().await;
        }

        let mut received = 0;
        while sub.try_recv().is_some() {
            received += 1;
        }
        assert_eq!(received, SUBSCRIBER_CAPACITY);
        assert_eq!(hub.dropped(), 4);
    }

    #[tokio::test]
    async fn close_terminates_subscribers() {
        let hub = EventHub::new();
        let mut sub = hub.subscribe();
        hub.broadcast(sample(1));
        settle().await;
        hub.close();
        settle().await;

        assert_eq!(sub.recv().await.unwrap().timestamp_ms, 1);
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropped_subscription_detaches() {
        let hub = EventHub::new();
        let sub = hub.subscribe();
        drop(sub);

        hub.broadcast(sample(1));
        settle().await;
        // The only effect to observe: the dead queue was pruned and the
        // sample was not counted as dropped.
        assert_eq!(hub.dropped(), 0);
    }
}
