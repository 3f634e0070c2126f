//! Event publication: the consumer contract and a bounded worker-pool
//! publisher with caller-runs backpressure.
//!
//! `emit` never blocks on a full queue and never drops: when the bounded
//! queue is full the emitting task delivers the event itself. Throughput
//! degrades under contention, loss does not happen.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::events::ProcessEvent;

/// Subscriber to published process events.
///
/// A failed delivery is reported per subscriber and never affects delivery
/// to the others.
#[async_trait]
pub trait EventConsumer: Send + Sync {
    async fn on_event(&self, event: &ProcessEvent) -> Result<(), String>;
}

/// Consumer that converts each event into a declared payload type before
/// handing it to a closure. A conversion failure is this subscriber's
/// failed completion, not anyone else's.
pub struct TypedConsumer<T> {
    name: String,
    handler: Box<dyn Fn(T) + Send + Sync>,
    _payload: PhantomData<fn() -> T>,
}

impl<T> TypedConsumer<T> {
    pub fn new(name: impl Into<String>, handler: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            handler: Box::new(handler),
            _payload: PhantomData,
        }
    }
}

#[async_trait]
impl<T> EventConsumer for TypedConsumer<T>
where
    T: DeserializeOwned + Send + Sync,
{
    async fn on_event(&self, event: &ProcessEvent) -> Result<(), String> {
        let value = serde_json::to_value(event)
            .map_err(|e| format!("{}: event encode failed: {e}", self.name))?;
        let payload: T = serde_json::from_value(value)
            .map_err(|e| format!("{}: payload conversion failed: {e}", self.name))?;
        (self.handler)(payload);
        Ok(())
    }
}

/// Worker-pool sizing; constructed by the embedding application.
#[derive(Debug, Clone, Copy)]
pub struct PublisherConfig {
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 64,
        }
    }
}

impl PublisherConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }
}

/// Delivery counters since construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublisherStats {
    /// Events handed to the worker queue.
    pub queued: u64,
    /// Events the emitting task delivered itself under backpressure.
    pub caller_run: u64,
    /// Successful per-subscriber deliveries.
    pub delivered: u64,
    /// Failed per-subscriber deliveries.
    pub failed: u64,
}

struct Shared {
    subscriptions: RwLock<Vec<Arc<dyn EventConsumer>>>,
    /// Events emitted but not yet delivered through either path.
    in_flight: AtomicU64,
    queued: AtomicU64,
    caller_run: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl Shared {
    async fn deliver(&self, event: &ProcessEvent) {
        let subscribers: Vec<Arc<dyn EventConsumer>> =
            self.subscriptions.read().await.clone();
        if subscribers.is_empty() {
            return;
        }
        // Independent completions: one failure never blocks the rest.
        let outcomes = join_all(subscribers.iter().map(|s| s.on_event(event))).await;
        for outcome in outcomes {
            match outcome {
                Ok(()) => {
                    self.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(reason) => {
                    self.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(kind = event.kind(), %reason, "event delivery failed");
                }
            }
        }
    }
}

/// Publishes process events to subscribers through a bounded worker pool.
///
/// Must be constructed inside a tokio runtime; workers are spawned eagerly.
pub struct EventPublisher {
    shared: Arc<Shared>,
    sender: mpsc::Sender<ProcessEvent>,
    workers: Vec<JoinHandle<()>>,
}

impl EventPublisher {
    pub fn new(config: PublisherConfig) -> Self {
        let shared = Arc::new(Shared {
            subscriptions: RwLock::new(Vec::new()),
            in_flight: AtomicU64::new(0),
            queued: AtomicU64::new(0),
            caller_run: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        });
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let worker_count = config.workers.max(1);
        let mut workers = Vec::with_capacity(worker_count);
        for worker in 0..worker_count {
            let shared = Arc::clone(&shared);
            let receiver = Arc::clone(&receiver);
            workers.push(tokio::spawn(async move {
                loop {
                    // Hold the lock only while dequeuing, not while delivering.
                    let event = {
                        let mut rx = receiver.lock().await;
                        rx.recv().await
                    };
                    match event {
                        Some(event) => {
                            shared.deliver(&event).await;
                            shared.in_flight.fetch_sub(1, Ordering::SeqCst);
                        }
                        None => break,
                    }
                }
                debug!(worker, "publisher worker stopped");
            }));
        }
        Self {
            shared,
            sender,
            workers,
        }
    }

    pub async fn subscribe(&self, consumer: Arc<dyn EventConsumer>) {
        self.shared.subscriptions.write().await.push(consumer);
    }

    pub async fn subscriber_count(&self) -> usize {
        self.shared.subscriptions.read().await.len()
    }

    /// Publish one event. Queues when there is room; otherwise the caller
    /// delivers inline.
    pub async fn emit(&self, event: ProcessEvent) {
        self.shared.in_flight.fetch_add(1, Ordering::SeqCst);
        match self.sender.try_send(event) {
            Ok(()) => {
                self.shared.queued.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Full(event))
            | Err(mpsc::error::TrySendError::Closed(event)) => {
                self.shared.caller_run.fetch_add(1, Ordering::Relaxed);
                self.shared.deliver(&event).await;
                self.shared.in_flight.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    /// Wait until every emitted event has been delivered through either
    /// path. Barrier for tests and shutdown.
    pub async fn flush(&self) {
        while self.shared.in_flight.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    pub fn stats(&self) -> PublisherStats {
        PublisherStats {
            queued: self.shared.queued.load(Ordering::Relaxed),
            caller_run: self.shared.caller_run.load(Ordering::Relaxed),
            delivered: self.shared.delivered.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
        }
    }

    /// Drain in-flight events, close the queue, and join the workers.
    pub async fn shutdown(self) {
        self.flush().await;
        drop(self.sender);
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}
