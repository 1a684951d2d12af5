//! In-process typed pub/sub with an external mirror.
//!
//! One bounded queue per (topic, subscriber); a dedicated worker drains each
//! queue serially, so a single producer's events are observed in publish
//! order. Publishing blocks on a full queue up to a per-publish deadline —
//! backpressure, not drop. The mirror path is fire-and-forget: it may lag or
//! fail without ever touching in-process delivery.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use cortex_common::{BusEvent, CortexError, CortexResult, PipelineEvent, RetryPolicy, Topic};

use crate::mirror::Mirror;

/// Capacity of the mirror forwarder queue. Deliberately deep: the mirror may
/// be retrying against a dead endpoint while the pipeline keeps moving.
const MIRROR_QUEUE_CAPACITY: usize = 4096;

/// Deadline on each individual mirror publish attempt.
const MIRROR_PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

/// One `handle` call per subscribed topic. Handlers are invoked serially per
/// subscription; delivery is at-least-once end to end, so stage handlers
/// must be idempotent by the envelope's `correlation_id` (which also
/// collapses a synchronous stage call with its own bus echo).
#[async_trait]
pub trait BusHandler: Send + Sync {
    async fn handle(&self, event: BusEvent) -> anyhow::Result<()>;

    /// Subscriber name for logs.
    fn name(&self) -> &str {
        "handler"
    }
}

struct TopicSubscriber {
    name: String,
    tx: mpsc::Sender<BusEvent>,
}

pub struct EventBus {
    queue_capacity: usize,
    publish_timeout: Duration,
    subscribers: RwLock<HashMap<Topic, Vec<TopicSubscriber>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    mirror_tx: RwLock<Option<mpsc::Sender<BusEvent>>>,
    mirror_dropped: AtomicU64,
}

impl EventBus {
    pub fn new(queue_capacity: usize, publish_timeout: Duration) -> Self {
        Self {
            queue_capacity,
            publish_timeout,
            subscribers: RwLock::new(HashMap::new()),
            workers: Mutex::new(Vec::new()),
            mirror_tx: RwLock::new(None),
            mirror_dropped: AtomicU64::new(0),
        }
    }

    /// Attach the external mirror. Every subsequently published event is also
    /// forwarded to it; forwarding failures retry with the shared backoff
    /// policy and never fail the in-process path.
    pub fn attach_mirror(&self, mirror: Arc<dyn Mirror>, policy: RetryPolicy) {
        let (tx, mut rx) = mpsc::channel::<BusEvent>(MIRROR_QUEUE_CAPACITY);
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                forward_to_mirror(mirror.as_ref(), &policy, &event).await;
            }
        });
        *self.mirror_tx.write().unwrap_or_else(|e| e.into_inner()) = Some(tx);
        self.workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle);
    }

    /// Register a handler for a topic. Spawns the subscriber's worker task;
    /// events queued for this subscriber are handled strictly one at a time.
    pub fn subscribe(&self, topic: Topic, handler: Arc<dyn BusHandler>) {
        let (tx, mut rx) = mpsc::channel::<BusEvent>(self.queue_capacity);
        let name = handler.name().to_string();
        let worker_name = name.clone();
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let event_id = event.event_id.clone();
                let event_type = event.event_type.clone();
                if let Err(e) = handler.handle(event).await {
                    warn!(
                        subscriber = worker_name.as_str(),
                        event_id = event_id.as_str(),
                        event_type = event_type.as_str(),
                        error = %e,
                        "Handler failed; event not redelivered in-process"
                    );
                }
            }
        });

        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(topic)
            .or_default()
            .push(TopicSubscriber { name, tx });
        self.workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle);
    }

    /// Publish a payload on its topic as a root event (it starts its own
    /// pipeline pass). Blocks up to the publish deadline per slow subscriber;
    /// on expiry, droppable topics shed the event while pipeline topics
    /// surface `BackpressureTimeout` to the caller.
    pub async fn publish(&self, payload: PipelineEvent) -> CortexResult<BusEvent> {
        let event = BusEvent::new(payload);
        self.publish_event(event.clone()).await?;
        Ok(event)
    }

    /// Publish a derived event that continues an existing pipeline pass.
    /// Stage handlers collapse deliveries by correlation id, so the pass
    /// runs each stage's side effects exactly once however it arrives.
    pub async fn publish_correlated(
        &self,
        payload: PipelineEvent,
        correlation_id: &str,
    ) -> CortexResult<BusEvent> {
        let event = BusEvent::correlated(payload, correlation_id);
        self.publish_event(event.clone()).await?;
        Ok(event)
    }

    /// Publish a pre-built envelope (used for redelivery and tests).
    pub async fn publish_event(&self, event: BusEvent) -> CortexResult<()> {
        let topic = event.topic;

        self.offer_to_mirror(&event);

        let senders: Vec<(String, mpsc::Sender<BusEvent>)> = {
            let map = self.subscribers.read().unwrap_or_else(|e| e.into_inner());
            map.get(&topic)
                .map(|subs| {
                    subs.iter()
                        .map(|s| (s.name.clone(), s.tx.clone()))
                        .collect()
                })
                .unwrap_or_default()
        };

        for (name, tx) in senders {
            match tokio::time::timeout(self.publish_timeout, tx.send(event.clone())).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => {
                    // Subscriber worker is gone (shutdown in progress).
                    debug!(topic = %topic, subscriber = name.as_str(), "Subscriber closed, skipping");
                }
                Err(_) => {
                    if topic.is_droppable() {
                        warn!(topic = %topic, subscriber = name.as_str(), "Dropped event under backpressure");
                    } else {
                        return Err(CortexError::BackpressureTimeout { topic });
                    }
                }
            }
        }

        Ok(())
    }

    fn offer_to_mirror(&self, event: &BusEvent) {
        let guard = self.mirror_tx.read().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = guard.as_ref() {
            if tx.try_send(event.clone()).is_err() {
                let dropped = self.mirror_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    event_id = event.event_id.as_str(),
                    total_dropped = dropped,
                    "Mirror queue full; event not mirrored"
                );
            }
        }
    }

    /// Events that never reached the mirror because its queue was full.
    pub fn mirror_dropped(&self) -> u64 {
        self.mirror_dropped.load(Ordering::Relaxed)
    }

    /// Close intake and drain workers up to the grace window. Queued events
    /// are still handled; stragglers past the window are aborted.
    pub async fn shutdown(&self, grace: Duration) {
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.mirror_tx
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        let mut workers: Vec<JoinHandle<()>> = {
            let mut guard = self.workers.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };

        let drain = futures::future::join_all(workers.iter_mut());
        if tokio::time::timeout(grace, drain).await.is_err() {
            warn!("Bus workers did not drain within grace window, aborting");
            for worker in &workers {
                worker.abort();
            }
        }
    }
}

async fn forward_to_mirror(mirror: &dyn Mirror, policy: &RetryPolicy, event: &BusEvent) {
    let topic = event.topic.to_string();
    let payload = match serde_json::to_string(&event.to_wire()) {
        Ok(p) => p,
        Err(e) => {
            warn!(event_id = event.event_id.as_str(), error = %e, "Mirror serialization failed");
            return;
        }
    };

    let mut attempt = 0u32;
    loop {
        let outcome = match tokio::time::timeout(
            MIRROR_PUBLISH_TIMEOUT,
            mirror.publish(&topic, &payload),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(CortexError::Transport("mirror publish timed out".into())),
        };
        match outcome {
            Ok(()) => return,
            Err(e) => {
                attempt += 1;
                if !policy.allows(attempt) {
                    warn!(
                        event_id = event.event_id.as_str(),
                        attempts = attempt,
                        error = %e,
                        "Mirror publish abandoned after retry budget"
                    );
                    return;
                }
                let delay = policy.delay(attempt);
                debug!(
                    event_id = event.event_id.as_str(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Mirror publish failed, backing off"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
