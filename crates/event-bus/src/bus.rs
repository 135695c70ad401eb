//! The publish/subscribe dispatcher.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use chrono::Utc;
use common::EventId;
use tokio::sync::{Mutex, RwLock, broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::BusConfig;
use crate::dead_letter::{BusDiagnostic, DeadLetter, DeadLetterSink};
use crate::error::{BusError, Result};
use crate::event::BusEvent;
use crate::handler::EventHandler;

/// Identifies one subscriber slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// How a delivery to a subscriber was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The handler returned successfully.
    Acknowledged,
    /// The retry budget was spent and the event went to the dead-letter sink.
    DeadLettered,
}

struct Slot<E: BusEvent> {
    id: SubscriptionId,
    name: &'static str,
    tag: E::Tag,
    sender: mpsc::UnboundedSender<E>,
}

struct Shared<E: BusEvent> {
    config: BusConfig,
    /// Every published event, kept for the life of the bus so that
    /// `redeliver` and `recover` can find it.
    log: RwLock<Vec<E>>,
    slots: RwLock<Vec<Slot<E>>>,
    /// At most one entry per (slot, logged event), so bounded by the log.
    settled: Mutex<HashMap<(SubscriptionId, EventId), DeliveryOutcome>>,
    /// Deliveries enqueued but not yet settled.
    pending: watch::Sender<usize>,
    dead_letters: Arc<dyn DeadLetterSink<E>>,
    diagnostics: broadcast::Sender<BusDiagnostic>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
    next_subscription: AtomicU64,
}

impl<E: BusEvent> Shared<E> {
    /// Hands `event` to every slot registered for its tag that passes `accept`.
    /// Slots are visited in registration order.
    async fn enqueue(&self, event: &E, accept: impl Fn(SubscriptionId) -> bool) -> usize {
        let tag = event.tag();
        let slots = self.slots.read().await;
        let mut enqueued = 0;

        for slot in slots.iter().filter(|slot| slot.tag == tag && accept(slot.id)) {
            self.pending.send_modify(|n| *n += 1);
            if slot.sender.send(event.clone()).is_err() {
                self.pending.send_modify(|n| *n = n.saturating_sub(1));
                tracing::warn!(subscriber = slot.name, "subscriber slot is gone, delivery skipped");
                continue;
            }
            enqueued += 1;
        }

        enqueued
    }
}

/// Publish/subscribe dispatcher with at-least-once delivery.
///
/// Cloning is cheap and every clone refers to the same bus.
pub struct EventBus<E: BusEvent> {
    shared: Arc<Shared<E>>,
}

impl<E: BusEvent> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<E: BusEvent> EventBus<E> {
    /// Creates a bus routing exhausted deliveries to `dead_letters`.
    pub fn new(config: BusConfig, dead_letters: Arc<dyn DeadLetterSink<E>>) -> Self {
        let (pending, _) = watch::channel(0);
        let (diagnostics, _) = broadcast::channel(config.diagnostics_capacity.max(1));

        Self {
            shared: Arc::new(Shared {
                config,
                log: RwLock::new(Vec::new()),
                slots: RwLock::new(Vec::new()),
                settled: Mutex::new(HashMap::new()),
                pending,
                dead_letters,
                diagnostics,
                workers: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
                next_subscription: AtomicU64::new(1),
            }),
        }
    }

    /// Registers `handler` for every future event tagged `tag`.
    ///
    /// Each registration gets its own slot: a dedicated worker task that
    /// processes deliveries one at a time. The same handler may be
    /// registered for several tags. Must be called from within a tokio
    /// runtime.
    pub async fn subscribe(
        &self,
        tag: E::Tag,
        handler: Arc<dyn EventHandler<E>>,
    ) -> Result<SubscriptionId> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }

        let id = SubscriptionId(self.shared.next_subscription.fetch_add(1, Ordering::Relaxed));
        let name = handler.name();
        let (sender, receiver) = mpsc::unbounded_channel();

        let worker = Worker {
            shared: Arc::clone(&self.shared),
            id,
            name,
            handler,
        };
        let join = tokio::spawn(worker.run(receiver));

        self.shared.slots.write().await.push(Slot {
            id,
            name,
            tag,
            sender,
        });
        self.shared.workers.lock().await.push(join);

        tracing::info!(subscriber = name, %tag, subscription = %id, "handler subscribed");
        Ok(id)
    }

    /// Appends `event` to the log and enqueues it for every subscriber of its
    /// tag. Returns as soon as the event is enqueued; handlers run later on
    /// their own tasks and their failures never reach the publisher.
    #[tracing::instrument(skip(self, event), fields(event_id = %event.event_id(), tag = %event.tag()))]
    pub async fn publish(&self, event: E) -> Result<()> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }

        self.shared.log.write().await.push(event.clone());
        let enqueued = self.shared.enqueue(&event, |_| true).await;

        metrics::counter!("bus_events_published_total", "tag" => event.tag().to_string())
            .increment(1);
        tracing::debug!(subscribers = enqueued, "event published");

        Ok(())
    }

    /// Delivers an already published event again to every subscriber of its
    /// tag, regardless of earlier outcomes. Returns the number of deliveries
    /// enqueued.
    #[tracing::instrument(skip(self))]
    pub async fn redeliver(&self, event_id: EventId) -> Result<usize> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }

        let event = self
            .shared
            .log
            .read()
            .await
            .iter()
            .find(|event| event.event_id() == event_id)
            .cloned()
            .ok_or(BusError::UnknownEvent(event_id))?;

        let enqueued = self.shared.enqueue(&event, |_| true).await;
        tracing::info!(enqueued, "event redelivered");
        Ok(enqueued)
    }

    /// Re-enqueues every logged event for each subscriber that has not yet
    /// settled it, the way a restarted process resumes unacknowledged work.
    /// Deliveries still in flight may be delivered twice.
    #[tracing::instrument(skip(self))]
    pub async fn recover(&self) -> Result<usize> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }

        let events = self.shared.log.read().await.clone();
        let settled: HashSet<(SubscriptionId, EventId)> =
            self.shared.settled.lock().await.keys().copied().collect();

        let mut enqueued = 0;
        for event in &events {
            let event_id = event.event_id();
            enqueued += self
                .shared
                .enqueue(event, |slot| !settled.contains(&(slot, event_id)))
                .await;
        }

        tracing::info!(enqueued, "unsettled deliveries re-enqueued");
        Ok(enqueued)
    }

    /// Waits until no delivery is queued, running or waiting for a retry.
    pub async fn wait_idle(&self) {
        let mut pending = self.shared.pending.subscribe();
        // The sender lives as long as `self`, so the wait cannot see a closed channel.
        let _ = pending.wait_for(|n| *n == 0).await;
    }

    /// Returns a copy of the event log in publish order.
    pub async fn published(&self) -> Vec<E> {
        self.shared.log.read().await.clone()
    }

    /// Returns true if any published event matches `predicate`.
    pub async fn any_published(&self, predicate: impl Fn(&E) -> bool) -> bool {
        self.shared.log.read().await.iter().any(predicate)
    }

    /// Returns how a subscriber settled an event, if it has.
    pub async fn delivery_outcome(
        &self,
        subscription: SubscriptionId,
        event_id: EventId,
    ) -> Option<DeliveryOutcome> {
        self.shared
            .settled
            .lock()
            .await
            .get(&(subscription, event_id))
            .copied()
    }

    /// Number of slots registered for `tag`.
    pub async fn subscriber_count(&self, tag: E::Tag) -> usize {
        self.shared
            .slots
            .read()
            .await
            .iter()
            .filter(|slot| slot.tag == tag)
            .count()
    }

    /// Subscribes to delivery diagnostics such as `HandlerExhausted`.
    pub fn diagnostics(&self) -> broadcast::Receiver<BusDiagnostic> {
        self.shared.diagnostics.subscribe()
    }

    /// Closes the bus: no further publishes or subscriptions are accepted,
    /// every slot drains the deliveries already queued, and all workers are
    /// joined. Calling it again is a no-op.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        // Dropping the senders ends each worker once its queue is empty.
        self.shared.slots.write().await.clear();
        let workers = std::mem::take(&mut *self.shared.workers.lock().await);

        for result in futures_util::future::join_all(workers).await {
            if let Err(err) = result {
                tracing::error!(error = %err, "subscriber worker terminated abnormally");
            }
        }

        tracing::info!("event bus shut down");
    }
}

struct Worker<E: BusEvent> {
    shared: Arc<Shared<E>>,
    id: SubscriptionId,
    name: &'static str,
    handler: Arc<dyn EventHandler<E>>,
}

impl<E: BusEvent> Worker<E> {
    async fn run(self, mut deliveries: mpsc::UnboundedReceiver<E>) {
        while let Some(event) = deliveries.recv().await {
            let outcome = self.deliver(&event).await;
            self.shared
                .settled
                .lock()
                .await
                .insert((self.id, event.event_id()), outcome);
            self.shared.pending.send_modify(|n| *n = n.saturating_sub(1));
        }

        tracing::debug!(subscriber = self.name, subscription = %self.id, "subscriber slot closed");
    }

    async fn deliver(&self, event: &E) -> DeliveryOutcome {
        let retry = &self.shared.config.retry;
        let deadline = self.shared.config.handler_deadline;
        let mut attempt = 1;

        loop {
            let started = Instant::now();
            let result = tokio::time::timeout(deadline, self.handler.handle(event)).await;
            metrics::histogram!("bus_handler_duration_seconds", "subscriber" => self.name)
                .record(started.elapsed().as_secs_f64());

            let error = match result {
                Ok(Ok(())) => return DeliveryOutcome::Acknowledged,
                Ok(Err(err)) => err.to_string(),
                Err(_) => format!("handler exceeded deadline of {deadline:?}"),
            };

            if attempt >= retry.attempts() {
                self.exhaust(event, attempt, error).await;
                return DeliveryOutcome::DeadLettered;
            }

            let delay = retry.delay_for(attempt);
            tracing::warn!(
                subscriber = self.name,
                event_id = %event.event_id(),
                attempt,
                ?delay,
                %error,
                "delivery failed, retrying"
            );
            metrics::counter!("bus_delivery_retries_total", "subscriber" => self.name)
                .increment(1);

            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn exhaust(&self, event: &E, attempts: u32, last_error: String) {
        let event_id = event.event_id();
        tracing::error!(
            subscriber = self.name,
            %event_id,
            tag = %event.tag(),
            attempts,
            error = %last_error,
            "handler exhausted, event dead-lettered"
        );
        metrics::counter!("bus_dead_letters_total", "subscriber" => self.name).increment(1);

        self.shared
            .dead_letters
            .record(DeadLetter {
                event: event.clone(),
                subscriber: self.name,
                attempts,
                last_error: last_error.clone(),
                failed_at: Utc::now(),
            })
            .await;

        // No receivers is fine: diagnostics are best-effort.
        let _ = self.shared.diagnostics.send(BusDiagnostic::HandlerExhausted {
            subscriber: self.name,
            event_id,
            tag: event.tag().to_string(),
            attempts,
            last_error,
        });
    }
}
