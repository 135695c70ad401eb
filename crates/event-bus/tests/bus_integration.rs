//! Integration tests for delivery guarantees of the event bus.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::EventId;
use event_bus::{
    BusConfig, BusDiagnostic, BusError, BusEvent, DeliveryOutcome, EventBus, EventHandler,
    HandlerError, InMemoryDeadLetterSink, RetryPolicy,
};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Tag {
    Ping,
    Pong,
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Debug, Clone)]
struct TestEvent {
    id: EventId,
    tag: Tag,
    seq: u32,
}

impl TestEvent {
    fn ping(seq: u32) -> Self {
        Self {
            id: EventId::new(),
            tag: Tag::Ping,
            seq,
        }
    }

    fn pong(seq: u32) -> Self {
        Self {
            id: EventId::new(),
            tag: Tag::Pong,
            seq,
        }
    }
}

impl BusEvent for TestEvent {
    type Tag = Tag;

    fn tag(&self) -> Tag {
        self.tag
    }

    fn event_id(&self) -> EventId {
        self.id
    }
}

/// Records the sequence numbers it sees.
#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<u32>>,
}

#[async_trait]
impl EventHandler<TestEvent> for Recorder {
    fn name(&self) -> &'static str {
        "recorder"
    }

    async fn handle(&self, event: &TestEvent) -> Result<(), HandlerError> {
        self.seen.lock().await.push(event.seq);
        Ok(())
    }
}

/// Fails the first `failures` calls, then succeeds.
struct Flaky {
    failures: u32,
    calls: AtomicU32,
}

impl Flaky {
    fn new(failures: u32) -> Self {
        Self {
            failures,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl EventHandler<TestEvent> for Flaky {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn handle(&self, _event: &TestEvent) -> Result<(), HandlerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            Err(HandlerError::new(format!("failure #{call}")))
        } else {
            Ok(())
        }
    }
}

/// Never finishes within any reasonable deadline.
struct Stuck;

#[async_trait]
impl EventHandler<TestEvent> for Stuck {
    fn name(&self) -> &'static str {
        "stuck"
    }

    async fn handle(&self, _event: &TestEvent) -> Result<(), HandlerError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(())
    }
}

fn fast_config(max_attempts: u32) -> BusConfig {
    BusConfig {
        retry: RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
        },
        handler_deadline: Duration::from_millis(200),
        diagnostics_capacity: 16,
    }
}

fn bus(max_attempts: u32) -> (EventBus<TestEvent>, InMemoryDeadLetterSink<TestEvent>) {
    let sink = InMemoryDeadLetterSink::new();
    let bus = EventBus::new(fast_config(max_attempts), Arc::new(sink.clone()));
    (bus, sink)
}

async fn idle(bus: &EventBus<TestEvent>) {
    tokio::time::timeout(Duration::from_secs(5), bus.wait_idle())
        .await
        .expect("bus did not become idle");
}

#[tokio::test]
async fn events_reach_only_subscribers_of_their_tag() {
    let (bus, _) = bus(3);
    let pings = Arc::new(Recorder::default());
    let pongs = Arc::new(Recorder::default());
    bus.subscribe(Tag::Ping, pings.clone()).await.unwrap();
    bus.subscribe(Tag::Pong, pongs.clone()).await.unwrap();

    bus.publish(TestEvent::ping(1)).await.unwrap();
    bus.publish(TestEvent::pong(2)).await.unwrap();
    bus.publish(TestEvent::ping(3)).await.unwrap();
    idle(&bus).await;

    assert_eq!(*pings.seen.lock().await, vec![1, 3]);
    assert_eq!(*pongs.seen.lock().await, vec![2]);
    assert_eq!(bus.published().await.len(), 3);
}

#[tokio::test]
async fn deliveries_to_one_subscriber_keep_publish_order() {
    let (bus, _) = bus(3);
    let recorder = Arc::new(Recorder::default());
    bus.subscribe(Tag::Ping, recorder.clone()).await.unwrap();

    for seq in 0..100 {
        bus.publish(TestEvent::ping(seq)).await.unwrap();
    }
    idle(&bus).await;

    let seen = recorder.seen.lock().await.clone();
    assert_eq!(seen, (0..100).collect::<Vec<_>>());
}

#[tokio::test]
async fn failed_delivery_is_retried_until_it_succeeds() {
    let (bus, sink) = bus(5);
    let flaky = Arc::new(Flaky::new(2));
    let subscription = bus.subscribe(Tag::Ping, flaky.clone()).await.unwrap();

    let event = TestEvent::ping(1);
    let event_id = event.id;
    bus.publish(event).await.unwrap();
    idle(&bus).await;

    assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    assert!(sink.is_empty().await);
    assert_eq!(
        bus.delivery_outcome(subscription, event_id).await,
        Some(DeliveryOutcome::Acknowledged)
    );
}

#[tokio::test]
async fn exhausted_delivery_is_dead_lettered_without_blocking_others() {
    let (bus, sink) = bus(3);
    let mut diagnostics = bus.diagnostics();
    let flaky = Arc::new(Flaky::new(u32::MAX));
    let recorder = Arc::new(Recorder::default());
    let failing = bus.subscribe(Tag::Ping, flaky.clone()).await.unwrap();
    bus.subscribe(Tag::Ping, recorder.clone()).await.unwrap();

    let event = TestEvent::ping(7);
    let event_id = event.id;
    bus.publish(event).await.unwrap();
    idle(&bus).await;

    assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    assert_eq!(*recorder.seen.lock().await, vec![7]);

    let letters = sink.letters().await;
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].subscriber, "flaky");
    assert_eq!(letters[0].attempts, 3);
    assert_eq!(letters[0].last_error, "failure #3");
    assert_eq!(
        bus.delivery_outcome(failing, event_id).await,
        Some(DeliveryOutcome::DeadLettered)
    );

    match diagnostics.try_recv().unwrap() {
        BusDiagnostic::HandlerExhausted {
            subscriber,
            event_id: diagnosed,
            attempts,
            ..
        } => {
            assert_eq!(subscriber, "flaky");
            assert_eq!(diagnosed, event_id);
            assert_eq!(attempts, 3);
        }
    }
}

#[tokio::test]
async fn handler_deadline_counts_as_failure() {
    let (bus, sink) = bus(2);
    bus.subscribe(Tag::Ping, Arc::new(Stuck)).await.unwrap();

    bus.publish(TestEvent::ping(1)).await.unwrap();
    idle(&bus).await;

    let letters = sink.letters().await;
    assert_eq!(letters.len(), 1);
    assert!(letters[0].last_error.contains("deadline"));
}

#[tokio::test]
async fn redeliver_hands_the_same_event_id_out_again() {
    let (bus, _) = bus(3);
    let recorder = Arc::new(Recorder::default());
    bus.subscribe(Tag::Ping, recorder.clone()).await.unwrap();

    let event = TestEvent::ping(9);
    let event_id = event.id;
    bus.publish(event).await.unwrap();
    idle(&bus).await;

    assert_eq!(bus.redeliver(event_id).await.unwrap(), 1);
    idle(&bus).await;

    assert_eq!(*recorder.seen.lock().await, vec![9, 9]);
    assert!(matches!(
        bus.redeliver(EventId::new()).await,
        Err(BusError::UnknownEvent(_))
    ));
}

#[tokio::test]
async fn recover_only_resends_unsettled_deliveries() {
    let (bus, _) = bus(3);
    let recorder = Arc::new(Recorder::default());
    bus.publish(TestEvent::ping(1)).await.unwrap();

    // Subscribed after the publish: the first event is unsettled for this slot.
    bus.subscribe(Tag::Ping, recorder.clone()).await.unwrap();
    bus.publish(TestEvent::ping(2)).await.unwrap();
    idle(&bus).await;

    assert_eq!(bus.recover().await.unwrap(), 1);
    idle(&bus).await;

    assert_eq!(*recorder.seen.lock().await, vec![2, 1]);
    assert_eq!(bus.recover().await.unwrap(), 0);
}

#[tokio::test]
async fn shutdown_drains_queue_and_rejects_new_work() {
    let (bus, _) = bus(3);
    let recorder = Arc::new(Recorder::default());
    bus.subscribe(Tag::Ping, recorder.clone()).await.unwrap();

    for seq in 0..10 {
        bus.publish(TestEvent::ping(seq)).await.unwrap();
    }
    bus.shutdown().await;

    assert_eq!(recorder.seen.lock().await.len(), 10);
    assert!(matches!(
        bus.publish(TestEvent::ping(99)).await,
        Err(BusError::Closed)
    ));
    assert!(bus.any_published(|event| event.seq == 9).await);
    assert!(!bus.any_published(|event| event.seq == 99).await);
    assert!(matches!(
        bus.subscribe(Tag::Ping, Arc::new(Recorder::default())).await,
        Err(BusError::Closed)
    ));
    assert_eq!(bus.subscriber_count(Tag::Ping).await, 0);

    // A second shutdown is harmless.
    bus.shutdown().await;
}
