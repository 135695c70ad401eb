//! Wiring of the bus, the handlers and the orchestrator.

use std::sync::Arc;

use domain::OrderService;
use event_bus::{BusConfig, DeadLetterSink, EventBus, EventHandler};
use event_store::EventStore;

use crate::cancellation::CancellationSignals;
use crate::config::SagaConfig;
use crate::error::Result;
use crate::events::{CheckoutEvent, EventTag};
use crate::handlers::{
    CompensationHandler, FulfillmentHandler, InventoryReservationHandler, PaymentSagaHandler,
    ShipmentTriggerHandler,
};
use crate::ledger::PaymentLedger;
use crate::orchestrator::CheckoutOrchestrator;
use crate::services::{NotificationService, PaymentGateway, ShippingService, StockStore};

/// External systems the saga talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub gateway: Arc<dyn PaymentGateway>,
    pub stock: Arc<dyn StockStore>,
    pub shipping: Arc<dyn ShippingService>,
    pub notifications: Arc<dyn NotificationService>,
    pub dead_letters: Arc<dyn DeadLetterSink<CheckoutEvent>>,
}

/// A running checkout saga.
///
/// Owns the bus and every subscription. Dropping the runtime without
/// calling [`SagaRuntime::shutdown`] leaves the subscriber tasks running
/// until the tokio runtime stops.
pub struct SagaRuntime<S: EventStore> {
    orchestrator: CheckoutOrchestrator<S>,
    bus: EventBus<CheckoutEvent>,
    ledger: PaymentLedger,
    signals: CancellationSignals,
}

impl<S: EventStore + Clone + 'static> SagaRuntime<S> {
    /// Builds the bus and subscribes every handler.
    ///
    /// Registration order is fixed: payment, then the three
    /// `PaymentSucceeded` subscribers (inventory, fulfillment, shipment),
    /// then compensation and cancellation. Must be called from within a
    /// tokio runtime.
    ///
    /// The gateway deadline is clamped to fit the bus handler deadline, see
    /// [`SagaConfig::max_gateway_deadline`].
    #[tracing::instrument(skip_all)]
    pub async fn start(
        store: S,
        collaborators: Collaborators,
        bus_config: BusConfig,
        config: SagaConfig,
    ) -> Result<Self> {
        let config = config.fit_to_handler_deadline(bus_config.handler_deadline);
        let bus = EventBus::new(bus_config, collaborators.dead_letters);
        let orders = OrderService::new(store).with_conflict_retries(config.conflict_retries);
        let ledger = PaymentLedger::new();
        let signals = CancellationSignals::new();

        let payment: Arc<dyn EventHandler<CheckoutEvent>> = Arc::new(PaymentSagaHandler::new(
            orders.clone(),
            collaborators.gateway,
            ledger.clone(),
            signals.clone(),
            bus.clone(),
            config.gateway_deadline,
        ));
        let inventory: Arc<dyn EventHandler<CheckoutEvent>> =
            Arc::new(InventoryReservationHandler::new(
                collaborators.stock,
                signals.clone(),
                bus.clone(),
            ));
        let fulfillment: Arc<dyn EventHandler<CheckoutEvent>> = Arc::new(FulfillmentHandler::new(
            orders.clone(),
            collaborators.notifications.clone(),
        ));
        let shipment: Arc<dyn EventHandler<CheckoutEvent>> = Arc::new(ShipmentTriggerHandler::new(
            collaborators.shipping,
            signals.clone(),
        ));
        let compensation: Arc<dyn EventHandler<CheckoutEvent>> =
            Arc::new(CompensationHandler::new(collaborators.notifications));

        let subscriptions = [
            (EventTag::OrderPlaced, &payment),
            (EventTag::PaymentRetryRequested, &payment),
            (EventTag::PaymentSucceeded, &inventory),
            (EventTag::PaymentSucceeded, &fulfillment),
            (EventTag::PaymentSucceeded, &shipment),
            (EventTag::PaymentFailed, &compensation),
            (EventTag::InventoryShortfall, &compensation),
            (EventTag::CancellationRequested, &inventory),
        ];
        for (tag, handler) in subscriptions {
            bus.subscribe(tag, Arc::clone(handler)).await?;
        }

        tracing::info!(subscriptions = subscriptions.len(), "checkout saga started");

        Ok(Self {
            orchestrator: CheckoutOrchestrator::new(orders, bus.clone(), signals.clone()),
            bus,
            ledger,
            signals,
        })
    }

    pub fn orchestrator(&self) -> &CheckoutOrchestrator<S> {
        &self.orchestrator
    }

    pub fn bus(&self) -> &EventBus<CheckoutEvent> {
        &self.bus
    }

    pub fn ledger(&self) -> &PaymentLedger {
        &self.ledger
    }

    pub fn signals(&self) -> &CancellationSignals {
        &self.signals
    }

    /// Waits until every published event has been settled by every
    /// subscriber, including events published by handlers along the way.
    pub async fn wait_idle(&self) {
        self.bus.wait_idle().await;
    }

    /// Resumes work left unfinished by a failed publish or an earlier run.
    ///
    /// Redelivers every logged event some subscriber has not settled, then
    /// republishes pending checkouts from the outbox. Returns the number of
    /// deliveries and events handed out.
    #[tracing::instrument(skip(self))]
    pub async fn recover(&self) -> Result<usize> {
        let redelivered = self.bus.recover().await?;
        let republished = self.orchestrator.republish_pending_checkouts().await?;
        tracing::info!(republished, redelivered, "checkout saga recovered");
        Ok(republished + redelivered)
    }

    /// Drains queued deliveries and stops every subscriber.
    pub async fn shutdown(self) {
        self.bus.shutdown().await;
        tracing::info!("checkout saga stopped");
    }
}
