//! Inventory reservation handler.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use common::AggregateId;
use domain::{OrderSnapshot, ProductId};
use event_bus::{BusEvent, EventBus, EventHandler, HandlerError};
use tokio::sync::Mutex;

use crate::cancellation::CancellationSignals;
use crate::error::{Result, SagaError};
use crate::events::CheckoutEvent;
use crate::services::{ReservationOutcome, StockStore};

/// Reserves stock once an order is paid and releases it on cancellation.
///
/// A product that cannot be covered does not undo the payment. The handler
/// publishes one `InventoryShortfall` per (order, product) and moves on to
/// the remaining lines.
pub struct InventoryReservationHandler {
    stock: Arc<dyn StockStore>,
    signals: CancellationSignals,
    bus: EventBus<CheckoutEvent>,
    /// Shortfalls already published. One entry per `InventoryShortfall` on
    /// the bus.
    reported: Mutex<HashSet<(AggregateId, ProductId)>>,
}

impl InventoryReservationHandler {
    pub fn new(
        stock: Arc<dyn StockStore>,
        signals: CancellationSignals,
        bus: EventBus<CheckoutEvent>,
    ) -> Self {
        Self {
            stock,
            signals,
            bus,
            reported: Mutex::new(HashSet::new()),
        }
    }

    #[tracing::instrument(skip_all, fields(order_id = %snapshot.order_id))]
    async fn reserve(&self, event: &CheckoutEvent, snapshot: &OrderSnapshot) -> Result<()> {
        let order_id = snapshot.order_id;
        if self.signals.is_raised(order_id).await {
            tracing::info!("cancellation requested, not reserving stock");
            return Ok(());
        }

        for (product_id, quantity) in snapshot.quantities_by_product() {
            match self.stock.reserve(&product_id, order_id, quantity).await {
                Ok(ReservationOutcome::Reserved) => {
                    tracing::debug!(%product_id, quantity, "stock reserved");
                }
                Ok(ReservationOutcome::AlreadyReserved) => {
                    tracing::debug!(%product_id, "stock already reserved");
                }
                Err(SagaError::InsufficientStock {
                    requested,
                    available,
                    ..
                }) => {
                    let key = (order_id, product_id.clone());
                    if self.reported.lock().await.contains(&key) {
                        continue;
                    }
                    tracing::warn!(%product_id, requested, available, "inventory shortfall");
                    self.bus
                        .publish(CheckoutEvent::inventory_shortfall(
                            event.event_id(),
                            snapshot.clone(),
                            product_id,
                            requested,
                            available,
                        ))
                        .await?;
                    metrics::counter!("inventory_shortfalls_total").increment(1);
                    self.reported.lock().await.insert(key);
                }
                Err(error) => return Err(error),
            }
        }

        Ok(())
    }

    #[tracing::instrument(skip_all, fields(order_id = %order_id))]
    async fn release(&self, order_id: AggregateId) -> Result<()> {
        let released = self.stock.release(order_id).await?;
        if released > 0 {
            tracing::info!(released, "stock reservations released");
        }
        Ok(())
    }
}

#[async_trait]
impl EventHandler<CheckoutEvent> for InventoryReservationHandler {
    fn name(&self) -> &'static str {
        "inventory-reservation"
    }

    async fn handle(&self, event: &CheckoutEvent) -> std::result::Result<(), HandlerError> {
        match event {
            CheckoutEvent::PaymentSucceeded { snapshot, .. } => self.reserve(event, snapshot).await?,
            CheckoutEvent::CancellationRequested { snapshot, .. } => {
                self.release(snapshot.order_id).await?
            }
            _ => {}
        }
        Ok(())
    }
}
