//! Shipment trigger handler.

use std::sync::Arc;

use async_trait::async_trait;
use domain::OrderSnapshot;
use event_bus::{EventHandler, HandlerError};

use crate::cancellation::CancellationSignals;
use crate::error::Result;
use crate::events::CheckoutEvent;
use crate::services::ShippingService;

/// Requests a shipment for every paid order.
///
/// The order id is the idempotency key, so redelivery never creates a
/// second shipment.
pub struct ShipmentTriggerHandler {
    shipping: Arc<dyn ShippingService>,
    signals: CancellationSignals,
}

impl ShipmentTriggerHandler {
    pub fn new(shipping: Arc<dyn ShippingService>, signals: CancellationSignals) -> Self {
        Self { shipping, signals }
    }

    #[tracing::instrument(skip_all, fields(order_id = %snapshot.order_id))]
    async fn request(&self, snapshot: &OrderSnapshot) -> Result<()> {
        if self.signals.is_raised(snapshot.order_id).await {
            tracing::info!("cancellation requested, not shipping");
            return Ok(());
        }

        let receipt = self
            .shipping
            .request_shipment(snapshot.order_id, snapshot)
            .await?;

        if receipt.duplicate {
            tracing::debug!(tracking_number = %receipt.tracking_number, "shipment already requested");
        } else {
            metrics::counter!("shipments_requested_total").increment(1);
            tracing::info!(tracking_number = %receipt.tracking_number, "shipment requested");
        }
        Ok(())
    }
}

#[async_trait]
impl EventHandler<CheckoutEvent> for ShipmentTriggerHandler {
    fn name(&self) -> &'static str {
        "shipment-trigger"
    }

    async fn handle(&self, event: &CheckoutEvent) -> std::result::Result<(), HandlerError> {
        if let CheckoutEvent::PaymentSucceeded { snapshot, .. } = event {
            self.request(snapshot).await?;
        }
        Ok(())
    }
}
