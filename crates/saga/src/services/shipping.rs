//! Shipping service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::AggregateId;
use domain::OrderSnapshot;
use tokio::sync::RwLock;

use crate::error::SagaError;

/// Answer to a shipment request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShipmentReceipt {
    /// The tracking number assigned by the shipping service.
    pub tracking_number: String,
    /// True when the idempotency key had been seen before and no new
    /// shipment was created.
    pub duplicate: bool,
}

/// Fire-and-forget shipment creation.
#[async_trait]
pub trait ShippingService: Send + Sync {
    /// Requests a shipment for the order's lines. Repeating a request with
    /// the same key returns the original shipment.
    async fn request_shipment(
        &self,
        idempotency_key: AggregateId,
        order: &OrderSnapshot,
    ) -> Result<ShipmentReceipt, SagaError>;
}

#[derive(Debug, Default)]
struct InMemoryShippingState {
    shipments: HashMap<AggregateId, (String, OrderSnapshot)>,
    next_id: u32,
    fail_on_request: bool,
}

/// In-memory shipping service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryShippingService {
    state: Arc<RwLock<InMemoryShippingState>>,
}

impl InMemoryShippingService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following request fail until reset.
    pub async fn set_fail_on_request(&self, fail: bool) {
        self.state.write().await.fail_on_request = fail;
    }

    /// Number of distinct shipments created.
    pub async fn shipment_count(&self) -> usize {
        self.state.read().await.shipments.len()
    }

    /// Tracking number of the shipment created for a key.
    pub async fn tracking_number(&self, key: AggregateId) -> Option<String> {
        self.state
            .read()
            .await
            .shipments
            .get(&key)
            .map(|(tracking, _)| tracking.clone())
    }
}

#[async_trait]
impl ShippingService for InMemoryShippingService {
    async fn request_shipment(
        &self,
        idempotency_key: AggregateId,
        order: &OrderSnapshot,
    ) -> Result<ShipmentReceipt, SagaError> {
        let mut state = self.state.write().await;

        if state.fail_on_request {
            return Err(SagaError::Shipping("carrier unavailable".to_string()));
        }

        if let Some((tracking_number, _)) = state.shipments.get(&idempotency_key) {
            return Ok(ShipmentReceipt {
                tracking_number: tracking_number.clone(),
                duplicate: true,
            });
        }

        state.next_id += 1;
        let tracking_number = format!("SHIP-{:05}", state.next_id);
        state
            .shipments
            .insert(idempotency_key, (tracking_number.clone(), order.clone()));

        Ok(ShipmentReceipt {
            tracking_number,
            duplicate: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{Money, OrderLine, UserId};

    fn snapshot() -> OrderSnapshot {
        OrderSnapshot {
            order_id: AggregateId::new(),
            user_id: UserId::new(),
            lines: vec![OrderLine::new("A", Money::from_cents(500), 2)],
            total: Money::from_cents(1000),
        }
    }

    #[tokio::test]
    async fn test_request_is_idempotent_per_key() {
        let service = InMemoryShippingService::new();
        let order = snapshot();

        let first = service.request_shipment(order.order_id, &order).await.unwrap();
        let second = service.request_shipment(order.order_id, &order).await.unwrap();

        assert!(!first.duplicate);
        assert!(second.duplicate);
        assert_eq!(first.tracking_number, second.tracking_number);
        assert_eq!(service.shipment_count().await, 1);
        assert_eq!(
            service.tracking_number(order.order_id).await,
            Some(first.tracking_number)
        );
    }

    #[tokio::test]
    async fn test_fail_on_request() {
        let service = InMemoryShippingService::new();
        service.set_fail_on_request(true).await;
        let order = snapshot();

        let result = service.request_shipment(order.order_id, &order).await;

        assert!(matches!(result, Err(SagaError::Shipping(_))));
        assert_eq!(service.shipment_count().await, 0);
    }
}
