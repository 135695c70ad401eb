//! Checkout saga service.
//!
//! Wires the saga runtime over in-memory collaborators, seeds a small
//! catalog and drives demo checkouts through it. Logging and the Prometheus
//! exporter are installed by the binary.

pub mod config;

pub use config::{Config, LogFormat};

use std::sync::Arc;

use common::AggregateId;
use domain::{Money, OrderLine, OrderStatus, UserId};
use event_bus::InMemoryDeadLetterSink;
use event_store::InMemoryEventStore;
use saga::{
    CheckoutEvent, Collaborators, GatewayBehavior, InMemoryNotificationService,
    InMemoryPaymentGateway, InMemoryShippingService, InMemoryStockStore, SagaRuntime,
};

/// Products stocked at startup.
const CATALOG: &[(&str, i64, i64)] = &[
    ("SKU-COFFEE", 1_250, 100),
    ("SKU-MUG", 899, 25),
    ("SKU-FILTER", 450, 3),
];

/// Every n-th demo order is paid with a card the gateway declines.
const DECLINE_EVERY: usize = 4;

/// A running service and handles on its in-memory collaborators.
pub struct App {
    pub runtime: SagaRuntime<InMemoryEventStore>,
    pub gateway: InMemoryPaymentGateway,
    pub stock: InMemoryStockStore,
    pub shipping: InMemoryShippingService,
    pub notifications: InMemoryNotificationService,
    pub dead_letters: InMemoryDeadLetterSink<CheckoutEvent>,
}

impl App {
    /// Seeds the catalog, starts the saga runtime and resumes any work left
    /// in the store.
    pub async fn start(config: &Config) -> saga::Result<Self> {
        let gateway = InMemoryPaymentGateway::new();
        let stock = InMemoryStockStore::new();
        let shipping = InMemoryShippingService::new();
        let notifications = InMemoryNotificationService::new();
        let dead_letters = InMemoryDeadLetterSink::new();

        for (sku, _, quantity) in CATALOG {
            stock.set_stock(*sku, *quantity).await;
        }

        let collaborators = Collaborators {
            gateway: Arc::new(gateway.clone()),
            stock: Arc::new(stock.clone()),
            shipping: Arc::new(shipping.clone()),
            notifications: Arc::new(notifications.clone()),
            dead_letters: Arc::new(dead_letters.clone()),
        };

        let runtime = SagaRuntime::start(
            InMemoryEventStore::new(),
            collaborators,
            config.bus_config(),
            config.saga_config(),
        )
        .await?;
        runtime.recover().await?;

        Ok(Self {
            runtime,
            gateway,
            stock,
            shipping,
            notifications,
            dead_letters,
        })
    }

    /// Places `orders` checkouts one after the other and waits for each saga
    /// to settle. Returns the final status of every order.
    #[tracing::instrument(skip(self))]
    pub async fn run_demo(&self, orders: usize) -> saga::Result<Vec<(AggregateId, OrderStatus)>> {
        let mut outcomes = Vec::with_capacity(orders);

        for n in 1..=orders {
            let behavior = if n % DECLINE_EVERY == 0 {
                GatewayBehavior::Decline("card_declined".to_string())
            } else {
                GatewayBehavior::Succeed
            };
            self.gateway.set_behavior(behavior).await;

            let receipt = self
                .runtime
                .orchestrator()
                .checkout(UserId::new(), demo_cart(n), "tok_demo_card")
                .await?;
            self.runtime.wait_idle().await;

            let status = self.runtime.orchestrator().order_status(receipt.order_id).await?;
            tracing::info!(order = n, order_id = %receipt.order_id, %status, "demo order settled");
            outcomes.push((receipt.order_id, status));
        }

        self.gateway.set_behavior(GatewayBehavior::Succeed).await;
        Ok(outcomes)
    }

    /// Stops the runtime after draining in-flight deliveries.
    pub async fn shutdown(self) {
        let dead_letters = self.dead_letters.len().await;
        if dead_letters > 0 {
            tracing::warn!(dead_letters, "dead letters left for operators");
        }
        self.runtime.shutdown().await;
    }
}

/// A cart that cycles through the catalog. Every order takes one filter,
/// so the small filter stock eventually runs short.
fn demo_cart(n: usize) -> Vec<OrderLine> {
    let (sku, price, _) = CATALOG[n % 2];
    let (filter, filter_price, _) = CATALOG[2];
    let quantity = i64::try_from(n % 3 + 1).unwrap_or(1);

    vec![
        OrderLine::new(sku, Money::from_cents(price), quantity),
        OrderLine::new(filter, Money::from_cents(filter_price), 1),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_cart_is_valid() {
        for n in 1..10 {
            let cart = demo_cart(n);
            assert_eq!(cart.len(), 2);
            assert!(cart.iter().all(|line| line.quantity > 0));
        }
    }
}
