//! Integration tests for the service wiring.

use std::time::Duration;

use domain::{OrderStatus, ProductId};
use saga::services::inventory::StockStore;
use service::{App, Config};

fn test_config() -> Config {
    Config {
        gateway_deadline: Duration::from_millis(200),
        bus_backoff_base: Duration::from_millis(5),
        bus_backoff_max: Duration::from_millis(20),
        ..Config::default()
    }
}

#[tokio::test]
async fn test_demo_run_settles_every_order() {
    let app = App::start(&test_config()).await.unwrap();

    let outcomes = app.run_demo(4).await.unwrap();

    let statuses: Vec<_> = outcomes.iter().map(|(_, status)| *status).collect();
    assert_eq!(
        statuses,
        vec![
            OrderStatus::Fulfilled,
            OrderStatus::Fulfilled,
            OrderStatus::Fulfilled,
            OrderStatus::PaymentFailed,
        ]
    );
    assert_eq!(app.shipping.shipment_count().await, 3);
    assert_eq!(app.stock.stock_level(&ProductId::new("SKU-FILTER")).await, Some(0));
    assert!(app.dead_letters.is_empty().await);

    app.shutdown().await;
}

#[tokio::test]
async fn test_zero_demo_orders() {
    let app = App::start(&test_config()).await.unwrap();

    assert!(app.run_demo(0).await.unwrap().is_empty());

    app.shutdown().await;
}
