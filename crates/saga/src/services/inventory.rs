//! Stock store trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use common::AggregateId;
use domain::ProductId;
use tokio::sync::{Mutex, RwLock};

use crate::error::SagaError;

/// Stock held for one order and product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockReservation {
    pub product_id: ProductId,
    pub quantity: i64,
    pub order_id: AggregateId,
}

/// Result of a successful `reserve`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationOutcome {
    /// Stock was decremented.
    Reserved,
    /// A reservation for this (product, order) already existed; nothing changed.
    AlreadyReserved,
}

/// Per-product stock counters with idempotent reservations.
#[async_trait]
pub trait StockStore: Send + Sync {
    /// Decrements stock by `quantity` for an order.
    ///
    /// At most one reservation exists per (product, order) pair; repeating
    /// the call is a no-op. Fails with [`SagaError::InsufficientStock`] and
    /// leaves the count unchanged if it would go negative.
    async fn reserve(
        &self,
        product_id: &ProductId,
        order_id: AggregateId,
        quantity: i64,
    ) -> Result<ReservationOutcome, SagaError>;

    /// Restores every reservation held by an order. Returns how many were
    /// released.
    async fn release(&self, order_id: AggregateId) -> Result<usize, SagaError>;

    /// Current count for a product, `None` if it was never stocked.
    async fn stock_level(&self, product_id: &ProductId) -> Option<i64>;
}

#[derive(Debug, Default)]
struct ProductStock {
    level: AtomicI64,
    /// Reserved quantity per order.
    reservations: Mutex<HashMap<AggregateId, i64>>,
}

/// In-memory stock store.
///
/// The product table is only write-locked to add products. Reservations
/// lock a single product's entry, so unrelated products never contend.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStockStore {
    products: Arc<RwLock<HashMap<ProductId, Arc<ProductStock>>>>,
}

impl InMemoryStockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the count for a product, creating it if needed.
    pub async fn set_stock(&self, product_id: impl Into<ProductId>, quantity: i64) {
        let product = self.product_or_insert(product_id.into()).await;
        product.level.store(quantity, Ordering::SeqCst);
    }

    /// Reservations currently held by an order.
    pub async fn reservations_for(&self, order_id: AggregateId) -> Vec<StockReservation> {
        let products = self.products.read().await;
        let mut held = Vec::new();
        for (product_id, product) in products.iter() {
            if let Some(&quantity) = product.reservations.lock().await.get(&order_id) {
                held.push(StockReservation {
                    product_id: product_id.clone(),
                    quantity,
                    order_id,
                });
            }
        }
        held.sort_by(|a, b| a.product_id.cmp(&b.product_id));
        held
    }

    async fn product(&self, product_id: &ProductId) -> Option<Arc<ProductStock>> {
        self.products.read().await.get(product_id).cloned()
    }

    async fn product_or_insert(&self, product_id: ProductId) -> Arc<ProductStock> {
        if let Some(product) = self.product(&product_id).await {
            return product;
        }
        self.products
            .write()
            .await
            .entry(product_id)
            .or_default()
            .clone()
    }
}

#[async_trait]
impl StockStore for InMemoryStockStore {
    async fn reserve(
        &self,
        product_id: &ProductId,
        order_id: AggregateId,
        quantity: i64,
    ) -> Result<ReservationOutcome, SagaError> {
        let shortfall = |available: i64| SagaError::InsufficientStock {
            product_id: product_id.to_string(),
            requested: quantity,
            available,
        };

        let Some(product) = self.product(product_id).await else {
            return Err(shortfall(0));
        };

        let mut reservations = product.reservations.lock().await;
        if reservations.contains_key(&order_id) {
            return Ok(ReservationOutcome::AlreadyReserved);
        }

        product
            .level
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |level| {
                level.checked_sub(quantity).filter(|left| *left >= 0)
            })
            .map_err(shortfall)?;
        reservations.insert(order_id, quantity);

        Ok(ReservationOutcome::Reserved)
    }

    async fn release(&self, order_id: AggregateId) -> Result<usize, SagaError> {
        let products: Vec<_> = self.products.read().await.values().cloned().collect();
        let mut released = 0;

        for product in products {
            if let Some(quantity) = product.reservations.lock().await.remove(&order_id) {
                product.level.fetch_add(quantity, Ordering::SeqCst);
                released += 1;
            }
        }

        Ok(released)
    }

    async fn stock_level(&self, product_id: &ProductId) -> Option<i64> {
        self.product(product_id)
            .await
            .map(|product| product.level.load(Ordering::SeqCst))
    }
}
