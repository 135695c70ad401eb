//! Value objects for the order domain.

use common::AggregateId;
use serde::{Deserialize, Serialize};

common::uuid_identifier! {
    /// Identifier of the user who owns an order.
    UserId
}

/// Product identifier (SKU).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(String);

impl ProductId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ProductId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ProductId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for ProductId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Money amount in integer minor units (cents).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    pub const fn zero() -> Self {
        Self(0)
    }

    pub const fn cents(&self) -> i64 {
        self.0
    }

    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Multiplies by a quantity, returning `None` on overflow.
    pub fn checked_mul(self, quantity: i64) -> Option<Money> {
        self.0.checked_mul(quantity).map(Money)
    }

    /// Adds two amounts, returning `None` on overflow.
    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}${}.{:02}", abs / 100, abs % 100)
    }
}

/// One line of an order: a product, its unit price and a quantity.
///
/// Lines are validated by [`Order::add_lines`](super::Order::add_lines); once
/// recorded, a line's subtotal is known not to overflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub unit_price: Money,
    pub quantity: i64,
}

impl OrderLine {
    pub fn new(product_id: impl Into<ProductId>, unit_price: Money, quantity: i64) -> Self {
        Self {
            product_id: product_id.into(),
            unit_price,
            quantity,
        }
    }

    /// `unit_price * quantity`, or `None` if it does not fit.
    pub fn checked_subtotal(&self) -> Option<Money> {
        self.unit_price.checked_mul(self.quantity)
    }

    /// `unit_price * quantity` for a line that has already been validated.
    pub fn subtotal(&self) -> Money {
        Money::from_cents(self.unit_price.cents().saturating_mul(self.quantity))
    }
}

/// Immutable copy of an order's contents carried on saga events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub order_id: AggregateId,
    pub user_id: UserId,
    pub lines: Vec<OrderLine>,
    pub total: Money,
}

impl OrderSnapshot {
    /// Total requested quantity per product, summing duplicate lines.
    pub fn quantities_by_product(&self) -> Vec<(ProductId, i64)> {
        let mut totals: Vec<(ProductId, i64)> = Vec::new();
        for line in &self.lines {
            match totals.iter_mut().find(|(id, _)| *id == line.product_id) {
                Some((_, quantity)) => *quantity = quantity.saturating_add(line.quantity),
                None => totals.push((line.product_id.clone(), line.quantity)),
            }
        }
        totals
    }
}
