//! Payment gateway trait and in-memory implementation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::AggregateId;
use domain::Money;
use tokio::sync::RwLock;

use crate::error::SagaError;
use crate::token::PaymentToken;

/// A request to charge a payment method.
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    /// Repeating a request with the same key must not charge twice.
    /// The saga uses the order id.
    pub idempotency_key: AggregateId,
    pub token: PaymentToken,
    pub amount: Money,
}

/// Business outcome of a charge. Transport failures are errors instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeOutcome {
    Succeeded { charge_id: String },
    Failed { reason: String },
}

/// Opaque charge API of an external payment provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Identifier recorded on every payment attempt.
    fn id(&self) -> &str;

    /// Charges `request.amount` to the token.
    async fn charge(&self, request: ChargeRequest) -> Result<ChargeOutcome, SagaError>;

    /// Returns a successful charge to the customer.
    async fn refund(&self, charge_id: &str) -> Result<(), SagaError>;
}

/// How the in-memory gateway answers the next charges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayBehavior {
    Succeed,
    /// Declines with the given reason.
    Decline(String),
    /// Sleeps before answering, to exercise deadlines.
    Hang(Duration),
    /// Fails every call with a transport error.
    Unavailable,
}

#[derive(Debug, Clone)]
struct ChargeRecord {
    charge_id: String,
    amount: Money,
}

#[derive(Debug)]
struct GatewayState {
    behavior: GatewayBehavior,
    /// Successful charges keyed by idempotency key.
    charges: HashMap<AggregateId, ChargeRecord>,
    refunded: HashSet<String>,
    calls: u32,
    next_id: u32,
}

impl Default for GatewayState {
    fn default() -> Self {
        Self {
            behavior: GatewayBehavior::Succeed,
            charges: HashMap::new(),
            refunded: HashSet::new(),
            calls: 0,
            next_id: 0,
        }
    }
}

/// In-memory payment gateway for tests and the demo binary.
///
/// Successful charges are remembered per idempotency key and replayed for
/// repeats. Declines are not remembered, so a later retry can succeed.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<RwLock<GatewayState>>,
}

impl InMemoryPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_behavior(&self, behavior: GatewayBehavior) {
        self.state.write().await.behavior = behavior;
    }

    /// Number of `charge` calls received, including repeats and failures.
    pub async fn call_count(&self) -> u32 {
        self.state.read().await.calls
    }

    /// Number of distinct successful charges.
    pub async fn charge_count(&self) -> usize {
        self.state.read().await.charges.len()
    }

    /// Amount charged for an idempotency key, if the charge succeeded.
    pub async fn charged_amount(&self, key: AggregateId) -> Option<Money> {
        self.state.read().await.charges.get(&key).map(|c| c.amount)
    }

    pub async fn is_refunded(&self, charge_id: &str) -> bool {
        self.state.read().await.refunded.contains(charge_id)
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    fn id(&self) -> &str {
        "in-memory"
    }

    async fn charge(&self, request: ChargeRequest) -> Result<ChargeOutcome, SagaError> {
        let behavior = {
            let mut state = self.state.write().await;
            state.calls += 1;

            if let Some(existing) = state.charges.get(&request.idempotency_key) {
                return Ok(ChargeOutcome::Succeeded {
                    charge_id: existing.charge_id.clone(),
                });
            }
            state.behavior.clone()
        };

        match behavior {
            GatewayBehavior::Succeed => {}
            GatewayBehavior::Decline(reason) => return Ok(ChargeOutcome::Failed { reason }),
            GatewayBehavior::Hang(delay) => tokio::time::sleep(delay).await,
            GatewayBehavior::Unavailable => {
                return Err(SagaError::Gateway("gateway unavailable".to_string()));
            }
        }

        let mut state = self.state.write().await;
        state.next_id += 1;
        let charge_id = format!("ch_{:06}", state.next_id);
        let record = state
            .charges
            .entry(request.idempotency_key)
            .or_insert(ChargeRecord {
                charge_id,
                amount: request.amount,
            });

        Ok(ChargeOutcome::Succeeded {
            charge_id: record.charge_id.clone(),
        })
    }

    async fn refund(&self, charge_id: &str) -> Result<(), SagaError> {
        let mut state = self.state.write().await;
        if !state.charges.values().any(|c| c.charge_id == charge_id) {
            return Err(SagaError::Gateway(format!("unknown charge {charge_id}")));
        }
        state.refunded.insert(charge_id.to_string());
        Ok(())
    }
}
