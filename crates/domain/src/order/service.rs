//! Order service wrapping the command handler.

use common::AggregateId;
use event_store::EventStore;

use crate::aggregate::Aggregate;
use crate::command::{CommandHandler, CommandResult, OutboxMessage};
use crate::error::DomainError;

use super::{Order, OrderError, OrderEvent, OrderLine, UserId};

/// Default number of times a command is re-run after losing a version race.
pub const DEFAULT_CONFLICT_RETRIES: u32 = 3;

/// High-level API for order operations.
///
/// Status transitions reload the order and re-run the command when another
/// writer appended first, up to the configured number of retries. A retried
/// command sees the fresh state, so a transition that raced with a
/// cancellation fails with an invalid-transition error instead of
/// overwriting it.
pub struct OrderService<S: EventStore> {
    handler: CommandHandler<S, Order>,
    conflict_retries: u32,
}

impl<S: EventStore + Clone> Clone for OrderService<S> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
            conflict_retries: self.conflict_retries,
        }
    }
}

impl<S: EventStore> OrderService<S> {
    pub fn new(store: S) -> Self {
        Self {
            handler: CommandHandler::new(store),
            conflict_retries: DEFAULT_CONFLICT_RETRIES,
        }
    }

    /// Sets how many times a conflicting command is retried. Zero surfaces
    /// the first conflict to the caller.
    pub fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.conflict_retries = retries;
        self
    }

    pub fn handler(&self) -> &CommandHandler<S, Order> {
        &self.handler
    }

    /// Starts, fills and places a new order as one atomic batch.
    ///
    /// Either the whole order is recorded in `Placed` status or nothing is.
    #[tracing::instrument(skip(self, lines), fields(lines = lines.len()))]
    pub async fn place_order(
        &self,
        order_id: AggregateId,
        user_id: UserId,
        lines: Vec<OrderLine>,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.place_order_with_outbox(order_id, user_id, lines, |_| Ok(Vec::new()))
            .await
    }

    /// Places an order and commits the messages `outbox_fn` derives from it
    /// in the same batch.
    #[tracing::instrument(skip(self, lines, outbox_fn), fields(lines = lines.len()))]
    pub async fn place_order_with_outbox<O>(
        &self,
        order_id: AggregateId,
        user_id: UserId,
        lines: Vec<OrderLine>,
        outbox_fn: O,
    ) -> Result<CommandResult<Order>, DomainError>
    where
        O: FnOnce(&Order) -> Result<Vec<OutboxMessage>, DomainError>,
    {
        self.handler
            .create_with_outbox(
                order_id,
                |order| {
                    let mut events = order.handle(|o| o.start(order_id, user_id))?;
                    events.extend(order.handle(|o| o.add_lines(lines))?);
                    events.extend(order.handle(Order::place)?);
                    Ok(events)
                },
                outbox_fn,
            )
            .await
    }

    /// Opens an empty draft order.
    #[tracing::instrument(skip(self))]
    pub async fn start_order(&self, user_id: UserId) -> Result<CommandResult<Order>, DomainError> {
        let order_id = AggregateId::new();

        self.handler
            .create(order_id, |order| order.handle(|o| o.start(order_id, user_id)))
            .await
    }

    #[tracing::instrument(skip(self, lines), fields(lines = lines.len()))]
    pub async fn add_lines(
        &self,
        order_id: AggregateId,
        lines: Vec<OrderLine>,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.execute_with_retry(order_id, |order| order.add_lines(lines.clone()))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn place(&self, order_id: AggregateId) -> Result<CommandResult<Order>, DomainError> {
        self.execute_with_retry(order_id, Order::place).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn mark_payment_pending(
        &self,
        order_id: AggregateId,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.execute_with_retry(order_id, Order::mark_payment_pending)
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn mark_paid(
        &self,
        order_id: AggregateId,
        charge_id: &str,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.execute_with_retry(order_id, |order| order.mark_paid(charge_id))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn mark_payment_failed(
        &self,
        order_id: AggregateId,
        reason: &str,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.execute_with_retry(order_id, |order| order.mark_payment_failed(reason))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn fulfill(&self, order_id: AggregateId) -> Result<CommandResult<Order>, DomainError> {
        self.execute_with_retry(order_id, Order::fulfill).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn cancel(
        &self,
        order_id: AggregateId,
        reason: &str,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.execute_with_retry(order_id, |order| order.cancel(reason))
            .await
    }

    /// Loads an order by ID.
    ///
    /// Returns None if the order doesn't exist.
    #[tracing::instrument(skip(self))]
    pub async fn get_order(&self, order_id: AggregateId) -> Result<Option<Order>, DomainError> {
        self.handler.load_existing(order_id).await
    }

    /// Runs a command, reloading and re-running it after each version
    /// conflict until the retry budget is spent.
    pub async fn execute_with_retry<F>(
        &self,
        order_id: AggregateId,
        command_fn: F,
    ) -> Result<CommandResult<Order>, DomainError>
    where
        F: Fn(&Order) -> Result<Vec<OrderEvent>, OrderError>,
    {
        let mut attempt = 0;
        loop {
            match self.handler.execute(order_id, &command_fn).await {
                Err(error) if error.is_conflict() && attempt < self.conflict_retries => {
                    attempt += 1;
                    metrics::counter!("order_concurrency_conflicts_total").increment(1);
                    tracing::debug!(%order_id, attempt, %error, "retrying after version conflict");
                }
                result => return result,
            }
        }
    }
}
