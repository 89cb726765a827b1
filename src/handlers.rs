//! Queue handlers - thin adapters from consumer deliveries to core operations.
//!
//! Handlers carry no business rules of their own. They own a store handle, call
//! into [`crate::core`], and turn the outcome into "ack" (`Ok`) or "redeliver"
//! (`Err`) for the consumer session.

use crate::{
    consumer::MessageHandler,
    core::{order, payment},
    errors::Result,
    messages::{PaymentRequest, PaymentResponse},
};
use async_trait::async_trait;
use sea_orm::DatabaseConnection;

/// Account side: applies `PaymentRequest`s behind the inbox.
///
/// Duplicates and insufficient funds are both successful handling; only a
/// rolled-back transaction makes the request come back.
#[derive(Debug, Clone)]
pub struct PaymentProcessor {
    db: DatabaseConnection,
}

impl PaymentProcessor {
    /// Creates a processor writing to the account-side store.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MessageHandler for PaymentProcessor {
    type Message = PaymentRequest;

    async fn handle(&self, message: PaymentRequest) -> Result<()> {
        payment::process_payment_request(&self.db, &message).await?;
        Ok(())
    }
}

/// Order side: settles orders from `PaymentResponse`s.
#[derive(Debug, Clone)]
pub struct OrderStatusApplier {
    db: DatabaseConnection,
}

impl OrderStatusApplier {
    /// Creates an applier writing to the order-side store.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MessageHandler for OrderStatusApplier {
    type Message = PaymentResponse;

    async fn handle(&self, message: PaymentResponse) -> Result<()> {
        // A contradicting terminal status is logged and acknowledged
        order::apply_payment_response(&self.db, &message).await?;
        Ok(())
    }
}
