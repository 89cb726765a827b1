//! Shared test utilities for the ledger services.
//!
//! This module provides helpers for setting up in-memory stores with all tables
//! created, and for building orders, funded accounts and envelopes with sensible
//! defaults.

use crate::{
    config::{
        MessageBusSettings, RelaySettings,
        database::{connect, create_order_tables, create_payment_tables},
    },
    core::{account, order},
    entities,
    errors::Result,
    messages::{PaymentRequest, PaymentResponse},
    scheduler::{Scheduler, Shutdown},
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sea_orm::DatabaseConnection;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use uuid::Uuid;

/// Creates an in-memory order store with its tables initialized.
pub async fn setup_order_db() -> Result<DatabaseConnection> {
    let db = connect("sqlite::memory:").await?;
    create_order_tables(&db).await?;
    Ok(db)
}

/// Creates an in-memory account store with its tables initialized.
pub async fn setup_payment_db() -> Result<DatabaseConnection> {
    let db = connect("sqlite::memory:").await?;
    create_payment_tables(&db).await?;
    Ok(db)
}

/// Creates an order with a default description.
pub async fn create_test_order(
    db: &DatabaseConnection,
    user_id: Uuid,
    amount: Decimal,
) -> Result<entities::order::Model> {
    order::create_order(db, user_id, amount, "Test order".to_string()).await
}

/// Opens an account for `user_id` and tops it up to `balance` (if positive).
pub async fn create_funded_account(
    db: &DatabaseConnection,
    user_id: Uuid,
    balance: Decimal,
) -> Result<entities::account::Model> {
    let account = account::create_account(db, user_id).await?;
    if balance > Decimal::ZERO {
        return account::increase_balance(db, user_id, balance).await;
    }
    Ok(account)
}

/// Builds the response the account side would send for `order`.
#[must_use]
pub fn response_for(order: &entities::order::Model, success: bool) -> PaymentResponse {
    let request = PaymentRequest::new(order.id, order.user_id, order.amount);
    PaymentResponse::for_request(&request, success, "test")
}

/// Bus settings with millisecond timeouts so loops settle quickly in tests.
#[must_use]
pub fn fast_bus_settings() -> MessageBusSettings {
    MessageBusSettings {
        connection_timeout: Duration::from_millis(200),
        read_timeout: Duration::from_millis(200),
        write_timeout: Duration::from_millis(200),
        reconnect_interval: Duration::from_millis(20),
        ..MessageBusSettings::default()
    }
}

/// Relay settings polling every few milliseconds.
#[must_use]
pub fn fast_relay_settings() -> RelaySettings {
    RelaySettings {
        poll_interval: Duration::from_millis(20),
        ..RelaySettings::default()
    }
}

/// Polls `check` until it returns `true` or `timeout` elapses.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> Result<bool>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<bool>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await? {
            return Ok(true);
        }
        if tokio::time::Instant::now() >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Scheduler that never waits: it records every requested delay and reports
/// shutdown once `limit` delays have been requested.
#[derive(Debug, Clone)]
pub struct RecordingScheduler {
    delays: Arc<Mutex<Vec<Duration>>>,
    limit: usize,
}

impl RecordingScheduler {
    /// Stops the loop on the `limit`-th sleep.
    #[must_use]
    pub fn stopping_after(limit: usize) -> Self {
        Self {
            delays: Arc::default(),
            limit,
        }
    }

    /// Delays requested so far, in order.
    #[must_use]
    pub fn delays(&self) -> Vec<Duration> {
        self.delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Scheduler for RecordingScheduler {
    async fn sleep(&self, delay: Duration, shutdown: &mut Shutdown) -> bool {
        let requested = {
            let mut delays = self.delays.lock().unwrap_or_else(PoisonError::into_inner);
            delays.push(delay);
            delays.len()
        };
        tokio::task::yield_now().await;
        requested < self.limit && !shutdown.is_triggered()
    }
}
