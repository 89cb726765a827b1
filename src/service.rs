//! Service wiring - each side runs an outbox relay and a consumer session.
//!
//! | Side | Relay publishes | Consumer handles |
//! |---|---|---|
//! | orders | `PaymentRequest` to `request_queue` | `PaymentResponse` from `response_queue` |
//! | payments | `PaymentResponse` to `response_queue` | `PaymentRequest` from `request_queue` |
//!
//! The two loops are independent tokio tasks. They share the store but each owns
//! its own broker session.

use crate::{
    broker::BrokerConnector,
    config::AppConfig,
    consumer::ConsumerSession,
    handlers::{OrderStatusApplier, PaymentProcessor},
    messages::{PaymentRequest, PaymentResponse},
    relay::OutboxRelay,
    scheduler::{Scheduler, ShutdownTrigger, shutdown_channel},
};
use sea_orm::DatabaseConnection;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Running background tasks of one service.
#[derive(Debug)]
pub struct ServiceHandle {
    name: &'static str,
    trigger: ShutdownTrigger,
    tasks: Vec<JoinHandle<()>>,
}

impl ServiceHandle {
    /// Signals shutdown and waits for both loops to close their channels.
    pub async fn shutdown(self) {
        info!(service = self.name, "Shutting down");
        self.trigger.trigger();
        for task in self.tasks {
            if let Err(err) = task.await {
                error!(service = self.name, error = %err, "Background task ended abnormally");
            }
        }
        info!(service = self.name, "Stopped");
    }
}

/// Starts the order side: relays payment requests, applies payment responses.
pub fn spawn_order_service<C, S>(
    db: DatabaseConnection,
    config: &AppConfig,
    connector: C,
    scheduler: S,
) -> ServiceHandle
where
    C: BrokerConnector + Clone,
    S: Scheduler + Clone,
{
    let bus = &config.message_bus;
    let (trigger, shutdown) = shutdown_channel();

    let relay = OutboxRelay::<C, PaymentRequest>::new(
        db.clone(),
        connector.clone(),
        bus,
        bus.request_queue.clone(),
        config.relay.clone(),
    );
    let consumer = ConsumerSession::new(
        connector,
        bus,
        bus.response_queue.clone(),
        OrderStatusApplier::new(db),
    );

    info!("Order service starting");
    ServiceHandle {
        name: "orders",
        tasks: vec![
            tokio::spawn(relay.run(scheduler.clone(), shutdown.clone())),
            tokio::spawn(consumer.run(scheduler, shutdown)),
        ],
        trigger,
    }
}

/// Starts the account side: applies payment requests, relays payment responses.
pub fn spawn_payment_service<C, S>(
    db: DatabaseConnection,
    config: &AppConfig,
    connector: C,
    scheduler: S,
) -> ServiceHandle
where
    C: BrokerConnector + Clone,
    S: Scheduler + Clone,
{
    let bus = &config.message_bus;
    let (trigger, shutdown) = shutdown_channel();

    let relay = OutboxRelay::<C, PaymentResponse>::new(
        db.clone(),
        connector.clone(),
        bus,
        bus.response_queue.clone(),
        config.relay.clone(),
    );
    let consumer = ConsumerSession::new(
        connector,
        bus,
        bus.request_queue.clone(),
        PaymentProcessor::new(db),
    );

    info!("Payment service starting");
    ServiceHandle {
        name: "payments",
        tasks: vec![
            tokio::spawn(relay.run(scheduler.clone(), shutdown.clone())),
            tokio::spawn(consumer.run(scheduler, shutdown)),
        ],
        trigger,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::core::{account, order, outbox};
    use crate::entities::{OrderModel, OrderStatus};
    use crate::errors::Result;
    use crate::messages::Envelope;
    use crate::scheduler::TokioScheduler;
    use crate::test_utils::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use uuid::Uuid;

    struct Pair {
        broker: InMemoryBroker,
        orders_db: DatabaseConnection,
        payments_db: DatabaseConnection,
        orders: ServiceHandle,
        payments: ServiceHandle,
    }

    async fn start_pair() -> Result<Pair> {
        let config = AppConfig {
            message_bus: fast_bus_settings(),
            relay: fast_relay_settings(),
            ..AppConfig::default()
        };
        let broker = InMemoryBroker::new();
        let orders_db = setup_order_db().await?;
        let payments_db = setup_payment_db().await?;

        let orders = spawn_order_service(
            orders_db.clone(),
            &config,
            broker.clone(),
            TokioScheduler,
        );
        let payments = spawn_payment_service(
            payments_db.clone(),
            &config,
            broker.clone(),
            TokioScheduler,
        );
        Ok(Pair {
            broker,
            orders_db,
            payments_db,
            orders,
            payments,
        })
    }

    impl Pair {
        async fn settled_as(&self, placed: &OrderModel, status: OrderStatus) -> Result<bool> {
            eventually(Duration::from_secs(5), || async {
                let current = order::get_order(&self.orders_db, placed.id, placed.user_id).await?;
                Ok(current.status == status)
            })
            .await
        }

        async fn stop(self) {
            self.orders.shutdown().await;
            self.payments.shutdown().await;
        }
    }

    #[tokio::test]
    async fn test_funded_order_is_finished_and_debited_once() -> Result<()> {
        let pair = start_pair().await?;
        let user = Uuid::new_v4();
        create_funded_account(&pair.payments_db, user, dec!(150)).await?;

        let placed = create_test_order(&pair.orders_db, user, dec!(100)).await?;
        assert!(pair.settled_as(&placed, OrderStatus::Finished).await?);

        let db = &pair.payments_db;
        assert_eq!(account::get_account(db, user).await?.balance, dec!(50));
        let debits: Vec<_> = account::list_payments(db, user)
            .await?
            .into_iter()
            .filter(|entry| entry.amount < Decimal::ZERO)
            .collect();
        assert_eq!(debits.len(), 1);
        assert_eq!(debits[0].amount, dec!(-100));
        assert_eq!(debits[0].order_id, Some(placed.id));
        pair.stop().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_underfunded_order_is_cancelled() -> Result<()> {
        let pair = start_pair().await?;
        let user = Uuid::new_v4();
        create_funded_account(&pair.payments_db, user, dec!(50)).await?;

        let placed = create_test_order(&pair.orders_db, user, dec!(100)).await?;
        assert!(pair.settled_as(&placed, OrderStatus::Cancelled).await?);

        let db = &pair.payments_db;
        assert_eq!(account::get_account(db, user).await?.balance, dec!(50));
        let entries = account::list_payments(db, user).await?;
        assert!(entries.iter().all(|entry| entry.amount > Decimal::ZERO));
        pair.stop().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_order_settles_after_broker_outage() -> Result<()> {
        let pair = start_pair().await?;
        let user = Uuid::new_v4();
        create_funded_account(&pair.payments_db, user, dec!(80)).await?;

        pair.broker.set_available(false);
        let placed = create_test_order(&pair.orders_db, user, dec!(30)).await?;
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Committed locally, still waiting to be relayed
        assert_eq!(outbox::count_pending(&pair.orders_db).await?, 1);
        let current = order::get_order(&pair.orders_db, placed.id, user).await?;
        assert_eq!(current.status, OrderStatus::New);

        pair.broker.set_available(true);
        assert!(pair.settled_as(&placed, OrderStatus::Finished).await?);
        assert_eq!(
            account::get_account(&pair.payments_db, user).await?.balance,
            dec!(50)
        );
        pair.stop().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_request_delivery_debits_once() -> Result<()> {
        let config = AppConfig {
            message_bus: fast_bus_settings(),
            relay: fast_relay_settings(),
            ..AppConfig::default()
        };
        let broker = InMemoryBroker::new();
        let db = setup_payment_db().await?;
        let user = Uuid::new_v4();
        create_funded_account(&db, user, dec!(100)).await?;
        let payments = spawn_payment_service(db.clone(), &config, broker.clone(), TokioScheduler);

        // The same request published twice, as after a relay crash between
        // publishing and marking the row
        let request = PaymentRequest::new(Uuid::new_v4(), user, dec!(40));
        let body = request.to_json()?;
        broker.inject("requests", body.as_bytes());
        broker.inject("requests", body.as_bytes());

        let drained = eventually(Duration::from_secs(5), || async {
            Ok(broker.ready_count("requests") == 0
                && broker.unacked_count("requests") == 0
                && outbox::count_pending(&db).await? == 0
                && !broker.published("responses").is_empty())
        })
        .await?;
        assert!(drained);

        assert_eq!(account::get_account(&db, user).await?.balance, dec!(60));
        let debits = account::list_payments(&db, user)
            .await?
            .into_iter()
            .filter(|entry| entry.amount < Decimal::ZERO)
            .count();
        assert_eq!(debits, 1);

        let responses = broker.published("responses");
        assert_eq!(responses.len(), 1);
        let response = PaymentResponse::from_json(&responses[0])?;
        assert!(response.success);
        assert_eq!(response.original_message_id, request.message_id);
        payments.shutdown().await;
        Ok(())
    }
}
