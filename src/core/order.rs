//! Order business logic - the order side of the ledger pair.
//!
//! [`create_order`] writes the order and the `PaymentRequest` outbox row in one
//! transaction. [`apply_payment_response`] settles the order when the account side
//! answers; the status write is naturally idempotent so no inbox is kept here.

use crate::{
    core::outbox,
    entities::{Order, OrderStatus, order},
    errors::{Error, Result},
    messages::{PaymentRequest, PaymentResponse},
};
use sea_orm::{Set, TransactionTrait, prelude::*};
use tracing::{info, instrument, warn};

/// Result of asking an order to move to a status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusChange {
    /// The order moved from `New` to the requested terminal status
    Applied,
    /// The order already had the requested status
    Unchanged,
    /// The order is in a different terminal status and stays there
    Rejected {
        /// Status the order keeps
        current: OrderStatus,
    },
}

/// Creates an order together with its outbound payment request.
///
/// Fails with [`Error::Validation`] when `amount` is not positive; nothing is
/// written in that case. Otherwise the order (status `New`) and one outbox row
/// carrying a fresh `PaymentRequest` are committed together or not at all.
#[instrument(skip(db, description))]
pub async fn create_order(
    db: &DatabaseConnection,
    user_id: Uuid,
    amount: Decimal,
    description: String,
) -> Result<order::Model> {
    if amount <= Decimal::ZERO {
        return Err(Error::validation(format!(
            "order amount must be positive, got {amount}"
        )));
    }

    let txn = db.begin().await?;

    let order = order::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        amount: Set(amount),
        description: Set(description),
        status: Set(OrderStatus::New),
    }
    .insert(&txn)
    .await?;

    let request = PaymentRequest::new(order.id, order.user_id, order.amount);
    outbox::enqueue(&txn, &request).await?;

    txn.commit().await?;

    info!(order_id = %order.id, message_id = %request.message_id, "Order created");
    Ok(order)
}

/// Retrieves an order owned by `user_id`.
///
/// An order that exists but belongs to someone else is reported as not found.
pub async fn get_order(db: &DatabaseConnection, order_id: Uuid, user_id: Uuid) -> Result<order::Model> {
    Order::find_by_id(order_id)
        .filter(order::Column::UserId.eq(user_id))
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("Order", order_id))
}

/// Lists every order placed by `user_id`.
pub async fn list_orders(db: &DatabaseConnection, user_id: Uuid) -> Result<Vec<order::Model>> {
    Order::find()
        .filter(order::Column::UserId.eq(user_id))
        .all(db)
        .await
        .map_err(Into::into)
}

/// Moves an order to `status`, honouring the `New -> terminal` state machine.
///
/// Re-applying the status the order already has is a no-op. A different terminal
/// status is never overwritten.
pub async fn update_status<C>(db: &C, order_id: Uuid, status: OrderStatus) -> Result<StatusChange>
where
    C: ConnectionTrait,
{
    let current = Order::find_by_id(order_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("Order", order_id))?;

    if current.status == status {
        return Ok(StatusChange::Unchanged);
    }
    if current.status.is_terminal() {
        return Ok(StatusChange::Rejected {
            current: current.status,
        });
    }

    let mut active: order::ActiveModel = current.into();
    active.status = Set(status);
    active.update(db).await?;
    Ok(StatusChange::Applied)
}

/// Settles an order from the account side's answer.
///
/// Success maps to `Finished`, failure to `Cancelled`. Fails with
/// [`Error::NotFound`] when the order is unknown, so the delivery is retried.
#[instrument(skip(db, response), fields(order_id = %response.order_id, success = response.success))]
pub async fn apply_payment_response(
    db: &DatabaseConnection,
    response: &PaymentResponse,
) -> Result<StatusChange> {
    let status = OrderStatus::from_payment_success(response.success);
    let change = update_status(db, response.order_id, status).await?;

    match change {
        StatusChange::Applied => info!(?status, "Order settled"),
        StatusChange::Unchanged => info!(?status, "Order already settled, nothing to do"),
        StatusChange::Rejected { current } => warn!(
            ?current,
            requested = ?status,
            "Ignoring response that contradicts a terminal order status"
        ),
    }
    Ok(change)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::entities::OutboxMessage;
    use crate::messages::Envelope;
    use crate::test_utils::*;
    use rust_decimal_macros::dec;
    use sea_orm::{ConnectionTrait, PaginatorTrait};

    #[tokio::test]
    async fn test_create_order_writes_order_and_outbox_row() -> Result<()> {
        let db = setup_order_db().await?;
        let user_id = Uuid::new_v4();

        let order = create_order(&db, user_id, dec!(100), "Headphones".to_string()).await?;
        assert_eq!(order.status, OrderStatus::New);
        assert_eq!(order.amount, dec!(100));

        let rows = outbox::list_all(&db).await?;
        assert_eq!(rows.len(), 1);
        let request = PaymentRequest::from_json(rows[0].payload.as_bytes())?;
        assert_eq!(request.order_id, order.id);
        assert_eq!(request.user_id, user_id);
        assert_eq!(request.amount, dec!(100));
        Ok(())
    }

    #[tokio::test]
    async fn test_create_order_rejects_non_positive_amount() -> Result<()> {
        let db = setup_order_db().await?;

        for amount in [dec!(0), dec!(-5)] {
            let result = create_order(&db, Uuid::new_v4(), amount, "bad".to_string()).await;
            assert!(matches!(result, Err(Error::Validation { .. })));
        }

        assert_eq!(Order::find().count(&db).await?, 0);
        assert_eq!(OutboxMessage::find().count(&db).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_create_order_is_atomic_when_outbox_insert_fails() -> Result<()> {
        let db = setup_order_db().await?;
        // The order insert succeeds, then the outbox insert fails inside the same transaction
        db.execute_unprepared("DROP TABLE outbox_messages").await?;

        let result = create_order(&db, Uuid::new_v4(), dec!(10), "lost".to_string()).await;
        assert!(matches!(result, Err(Error::Database(_))));
        assert_eq!(Order::find().count(&db).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_get_order_checks_owner() -> Result<()> {
        let db = setup_order_db().await?;
        let owner = Uuid::new_v4();
        let order = create_order(&db, owner, dec!(5), "Book".to_string()).await?;

        assert_eq!(get_order(&db, order.id, owner).await?, order);

        let other = get_order(&db, order.id, Uuid::new_v4()).await;
        assert!(matches!(other, Err(Error::NotFound { entity: "Order", .. })));

        let missing = get_order(&db, Uuid::new_v4(), owner).await;
        assert!(matches!(missing, Err(Error::NotFound { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_list_orders_only_returns_own_orders() -> Result<()> {
        let db = setup_order_db().await?;
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        create_order(&db, alice, dec!(1), "a".to_string()).await?;
        create_order(&db, alice, dec!(2), "b".to_string()).await?;
        create_order(&db, bob, dec!(3), "c".to_string()).await?;

        let orders = list_orders(&db, alice).await?;
        assert_eq!(orders.len(), 2);
        assert!(orders.iter().all(|o| o.user_id == alice));
        assert!(list_orders(&db, Uuid::new_v4()).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_status_transitions_are_monotonic() -> Result<()> {
        let db = setup_order_db().await?;
        let order = create_test_order(&db, Uuid::new_v4(), dec!(20)).await?;

        assert_eq!(
            update_status(&db, order.id, OrderStatus::Finished).await?,
            StatusChange::Applied
        );
        assert_eq!(
            update_status(&db, order.id, OrderStatus::Finished).await?,
            StatusChange::Unchanged
        );
        assert_eq!(
            update_status(&db, order.id, OrderStatus::Cancelled).await?,
            StatusChange::Rejected {
                current: OrderStatus::Finished
            }
        );

        let stored = Order::find_by_id(order.id).one(&db).await?.unwrap();
        assert_eq!(stored.status, OrderStatus::Finished);
        Ok(())
    }

    #[tokio::test]
    async fn test_apply_payment_response_maps_outcome() -> Result<()> {
        let db = setup_order_db().await?;
        let user = Uuid::new_v4();
        let paid = create_test_order(&db, user, dec!(10)).await?;
        let declined = create_test_order(&db, user, dec!(10)).await?;

        let ok = response_for(&paid, true);
        let ko = response_for(&declined, false);
        assert_eq!(apply_payment_response(&db, &ok).await?, StatusChange::Applied);
        assert_eq!(apply_payment_response(&db, &ko).await?, StatusChange::Applied);
        // Redelivery of the same response
        assert_eq!(apply_payment_response(&db, &ko).await?, StatusChange::Unchanged);

        assert_eq!(get_order(&db, paid.id, user).await?.status, OrderStatus::Finished);
        assert_eq!(
            get_order(&db, declined.id, user).await?.status,
            OrderStatus::Cancelled
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_apply_payment_response_unknown_order() -> Result<()> {
        let db = setup_order_db().await?;
        let request = PaymentRequest::new(Uuid::new_v4(), Uuid::new_v4(), dec!(1));
        let response = PaymentResponse::for_request(&request, true, "Payment completed");

        let result = apply_payment_response(&db, &response).await;
        assert!(matches!(result, Err(Error::NotFound { entity: "Order", .. })));
        Ok(())
    }
}
