//! Outbox data access.
//!
//! [`enqueue`] must be called with the same transaction as the domain change it
//! announces. The relay reads pending rows with [`fetch_pending`] and settles each
//! one with [`mark_processed`] or [`record_failure`].

use crate::{
    entities::{OutboxMessage, outbox_message},
    errors::Result,
    messages::Envelope,
};
use chrono::Utc;
use sea_orm::{PaginatorTrait, QueryOrder, QuerySelect, Set, prelude::*, sea_query::Expr};
use tracing::debug;

/// Serializes `envelope` and inserts it as a pending outbox row.
pub async fn enqueue<C, M>(db: &C, envelope: &M) -> Result<outbox_message::Model>
where
    C: ConnectionTrait,
    M: Envelope,
{
    let row = outbox_message::ActiveModel {
        payload: Set(envelope.to_json()?),
        created_at: Set(Utc::now()),
        processed_at: Set(None),
        last_error: Set(None),
        ..Default::default()
    };
    let row = row.insert(db).await?;
    debug!(
        outbox_id = row.id,
        kind = M::KIND,
        message_id = %envelope.message_id(),
        "Envelope written to outbox"
    );
    Ok(row)
}

/// Returns up to `limit` unprocessed rows, oldest first.
pub async fn fetch_pending<C>(db: &C, limit: u64) -> Result<Vec<outbox_message::Model>>
where
    C: ConnectionTrait,
{
    OutboxMessage::find()
        .filter(outbox_message::Column::ProcessedAt.is_null())
        .order_by_asc(outbox_message::Column::CreatedAt)
        .order_by_asc(outbox_message::Column::Id)
        .limit(limit)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Marks a row as published and clears its last error.
///
/// Only rows that are still pending are touched, so `processed_at` is never
/// overwritten once set. Returns whether the row was updated.
pub async fn mark_processed<C>(db: &C, id: i64) -> Result<bool>
where
    C: ConnectionTrait,
{
    let result = OutboxMessage::update_many()
        .col_expr(
            outbox_message::Column::ProcessedAt,
            Expr::value(Some(Utc::now())),
        )
        .col_expr(
            outbox_message::Column::LastError,
            Expr::value(Option::<String>::None),
        )
        .filter(outbox_message::Column::Id.eq(id))
        .filter(outbox_message::Column::ProcessedAt.is_null())
        .exec(db)
        .await?;
    Ok(result.rows_affected > 0)
}

/// Records why publishing a row failed; the row stays pending.
pub async fn record_failure<C>(db: &C, id: i64, error: &str) -> Result<()>
where
    C: ConnectionTrait,
{
    OutboxMessage::update_many()
        .col_expr(
            outbox_message::Column::LastError,
            Expr::value(Some(error.to_owned())),
        )
        .filter(outbox_message::Column::Id.eq(id))
        .filter(outbox_message::Column::ProcessedAt.is_null())
        .exec(db)
        .await?;
    Ok(())
}

/// Number of rows that have not been published yet.
pub async fn count_pending<C>(db: &C) -> Result<u64>
where
    C: ConnectionTrait,
{
    OutboxMessage::find()
        .filter(outbox_message::Column::ProcessedAt.is_null())
        .count(db)
        .await
        .map_err(Into::into)
}

/// Every outbox row, oldest first.
pub async fn list_all<C>(db: &C) -> Result<Vec<outbox_message::Model>>
where
    C: ConnectionTrait,
{
    OutboxMessage::find()
        .order_by_asc(outbox_message::Column::CreatedAt)
        .order_by_asc(outbox_message::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::messages::PaymentRequest;
    use crate::test_utils::setup_order_db;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn request(amount: rust_decimal::Decimal) -> PaymentRequest {
        PaymentRequest::new(Uuid::new_v4(), Uuid::new_v4(), amount)
    }

    #[tokio::test]
    async fn test_enqueue_stores_serialized_envelope() -> Result<()> {
        let db = setup_order_db().await?;
        let envelope = request(dec!(12.5));

        let row = enqueue(&db, &envelope).await?;
        assert!(row.processed_at.is_none());
        assert!(row.last_error.is_none());

        let decoded = PaymentRequest::from_json(row.payload.as_bytes())?;
        assert_eq!(decoded, envelope);
        Ok(())
    }

    #[tokio::test]
    async fn test_fetch_pending_is_oldest_first_and_bounded() -> Result<()> {
        let db = setup_order_db().await?;
        let mut ids = Vec::new();
        for i in 1..=5 {
            ids.push(enqueue(&db, &request(Decimal::from(i))).await?.id);
        }

        let batch = fetch_pending(&db, 3).await?;
        assert_eq!(batch.iter().map(|m| m.id).collect::<Vec<_>>(), ids[..3]);

        mark_processed(&db, ids[0]).await?;
        let batch = fetch_pending(&db, 10).await?;
        assert_eq!(batch.iter().map(|m| m.id).collect::<Vec<_>>(), ids[1..]);
        Ok(())
    }

    #[tokio::test]
    async fn test_mark_processed_is_permanent() -> Result<()> {
        let db = setup_order_db().await?;
        let row = enqueue(&db, &request(dec!(1))).await?;

        record_failure(&db, row.id, "broker unreachable").await?;
        let failed = OutboxMessage::find_by_id(row.id).one(&db).await?.unwrap();
        assert_eq!(failed.last_error.as_deref(), Some("broker unreachable"));
        assert!(failed.processed_at.is_none());

        assert!(mark_processed(&db, row.id).await?);
        let processed = OutboxMessage::find_by_id(row.id).one(&db).await?.unwrap();
        let first_processed_at = processed.processed_at.unwrap();
        assert!(processed.last_error.is_none());

        // A second mark or a late failure must not touch a processed row
        assert!(!mark_processed(&db, row.id).await?);
        record_failure(&db, row.id, "late failure").await?;
        let unchanged = OutboxMessage::find_by_id(row.id).one(&db).await?.unwrap();
        assert_eq!(unchanged.processed_at, Some(first_processed_at));
        assert!(unchanged.last_error.is_none());

        assert_eq!(count_pending(&db).await?, 0);
        Ok(())
    }
}
