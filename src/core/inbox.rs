//! Inbox data access - deduplicates inbound deliveries by message id.
//!
//! A delivery is recorded with [`record_received`] before processing starts, and
//! marked with [`mark_processed`] inside the same transaction that applies its
//! business effect. A row with `processed_at` set means the message has been
//! applied and any redelivery must be acknowledged without doing anything.

use crate::{
    entities::{InboxMessage, inbox_message},
    errors::Result,
};
use chrono::Utc;
use sea_orm::{Set, prelude::*, sea_query::{Expr, OnConflict}};
use tracing::debug;

/// Looks up the inbox row for a message id.
pub async fn find_by_message_id<C>(db: &C, message_id: Uuid) -> Result<Option<inbox_message::Model>>
where
    C: ConnectionTrait,
{
    InboxMessage::find()
        .filter(inbox_message::Column::MessageId.eq(message_id))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Whether a message has already been applied.
pub async fn is_processed<C>(db: &C, message_id: Uuid) -> Result<bool>
where
    C: ConnectionTrait,
{
    Ok(find_by_message_id(db, message_id)
        .await?
        .is_some_and(|row| row.processed_at.is_some()))
}

/// Records that a message was received, unless a row for it already exists.
///
/// Concurrent inserts of the same message id are absorbed by the unique index
/// (`ON CONFLICT DO NOTHING`). Returns whether a new row was written.
pub async fn record_received<C>(db: &C, message_id: Uuid, payload: &str) -> Result<bool>
where
    C: ConnectionTrait,
{
    let row = inbox_message::ActiveModel {
        message_id: Set(message_id),
        payload: Set(payload.to_owned()),
        created_at: Set(Utc::now()),
        processed_at: Set(None),
        last_error: Set(None),
        ..Default::default()
    };

    let inserted = InboxMessage::insert(row)
        .on_conflict(
            OnConflict::column(inbox_message::Column::MessageId)
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;

    debug!(%message_id, inserted = inserted > 0, "Inbox row recorded");
    Ok(inserted > 0)
}

/// Marks the inbox row as applied. Call inside the business transaction.
pub async fn mark_processed<C>(db: &C, id: i64) -> Result<()>
where
    C: ConnectionTrait,
{
    InboxMessage::update_many()
        .col_expr(
            inbox_message::Column::ProcessedAt,
            Expr::value(Some(Utc::now())),
        )
        .col_expr(
            inbox_message::Column::LastError,
            Expr::value(Option::<String>::None),
        )
        .filter(inbox_message::Column::Id.eq(id))
        .filter(inbox_message::Column::ProcessedAt.is_null())
        .exec(db)
        .await?;
    Ok(())
}

/// Stores the text of the last processing failure for an unprocessed message.
pub async fn record_failure<C>(db: &C, message_id: Uuid, error: &str) -> Result<()>
where
    C: ConnectionTrait,
{
    InboxMessage::update_many()
        .col_expr(
            inbox_message::Column::LastError,
            Expr::value(Some(error.to_owned())),
        )
        .filter(inbox_message::Column::MessageId.eq(message_id))
        .filter(inbox_message::Column::ProcessedAt.is_null())
        .exec(db)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::test_utils::setup_payment_db;
    use sea_orm::PaginatorTrait;

    #[tokio::test]
    async fn test_record_received_deduplicates() -> Result<()> {
        let db = setup_payment_db().await?;
        let message_id = Uuid::new_v4();

        assert!(record_received(&db, message_id, "{}").await?);
        assert!(!record_received(&db, message_id, "{}").await?);
        assert_eq!(InboxMessage::find().count(&db).await?, 1);
        assert!(!is_processed(&db, message_id).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_mark_processed_and_failure_text() -> Result<()> {
        let db = setup_payment_db().await?;
        let message_id = Uuid::new_v4();
        record_received(&db, message_id, "{}").await?;

        record_failure(&db, message_id, "Account not found").await?;
        let row = find_by_message_id(&db, message_id).await?.unwrap();
        assert_eq!(row.last_error.as_deref(), Some("Account not found"));

        mark_processed(&db, row.id).await?;
        assert!(is_processed(&db, message_id).await?);
        let row = find_by_message_id(&db, message_id).await?.unwrap();
        assert!(row.last_error.is_none());

        // Failures after processing are not recorded
        record_failure(&db, message_id, "late").await?;
        let row = find_by_message_id(&db, message_id).await?.unwrap();
        assert!(row.last_error.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_message_is_not_processed() -> Result<()> {
        let db = setup_payment_db().await?;
        assert!(!is_processed(&db, Uuid::new_v4()).await?);
        assert!(find_by_message_id(&db, Uuid::new_v4()).await?.is_none());
        Ok(())
    }
}
