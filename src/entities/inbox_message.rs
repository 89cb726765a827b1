//! Inbox message entity - Records an inbound delivery by its message id.
//!
//! The unique `message_id` is the deduplication key: once `processed_at` is set,
//! every later delivery of the same message is a no-op.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Inbox message database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "inbox_messages")]
pub struct Model {
    /// Surrogate key
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Message id taken from the delivered envelope
    #[sea_orm(unique)]
    pub message_id: Uuid,
    /// Serialized JSON envelope as received
    #[sea_orm(column_type = "Text")]
    pub payload: String,
    /// When the delivery was first recorded
    pub created_at: DateTimeUtc,
    /// When the business transaction for this message committed
    pub processed_at: Option<DateTimeUtc>,
    /// Text of the last processing failure
    #[sea_orm(column_type = "Text", nullable)]
    pub last_error: Option<String>,
}

/// `InboxMessage` has no relationships with other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
