//! Outbox message entity - An envelope waiting to be relayed to the broker.
//!
//! Rows are inserted in the same transaction as the domain change they announce.
//! `processed_at` is set once the relay has published the payload and is never cleared.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Outbox message database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "outbox_messages")]
pub struct Model {
    /// Surrogate key, also the tie-breaker for rows created in the same instant
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Serialized JSON envelope
    #[sea_orm(column_type = "Text")]
    pub payload: String,
    /// When the row was written
    pub created_at: DateTimeUtc,
    /// When the relay published the payload; `None` while still pending
    pub processed_at: Option<DateTimeUtc>,
    /// Text of the last publish failure, cleared on success
    #[sea_orm(column_type = "Text", nullable)]
    pub last_error: Option<String>,
}

/// `OutboxMessage` has no relationships with other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
