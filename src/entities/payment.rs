//! Payment entity - Append-only ledger entry against an account.
//!
//! Positive amounts are credits (balance increases), negative amounts are debits
//! (order payments). Summing the entries of an account reconstructs its balance.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Ledger entry database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payments")]
pub struct Model {
    /// Entry identifier
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Account (user id) the entry belongs to
    pub account_id: Uuid,
    /// Order that caused a debit; `None` for balance top-ups
    pub order_id: Option<Uuid>,
    /// Signed amount: positive = credit, negative = debit
    pub amount: Decimal,
    /// When the entry was written
    pub created_at: DateTimeUtc,
}

/// Defines relationships between Payment and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each entry belongs to one account
    #[sea_orm(
        belongs_to = "super::account::Entity",
        from = "Column::AccountId",
        to = "super::account::Column::UserId"
    )]
    Account,
}

impl Related<super::account::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Account.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
